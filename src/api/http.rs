//! 基于 reqwest 的 REST 接口实现
//!
//! 所有请求发往 `{server_url}/api/...`，非 2xx 响应统一转换为
//! `ClientError::Rejected`，错误文案取响应体中的 `error` 字段。

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::RemoteApi;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::models::{ChatMessage, Conversation, Item, ItemDraft, RawNotification, User};

// ============================================================================
// 响应包装
// ============================================================================

/// 错误响应体
#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Deserialize)]
struct ItemsEnvelope {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Deserialize)]
struct UsersEnvelope {
    #[serde(default)]
    users: Vec<User>,
}

/// 物品接口有时返回 `{ item }`，有时直接返回物品
#[derive(Deserialize)]
#[serde(untagged)]
enum ItemEnvelope {
    Wrapped { item: Item },
    Bare(Item),
}

impl ItemEnvelope {
    fn into_item(self) -> Item {
        match self {
            ItemEnvelope::Wrapped { item } => item,
            ItemEnvelope::Bare(item) => item,
        }
    }
}

// ============================================================================
// HTTP 客户端
// ============================================================================

/// REST 接口客户端
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    config: ClientConfig,
}

impl HttpApi {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .cookie_store(true)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        self.config.api_url(path)
    }

    /// 检查响应状态，非 2xx 转换为远端拒绝
    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.or(b.message))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            });

        tracing::warn!("[Api] 请求被拒绝 ({}): {}", status.as_u16(), message);
        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let response = Self::check(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        tracing::debug!("[Api] GET {}", url);
        let response = self.client.get(&url).send().await?;
        Self::read_json(response).await
    }

    async fn expect_ok(response: Response) -> Result<(), ClientError> {
        Self::check(response).await.map(|_| ())
    }

    /// 构造物品表单（可附带本地照片）
    async fn item_form(owner_id: Option<&str>, draft: &ItemDraft) -> Result<Form, ClientError> {
        let mut form = Form::new()
            .text("name", draft.name.clone())
            .text("description", draft.description.clone());
        if let Some(owner_id) = owner_id {
            form = form.text("owner", owner_id.to_string());
        }

        if let Some(path) = &draft.photo_path {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| ClientError::precondition(format!("无法读取照片 {:?}: {}", path, e)))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "photo.jpg".to_string());
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            let part = Part::bytes(bytes)
                .file_name(file_name)
                .mime_str(mime.essence_str())?;
            form = form.part("image", part);
        }

        Ok(form)
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    // ========== auth ==========

    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("auth/register"))
            .json(&json!({ "username": username, "email": email, "password": password }))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn login(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let response = self
            .client
            .post(self.url("auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let envelope: UserEnvelope = Self::read_json(response).await?;
        Ok(envelope.user)
    }

    async fn logout(&self) -> Result<(), ClientError> {
        let response = self.client.post(self.url("auth/logout")).send().await?;
        Self::expect_ok(response).await
    }

    // ========== items ==========

    async fn list_items(&self, user_id: &str) -> Result<Vec<Item>, ClientError> {
        let response = self
            .client
            .get(self.url("items"))
            .query(&[("userId", user_id)])
            .send()
            .await?;
        let envelope: ItemsEnvelope = Self::read_json(response).await?;
        Ok(envelope.items)
    }

    async fn create_item(&self, owner_id: &str, draft: &ItemDraft) -> Result<Item, ClientError> {
        let form = Self::item_form(Some(owner_id), draft).await?;
        let response = self
            .client
            .post(self.url("items"))
            .multipart(form)
            .send()
            .await?;
        let envelope: ItemEnvelope = Self::read_json(response).await?;
        Ok(envelope.into_item())
    }

    async fn update_item(&self, item_id: &str, draft: &ItemDraft) -> Result<Item, ClientError> {
        let form = Self::item_form(None, draft).await?;
        let response = self
            .client
            .put(self.url(&format!("items/{}", item_id)))
            .multipart(form)
            .send()
            .await?;
        let envelope: ItemEnvelope = Self::read_json(response).await?;
        Ok(envelope.into_item())
    }

    async fn delete_item(&self, item_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(self.url(&format!("items/{}", item_id)))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn star_item(&self, item_id: &str, user_id: &str) -> Result<Item, ClientError> {
        let response = self
            .client
            .post(self.url(&format!("items/{}/star", item_id)))
            .json(&json!({ "userId": user_id }))
            .send()
            .await?;
        let envelope: ItemEnvelope = Self::read_json(response).await?;
        Ok(envelope.into_item())
    }

    // ========== users ==========

    async fn list_users(&self, exclude_user_id: &str) -> Result<Vec<User>, ClientError> {
        let response = self
            .client
            .get(self.url("users"))
            .query(&[("exclude", exclude_user_id)])
            .send()
            .await?;
        let envelope: UsersEnvelope = Self::read_json(response).await?;
        Ok(envelope.users)
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ClientError> {
        self.get_json(&format!("users/{}", user_id)).await
    }

    async fn update_profile(
        &self,
        user_id: &str,
        username: &str,
        email: &str,
    ) -> Result<User, ClientError> {
        let response = self
            .client
            .put(self.url(&format!("users/{}/profile", user_id)))
            .json(&json!({ "username": username, "email": email }))
            .send()
            .await?;
        let envelope: UserEnvelope = Self::read_json(response).await?;
        Ok(envelope.user)
    }

    // ========== notifications ==========

    async fn list_notifications(
        &self,
        user_id: &str,
    ) -> Result<Vec<RawNotification>, ClientError> {
        self.get_json(&format!("notifications/{}", user_id)).await
    }

    async fn create_trader_request(
        &self,
        sender_id: &str,
        receiver_id: &str,
        message: &str,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("notifications"))
            .json(&json!({
                "senderId": sender_id,
                "receiverId": receiver_id,
                "message": message,
            }))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn accept_trader_request(&self, notification_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .put(self.url(&format!("notifications/{}/accept", notification_id)))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn reject_trader_request(&self, notification_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(self.url(&format!("notifications/{}", notification_id)))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn mark_notifications_read(
        &self,
        notification_ids: &[String],
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .put(self.url("notifications/read"))
            .json(&json!({ "ids": notification_ids }))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    // ========== trades ==========

    async fn create_trade(
        &self,
        sender_id: &str,
        receiver_id: &str,
        offered_item_id: &str,
        requested_item_id: &str,
    ) -> Result<(), ClientError> {
        tracing::debug!("[Api] POST trades: {} -> {}", sender_id, receiver_id);
        let response = self
            .client
            .post(self.url("trades"))
            .json(&json!({
                "senderId": sender_id,
                "receiverId": receiver_id,
                "offeredItemId": offered_item_id,
                "requestedItemId": requested_item_id,
            }))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn accept_trade(&self, trade_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .put(self.url(&format!("trades/{}/accept", trade_id)))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn reject_trade(&self, trade_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .put(self.url(&format!("trades/{}/reject", trade_id)))
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    async fn list_trade_offers(&self, user_id: &str) -> Result<Vec<RawNotification>, ClientError> {
        self.get_json(&format!("trades/trades/{}", user_id)).await
    }

    // ========== messages ==========

    async fn post_message(
        &self,
        message: &ChatMessage,
    ) -> Result<Option<ChatMessage>, ClientError> {
        let response = self
            .client
            .post(self.url("messages"))
            .json(message)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let bytes = response.bytes().await?;
        // 确认体格式不固定，解析失败时只认为写入成功
        Ok(serde_json::from_slice::<ChatMessage>(&bytes).ok())
    }

    async fn list_messages(
        &self,
        user_id: &str,
        other_user_id: &str,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        self.get_json(&format!("messages/{}/{}", user_id, other_user_id))
            .await
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ClientError> {
        self.get_json(&format!("messages/conversations/{}", user_id))
            .await
    }
}
