//! 测试替身
//!
//! `FakeApi`：可编程的远端接口，记录每次调用，可按接口名注入失败。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::api::RemoteApi;
use crate::error::ClientError;
use crate::models::{
    ChatMessage, Conversation, Item, ItemDraft, RawNotification, User, UserRef,
};
use crate::session::{SessionContext, SessionIdentity};
use crate::storage::{KeyValueStore, MemoryStore};

#[derive(Default)]
pub struct FakeState {
    pub notifications: Vec<RawNotification>,
    pub trade_offers: Vec<RawNotification>,
    pub conversations: Vec<Conversation>,
    pub messages: Vec<ChatMessage>,
    pub items: Vec<Item>,
    pub users: Vec<User>,
    /// 调用记录，如 "accept_trade:t1"
    pub calls: Vec<String>,
    /// 需要失败的接口名
    pub failing: HashSet<String>,
    /// post_message 是否回传确认副本
    pub echo_posts: bool,
}

#[derive(Default, Clone)]
pub struct FakeApi {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.state.lock().echo_posts = true;
        api
    }

    pub fn fail(&self, name: &str) {
        self.state.lock().failing.insert(name.to_string());
    }

    pub fn heal(&self, name: &str) {
        self.state.lock().failing.remove(name);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, name: &str, arg: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if arg.is_empty() {
            state.calls.push(name.to_string());
        } else {
            state.calls.push(format!("{}:{}", name, arg));
        }
        if state.failing.contains(name) {
            return Err(ClientError::Network(format!("{} unreachable", name)));
        }
        Ok(())
    }
}

pub fn raw_notification(id: &str, kind: &str, sender: Option<(&str, &str)>) -> RawNotification {
    RawNotification {
        id: id.to_string(),
        notif_type: Some(kind.to_string()),
        message: format!("notification {}", id),
        is_read: false,
        sender: sender.map(|(id, name)| UserRef::Object {
            id: id.to_string(),
            username: Some(name.to_string()),
        }),
        sender_id: sender.map(|(id, _)| id.to_string()),
        receiver_id: Some("me".to_string()),
        trade_id: None,
        created_at: None,
    }
}

pub fn raw_trade(id: &str, trade_id: &str, sender: Option<(&str, &str)>) -> RawNotification {
    RawNotification {
        trade_id: Some(trade_id.to_string()),
        ..raw_notification(id, "trade_offer", sender)
    }
}

pub fn conversation(other: &str, text: &str, unread: u32) -> Conversation {
    serde_json::from_value(serde_json::json!({
        "otherUser": { "_id": other, "username": other },
        "lastMessage": { "text": text, "sender": other, "createdAt": "2024-01-01T00:00:00Z" },
        "unreadCount": unread,
    }))
    .expect("valid conversation")
}

pub fn server_message(id: &str, client_id: Option<&str>, from: &str, to: &str, text: &str, at: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        client_id: client_id.map(str::to_string),
        sender_id: from.to_string(),
        receiver_id: to.to_string(),
        text: text.to_string(),
        timestamp: at.to_string(),
        status: Default::default(),
    }
}

/// 已登录为 `me` 的会话
pub fn signed_in_session() -> Arc<SessionContext> {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let ctx = SessionContext::load(store).expect("memory store");
    ctx.sign_in(SessionIdentity {
        user_id: "me".to_string(),
        username: "myself".to_string(),
    })
    .expect("memory store");
    ctx
}

pub fn signed_out_session() -> Arc<SessionContext> {
    SessionContext::load(Arc::new(MemoryStore::new())).expect("memory store")
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn register(&self, username: &str, _email: &str, _password: &str) -> Result<(), ClientError> {
        self.record("register", username)
    }

    async fn login(&self, email: &str, _password: &str) -> Result<User, ClientError> {
        self.record("login", email)?;
        Ok(User {
            id: "\"me\"".to_string(),
            username: "myself".to_string(),
            email: Some(email.to_string()),
            profile_image: None,
        })
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.record("logout", "")
    }

    async fn list_items(&self, user_id: &str) -> Result<Vec<Item>, ClientError> {
        self.record("list_items", user_id)?;
        Ok(self.state.lock().items.clone())
    }

    async fn create_item(&self, owner_id: &str, draft: &ItemDraft) -> Result<Item, ClientError> {
        self.record("create_item", &draft.name)?;
        let item = Item {
            id: format!("item-{}", draft.name),
            name: draft.name.clone(),
            description: draft.description.clone(),
            image_url: None,
            owner: UserRef::Id(owner_id.to_string()),
            star_count: 0,
            starred_by: Vec::new(),
            created_at: None,
        };
        self.state.lock().items.push(item.clone());
        Ok(item)
    }

    async fn update_item(&self, item_id: &str, draft: &ItemDraft) -> Result<Item, ClientError> {
        self.record("update_item", item_id)?;
        let mut state = self.state.lock();
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(ClientError::Rejected {
                status: 404,
                message: "Item not found".to_string(),
            })?;
        item.name = draft.name.clone();
        item.description = draft.description.clone();
        Ok(item.clone())
    }

    async fn delete_item(&self, item_id: &str) -> Result<(), ClientError> {
        self.record("delete_item", item_id)?;
        self.state.lock().items.retain(|i| i.id != item_id);
        Ok(())
    }

    async fn star_item(&self, item_id: &str, user_id: &str) -> Result<Item, ClientError> {
        self.record("star_item", item_id)?;
        let mut state = self.state.lock();
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(ClientError::Rejected {
                status: 404,
                message: "Item not found".to_string(),
            })?;
        if item.starred_by_user(user_id) {
            item.starred_by.retain(|u| u != user_id);
            item.star_count = item.star_count.saturating_sub(1);
        } else {
            item.starred_by.push(user_id.to_string());
            item.star_count += 1;
        }
        Ok(item.clone())
    }

    async fn list_users(&self, exclude_user_id: &str) -> Result<Vec<User>, ClientError> {
        self.record("list_users", exclude_user_id)?;
        Ok(self
            .state
            .lock()
            .users
            .iter()
            .filter(|u| u.id != exclude_user_id)
            .cloned()
            .collect())
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ClientError> {
        self.record("get_user", user_id)?;
        self.state
            .lock()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or(ClientError::Rejected {
                status: 404,
                message: "User not found".to_string(),
            })
    }

    async fn update_profile(&self, user_id: &str, username: &str, email: &str) -> Result<User, ClientError> {
        self.record("update_profile", user_id)?;
        Ok(User {
            id: user_id.to_string(),
            username: username.to_string(),
            email: Some(email.to_string()),
            profile_image: None,
        })
    }

    async fn list_notifications(&self, user_id: &str) -> Result<Vec<RawNotification>, ClientError> {
        self.record("list_notifications", user_id)?;
        Ok(self.state.lock().notifications.clone())
    }

    async fn create_trader_request(&self, _sender_id: &str, receiver_id: &str, _message: &str) -> Result<(), ClientError> {
        self.record("create_trader_request", receiver_id)
    }

    async fn accept_trader_request(&self, notification_id: &str) -> Result<(), ClientError> {
        self.record("accept_trader_request", notification_id)?;
        self.state.lock().notifications.retain(|n| n.id != notification_id);
        Ok(())
    }

    async fn reject_trader_request(&self, notification_id: &str) -> Result<(), ClientError> {
        self.record("reject_trader_request", notification_id)?;
        self.state.lock().notifications.retain(|n| n.id != notification_id);
        Ok(())
    }

    async fn mark_notifications_read(&self, notification_ids: &[String]) -> Result<(), ClientError> {
        self.record("mark_notifications_read", &notification_ids.join(","))
    }

    async fn create_trade(
        &self,
        _sender_id: &str,
        receiver_id: &str,
        offered_item_id: &str,
        requested_item_id: &str,
    ) -> Result<(), ClientError> {
        self.record(
            "create_trade",
            &format!("{}:{}->{}", receiver_id, offered_item_id, requested_item_id),
        )
    }

    async fn accept_trade(&self, trade_id: &str) -> Result<(), ClientError> {
        self.record("accept_trade", trade_id)?;
        self.state
            .lock()
            .trade_offers
            .retain(|n| n.trade_id.as_deref() != Some(trade_id));
        Ok(())
    }

    async fn reject_trade(&self, trade_id: &str) -> Result<(), ClientError> {
        self.record("reject_trade", trade_id)?;
        self.state
            .lock()
            .trade_offers
            .retain(|n| n.trade_id.as_deref() != Some(trade_id));
        Ok(())
    }

    async fn list_trade_offers(&self, user_id: &str) -> Result<Vec<RawNotification>, ClientError> {
        self.record("list_trade_offers", user_id)?;
        Ok(self.state.lock().trade_offers.clone())
    }

    async fn post_message(&self, message: &ChatMessage) -> Result<Option<ChatMessage>, ClientError> {
        self.record("post_message", &message.text)?;
        let mut state = self.state.lock();
        let mut stored = message.clone();
        stored.id = format!("srv-{}", state.messages.len() + 1);
        state.messages.push(stored.clone());
        Ok(state.echo_posts.then_some(stored))
    }

    async fn list_messages(&self, user_id: &str, other_user_id: &str) -> Result<Vec<ChatMessage>, ClientError> {
        self.record("list_messages", other_user_id)?;
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .filter(|m| m.is_between(user_id, other_user_id))
            .cloned()
            .collect())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ClientError> {
        self.record("list_conversations", user_id)?;
        Ok(self.state.lock().conversations.clone())
    }
}
