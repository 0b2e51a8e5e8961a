//! 交易伙伴
//!
//! 发送交易伙伴请求，以及带 "已发送" 标记的候选用户列表。
//! 已发送标记保存在本地键值存储：`request_sent_{me}_{receiver}`。

use serde::Serialize;
use std::sync::Arc;

use crate::api::RemoteApi;
use crate::error::{Alert, ClientError};
use crate::events::EventBus;
use crate::models::{NotificationKind, User};
use crate::session::{SessionContext, SessionIdentity};
use crate::storage::request_sent_key;

/// 请求消息中的固定片段，用于识别已发出的请求
const TRADER_REQUEST_SUFFIX: &str = "wants to add you as a trader";

/// 候选交易伙伴
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(flatten)]
    pub user: User,
    pub request_sent: bool,
}

/// 交易伙伴服务
pub struct Partners {
    api: Arc<dyn RemoteApi>,
    session: Arc<SessionContext>,
    events: EventBus,
}

impl Partners {
    pub fn new(api: Arc<dyn RemoteApi>, session: Arc<SessionContext>, events: EventBus) -> Self {
        Self {
            api,
            session,
            events,
        }
    }

    fn identity(&self) -> Result<SessionIdentity, ClientError> {
        self.session.current().ok_or_else(|| {
            let err = ClientError::precondition("User info not loaded yet. Please wait a moment.");
            self.events.alert(err.to_alert("Error"));
            err
        })
    }

    fn request_flag(&self, me: &str, receiver_id: &str) -> bool {
        match self.session.store().get(&request_sent_key(me, receiver_id)) {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                tracing::warn!("[Partners] 读取本地标记失败: {}", e);
                false
            }
        }
    }

    /// 发送交易伙伴请求
    pub async fn send_trader_request(&self, receiver_id: &str) -> Result<(), ClientError> {
        let me = self.identity()?;
        let message = format!("{} {}.", me.username, TRADER_REQUEST_SUFFIX);

        tracing::info!("[Partners] 发送交易伙伴请求: {} -> {}", me.user_id, receiver_id);
        if let Err(e) = self
            .api
            .create_trader_request(&me.user_id, receiver_id, &message)
            .await
        {
            tracing::warn!("[Partners] 发送请求失败: {}", e);
            self.events.alert(e.to_alert("Error"));
            return Err(e);
        }

        if let Err(e) = self
            .session
            .store()
            .set(&request_sent_key(&me.user_id, receiver_id), "true")
        {
            tracing::warn!("[Partners] 写入本地标记失败: {}", e);
        }
        self.events
            .alert(Alert::success("Success", "Trader request sent!"));
        Ok(())
    }

    /// 候选用户（排除自己），标注是否已发送过请求
    pub async fn candidates(&self) -> Result<Vec<Candidate>, ClientError> {
        let me = self.identity()?;

        let (users, notifications) = tokio::join!(
            self.api.list_users(&me.user_id),
            self.api.list_notifications(&me.user_id),
        );
        let users = match users {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!("[Partners] 拉取用户列表失败: {}", e);
                self.events.alert(e.to_alert("Error"));
                return Err(e);
            }
        };
        // 通知拉取失败只影响标注，不影响列表
        let notifications = notifications.unwrap_or_else(|e| {
            tracing::warn!("[Partners] 拉取通知失败: {}", e);
            Vec::new()
        });

        let pending: Vec<String> = notifications
            .into_iter()
            .filter(|n| n.notif_type.as_deref() == Some(NotificationKind::TraderRequest.wire_type()))
            .map(|n| n.into_notification(NotificationKind::TraderRequest))
            .filter(|n| {
                n.sender_id.as_deref() == Some(me.user_id.as_str())
                    && n.message.contains(TRADER_REQUEST_SUFFIX)
            })
            .filter_map(|n| n.receiver_id)
            .collect();

        Ok(users
            .into_iter()
            .map(|user| {
                let request_sent =
                    pending.contains(&user.id) || self.request_flag(&me.user_id, &user.id);
                Candidate { user, request_sent }
            })
            .collect())
    }
}
