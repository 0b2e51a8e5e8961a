//! 数据类型定义
//!
//! 定义客户端使用的数据结构，包括：
//! - `Notification`: 交易伙伴请求 / 交易报价通知
//! - `Conversation`: 会话摘要（最后一条消息 + 未读数）
//! - `ChatMessage`: 聊天消息（带本地投递状态）
//! - `Item` / `User`: 物品、用户
//!
//! 服务器返回的字段使用 Mongo 风格（`_id`、camelCase），
//! 部分字段既可能是字符串 ID，也可能是展开的对象，统一用 `UserRef` 接收。

use serde::{Deserialize, Serialize};

// ============================================================================
// 通用引用
// ============================================================================

/// 用户引用：服务器有时返回 ID 字符串，有时返回展开的用户对象
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UserRef {
    Id(String),
    Object {
        #[serde(rename = "_id")]
        id: String,
        #[serde(default)]
        username: Option<String>,
    },
}

impl UserRef {
    pub fn id(&self) -> &str {
        match self {
            UserRef::Id(id) => id,
            UserRef::Object { id, .. } => id,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            UserRef::Id(_) => None,
            UserRef::Object { username, .. } => username.as_deref(),
        }
    }
}

/// 去掉存储值中残留的 JSON 引号
pub fn clean_id(raw: &str) -> String {
    raw.trim().replace('"', "")
}

// ============================================================================
// 通知
// ============================================================================

/// 通知类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// 交易伙伴（好友）请求
    TraderRequest,
    /// 交易报价
    TradeOffer,
}

impl NotificationKind {
    /// 服务器端 `type` 字段取值
    pub fn wire_type(&self) -> &'static str {
        match self {
            NotificationKind::TraderRequest => "friend_request",
            NotificationKind::TradeOffer => "trade_offer",
        }
    }

    pub const ALL: [NotificationKind; 2] =
        [NotificationKind::TraderRequest, NotificationKind::TradeOffer];
}

/// 服务器返回的原始通知
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNotification {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub notif_type: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub sender: Option<UserRef>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub trade_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl RawNotification {
    /// 转换为带类别标记的通知
    pub fn into_notification(self, kind: NotificationKind) -> Notification {
        let sender_id = self
            .sender
            .as_ref()
            .map(|s| s.id().to_string())
            .or_else(|| self.sender_id.clone());
        let related_party_name = self
            .sender
            .as_ref()
            .and_then(|s| s.username())
            .map(str::to_string);
        // 交易报价的 ID 以 tradeId 为准
        let id = if self.id.is_empty() {
            self.trade_id.clone().unwrap_or_default()
        } else {
            self.id
        };

        Notification {
            id,
            kind,
            message: self.message,
            is_read: self.is_read,
            related_party_id: sender_id.clone(),
            related_party_name,
            trade_id: self.trade_id,
            sender_id,
            receiver_id: self.receiver_id,
            created_at: self.created_at,
        }
    }
}

/// 通知
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub message: String,
    pub is_read: bool,
    /// 对方用户 ID（发送者）
    pub related_party_id: Option<String>,
    /// 对方用户名
    pub related_party_name: Option<String>,
    pub trade_id: Option<String>,
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub created_at: Option<String>,
}

impl Notification {
    /// 接受 / 拒绝时使用的目标 ID
    pub fn action_target(&self) -> &str {
        match self.kind {
            NotificationKind::TradeOffer => self.trade_id.as_deref().unwrap_or(&self.id),
            NotificationKind::TraderRequest => &self.id,
        }
    }

    /// 对方信息（用于跳转聊天）
    pub fn counterpart(&self) -> Option<Counterpart> {
        self.related_party_id
            .as_ref()
            .filter(|id| !id.is_empty())
            .map(|id| Counterpart {
                user_id: id.clone(),
                username: self
                    .related_party_name
                    .clone()
                    .unwrap_or_else(|| "Unknown User".to_string()),
            })
    }
}

/// 聊天对象
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Counterpart {
    pub user_id: String,
    pub username: String,
}

// ============================================================================
// 会话
// ============================================================================

/// 会话最后一条消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "sender")]
    pub sender: UserRef,
    #[serde(rename = "createdAt", default)]
    pub timestamp: String,
}

impl LastMessage {
    pub fn sender_id(&self) -> &str {
        self.sender.id()
    }
}

/// 会话摘要（只读，由服务器按用户对派生）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub other_user: UserRef,
    pub last_message: LastMessage,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    pub fn other_user_id(&self) -> &str {
        self.other_user.id()
    }

    pub fn other_username(&self) -> &str {
        self.other_user.username().unwrap_or("Unknown User")
    }

    pub fn counterpart(&self) -> Counterpart {
        Counterpart {
            user_id: self.other_user_id().to_string(),
            username: self.other_username().to_string(),
        }
    }
}

// ============================================================================
// 聊天消息
// ============================================================================

/// 本地投递状态（不序列化到服务器）
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// 已乐观显示，等待服务器确认
    Pending,
    /// 服务器已确认
    #[default]
    Confirmed,
    /// 持久化失败，可重试
    Failed,
}

/// 聊天消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// 服务器分配的 ID（未确认前为空）
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// 客户端生成的 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(rename = "sender", deserialize_with = "de_user_ref_id")]
    pub sender_id: String,
    #[serde(rename = "receiver", deserialize_with = "de_user_ref_id")]
    pub receiver_id: String,
    pub text: String,
    #[serde(rename = "createdAt", default)]
    pub timestamp: String,
    #[serde(skip)]
    pub status: DeliveryStatus,
}

impl ChatMessage {
    /// 去重键：优先客户端 ID，其次服务器 ID
    pub fn key(&self) -> &str {
        match &self.client_id {
            Some(client_id) if !client_id.is_empty() => client_id,
            _ => &self.id,
        }
    }

    /// 是否属于 (a, b) 这一对用户之间的会话
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

/// 接收字符串或 `{_id}` 对象，只保留 ID
fn de_user_ref_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    UserRef::deserialize(deserializer).map(|r| clean_id(r.id()))
}

// ============================================================================
// 物品 / 用户
// ============================================================================

/// 物品
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "image")]
    pub image_url: Option<String>,
    #[serde(rename = "owner")]
    pub owner: UserRef,
    #[serde(default, alias = "stars")]
    pub star_count: u32,
    #[serde(default)]
    pub starred_by: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Item {
    pub fn owner_id(&self) -> String {
        clean_id(self.owner.id())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id() == clean_id(user_id)
    }

    pub fn starred_by_user(&self, user_id: &str) -> bool {
        self.starred_by.iter().any(|id| id == user_id)
    }
}

/// 新建 / 编辑物品
#[derive(Debug, Clone, Default)]
pub struct ItemDraft {
    pub name: String,
    pub description: String,
    /// 本地照片路径（可选）
    pub photo_path: Option<std::path::PathBuf>,
}

/// 用户
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_image: Option<String>,
}
