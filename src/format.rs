//! 显示格式化
//!
//! 会话列表使用的相对时间与最后一条消息预览。

use chrono::{DateTime, Utc};

use crate::models::Conversation;

/// 相对时间：`3d ago` / `5h ago` / `12m ago` / `Just now`
///
/// 无法解析的时间戳返回空字符串。
pub fn format_relative_time(timestamp: &str, now: DateTime<Utc>) -> String {
    let Ok(at) = DateTime::parse_from_rfc3339(timestamp) else {
        return String::new();
    };
    let diff = now.signed_duration_since(at.with_timezone(&Utc));

    let days = diff.num_days();
    let hours = diff.num_hours();
    let minutes = diff.num_minutes();

    if days > 0 {
        format!("{}d ago", days)
    } else if hours > 0 {
        format!("{}h ago", hours)
    } else if minutes > 0 {
        format!("{}m ago", minutes)
    } else {
        "Just now".to_string()
    }
}

/// 以当前时间计算的相对时间
pub fn relative_time(timestamp: &str) -> String {
    format_relative_time(timestamp, Utc::now())
}

/// 会话预览：最后一条消息由自己发送时加 `You: ` 前缀
pub fn conversation_preview(conversation: &Conversation, me: &str) -> String {
    let last = &conversation.last_message;
    if last.sender_id() == me {
        format!("You: {}", last.text)
    } else {
        last.text.clone()
    }
}
