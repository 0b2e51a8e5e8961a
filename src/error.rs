//! 错误类型模块
//!
//! 客户端所有失败归为三类：
//! - 网络失败：请求抛错、连接失败、超时
//! - 远端拒绝：非 2xx 响应，响应体带 `{ "error": "..." }`
//! - 前置条件失败：未登录、输入为空、缺少对方信息
//!
//! 所有错误在调用点被捕获，并转换为一次性的用户提示（`Alert`），
//! 除了下一轮轮询外不会自动重试，也不会让界面崩溃。

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::StorageError;

/// 客户端错误
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("网络错误: {0}")]
    Network(String),

    #[error("服务器拒绝请求 ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("{0}")]
    Precondition(String),

    #[error("响应解析失败: {0}")]
    Decode(String),

    #[error("本地存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("实时通道错误: {0}")]
    Channel(String),

    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl ClientError {
    /// 前置条件错误的便捷构造
    pub fn precondition(message: impl Into<String>) -> Self {
        ClientError::Precondition(message.into())
    }

    /// 面向用户的提示文案
    ///
    /// 远端拒绝时优先展示服务器给出的 `error` 字段
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Network(_) => "Unable to connect to server.".to_string(),
            ClientError::Rejected { message, .. } => message.clone(),
            ClientError::Precondition(message) => message.clone(),
            ClientError::Decode(_) => "Unexpected response from server.".to_string(),
            ClientError::Storage(_) => "Local storage is unavailable.".to_string(),
            ClientError::Channel(_) => "Live connection lost.".to_string(),
            ClientError::Config(_) => "Client configuration is invalid.".to_string(),
        }
    }

    /// 转换为一次性用户提示
    pub fn to_alert(&self, title: &str) -> Alert {
        Alert::error(title, self.user_message())
    }
}

/// 提示级别
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Success,
    Error,
}

/// 一次性用户提示（阻塞式弹窗）
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Success,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_uses_server_message() {
        let err = ClientError::Rejected {
            status: 400,
            message: "Item not found".to_string(),
        };
        let alert = err.to_alert("Error");
        assert_eq!(alert.level, AlertLevel::Error);
        assert_eq!(alert.message, "Item not found");
    }

    #[test]
    fn test_network_message_is_generic() {
        let err = ClientError::Network("connection refused".to_string());
        assert_eq!(err.user_message(), "Unable to connect to server.");
        assert!(err.to_string().contains("connection refused"));
    }
}
