/*!
 * 实时消息通道模块
 *
 * 聊天消息的实时投递通过发布/订阅通道完成：
 * - 客户端以自己的用户 ID 注册（`register`）
 * - 收到 `receiveMessage` 事件，携带一条 ChatMessage
 * - 发送 `sendMessage` 事件，结构相同
 *
 * 订阅是一个有作用域的资源：`Subscription` 被丢弃时自动取消，
 * 页面离开时不会遗留连接。
 *
 * 模块结构：
 * - ws: Socket.IO 实现（WebSocket 传输上的 Engine.IO v4 报文，事件 `42["event",data]`）
 * - memory: 进程内实现（离线模式 / 测试）
 */

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::models::ChatMessage;

pub use memory::MemoryChannel;
pub use ws::WsChannel;

// ============================================================================
// 协议帧
// ============================================================================

/// 注册事件名
pub const EVENT_REGISTER: &str = "register";
/// 发送消息事件名
pub const EVENT_SEND_MESSAGE: &str = "sendMessage";
/// 接收消息事件名
pub const EVENT_RECEIVE_MESSAGE: &str = "receiveMessage";

/// 连接默认命名空间
pub const CONNECT_PACKET: &str = "40";
/// 断开默认命名空间
pub const DISCONNECT_PACKET: &str = "41";
/// 心跳应答
pub const PONG_PACKET: &str = "3";

/// 一个 Socket.IO 事件
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    pub data: serde_json::Value,
}

impl Frame {
    pub fn register(user_id: &str) -> Self {
        Self {
            event: EVENT_REGISTER.to_string(),
            data: serde_json::Value::String(user_id.to_string()),
        }
    }

    pub fn send_message(message: &ChatMessage) -> Result<Self, ClientError> {
        Ok(Self {
            event: EVENT_SEND_MESSAGE.to_string(),
            data: serde_json::to_value(message)?,
        })
    }

    /// 编码为事件报文：`42["event",data]`
    pub fn encode(&self) -> Result<String, ClientError> {
        let payload = serde_json::to_string(&(&self.event, &self.data))?;
        Ok(format!("42{}", payload))
    }

    /// 解析 `receiveMessage` 事件，其他事件返回 None
    pub fn into_received_message(self) -> Option<ChatMessage> {
        if self.event != EVENT_RECEIVE_MESSAGE {
            return None;
        }
        match serde_json::from_value(self.data) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!("[Channel] 无法解析推送消息: {}", e);
                None
            }
        }
    }
}

/// Engine.IO v4 / Socket.IO v5 文本报文
///
/// 第一位是 Engine.IO 类型，`4`（message）后面第二位是 Socket.IO 类型。
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// `0{sid,pingInterval,...}`
    Open(serde_json::Value),
    /// `1`
    Close,
    /// `2`
    Ping,
    /// `3`
    Pong,
    /// `40{sid}`
    Connect,
    /// `41`
    Disconnect,
    /// `42[event,data]`，可带命名空间与 ack ID
    Event(Frame),
    /// `44{message}`
    ConnectError(String),
    /// 不处理的报文（ack、二进制、upgrade / noop）
    Other(String),
}

impl Packet {
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        let mut chars = text.chars();
        let packet = match chars.next() {
            Some('0') => Packet::Open(serde_json::from_str(chars.as_str())?),
            Some('1') => Packet::Close,
            Some('2') => Packet::Ping,
            Some('3') => Packet::Pong,
            Some('4') => match chars.next() {
                Some('0') => Packet::Connect,
                Some('1') => Packet::Disconnect,
                Some('2') => Packet::Event(parse_event(chars.as_str())?),
                Some('4') => Packet::ConnectError(connect_error_reason(chars.as_str())),
                _ => Packet::Other(text.to_string()),
            },
            _ => Packet::Other(text.to_string()),
        };
        Ok(packet)
    }
}

/// 解析 `42` 之后的部分：`[/ns,][ackId][event,data]`
fn parse_event(body: &str) -> Result<Frame, ClientError> {
    let mut rest = body;
    if rest.starts_with('/') {
        rest = rest.split_once(',').map(|(_, tail)| tail).unwrap_or("");
    }
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    let items: Vec<serde_json::Value> = serde_json::from_str(rest)?;
    let mut items = items.into_iter();
    let event = match items.next() {
        Some(serde_json::Value::String(event)) => event,
        _ => return Err(ClientError::Channel(format!("事件报文缺少事件名: {}", body))),
    };
    Ok(Frame {
        event,
        data: items.next().unwrap_or(serde_json::Value::Null),
    })
}

fn connect_error_reason(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// 通道接口
// ============================================================================

/// 实时通道
#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// 以指定用户身份建立订阅
    async fn connect(&self, user_id: &str) -> Result<Subscription, ClientError>;
}

/// 一次订阅（丢弃即取消）
pub struct Subscription {
    user_id: String,
    inbound: async_channel::Receiver<ChatMessage>,
    outbound: async_channel::Sender<ChatMessage>,
    cancel: CancellationToken,
}

impl Subscription {
    /// 由通道实现构造
    pub(crate) fn new(
        user_id: String,
        inbound: async_channel::Receiver<ChatMessage>,
        outbound: async_channel::Sender<ChatMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            user_id,
            inbound,
            outbound,
            cancel,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// 发布一条消息（`sendMessage`）
    pub fn publish(&self, message: &ChatMessage) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Channel("订阅已取消".to_string()));
        }
        self.outbound
            .try_send(message.clone())
            .map_err(|e| ClientError::Channel(e.to_string()))
    }

    /// 等待下一条推送消息，通道关闭时返回 None
    pub async fn recv(&self) -> Option<ChatMessage> {
        self.inbound.recv().await.ok()
    }

    /// 推送消息接收端（可交给后台任务）
    pub fn inbound(&self) -> async_channel::Receiver<ChatMessage> {
        self.inbound.clone()
    }

    /// 取消令牌（后台任务随订阅一起结束）
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// 主动取消订阅
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!("[Channel] 取消订阅: {}", self.user_id);
            self.cancel.cancel();
        }
        self.inbound.close();
        self.outbound.close();
    }
}
