//! Socket.IO 实时通道
//!
//! 连接 `{server}/socket.io/?EIO=4&transport=websocket`，握手顺序：
//! 服务器 open（`0{...}`）-> 客户端连接默认命名空间（`40`）-> 服务器确认（`40{...}`），
//! 然后发送 `register` 事件。之后在后台任务中双向转发：
//! - 服务器 `receiveMessage` 事件 -> 订阅的推送队列
//! - 订阅的发布队列 -> `sendMessage` 事件
//! - 服务器心跳 `2` -> 应答 `3`
//!
//! 订阅取消时先断开命名空间（`41`），再发送 Close 帧并结束任务。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::{CONNECT_PACKET, DISCONNECT_PACKET, Frame, LiveChannel, PONG_PACKET, Packet, Subscription};
use crate::error::ClientError;
use crate::models::ChatMessage;

/// 握手超时
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket.IO 通道
#[derive(Clone)]
pub struct WsChannel {
    url: String,
}

impl WsChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

fn encode(frame: &Frame) -> Result<Message, ClientError> {
    Ok(Message::text(frame.encode()?))
}

/// 读取下一个文本报文（跳过非文本帧）
async fn next_packet(socket: &mut Socket) -> Result<Packet, ClientError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Packet::parse(text.as_str()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(ClientError::Channel("握手期间连接被关闭".to_string()));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ClientError::Channel(format!("握手失败: {}", e))),
        }
    }
}

async fn send_text(socket: &mut Socket, text: &str) -> Result<(), ClientError> {
    socket
        .send(Message::text(text))
        .await
        .map_err(|e| ClientError::Channel(format!("发送失败: {}", e)))
}

/// Engine.IO open + 默认命名空间连接
async fn handshake(socket: &mut Socket) -> Result<(), ClientError> {
    match next_packet(socket).await? {
        Packet::Open(info) => {
            tracing::debug!("[Channel] Engine.IO 已打开: sid={}", info["sid"]);
        }
        other => {
            return Err(ClientError::Channel(format!("预期 open 报文，收到 {:?}", other)));
        }
    }

    send_text(socket, CONNECT_PACKET).await?;
    loop {
        match next_packet(socket).await? {
            Packet::Connect => return Ok(()),
            Packet::Ping => send_text(socket, PONG_PACKET).await?,
            Packet::ConnectError(reason) => {
                return Err(ClientError::Channel(format!("命名空间连接被拒绝: {}", reason)));
            }
            other => tracing::debug!("[Channel] 握手期间忽略报文: {:?}", other),
        }
    }
}

#[async_trait]
impl LiveChannel for WsChannel {
    async fn connect(&self, user_id: &str) -> Result<Subscription, ClientError> {
        tracing::info!("[Channel] 连接实时通道: {} (用户 {})", self.url, user_id);

        let (mut socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Channel(format!("连接失败: {}", e)))?;

        tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut socket))
            .await
            .map_err(|_| ClientError::Channel("握手超时".to_string()))??;

        let (mut sink, mut source) = socket.split();
        sink.send(encode(&Frame::register(user_id))?)
            .await
            .map_err(|e| ClientError::Channel(format!("注册失败: {}", e)))?;

        let (in_tx, in_rx) = async_channel::unbounded::<ChatMessage>();
        let (out_tx, out_rx) = async_channel::unbounded::<ChatMessage>();
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let owner = user_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = sink.send(Message::text(DISCONNECT_PACKET)).await;
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    outgoing = out_rx.recv() => {
                        let Ok(message) = outgoing else { break };
                        let frame = match Frame::send_message(&message).and_then(|f| encode(&f)) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!("[Channel] 消息编码失败: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(frame).await {
                            tracing::warn!("[Channel] 发送失败: {}", e);
                            break;
                        }
                    }
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => match Packet::parse(text.as_str()) {
                            Ok(Packet::Event(frame)) => {
                                if let Some(message) = frame.into_received_message() {
                                    let _ = in_tx.try_send(message);
                                }
                            }
                            Ok(Packet::Ping) => {
                                if let Err(e) = sink.send(Message::text(PONG_PACKET)).await {
                                    tracing::warn!("[Channel] 心跳应答失败: {}", e);
                                    break;
                                }
                            }
                            Ok(Packet::Close) | Ok(Packet::Disconnect) => {
                                tracing::info!("[Channel] 服务器断开 (用户 {})", owner);
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!("[Channel] 无法解析报文: {}", e),
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("[Channel] 服务器关闭连接 (用户 {})", owner);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("[Channel] 连接错误: {}", e);
                            break;
                        }
                    },
                }
            }
            in_tx.close();
            tracing::debug!("[Channel] 通道任务结束 (用户 {})", owner);
        });

        Ok(Subscription::new(user_id.to_string(), in_rx, out_tx, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{EVENT_REGISTER, EVENT_SEND_MESSAGE};
    use crate::models::DeliveryStatus;
    use serde_json::json;
    use tokio::net::TcpListener;

    const OPEN: &str = r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        ws.next().await.unwrap().unwrap().to_text().unwrap().to_string()
    }

    fn event(text: &str) -> Frame {
        match Packet::parse(text).unwrap() {
            Packet::Event(frame) => frame,
            other => panic!("expected event packet, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_register_push_and_publish() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // 桩服务器：Engine.IO open，确认命名空间，校验注册事件，
        // 发送心跳与一条推送，回传收到的心跳应答和发送事件
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            ws.send(Message::text(OPEN)).await.unwrap();
            assert_eq!(next_text(&mut ws).await, "40");
            ws.send(Message::text(r#"40{"sid":"sio-1"}"#)).await.unwrap();

            let register = event(&next_text(&mut ws).await);
            assert_eq!(register.event, EVENT_REGISTER);
            assert_eq!(register.data, json!("bob"));

            ws.send(Message::text("2")).await.unwrap();
            let push = json!([
                "receiveMessage",
                { "_id": "m1", "sender": "alice", "receiver": "bob", "text": "hello" }
            ]);
            ws.send(Message::text(format!("42{}", push))).await.unwrap();

            let pong = next_text(&mut ws).await;
            let sent = event(&next_text(&mut ws).await);
            (pong, sent)
        });

        let channel = WsChannel::new(format!("ws://{}/socket.io/?EIO=4&transport=websocket", addr));
        let sub = channel.connect("bob").await.unwrap();

        let pushed = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed.text, "hello");
        assert_eq!(pushed.sender_id, "alice");

        sub.publish(&ChatMessage {
            id: String::new(),
            client_id: Some("c1".to_string()),
            sender_id: "bob".to_string(),
            receiver_id: "alice".to_string(),
            text: "hey".to_string(),
            timestamp: String::new(),
            status: DeliveryStatus::Pending,
        })
        .unwrap();

        let (pong, frame) = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pong, "3");
        assert_eq!(frame.event, EVENT_SEND_MESSAGE);
        assert_eq!(frame.data["text"], "hey");
        assert_eq!(frame.data["clientId"], "c1");
    }

    #[tokio::test]
    async fn test_rejected_namespace_is_channel_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::text(OPEN)).await.unwrap();
            let _ = next_text(&mut ws).await;
            ws.send(Message::text(r#"44{"message":"Not authorized"}"#))
                .await
                .unwrap();
            let _ = ws.next().await;
        });

        let channel = WsChannel::new(format!("ws://{}/socket.io/?EIO=4&transport=websocket", addr));
        match channel.connect("bob").await {
            Err(ClientError::Channel(reason)) => assert!(reason.contains("Not authorized")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_channel_error() {
        let channel = WsChannel::new("ws://127.0.0.1:1/socket.io/?EIO=4&transport=websocket");
        assert!(matches!(
            channel.connect("bob").await,
            Err(ClientError::Channel(_))
        ));
    }
}
