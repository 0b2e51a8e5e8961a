//! 进程内实时通道
//!
//! 按用户 ID 路由：发布的消息投递给 `receiver_id` 的全部订阅。
//! 同时记录所有发布过的消息，便于检查。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{LiveChannel, Subscription};
use crate::error::ClientError;
use crate::models::ChatMessage;

#[derive(Default)]
struct Hub {
    /// user_id -> (订阅序号, 投递端)
    subscribers: HashMap<String, Vec<(u64, async_channel::Sender<ChatMessage>)>>,
    next_id: u64,
    published: Vec<ChatMessage>,
}

/// 进程内通道（可克隆，克隆共享同一个 hub）
#[derive(Clone, Default)]
pub struct MemoryChannel {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前某用户的活跃订阅数
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.hub
            .lock()
            .subscribers
            .get(user_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// 所有发布过的消息
    pub fn published(&self) -> Vec<ChatMessage> {
        self.hub.lock().published.clone()
    }

    /// 投递给接收方的全部订阅
    pub fn deliver(&self, message: ChatMessage) {
        let mut hub = self.hub.lock();
        hub.published.push(message.clone());
        if let Some(targets) = hub.subscribers.get(&message.receiver_id) {
            for (_, tx) in targets {
                let _ = tx.try_send(message.clone());
            }
        }
    }

    fn remove(&self, user_id: &str, sub_id: u64) {
        let mut hub = self.hub.lock();
        if let Some(list) = hub.subscribers.get_mut(user_id) {
            list.retain(|(id, _)| *id != sub_id);
            if list.is_empty() {
                hub.subscribers.remove(user_id);
            }
        }
    }
}

#[async_trait]
impl LiveChannel for MemoryChannel {
    async fn connect(&self, user_id: &str) -> Result<Subscription, ClientError> {
        let (in_tx, in_rx) = async_channel::unbounded();
        let (out_tx, out_rx) = async_channel::unbounded::<ChatMessage>();
        let cancel = CancellationToken::new();

        let sub_id = {
            let mut hub = self.hub.lock();
            hub.next_id += 1;
            let id = hub.next_id;
            hub.subscribers
                .entry(user_id.to_string())
                .or_default()
                .push((id, in_tx));
            id
        };

        // 发布转发任务，订阅取消时注销
        let channel = self.clone();
        let token = cancel.clone();
        let owner = user_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = out_rx.recv() => match next {
                        Ok(message) => channel.deliver(message),
                        Err(_) => break,
                    },
                }
            }
            channel.remove(&owner, sub_id);
        });

        Ok(Subscription::new(user_id.to_string(), in_rx, out_tx, cancel))
    }
}
