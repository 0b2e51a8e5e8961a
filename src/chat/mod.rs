/*!
 * 聊天会话模块
 *
 * 一个 ChatSession 对应当前用户与某个聊天对象之间的一次会话页面：
 * - 打开时先以自己的用户 ID 订阅实时通道，再在后台拉取历史消息
 * - 历史到达之前收到的推送先缓存，历史到达后合并去重
 * - 发送：乐观追加（Pending）-> 实时通道发布 -> REST 持久化
 *   持久化成功标记为 Confirmed，失败标记为 Failed，可重试
 * - 只接收属于当前用户对的推送，其他对象的消息直接丢弃
 *
 * 去重键：客户端 ID（clientId）优先，其次服务器 ID（_id），
 * 因此重新拉取历史、自己的回显、实时推送都不会产生重复消息。
 * 推送没有 _id 而历史副本没有 clientId 时，按发送方、接收方、文本
 * 和相近的时间戳匹配，并采用服务器 ID。
 *
 * 历史拉取失败时弹出提示，已缓存的推送照常显示；
 * 实时通道连接失败时会话退化为仅历史模式（发送仍走 REST）。
 *
 * 关闭或丢弃会话时取消订阅并结束后台任务。
 */

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::RemoteApi;
use crate::channel::{LiveChannel, Subscription};
use crate::error::{Alert, ClientError};
use crate::events::{AppEvent, EventBus};
use crate::models::{ChatMessage, Counterpart, DeliveryStatus};
use crate::session::SessionContext;

// ============================================================================
// 消息列表
// ============================================================================

#[derive(Default)]
struct Timeline {
    messages: Vec<ChatMessage>,
    /// 历史到达前收到的推送
    buffered: Vec<ChatMessage>,
    history_loaded: bool,
}

/// 无 ID 副本按内容匹配时允许的时间差
const CONTENT_MATCH_WINDOW_MS: i64 = 60_000;

fn parse_millis(timestamp: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|t| t.timestamp_millis())
}

/// 排序键：无法解析的时间戳排在最后（通常是刚收到、缺少 createdAt 的推送）
fn sort_key(message: &ChatMessage) -> i64 {
    parse_millis(&message.timestamp).unwrap_or(i64::MAX)
}

/// 同一条消息的两个副本，其中恰好一个还没有服务器 ID
///
/// 两边都带 clientId 且不同时视为不同消息；缺失的时间戳不参与比较。
fn same_content(a: &ChatMessage, b: &ChatMessage) -> bool {
    if a.id.is_empty() == b.id.is_empty() {
        return false;
    }
    if let (Some(x), Some(y)) = (&a.client_id, &b.client_id) {
        if !x.is_empty() && !y.is_empty() && x != y {
            return false;
        }
    }
    if a.sender_id != b.sender_id || a.receiver_id != b.receiver_id || a.text != b.text {
        return false;
    }
    match (parse_millis(&a.timestamp), parse_millis(&b.timestamp)) {
        (Some(x), Some(y)) => (x - y).abs() <= CONTENT_MATCH_WINDOW_MS,
        _ => true,
    }
}

impl Timeline {
    fn position(&self, message: &ChatMessage) -> Option<usize> {
        self.messages.iter().position(|m| {
            let same_client = matches!(
                (&m.client_id, &message.client_id),
                (Some(a), Some(b)) if !a.is_empty() && a == b
            );
            let same_server = !message.id.is_empty() && m.id == message.id;
            same_client || same_server
        })
        .or_else(|| self.messages.iter().position(|m| same_content(m, message)))
    }

    /// 合并一条服务器侧消息（历史或推送），返回是否有变化
    fn merge(&mut self, incoming: ChatMessage) -> bool {
        match self.position(&incoming) {
            Some(index) => {
                let existing = &mut self.messages[index];
                if existing.status == DeliveryStatus::Confirmed && !existing.id.is_empty() {
                    return false;
                }
                if !incoming.id.is_empty() {
                    existing.id = incoming.id;
                }
                if existing.client_id.is_none() {
                    existing.client_id = incoming.client_id;
                }
                if !incoming.timestamp.is_empty() {
                    existing.timestamp = incoming.timestamp;
                }
                existing.status = DeliveryStatus::Confirmed;
                true
            }
            None => {
                let mut incoming = incoming;
                incoming.status = DeliveryStatus::Confirmed;
                self.messages.push(incoming);
                true
            }
        }
    }

    fn sort(&mut self) {
        self.messages.sort_by_key(sort_key);
    }

    fn set_status(&mut self, client_id: &str, status: DeliveryStatus) -> Option<ChatMessage> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.client_id.as_deref() == Some(client_id))?;
        message.status = status;
        Some(message.clone())
    }
}

// ============================================================================
// 会话
// ============================================================================

struct ChatInner {
    api: Arc<dyn RemoteApi>,
    events: EventBus,
    me: String,
    counterpart: Counterpart,
    timeline: Mutex<Timeline>,
    open: AtomicBool,
}

/// 与某个聊天对象的会话
pub struct ChatSession {
    inner: Arc<ChatInner>,
    subscription: Mutex<Option<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatSession {
    /// 打开会话：先订阅实时通道，再后台拉取历史
    ///
    /// 实时通道连接失败不会让打开失败：弹出提示后以仅历史模式继续。
    pub async fn open(
        session: &SessionContext,
        counterpart: Counterpart,
        api: Arc<dyn RemoteApi>,
        channel: &dyn LiveChannel,
        events: EventBus,
    ) -> Result<Self, ClientError> {
        let me = session
            .user_id()
            .ok_or_else(|| ClientError::precondition("User info not loaded yet. Please wait a moment."))?;

        tracing::info!("[Chat] 打开会话: {} <-> {}", me, counterpart.user_id);
        let subscription = match channel.connect(&me).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::warn!("[Chat] 实时通道不可用，仅使用历史消息: {}", e);
                events.alert(Alert::error(
                    "Error",
                    "Live updates are unavailable. New messages will appear after refreshing.",
                ));
                None
            }
        };

        let inner = Arc::new(ChatInner {
            api,
            events,
            me,
            counterpart,
            timeline: Mutex::new(Timeline::default()),
            open: AtomicBool::new(true),
        });

        let mut tasks = Vec::with_capacity(2);

        // 推送接收任务
        if let Some(subscription) = &subscription {
            let inbound = subscription.inbound();
            let token = subscription.cancel_token();
            let receiver = inner.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        next = inbound.recv() => match next {
                            Ok(message) => receiver.receive(message),
                            Err(_) => break,
                        },
                    }
                }
            }));
        }

        // 历史拉取任务（失败已在内部记录并提示）
        let loader = inner.clone();
        tasks.push(tokio::spawn(async move {
            let _ = loader.load_history().await;
        }));

        Ok(Self {
            inner,
            subscription: Mutex::new(subscription),
            tasks: Mutex::new(tasks),
        })
    }

    pub fn counterpart(&self) -> &Counterpart {
        &self.inner.counterpart
    }

    /// 当前可见消息（按时间排序）
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.timeline.lock().messages.clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// 是否连着实时通道（否则只有历史消息）
    pub fn is_live(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .is_some_and(|s| s.is_active())
    }

    /// 处理一条推送消息
    pub fn receive(&self, message: ChatMessage) {
        self.inner.receive(message);
    }

    /// 重新拉取历史并合并
    pub async fn refresh_history(&self) -> Result<(), ClientError> {
        self.inner.load_history().await
    }

    /// 发送消息
    ///
    /// 空白文本不做任何事，返回 `Ok(None)`
    pub async fn send(&self, text: &str) -> Result<Option<ChatMessage>, ClientError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        if !self.is_open() {
            return Err(ClientError::precondition("Chat is closed."));
        }

        let message = ChatMessage {
            id: String::new(),
            client_id: Some(Uuid::new_v4().to_string()),
            sender_id: self.inner.me.clone(),
            receiver_id: self.inner.counterpart.user_id.clone(),
            text: text.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: DeliveryStatus::Pending,
        };

        self.inner.timeline.lock().messages.push(message.clone());
        self.inner.notify();

        if let Some(subscription) = self.subscription.lock().as_ref() {
            if let Err(e) = subscription.publish(&message) {
                tracing::warn!("[Chat] 实时发布失败: {}", e);
            }
        }

        self.inner.persist(message).await.map(Some)
    }

    /// 重试一条发送失败的消息（只重新持久化）
    pub async fn retry(&self, client_id: &str) -> Result<ChatMessage, ClientError> {
        if !self.is_open() {
            return Err(ClientError::precondition("Chat is closed."));
        }

        let message = {
            let mut timeline = self.inner.timeline.lock();
            let failed = timeline
                .messages
                .iter()
                .any(|m| m.client_id.as_deref() == Some(client_id) && m.status == DeliveryStatus::Failed);
            if !failed {
                return Err(ClientError::precondition("Message is not waiting for retry."));
            }
            timeline.set_status(client_id, DeliveryStatus::Pending)
        };
        let Some(message) = message else {
            return Err(ClientError::precondition("Message is not waiting for retry."));
        };

        tracing::info!("[Chat] 重试发送: {}", client_id);
        self.inner.notify();
        self.inner.persist(message).await
    }

    /// 关闭会话：取消订阅，结束后台任务
    pub fn close(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            "[Chat] 关闭会话: {} <-> {}",
            self.inner.me,
            self.inner.counterpart.user_id
        );
        self.subscription.lock().take();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl ChatInner {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn notify(&self) {
        let messages = self.timeline.lock().messages.clone();
        self.events.emit(AppEvent::ChatChanged {
            counterpart_id: self.counterpart.user_id.clone(),
            messages,
        });
    }

    fn receive(&self, message: ChatMessage) {
        if !self.is_open() {
            return;
        }
        if !message.is_between(&self.me, &self.counterpart.user_id) {
            tracing::debug!(
                "[Chat] 忽略其他会话的消息: {} -> {}",
                message.sender_id,
                message.receiver_id
            );
            return;
        }

        let changed = {
            let mut timeline = self.timeline.lock();
            if !timeline.history_loaded {
                timeline.buffered.push(message);
                return;
            }
            let changed = timeline.merge(message);
            if changed {
                timeline.sort();
            }
            changed
        };
        if changed {
            self.notify();
        }
    }

    /// 拉取历史并与缓存的推送合并
    ///
    /// 失败时同样结束缓存阶段，已收到的推送直接显示，并弹出提示。
    async fn load_history(&self) -> Result<(), ClientError> {
        let result = self
            .api
            .list_messages(&self.me, &self.counterpart.user_id)
            .await;

        if !self.is_open() {
            tracing::debug!("[Chat] 会话已关闭，丢弃历史响应");
            return result.map(|_| ());
        }

        let (history, failure) = match result {
            Ok(history) => (history, None),
            Err(e) => (Vec::new(), Some(e)),
        };

        {
            let mut timeline = self.timeline.lock();
            let buffered = std::mem::take(&mut timeline.buffered);
            for message in history.into_iter().chain(buffered) {
                if message.is_between(&self.me, &self.counterpart.user_id) {
                    timeline.merge(message);
                }
            }
            timeline.history_loaded = true;
            timeline.sort();
        }
        self.notify();

        match failure {
            None => Ok(()),
            Some(e) => {
                tracing::warn!("[Chat] 拉取历史失败: {}", e);
                self.events
                    .alert(Alert::error("Error", "Unable to load messages"));
                Err(e)
            }
        }
    }

    async fn persist(&self, message: ChatMessage) -> Result<ChatMessage, ClientError> {
        let client_id = message.client_id.clone().unwrap_or_default();

        match self.api.post_message(&message).await {
            Ok(ack) => {
                let confirmed = {
                    let mut timeline = self.timeline.lock();
                    if let Some(ack) = ack {
                        let ack = ChatMessage {
                            client_id: Some(client_id.clone()),
                            ..ack
                        };
                        timeline.merge(ack);
                    }
                    timeline.set_status(&client_id, DeliveryStatus::Confirmed)
                };
                self.notify();
                Ok(confirmed.unwrap_or(ChatMessage {
                    status: DeliveryStatus::Confirmed,
                    ..message
                }))
            }
            Err(e) => {
                tracing::warn!("[Chat] 消息持久化失败 {}: {}", client_id, e);
                self.timeline
                    .lock()
                    .set_status(&client_id, DeliveryStatus::Failed);
                self.notify();
                self.events
                    .alert(Alert::error("Error", "Failed to send message"));
                Err(e)
            }
        }
    }
}
