/*!
 * 通知与会话同步模块
 *
 * 为当前登录用户维护一份最终一致的本地视图，无需手动刷新：
 * - 交易伙伴请求（friend_request）
 * - 交易报价（trade offers）
 * - 会话摘要（最后一条消息 + 未读数）
 *
 * 同步机制：
 * - 固定间隔轮询，每轮并发拉取三类数据，各类之间互相隔离：
 *   某一类失败只会把该类清空，不影响其他类，也不会抛出错误
 * - 失败不做退避，等待下一轮轮询
 * - 轮询任务由 CancellationToken 控制，stop_polling / 卸载 / 丢弃 SyncAgent 都会取消
 * - 卸载后才返回的响应直接丢弃，不修改视图
 *
 * 接受 / 拒绝：
 * - 先调用远端接口，再无条件重新拉取该类通知，从不乐观删除本地条目
 * - 接受交易报价后跳转到与对方的聊天页面（缺少对方信息时提示错误）
 * - 失败时弹出提示，条目保留在列表中等待重试
 */

pub mod view;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::RemoteApi;
use crate::error::{Alert, ClientError};
use crate::events::{AppEvent, EventBus, Screen};
use crate::models::{Conversation, Counterpart, Notification, NotificationKind};
use crate::session::SessionContext;
use crate::storage::request_sent_key;

pub use view::{DropdownView, NotificationView};

// ============================================================================
// 选项
// ============================================================================

/// 同步选项
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// 打开面板时同步已读状态到服务器
    pub durable_read_receipts: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            durable_read_receipts: true,
        }
    }
}

/// 接受 / 拒绝的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    /// 跳转到的聊天对象
    pub navigated_to: Option<Counterpart>,
}

// ============================================================================
// 轮询任务
// ============================================================================

/// 轮询任务（丢弃即取消）
struct PollingTask {
    user_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for PollingTask {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

// ============================================================================
// 同步代理
// ============================================================================

struct AgentInner {
    api: Arc<dyn RemoteApi>,
    session: Arc<SessionContext>,
    events: EventBus,
    options: SyncOptions,
    view: Mutex<NotificationView>,
    mounted: AtomicBool,
}

/// 通知 / 会话同步代理（每个页面挂载一个）
pub struct SyncAgent {
    inner: Arc<AgentInner>,
    polling: Mutex<Option<PollingTask>>,
    user_id: RwLock<Option<String>>,
}

impl SyncAgent {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        session: Arc<SessionContext>,
        events: EventBus,
        options: SyncOptions,
    ) -> Self {
        let user_id = session.user_id();
        Self {
            inner: Arc::new(AgentInner {
                api,
                session,
                events,
                options,
                view: Mutex::new(NotificationView::new()),
                mounted: AtomicBool::new(true),
            }),
            polling: Mutex::new(None),
            user_id: RwLock::new(user_id),
        }
    }

    // ========== 轮询 ==========

    /// 开始轮询（首轮立即执行），已有轮询会被替换
    pub fn start_polling(&self, user_id: &str, interval: Duration) {
        let user_id = user_id.trim().to_string();
        if user_id.is_empty() {
            tracing::debug!("[Sync] 未登录，跳过轮询");
            return;
        }

        *self.user_id.write() = Some(user_id.clone());
        self.inner.mounted.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = self.inner.clone();
        let poll_user = user_id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => inner.run_cycle(&poll_user).await,
                }
            }
            tracing::debug!("[Sync] 轮询任务结束: {}", poll_user);
        });

        tracing::info!("[Sync] 开始轮询: 用户 {} 间隔 {:?}", user_id, interval);
        let previous = self.polling.lock().replace(PollingTask {
            user_id,
            cancel,
            handle,
        });
        drop(previous);
    }

    /// 以注入的会话身份开始轮询，未登录时不做任何事
    pub fn start_for_session(&self, interval: Duration) -> bool {
        match self.inner.session.user_id() {
            Some(user_id) => {
                self.start_polling(&user_id, interval);
                true
            }
            None => {
                tracing::debug!("[Sync] 未登录，轮询为空操作");
                false
            }
        }
    }

    /// 停止轮询
    pub fn stop_polling(&self) {
        if let Some(task) = self.polling.lock().take() {
            tracing::info!("[Sync] 停止轮询: {}", task.user_id);
        }
    }

    pub fn is_polling(&self) -> bool {
        self.polling.lock().is_some()
    }

    /// 页面卸载：停止轮询，之后到达的响应全部丢弃
    pub fn unmount(&self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
        self.stop_polling();
    }

    fn current_user(&self) -> Result<String, ClientError> {
        self.user_id
            .read()
            .clone()
            .or_else(|| self.inner.session.user_id())
            .ok_or_else(|| ClientError::precondition("User info not loaded yet. Please wait a moment."))
    }

    // ========== 手动刷新 ==========

    /// 拉取全部三类数据
    pub async fn refresh_all(&self) {
        if let Ok(user_id) = self.current_user() {
            self.inner.run_cycle(&user_id).await;
        }
    }

    /// 拉取某一类通知
    pub async fn refresh(&self, kind: NotificationKind) {
        if let Ok(user_id) = self.current_user() {
            self.inner.fetch_notifications(&user_id, kind).await;
        }
    }

    pub async fn refresh_conversations(&self) {
        if let Ok(user_id) = self.current_user() {
            self.inner.fetch_conversations(&user_id).await;
        }
    }

    // ========== 视图 ==========

    pub fn notifications(&self, kind: NotificationKind) -> Vec<Notification> {
        self.inner.view.lock().notifications(kind)
    }

    /// 全部通知（按类别分组）
    pub fn entries(&self) -> Vec<Notification> {
        self.inner.view.lock().entries()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.view.lock().conversations()
    }

    pub fn has_unread(&self) -> bool {
        self.inner.view.lock().has_unread()
    }

    pub fn total_unread_messages(&self) -> u32 {
        self.inner.view.lock().total_unread_messages()
    }

    pub fn dropdown(&self, kind: NotificationKind) -> DropdownView {
        self.inner.view.lock().dropdown(kind)
    }

    /// 切换通知面板
    ///
    /// 打开时把该类当前持有的通知标记为本地已读；
    /// 开启持久已读回执时同时通知服务器（失败只记录日志）
    pub fn toggle_dropdown(&self, kind: NotificationKind) -> DropdownView {
        let (view, newly_read) = {
            let mut view = self.inner.view.lock();
            let newly_read = if view.toggle(kind) {
                view.mark_read(kind)
            } else {
                Vec::new()
            };
            (view.dropdown(kind), newly_read)
        };

        if self.inner.options.durable_read_receipts && !newly_read.is_empty() {
            self.send_read_receipts(newly_read);
        }

        view
    }

    fn send_read_receipts(&self, ids: Vec<String>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("[Sync] 无异步运行时，跳过已读回执");
            return;
        };
        let api = self.inner.api.clone();
        runtime.spawn(async move {
            if let Err(e) = api.mark_notifications_read(&ids).await {
                tracing::warn!("[Sync] 已读回执失败: {}", e);
            }
        });
    }

    // ========== 接受 / 拒绝 ==========

    /// 接受通知
    ///
    /// `target_id`：伙伴请求为通知 ID，交易报价为 tradeId
    pub async fn accept(
        &self,
        target_id: &str,
        kind: NotificationKind,
    ) -> Result<ActionOutcome, ClientError> {
        self.act(target_id, kind, true).await
    }

    /// 拒绝通知
    pub async fn reject(
        &self,
        target_id: &str,
        kind: NotificationKind,
    ) -> Result<ActionOutcome, ClientError> {
        self.act(target_id, kind, false).await
    }

    async fn act(
        &self,
        target_id: &str,
        kind: NotificationKind,
        accept: bool,
    ) -> Result<ActionOutcome, ClientError> {
        let user_id = match self.current_user() {
            Ok(id) => id,
            Err(e) => {
                self.inner.events.alert(e.to_alert("Error"));
                return Err(e);
            }
        };

        // 只读快照，用于跳转和清理本地标记
        let snapshot = self.inner.view.lock().find(kind, target_id);
        let api = &self.inner.api;

        tracing::info!(
            "[Sync] {} {:?}: {}",
            if accept { "接受" } else { "拒绝" },
            kind,
            target_id
        );

        let result = match (kind, accept) {
            (NotificationKind::TraderRequest, true) => api.accept_trader_request(target_id).await,
            (NotificationKind::TraderRequest, false) => api.reject_trader_request(target_id).await,
            (NotificationKind::TradeOffer, true) => api.accept_trade(target_id).await,
            (NotificationKind::TradeOffer, false) => api.reject_trade(target_id).await,
        };

        // 无论成功与否都重新拉取该类
        self.inner.fetch_notifications(&user_id, kind).await;

        if let Err(e) = result {
            tracing::warn!("[Sync] 操作失败 {}: {}", target_id, e);
            let message = match (kind, accept) {
                (NotificationKind::TradeOffer, true) => "Failed to accept trade",
                (NotificationKind::TradeOffer, false) => "Failed to reject trade",
                (NotificationKind::TraderRequest, _) => "Failed to process notification.",
            };
            self.inner.events.alert(Alert::error("Error", message));
            return Err(e);
        }

        if kind == NotificationKind::TraderRequest {
            self.clear_request_flag(snapshot.as_ref());
        }

        let success = match (kind, accept) {
            (NotificationKind::TraderRequest, true) => "Trader request accepted!",
            (NotificationKind::TraderRequest, false) => "Trader request rejected.",
            (NotificationKind::TradeOffer, true) => "Trade accepted!",
            (NotificationKind::TradeOffer, false) => "Trade rejected",
        };
        self.inner.events.alert(Alert::success("Success", success));

        let mut outcome = ActionOutcome { navigated_to: None };
        if kind == NotificationKind::TradeOffer && accept {
            self.inner.view.lock().close(kind);
            match snapshot.as_ref().and_then(Notification::counterpart) {
                Some(counterpart) => {
                    self.inner.events.emit(AppEvent::Navigate {
                        screen: Screen::Messages {
                            counterpart: counterpart.clone(),
                        },
                    });
                    outcome.navigated_to = Some(counterpart);
                }
                None => {
                    tracing::warn!("[Sync] 交易 {} 缺少对方信息，无法打开聊天", target_id);
                    self.inner
                        .events
                        .alert(Alert::error("Error", "Unable to open chat"));
                }
            }
        }

        Ok(outcome)
    }

    /// 清除 "请求已发送" 本地标记
    fn clear_request_flag(&self, notification: Option<&Notification>) {
        let Some(n) = notification else { return };
        let (Some(sender), Some(receiver)) = (&n.sender_id, &n.receiver_id) else {
            return;
        };
        let key = request_sent_key(sender, receiver);
        if let Err(e) = self.inner.session.store().remove(&key) {
            tracing::warn!("[Sync] 清除本地标记失败 {}: {}", key, e);
        }
    }
}

impl Drop for SyncAgent {
    fn drop(&mut self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// 拉取
// ============================================================================

impl AgentInner {
    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// 一轮轮询：三类数据并发拉取，互不影响
    async fn run_cycle(&self, user_id: &str) {
        tokio::join!(
            self.fetch_notifications(user_id, NotificationKind::TraderRequest),
            self.fetch_notifications(user_id, NotificationKind::TradeOffer),
            self.fetch_conversations(user_id),
        );
    }

    async fn fetch_notifications(&self, user_id: &str, kind: NotificationKind) {
        let result = match kind {
            NotificationKind::TraderRequest => {
                self.api.list_notifications(user_id).await.map(|list| {
                    list.into_iter()
                        .filter(|n| n.notif_type.as_deref() == Some(kind.wire_type()))
                        .map(|n| n.into_notification(kind))
                        .collect::<Vec<_>>()
                })
            }
            NotificationKind::TradeOffer => self.api.list_trade_offers(user_id).await.map(|list| {
                list.into_iter()
                    .map(|n| n.into_notification(kind))
                    .collect::<Vec<_>>()
            }),
        };

        if !self.is_mounted() {
            tracing::debug!("[Sync] 已卸载，丢弃 {:?} 响应", kind);
            return;
        }

        // 失败时该类降级为空列表
        let fresh = result.unwrap_or_else(|e| {
            tracing::warn!("[Sync] 拉取 {:?} 失败: {}", kind, e);
            Vec::new()
        });

        let notifications = {
            let mut view = self.view.lock();
            view.replace(kind, fresh);
            view.notifications(kind)
        };
        self.events.emit(AppEvent::NotificationsChanged {
            kind,
            notifications,
        });
    }

    async fn fetch_conversations(&self, user_id: &str) {
        let result = self.api.list_conversations(user_id).await;

        if !self.is_mounted() {
            tracing::debug!("[Sync] 已卸载，丢弃会话响应");
            return;
        }

        let conversations = result.unwrap_or_else(|e| {
            tracing::warn!("[Sync] 拉取会话失败: {}", e);
            Vec::new()
        });

        self.view.lock().replace_conversations(conversations.clone());
        self.events
            .emit(AppEvent::ConversationsChanged { conversations });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AlertLevel;
    use crate::storage::KeyValueStore;
    use crate::testing::{
        FakeApi, conversation, raw_notification, raw_trade, signed_in_session,
        signed_out_session,
    };

    fn agent_with(api: &FakeApi, options: SyncOptions) -> (SyncAgent, EventBus) {
        let events = EventBus::new();
        let agent = SyncAgent::new(
            Arc::new(api.clone()),
            signed_in_session(),
            events.clone(),
            options,
        );
        (agent, events)
    }

    fn seeded_api() -> FakeApi {
        let api = FakeApi::new();
        {
            let mut state = api.state.lock();
            state.notifications = vec![
                raw_notification("n1", "friend_request", Some(("u2", "bob"))),
                raw_notification("x1", "system", None),
            ];
            state.trade_offers = vec![raw_trade("o1", "t1", Some(("u3", "cat")))];
            state.conversations = vec![conversation("u2", "hey", 2)];
        }
        api
    }

    fn alerts(events: &EventBus) -> Vec<Alert> {
        events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::Alert { alert } => Some(alert),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cycle_filters_trader_requests() {
        let api = seeded_api();
        let (agent, _) = agent_with(&api, SyncOptions::default());
        agent.refresh_all().await;

        let requests = agent.notifications(NotificationKind::TraderRequest);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "n1");
        assert_eq!(agent.notifications(NotificationKind::TradeOffer).len(), 1);
        assert_eq!(agent.total_unread_messages(), 2);
        assert!(agent.has_unread());
    }

    #[tokio::test]
    async fn test_failed_class_is_isolated() {
        let api = seeded_api();
        let (agent, _) = agent_with(&api, SyncOptions::default());
        agent.refresh_all().await;

        api.fail("list_trade_offers");
        agent.refresh_all().await;

        assert!(agent.notifications(NotificationKind::TradeOffer).is_empty());
        assert_eq!(agent.notifications(NotificationKind::TraderRequest).len(), 1);
        assert_eq!(agent.conversations().len(), 1);
    }

    #[tokio::test]
    async fn test_signed_out_polling_is_noop() {
        let api = seeded_api();
        let agent = SyncAgent::new(
            Arc::new(api.clone()),
            signed_out_session(),
            EventBus::new(),
            SyncOptions::default(),
        );
        assert!(!agent.start_for_session(Duration::from_millis(10)));
        assert!(!agent.is_polling());
        agent.refresh_all().await;
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_polling_cancels_timer() {
        let api = seeded_api();
        let (agent, _) = agent_with(&api, SyncOptions::default());

        agent.start_polling("me", Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(api.count("list_trade_offers"), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.count("list_trade_offers"), 2);

        agent.stop_polling();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.count("list_trade_offers"), 2);
        assert_eq!(api.count("list_conversations"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_agent_stops_polling() {
        let api = seeded_api();
        let (agent, _) = agent_with(&api, SyncOptions::default());
        agent.start_polling("me", Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(agent);

        let before = api.count("list_notifications");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.count("list_notifications"), before);
    }

    #[tokio::test]
    async fn test_unmounted_agent_drops_late_responses() {
        let api = seeded_api();
        let (agent, _) = agent_with(&api, SyncOptions::default());
        agent.unmount();
        agent.refresh_all().await;
        assert!(agent.entries().is_empty());
    }

    #[tokio::test]
    async fn test_dropdown_marks_read_locally_only() {
        let api = seeded_api();
        let (agent, _) = agent_with(
            &api,
            SyncOptions {
                durable_read_receipts: false,
            },
        );
        agent.refresh_all().await;

        match agent.toggle_dropdown(NotificationKind::TraderRequest) {
            DropdownView::Entries(list) => assert!(list.iter().all(|n| n.is_read)),
            other => panic!("unexpected view: {:?}", other),
        }
        assert_eq!(
            agent.toggle_dropdown(NotificationKind::TraderRequest),
            DropdownView::Hidden
        );
        match agent.toggle_dropdown(NotificationKind::TraderRequest) {
            DropdownView::Entries(list) => assert!(list[0].is_read),
            other => panic!("unexpected view: {:?}", other),
        }
        // 交易报价仍未读
        assert!(agent.has_unread());
        assert_eq!(api.count("mark_notifications_read"), 0);
    }

    #[tokio::test]
    async fn test_durable_read_receipts_call_server() {
        let api = seeded_api();
        let (agent, _) = agent_with(&api, SyncOptions::default());
        agent.refresh_all().await;
        agent.toggle_dropdown(NotificationKind::TradeOffer);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(api.count("mark_notifications_read:o1"), 1);
    }

    #[tokio::test]
    async fn test_empty_dropdown_state() {
        let api = FakeApi::new();
        let (agent, _) = agent_with(&api, SyncOptions::default());
        agent.refresh_all().await;
        assert_eq!(
            agent.toggle_dropdown(NotificationKind::TradeOffer),
            DropdownView::Empty
        );
    }

    #[tokio::test]
    async fn test_accept_trade_calls_once_refetches_then_navigates() {
        let api = seeded_api();
        let (agent, events) = agent_with(&api, SyncOptions::default());
        agent.refresh_all().await;
        let before = api.calls().len();

        let outcome = agent
            .accept("t1", NotificationKind::TradeOffer)
            .await
            .unwrap();

        let calls: Vec<String> = api.calls().into_iter().skip(before).collect();
        assert_eq!(calls, vec!["accept_trade:t1", "list_trade_offers:me"]);
        assert_eq!(outcome.navigated_to.as_ref().unwrap().user_id, "u3");
        assert!(agent.notifications(NotificationKind::TradeOffer).is_empty());

        let navigated = events.drain().into_iter().any(|e| {
            matches!(e, AppEvent::Navigate { screen: Screen::Messages { counterpart } }
                if counterpart.username == "cat")
        });
        assert!(navigated);
    }

    #[tokio::test]
    async fn test_accept_trade_without_sender_surfaces_error() {
        let api = FakeApi::new();
        api.state.lock().trade_offers = vec![raw_trade("o9", "t9", None)];
        let (agent, events) = agent_with(&api, SyncOptions::default());
        agent.refresh_all().await;
        events.drain();

        let outcome = agent
            .accept("t9", NotificationKind::TradeOffer)
            .await
            .unwrap();
        assert!(outcome.navigated_to.is_none());

        let all = events.drain();
        assert!(!all.iter().any(|e| matches!(e, AppEvent::Navigate { .. })));
        assert!(all.iter().any(|e| matches!(e, AppEvent::Alert { alert }
            if alert.level == AlertLevel::Error && alert.message == "Unable to open chat")));
    }

    #[tokio::test]
    async fn test_failed_accept_keeps_item_and_alerts() {
        let api = seeded_api();
        let (agent, events) = agent_with(&api, SyncOptions::default());
        agent.refresh_all().await;
        events.drain();

        api.fail("accept_trade");
        let result = agent.accept("t1", NotificationKind::TradeOffer).await;
        assert!(matches!(result, Err(ClientError::Network(_))));
        assert_eq!(agent.notifications(NotificationKind::TradeOffer).len(), 1);

        let alerts = alerts(&events);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "Failed to accept trade");
    }

    #[tokio::test]
    async fn test_view_changes_only_after_refetch() {
        let api = seeded_api();
        let (agent, _) = agent_with(&api, SyncOptions::default());
        agent.refresh_all().await;

        // 远端接受成功但重新拉取失败：本地列表不会被乐观删除，只会随拉取结果变化
        api.fail("list_notifications");
        agent
            .reject("n1", NotificationKind::TraderRequest)
            .await
            .unwrap();
        assert!(agent.notifications(NotificationKind::TraderRequest).is_empty());
        assert_eq!(api.count("reject_trader_request:n1"), 1);
        assert_eq!(api.count("list_notifications"), 2);
    }

    #[tokio::test]
    async fn test_trader_request_accept_clears_sent_flag() {
        let api = FakeApi::new();
        let mut raw = raw_notification("n5", "friend_request", Some(("u2", "bob")));
        raw.receiver_id = Some("me".to_string());
        api.state.lock().notifications = vec![raw];

        let session = signed_in_session();
        session
            .store()
            .set(&request_sent_key("u2", "me"), "true")
            .unwrap();
        let agent = SyncAgent::new(
            Arc::new(api.clone()),
            session.clone(),
            EventBus::new(),
            SyncOptions::default(),
        );
        agent.refresh_all().await;

        let outcome = agent
            .accept("n5", NotificationKind::TraderRequest)
            .await
            .unwrap();
        assert!(outcome.navigated_to.is_none());
        assert_eq!(
            session.store().get(&request_sent_key("u2", "me")).unwrap(),
            None
        );
    }
}
