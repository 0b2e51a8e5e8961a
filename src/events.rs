/*!
 * 界面事件模块
 *
 * 核心通过事件通道通知外壳（界面层）：
 * - 一次性提示（Alert）
 * - 页面跳转（例如接受交易后打开聊天）
 * - 通知 / 会话 / 聊天列表变化
 *
 * 通道使用 async-channel，外壳持有接收端逐条消费。
 * 接收端全部关闭后事件被丢弃，不影响核心逻辑。
 */

use serde::Serialize;

use crate::error::Alert;
use crate::models::{ChatMessage, Conversation, Counterpart, Notification, NotificationKind};

// ============================================================================
// 事件定义
// ============================================================================

/// 页面
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Screen {
    Home,
    Trades,
    Partners,
    Items,
    Profile,
    Login,
    /// 聊天页面（带聊天对象）
    Messages { counterpart: Counterpart },
}

/// 发给界面层的事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// 一次性提示
    Alert { alert: Alert },
    /// 页面跳转
    Navigate { screen: Screen },
    /// 某一类通知列表已更新
    NotificationsChanged {
        kind: NotificationKind,
        notifications: Vec<Notification>,
    },
    /// 会话摘要已更新
    ConversationsChanged { conversations: Vec<Conversation> },
    /// 当前聊天消息列表已更新
    ChatChanged {
        counterpart_id: String,
        messages: Vec<ChatMessage>,
    },
}

// ============================================================================
// 事件总线
// ============================================================================

/// 事件总线（多生产者，界面层消费）
#[derive(Clone)]
pub struct EventBus {
    tx: async_channel::Sender<AppEvent>,
    rx: async_channel::Receiver<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }

    /// 发送事件
    pub fn emit(&self, event: AppEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!("[Events] 发送事件失败: {}", e);
        }
    }

    /// 发送提示
    pub fn alert(&self, alert: Alert) {
        self.emit(AppEvent::Alert { alert });
    }

    /// 接收端（外壳消费）
    pub fn receiver(&self) -> async_channel::Receiver<AppEvent> {
        self.rx.clone()
    }

    /// 取出当前已排队的全部事件
    pub fn drain(&self) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
