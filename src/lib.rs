//! TradeSmart 客户端核心
//!
//! 点对点物品交易应用的客户端逻辑层，界面外壳通过普通 Rust API
//! 与事件通道（`EventBus`）使用本库。
//!
//! ## 功能模块
//! - 通知同步：交易伙伴请求、交易报价、会话摘要的定时轮询与本地视图
//! - 接受 / 拒绝：远端调用后重新拉取，接受交易后跳转聊天
//! - 聊天会话：历史 + 实时推送合并去重，乐观发送，失败重试
//! - 交易伙伴：发送请求，"已发送" 本地标记
//! - 物品：自己的物品列表，仅物主可编辑 / 删除，收藏
//! - 账号：注册、登录、登出、个人资料
//!
//! ## 外部接口
//! - REST：`{serverUrl}/api/...`（reqwest）
//! - 实时通道：`{serverUrl}/socket.io/`（tokio-tungstenite 上的 Socket.IO 报文）
//! - 本地存储：SQLite 键值表（rusqlite）

// ============================================
// 基础模块
// ============================================
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod session;
pub mod storage;

// ============================================
// 远端接口
// ============================================
pub mod api;
pub mod channel;

// ============================================
// 业务模块
// ============================================
pub mod auth;
pub mod chat;
pub mod format;
pub mod items;
pub mod partners;
pub mod sync;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use api::{HttpApi, RemoteApi};
pub use auth::Auth;
pub use channel::{LiveChannel, MemoryChannel, Subscription, WsChannel};
pub use chat::ChatSession;
pub use config::ClientConfig;
pub use error::{Alert, AlertLevel, ClientError};
pub use events::{AppEvent, EventBus, Screen};
pub use items::Items;
pub use models::{
    ChatMessage, Conversation, Counterpart, DeliveryStatus, Item, ItemDraft, Notification,
    NotificationKind, User,
};
pub use partners::{Candidate, Partners};
pub use session::{SessionContext, SessionIdentity};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use sync::{ActionOutcome, DropdownView, SyncAgent, SyncOptions};

// ============================================
// 应用上下文
// ============================================

/// 进程级客户端上下文
///
/// 启动时创建一次，持有配置、会话、远端接口和事件总线，
/// 各页面从这里取得自己的服务对象。
pub struct ClientApp {
    config: ClientConfig,
    events: EventBus,
    session: Arc<SessionContext>,
    api: Arc<dyn RemoteApi>,
    channel: Arc<dyn LiveChannel>,
}

impl ClientApp {
    /// 按配置启动：SQLite 存储 + HTTP 接口 + Socket.IO 通道
    pub fn start(config: ClientConfig) -> Result<Self, ClientError> {
        let data_dir = config.resolve_data_dir()?;
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&data_dir)?);
        let api: Arc<dyn RemoteApi> = Arc::new(HttpApi::new(config.clone())?);
        let channel: Arc<dyn LiveChannel> = Arc::new(WsChannel::new(config.ws_url()));

        tracing::info!(
            "[App] 启动: 服务器 {} 数据目录 {}",
            config.server_url,
            data_dir.display()
        );
        Self::with_parts(config, store, api, channel)
    }

    /// 使用给定的存储、接口和通道组装（离线模式 / 测试）
    pub fn with_parts(
        config: ClientConfig,
        store: Arc<dyn KeyValueStore>,
        api: Arc<dyn RemoteApi>,
        channel: Arc<dyn LiveChannel>,
    ) -> Result<Self, ClientError> {
        let session = SessionContext::load(store)?;
        Ok(Self {
            config,
            events: EventBus::new(),
            session,
            api,
            channel,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 事件总线（界面层从 `receiver()` 消费）
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn auth(&self) -> Auth {
        Auth::new(self.api.clone(), self.session.clone(), self.events.clone())
    }

    pub fn items(&self) -> Items {
        Items::new(self.api.clone(), self.session.clone(), self.events.clone())
    }

    pub fn partners(&self) -> Partners {
        Partners::new(self.api.clone(), self.session.clone(), self.events.clone())
    }

    /// 为一个页面创建同步代理（尚未开始轮询）
    pub fn sync_agent(&self) -> SyncAgent {
        SyncAgent::new(
            self.api.clone(),
            self.session.clone(),
            self.events.clone(),
            SyncOptions {
                durable_read_receipts: self.config.durable_read_receipts,
            },
        )
    }

    /// 创建同步代理并按配置间隔开始轮询（未登录时不轮询）
    pub fn mount_sync(&self) -> SyncAgent {
        let agent = self.sync_agent();
        agent.start_for_session(self.config.poll_interval());
        agent
    }

    /// 打开与某个聊天对象的会话
    pub async fn open_chat(&self, counterpart: Counterpart) -> Result<ChatSession, ClientError> {
        ChatSession::open(
            &self.session,
            counterpart,
            self.api.clone(),
            self.channel.as_ref(),
            self.events.clone(),
        )
        .await
    }
}
