/*!
 * 远端 REST 接口模块
 *
 * 后端不属于本仓库，这里只定义客户端依赖的接口边界：
 * - auth: 注册 / 登录 / 登出
 * - items: 物品列表 / 新建 / 编辑 / 删除 / 收藏
 * - users: 用户列表 / 详情 / 资料更新
 * - notifications: 交易伙伴请求 列表 / 发送 / 接受 / 拒绝 / 已读
 * - trades: 交易报价 新建 / 接受 / 拒绝 / 按用户列出
 * - messages: 发送 / 按用户对列出 / 按用户列出会话
 *
 * 模块结构：
 * - `RemoteApi`: 接口 trait，便于注入测试替身
 * - http: 基于 reqwest 的实现
 */

pub mod http;

use async_trait::async_trait;

use crate::error::ClientError;
use crate::models::{ChatMessage, Conversation, Item, ItemDraft, RawNotification, User};

pub use http::HttpApi;

/// 远端接口
#[async_trait]
pub trait RemoteApi: Send + Sync {
    // ========== auth ==========
    async fn register(&self, username: &str, email: &str, password: &str)
    -> Result<(), ClientError>;
    async fn login(&self, email: &str, password: &str) -> Result<User, ClientError>;
    async fn logout(&self) -> Result<(), ClientError>;

    // ========== items ==========
    async fn list_items(&self, user_id: &str) -> Result<Vec<Item>, ClientError>;
    async fn create_item(&self, owner_id: &str, draft: &ItemDraft) -> Result<Item, ClientError>;
    async fn update_item(&self, item_id: &str, draft: &ItemDraft) -> Result<Item, ClientError>;
    async fn delete_item(&self, item_id: &str) -> Result<(), ClientError>;
    async fn star_item(&self, item_id: &str, user_id: &str) -> Result<Item, ClientError>;

    // ========== users ==========
    async fn list_users(&self, exclude_user_id: &str) -> Result<Vec<User>, ClientError>;
    async fn get_user(&self, user_id: &str) -> Result<User, ClientError>;
    async fn update_profile(
        &self,
        user_id: &str,
        username: &str,
        email: &str,
    ) -> Result<User, ClientError>;

    // ========== notifications ==========
    async fn list_notifications(&self, user_id: &str)
    -> Result<Vec<RawNotification>, ClientError>;
    async fn create_trader_request(
        &self,
        sender_id: &str,
        receiver_id: &str,
        message: &str,
    ) -> Result<(), ClientError>;
    async fn accept_trader_request(&self, notification_id: &str) -> Result<(), ClientError>;
    async fn reject_trader_request(&self, notification_id: &str) -> Result<(), ClientError>;
    async fn mark_notifications_read(&self, notification_ids: &[String])
    -> Result<(), ClientError>;

    // ========== trades ==========
    /// 发起交易报价：用自己的物品交换对方的物品
    async fn create_trade(
        &self,
        sender_id: &str,
        receiver_id: &str,
        offered_item_id: &str,
        requested_item_id: &str,
    ) -> Result<(), ClientError>;
    async fn accept_trade(&self, trade_id: &str) -> Result<(), ClientError>;
    async fn reject_trade(&self, trade_id: &str) -> Result<(), ClientError>;
    async fn list_trade_offers(&self, user_id: &str) -> Result<Vec<RawNotification>, ClientError>;

    // ========== messages ==========
    /// 持久化消息，返回服务器确认后的消息（响应体无法解析时为 None）
    async fn post_message(&self, message: &ChatMessage)
    -> Result<Option<ChatMessage>, ClientError>;
    async fn list_messages(&self, user_id: &str, other_user_id: &str)
    -> Result<Vec<ChatMessage>, ClientError>;
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ClientError>;
}
