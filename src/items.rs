//! 物品管理
//!
//! 只展示当前用户自己的物品；编辑 / 删除按钮只对自己的物品可见，
//! 对他人物品的修改在本地直接拒绝，不会发出请求。
//!
//! 交易报价：用自己的一件物品换取对方的一件物品。

use std::sync::Arc;

use crate::api::RemoteApi;
use crate::error::{Alert, ClientError};
use crate::events::EventBus;
use crate::models::{Item, ItemDraft, clean_id};
use crate::session::SessionContext;

/// 物品服务
pub struct Items {
    api: Arc<dyn RemoteApi>,
    session: Arc<SessionContext>,
    events: EventBus,
}

impl Items {
    pub fn new(api: Arc<dyn RemoteApi>, session: Arc<SessionContext>, events: EventBus) -> Self {
        Self {
            api,
            session,
            events,
        }
    }

    fn current_id(&self) -> Option<String> {
        self.session.user_id().map(|id| clean_id(&id))
    }

    /// 当前用户 ID，未登录时弹出提示
    fn me(&self) -> Result<String, ClientError> {
        self.report(self.current_id().ok_or_else(|| {
            ClientError::precondition("User info not loaded yet. Please wait a moment.")
        }))
    }

    /// 出错时弹出提示并原样返回
    fn report<T>(&self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(e) = &result {
            tracing::warn!("[Items] 操作失败: {}", e);
            self.events.alert(e.to_alert("Error"));
        }
        result
    }

    /// 当前用户的物品
    pub async fn my_items(&self) -> Result<Vec<Item>, ClientError> {
        let me = self.me()?;
        let items = self.report(self.api.list_items(&me).await)?;
        let mine: Vec<Item> = items.into_iter().filter(|i| i.is_owned_by(&me)).collect();
        tracing::debug!("[Items] 自己的物品: {} 件", mine.len());
        Ok(mine)
    }

    /// 是否显示编辑 / 删除
    pub fn can_modify(&self, item: &Item) -> bool {
        self.current_id()
            .map(|me| item.is_owned_by(&me))
            .unwrap_or(false)
    }

    fn ensure_owner(&self, item: &Item) -> Result<(), ClientError> {
        if self.can_modify(item) {
            Ok(())
        } else {
            Err(ClientError::precondition("You can only modify your own items."))
        }
    }

    pub async fn create_item(&self, draft: &ItemDraft) -> Result<Item, ClientError> {
        let me = self.me()?;
        if draft.name.trim().is_empty() {
            return self.report(Err(ClientError::precondition("Please fill all fields")));
        }
        let item = self.report(self.api.create_item(&me, draft).await)?;
        tracing::info!("[Items] 新建物品: {} ({})", item.name, item.id);
        self.events.alert(Alert::success("Success", "Item added!"));
        Ok(item)
    }

    pub async fn update_item(&self, item: &Item, draft: &ItemDraft) -> Result<Item, ClientError> {
        self.report(self.ensure_owner(item))?;
        if draft.name.trim().is_empty() {
            return self.report(Err(ClientError::precondition("Please fill all fields")));
        }
        let updated = self.report(self.api.update_item(&item.id, draft).await)?;
        self.events.alert(Alert::success("Success", "Item updated!"));
        Ok(updated)
    }

    pub async fn delete_item(&self, item: &Item) -> Result<(), ClientError> {
        self.report(self.ensure_owner(item))?;
        self.report(self.api.delete_item(&item.id).await)?;
        tracing::info!("[Items] 删除物品: {}", item.id);
        Ok(())
    }

    /// 发起交易报价：`offered` 必须是自己的物品，`requested` 必须是对方的物品
    pub async fn propose_trade(&self, offered: &Item, requested: &Item) -> Result<(), ClientError> {
        let me = self.me()?;
        if !offered.is_owned_by(&me) {
            return self.report(Err(ClientError::precondition(
                "You can only offer your own items.",
            )));
        }
        let receiver_id = requested.owner_id();
        if receiver_id.is_empty() || receiver_id == me {
            return self.report(Err(ClientError::precondition(
                "Choose an item owned by another trader.",
            )));
        }

        tracing::info!(
            "[Items] 发起交易: {} ({}) -> {} ({})",
            me,
            offered.id,
            receiver_id,
            requested.id
        );
        self.report(
            self.api
                .create_trade(&me, &receiver_id, &offered.id, &requested.id)
                .await,
        )?;
        self.events
            .alert(Alert::success("Success", "Trade offer sent!"));
        Ok(())
    }

    /// 收藏 / 取消收藏
    pub async fn toggle_star(&self, item_id: &str) -> Result<Item, ClientError> {
        let me = self.me()?;
        self.report(self.api.star_item(item_id, &me).await)
    }
}
