//! 通知本地视图
//!
//! 保存三类数据的最新快照：交易伙伴请求、交易报价、会话摘要。
//! 已读标记只在本地维护，重新拉取后依然保留（服务器 `isRead` 与本地标记取并集）。

use serde::Serialize;
use std::collections::HashSet;

use crate::models::{Conversation, Notification, NotificationKind};

/// 通知面板显示状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "entries", rename_all = "snake_case")]
pub enum DropdownView {
    /// 面板关闭
    Hidden,
    /// 面板打开但没有通知（显示 "No notifications"）
    Empty,
    /// 面板打开，按类别分组的通知
    Entries(Vec<Notification>),
}

/// 本地通知视图
#[derive(Debug, Default)]
pub struct NotificationView {
    trader_requests: Vec<Notification>,
    trade_offers: Vec<Notification>,
    conversations: Vec<Conversation>,
    /// 本地已读：(类别, 通知 ID)
    read_ids: HashSet<(NotificationKind, String)>,
    /// 当前打开的面板
    open: HashSet<NotificationKind>,
}

impl NotificationView {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, kind: NotificationKind) -> &Vec<Notification> {
        match kind {
            NotificationKind::TraderRequest => &self.trader_requests,
            NotificationKind::TradeOffer => &self.trade_offers,
        }
    }

    fn list_mut(&mut self, kind: NotificationKind) -> &mut Vec<Notification> {
        match kind {
            NotificationKind::TraderRequest => &mut self.trader_requests,
            NotificationKind::TradeOffer => &mut self.trade_offers,
        }
    }

    /// 用最新拉取结果替换某一类通知（保留本地已读标记）
    pub fn replace(&mut self, kind: NotificationKind, mut fresh: Vec<Notification>) {
        for n in fresh.iter_mut() {
            if self.read_ids.contains(&(kind, n.id.clone())) {
                n.is_read = true;
            }
        }
        *self.list_mut(kind) = fresh;
    }

    pub fn replace_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
    }

    pub fn notifications(&self, kind: NotificationKind) -> Vec<Notification> {
        self.list(kind).clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.conversations.clone()
    }

    /// 按 action 目标 ID 查找通知
    pub fn find(&self, kind: NotificationKind, target_id: &str) -> Option<Notification> {
        self.list(kind)
            .iter()
            .find(|n| n.action_target() == target_id || n.id == target_id)
            .cloned()
    }

    /// 将某一类当前持有的通知标记为已读，返回新标记的 ID
    pub fn mark_read(&mut self, kind: NotificationKind) -> Vec<String> {
        let mut newly_read = Vec::new();
        let ids: Vec<String> = self.list(kind).iter().map(|n| n.id.clone()).collect();
        for n in self.list_mut(kind).iter_mut() {
            if !n.is_read {
                newly_read.push(n.id.clone());
            }
            n.is_read = true;
        }
        for id in ids {
            self.read_ids.insert((kind, id));
        }
        newly_read
    }

    /// 切换面板，返回切换后是否打开
    pub fn toggle(&mut self, kind: NotificationKind) -> bool {
        if self.open.remove(&kind) {
            false
        } else {
            self.open.insert(kind);
            true
        }
    }

    pub fn close(&mut self, kind: NotificationKind) {
        self.open.remove(&kind);
    }

    pub fn is_open(&self, kind: NotificationKind) -> bool {
        self.open.contains(&kind)
    }

    pub fn dropdown(&self, kind: NotificationKind) -> DropdownView {
        if !self.is_open(kind) {
            return DropdownView::Hidden;
        }
        let list = self.list(kind);
        if list.is_empty() {
            DropdownView::Empty
        } else {
            DropdownView::Entries(list.clone())
        }
    }

    /// 全部通知，按类别分组拼接（先伙伴请求，后交易报价）
    pub fn entries(&self) -> Vec<Notification> {
        NotificationKind::ALL
            .iter()
            .flat_map(|kind| self.list(*kind).iter().cloned())
            .collect()
    }

    pub fn has_unread(&self) -> bool {
        self.trader_requests
            .iter()
            .chain(self.trade_offers.iter())
            .any(|n| !n.is_read)
    }

    pub fn total_unread_messages(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notif(id: &str, kind: NotificationKind) -> Notification {
        Notification {
            id: id.to_string(),
            kind,
            message: format!("message {}", id),
            is_read: false,
            related_party_id: None,
            related_party_name: None,
            trade_id: None,
            sender_id: None,
            receiver_id: None,
            created_at: None,
        }
    }

    #[test]
    fn test_open_marks_read_and_survives_reopen() {
        let mut view = NotificationView::new();
        view.replace(
            NotificationKind::TraderRequest,
            vec![notif("a", NotificationKind::TraderRequest)],
        );
        assert!(view.has_unread());

        assert!(view.toggle(NotificationKind::TraderRequest));
        view.mark_read(NotificationKind::TraderRequest);
        assert!(!view.toggle(NotificationKind::TraderRequest));
        assert!(view.toggle(NotificationKind::TraderRequest));

        match view.dropdown(NotificationKind::TraderRequest) {
            DropdownView::Entries(list) => assert!(list.iter().all(|n| n.is_read)),
            other => panic!("unexpected view: {:?}", other),
        }
        assert!(!view.has_unread());
    }

    #[test]
    fn test_read_marks_survive_refetch() {
        let mut view = NotificationView::new();
        let kind = NotificationKind::TradeOffer;
        view.replace(kind, vec![notif("t1", kind)]);
        view.mark_read(kind);

        view.replace(kind, vec![notif("t1", kind), notif("t2", kind)]);
        let list = view.notifications(kind);
        assert!(list[0].is_read);
        assert!(!list[1].is_read);
    }

    #[test]
    fn test_empty_open_panel_is_explicit() {
        let mut view = NotificationView::new();
        assert_eq!(
            view.dropdown(NotificationKind::TradeOffer),
            DropdownView::Hidden
        );
        view.toggle(NotificationKind::TradeOffer);
        assert_eq!(
            view.dropdown(NotificationKind::TradeOffer),
            DropdownView::Empty
        );
    }

    #[test]
    fn test_entries_are_class_grouped() {
        let mut view = NotificationView::new();
        view.replace(
            NotificationKind::TradeOffer,
            vec![notif("t1", NotificationKind::TradeOffer)],
        );
        view.replace(
            NotificationKind::TraderRequest,
            vec![
                notif("r1", NotificationKind::TraderRequest),
                notif("r2", NotificationKind::TraderRequest),
            ],
        );
        let kinds: Vec<_> = view.entries().iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::TraderRequest,
                NotificationKind::TraderRequest,
                NotificationKind::TradeOffer
            ]
        );
    }
}
