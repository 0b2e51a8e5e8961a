//! 会话身份模块
//!
//! 整个进程只有一个 `SessionContext`，在应用启动时从本地存储加载一次，
//! 然后以 `Arc` 注入到所有需要身份的组件（轮询、聊天、物品、伙伴）。
//! 各组件只读，登录 / 登出由 `auth` 模块统一写入。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::clean_id;
use crate::storage::{KEY_USER_ID, KEY_USERNAME, KeyValueStore, StorageError};

// ============================================================================
// 会话身份
// ============================================================================

/// 当前登录用户
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    /// 用户 ID
    pub user_id: String,
    /// 用户名
    pub username: String,
}

// ============================================================================
// 会话上下文
// ============================================================================

/// 进程级会话上下文
pub struct SessionContext {
    store: Arc<dyn KeyValueStore>,
    current: RwLock<Option<SessionIdentity>>,
}

impl SessionContext {
    /// 从本地存储加载会话
    ///
    /// 存储中没有 `userId` 时视为未登录
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Arc<Self>, StorageError> {
        let identity = match store.get(KEY_USER_ID)? {
            Some(raw_id) if !clean_id(&raw_id).is_empty() => Some(SessionIdentity {
                user_id: clean_id(&raw_id),
                username: store.get(KEY_USERNAME)?.unwrap_or_default(),
            }),
            _ => None,
        };

        match &identity {
            Some(id) => tracing::info!("[Session] 已加载会话: {} ({})", id.username, id.user_id),
            None => tracing::info!("[Session] 未登录"),
        }

        Ok(Arc::new(Self {
            store,
            current: RwLock::new(identity),
        }))
    }

    /// 当前身份
    pub fn current(&self) -> Option<SessionIdentity> {
        self.current.read().clone()
    }

    /// 当前用户 ID
    pub fn user_id(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.user_id.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.read().is_some()
    }

    /// 底层存储（用于读写本地标记）
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// 登录成功后写入会话
    pub fn sign_in(&self, identity: SessionIdentity) -> Result<(), StorageError> {
        self.store.set(KEY_USER_ID, &identity.user_id)?;
        self.store.set(KEY_USERNAME, &identity.username)?;
        tracing::info!("[Session] 登录: {} ({})", identity.username, identity.user_id);
        *self.current.write() = Some(identity);
        Ok(())
    }

    /// 登出，清除会话
    pub fn sign_out(&self) -> Result<(), StorageError> {
        self.store.remove(KEY_USER_ID)?;
        self.store.remove(KEY_USERNAME)?;
        *self.current.write() = None;
        tracing::info!("[Session] 已登出");
        Ok(())
    }
}
