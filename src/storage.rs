//! 本地键值存储模块
//!
//! 保存会话身份和少量本地标记：
//! - `userId` / `username`：当前登录用户
//! - `request_sent_{senderId}_{receiverId}`：交易伙伴请求已发送标记
//!
//! ## 实现
//! - `SqliteStore`：rusqlite 持久化存储（`{data_dir}/local_store.db`）
//! - `MemoryStore`：进程内存储，用于测试和无持久化场景
//!
//! 所有数据都很小，读写都在调用线程同步完成。

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// 键名
// ============================================================================

/// 当前用户 ID
pub const KEY_USER_ID: &str = "userId";

/// 当前用户名
pub const KEY_USERNAME: &str = "username";

/// 交易伙伴请求已发送标记
/// 格式: request_sent_{sender_id}_{receiver_id}
pub fn request_sent_key(sender_id: &str, receiver_id: &str) -> String {
    format!("request_sent_{}_{}", sender_id, receiver_id)
}

// ============================================================================
// 错误类型
// ============================================================================

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

// ============================================================================
// 存储接口
// ============================================================================

/// 持久化键值存储
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ============================================================================
// SQLite 实现
// ============================================================================

/// 基于 SQLite 的键值存储
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 打开（或创建）数据目录下的存储文件
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        if !data_dir.exists() {
            fs::create_dir_all(data_dir)?;
        }
        let db_path = data_dir.join("local_store.db");
        tracing::info!("[Storage] 打开本地存储: {:?}", db_path);

        let conn = Connection::open(&db_path)?;
        Self::with_connection(conn)
    }

    /// 内存数据库（不落盘）
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?", [key])?;
        Ok(())
    }
}

// ============================================================================
// 内存实现
// ============================================================================

/// 进程内键值存储
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_sent_key() {
        assert_eq!(request_sent_key("u1", "u2"), "request_sent_u1_u2");
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SqliteStore::open(dir.path()).unwrap();
            store.set(KEY_USER_ID, "u1").unwrap();
            store.set(KEY_USER_ID, "u2").unwrap();
            store.set(KEY_USERNAME, "amy").unwrap();
        }

        let store = SqliteStore::open(dir.path()).unwrap();
        assert_eq!(store.get(KEY_USER_ID).unwrap().as_deref(), Some("u2"));

        store.remove(KEY_USERNAME).unwrap();
        assert_eq!(store.get(KEY_USERNAME).unwrap(), None);
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").unwrap(), None);
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }
}
