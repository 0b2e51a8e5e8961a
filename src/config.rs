/*!
 * 客户端配置管理模块
 *
 * 管理客户端核心的配置，包括：
 * - 后端服务器地址（固定配置，不做服务发现）
 * - 通知轮询间隔
 * - 请求超时
 * - 已读回执是否同步到服务器
 * - 本地数据目录
 *
 * 配置文件为 camelCase JSON，文件不存在时使用默认值。
 * 环境变量 `TRADESMART_SERVER_URL` 可覆盖服务器地址。
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// 常量定义
// ============================================================================

/// 默认后端地址
pub const DEFAULT_SERVER_URL: &str = "http://192.168.1.99:5000";

/// 默认轮询间隔（毫秒）
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

/// 默认请求超时（秒）
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// 覆盖服务器地址的环境变量
pub const SERVER_URL_ENV: &str = "TRADESMART_SERVER_URL";

/// 应用数据目录名
const APP_DIR_NAME: &str = "tradesmart";

/// Socket.IO 端点（Engine.IO v4，直接使用 WebSocket 传输）
const SOCKET_IO_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件读取失败: {0}")]
    ReadFailed(#[from] std::io::Error),
    #[error("配置文件解析失败: {0}")]
    ParseFailed(#[from] serde_json::Error),
    #[error("无法确定本地数据目录")]
    NoDataDir,
}

// ============================================================================
// 配置结构
// ============================================================================

/// 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// 后端服务器地址（不含 /api）
    pub server_url: String,
    /// 通知轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 单个请求超时（秒）
    pub request_timeout_secs: u64,
    /// 打开通知面板时是否同步已读状态到服务器
    pub durable_read_receipts: bool,
    /// 本地数据目录（为空时使用系统默认目录）
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            durable_read_receipts: true,
            data_dir: None,
        }
    }
}

impl ClientConfig {
    /// 从文件加载配置
    ///
    /// 文件不存在时返回默认配置；随后应用环境变量覆盖
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_json::from_str::<ClientConfig>(&content)?
        } else {
            tracing::debug!("[Config] 配置文件不存在，使用默认配置: {:?}", path);
            ClientConfig::default()
        };

        if let Ok(url) = std::env::var(SERVER_URL_ENV)
            && !url.trim().is_empty()
        {
            tracing::info!("[Config] 使用环境变量中的服务器地址: {}", url);
            config.server_url = url;
        }

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 轮询间隔
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 请求超时
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 去掉末尾斜杠的服务器地址
    fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// 拼接 REST 接口地址
    ///
    /// `api_url("items")` -> `http://host:5000/api/items`
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url(), path.trim_start_matches('/'))
    }

    /// 实时通道地址（http -> ws, https -> wss），Socket.IO 的 WebSocket 传输端点
    pub fn ws_url(&self) -> String {
        let base = self.base_url();
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}{}", ws, SOCKET_IO_PATH)
    }

    /// 本地数据目录
    pub fn resolve_data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let base = dirs::data_local_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(base.join(APP_DIR_NAME))
    }

    /// 默认配置文件路径：{data_dir}/config.json
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let base = dirs::data_local_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(base.join(APP_DIR_NAME).join("config.json"))
    }
}
