//! 日志初始化模块
//!
//! 使用 tracing-subscriber 输出到 stderr，过滤规则读取 `RUST_LOG`，
//! 未设置时默认 `tradesmart_app_lib=debug,info`。
//!
//! 由外壳在启动时调用一次，重复调用不会报错。

/// 默认过滤规则
const DEFAULT_FILTER: &str = "tradesmart_app_lib=debug,info";

/// 初始化日志
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with_target(true)
        .try_init();
}
