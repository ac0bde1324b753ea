//! 日志初始化
//!
//! 安装全局 `tracing` 订阅器。设置了 `RUST_LOG` 时它优先于配置的级别。

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// 安装 fmt 订阅器；已有订阅器时返回 `false`
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .try_init()
        .is_ok();
    if installed {
        tracing::info!(target: "script", level = config.level.as_directive(), "Logging initialised");
    }
    installed
}
