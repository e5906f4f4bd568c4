//! 进程级日志安装：`tracing-subscriber` 的 `fmt` 层 + `EnvFilter`。
//!
//! 装载器本身只通过 `tracing` 宏（target `spark::protload`）输出诊断；
//! 宿主在启动时调用一次 [`install`]，之后所有注册与匹配日志都会落到同一个 Subscriber。

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 日志安装错误。
#[derive(Debug, Error)]
pub enum LoggingError {
    /// 全局 Subscriber 已经存在。
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
    #[error("failed to install tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局 Subscriber。`fallback` 在 `RUST_LOG` 未设置时生效，例如 `"info"`。
pub fn install(fallback: &str) -> Result<(), LoggingError> {
    if dispatcher::has_been_set() {
        return Err(LoggingError::AlreadyInstalled);
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter(fallback))
        .with(tracing_subscriber::fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn build_env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}
