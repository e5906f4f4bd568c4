use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;
use rustls::{ServerConfig, ServerConnection};

use crate::error::LinkError;

/// 监听器级别的 TLS 升级配置，可热替换。
///
/// # 设计动机（Why）
/// - 升级发生在连接匹配的中途，监听线程不能因为更换证书而暂停；
/// - `ArcSwap` 读路径无锁、写路径原子替换，新连接拿到最新快照，已握手的连接继续持有旧快照。
///
/// # 核心契约（What）
/// - 写入的 `ServerConfig` 必须已完成证书链与私钥装载；
/// - [`TlsUpgrader::session`] 每次调用读取一次当前快照，替换对之后的升级立即可见。
#[derive(Clone)]
pub struct TlsUpgrader {
    inner: Arc<ArcSwap<ServerConfig>>,
}

impl TlsUpgrader {
    pub fn new(initial: Arc<ServerConfig>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(initial)),
        }
    }

    #[inline]
    pub fn from_config(initial: ServerConfig) -> Self {
        Self::new(Arc::new(initial))
    }

    /// 当前配置的共享快照。
    #[inline]
    pub fn snapshot(&self) -> Arc<ServerConfig> {
        self.inner.load_full()
    }

    /// 替换配置并返回旧值。
    #[inline]
    pub fn replace(&self, next: Arc<ServerConfig>) -> Arc<ServerConfig> {
        self.inner.swap(next)
    }

    /// 基于当前快照创建一次服务端会话，尚未读写任何记录。
    pub fn session(&self) -> Result<ServerConnection, LinkError> {
        Ok(ServerConnection::new(self.snapshot())?)
    }
}

impl fmt::Debug for TlsUpgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsUpgrader").finish_non_exhaustive()
    }
}
