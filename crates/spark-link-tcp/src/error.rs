use std::{borrow::Cow, io};

use thiserror::Error;

/// TCP 链路错误码与失败原因文案。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 装载器的 `Connection` 契约只暴露 `bool`/`io::Result`，具体失败细节必须以“原因字符串”
///   的形式留在连接上，供回收钩子写日志；
/// - 为每类操作提供稳定错误码，日志检索无需解析底层 `rustls`/IO 文案。
///
/// ## 逻辑（How）
/// - `OperationKind` 描述一类操作（窥视/握手/读/写/激活）的错误码与默认文案；
/// - [`LinkError`] 把操作类别与底层 `io::Error` 绑定，`reason()` 生成写入连接的原因。
///
/// ## 风险与权衡（Trade-offs）
/// - `rustls::Error` 在握手路径上被包装为 `io::ErrorKind::InvalidData`，原因字符串保留其 Display，
///   不再细分 Alert 类别。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const PEEK: OperationKind = OperationKind {
    code: "spark.link.tcp.peek_failed",
    message: "peek",
};

pub const HANDSHAKE: OperationKind = OperationKind {
    code: "spark.link.tls.handshake_failed",
    message: "tls handshake",
};

pub const READ: OperationKind = OperationKind {
    code: "spark.link.tcp.read_failed",
    message: "read",
};

pub const WRITE: OperationKind = OperationKind {
    code: "spark.link.tcp.write_failed",
    message: "write",
};

pub const ACTIVATE: OperationKind = OperationKind {
    code: "spark.link.tcp.activate_failed",
    message: "activate",
};

/// 链路操作失败。
#[derive(Debug, Error)]
pub enum LinkError {
    /// 底层 IO 或 TLS 记录层失败。
    #[error("{}: {source}", .kind.message)]
    Io {
        kind: OperationKind,
        #[source]
        source: io::Error,
    },

    /// 监听器没有配置 TLS，却遇到了升级标记。
    #[error("no TLS configuration is available on this listener")]
    TlsUnavailable,

    /// `rustls` 拒绝了服务端配置。
    #[error("tls session setup: {0}")]
    Session(#[from] rustls::Error),
}

impl LinkError {
    pub(crate) fn io(kind: OperationKind, source: io::Error) -> Self {
        LinkError::Io { kind, source }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            LinkError::Io { kind, .. } => kind.code,
            LinkError::TlsUnavailable | LinkError::Session(_) => HANDSHAKE.code,
        }
    }

    /// 写入连接的失败原因。
    pub fn reason(&self) -> Cow<'static, str> {
        Cow::Owned(self.to_string())
    }
}
