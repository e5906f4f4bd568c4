use std::{
    io,
    net::{SocketAddr, TcpListener, ToSocketAddrs},
    time::Duration,
};

use spark_protocol_loader::{
    Connection, ConnectionError, DispatcherSet, PortDispatcher, ProtocolRegistry, recycle,
};
use tracing::{debug, warn};

use crate::{link::TcpLink, upgrader::TlsUpgrader};

/// 阻塞式监听器：接受连接并包装为 [`TcpLink`]。
///
/// 监听器只负责把 TLS 配置与探测超时带到每条新连接上，匹配交给 [`dispatch`]。
#[derive(Debug)]
pub struct LinkListener {
    listener: TcpListener,
    upgrader: Option<TlsUpgrader>,
    probe_timeout: Option<Duration>,
}

impl LinkListener {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            upgrader: None,
            probe_timeout: None,
        })
    }

    /// 允许本端口上的连接升级为 TLS。
    pub fn with_tls(mut self, upgrader: TlsUpgrader) -> Self {
        self.upgrader = Some(upgrader);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 接受一条连接。
    pub fn accept(&self) -> io::Result<TcpLink> {
        let (stream, peer) = self.listener.accept()?;
        debug!(target: "spark::link", %peer, "accepted connection");
        let link = TcpLink::new(stream, self.upgrader.clone());
        match self.probe_timeout {
            Some(timeout) => link.with_probe_timeout(timeout),
            None => Ok(link),
        }
    }
}

/// 为一条新连接选择协议并处理首个请求。
///
/// 成功时返回协议的处理结果；失败时调用回收钩子记录原因，并返回统一的拆除信号。
pub fn dispatch(link: &mut TcpLink, dispatcher: &PortDispatcher, registry: &ProtocolRegistry) -> i32 {
    match dispatcher.process(registry, link) {
        Ok(code) => code,
        Err(err) => {
            recycle(Some(&*link as &dyn Connection), link.connected_for(), link.failure_reason());
            err.code()
        }
    }
}

/// 按本地端口查找调度器后执行 [`dispatch`]。
pub fn dispatch_on(
    link: &mut TcpLink,
    local_port: u16,
    dispatchers: &DispatcherSet,
    registry: &ProtocolRegistry,
) -> i32 {
    match dispatchers.get(local_port) {
        Some(dispatcher) => dispatch(link, dispatcher, registry),
        None => {
            warn!(
                target: "spark::link",
                conn = %link.id(),
                port = local_port,
                "no protocol is registered on this port"
            );
            link.set_failure_reason("no protocol is registered on this port".into());
            recycle(Some(&*link as &dyn Connection), link.connected_for(), link.failure_reason());
            ConnectionError::TEARDOWN
        }
    }
}
