use std::{
    borrow::Cow,
    io::{self, Read, Write},
    net::TcpStream,
    sync::Arc,
    time::{Duration, Instant},
};

use rustls::ServerConnection;
use spark_protocol_loader::{Connection, Protocol};
use tracing::{debug, warn};

use crate::{
    error::{ACTIVATE, HANDSHAKE, LinkError, OperationKind, PEEK, READ, WRITE},
    upgrader::TlsUpgrader,
};

const READ_AHEAD_CHUNK: usize = 4096;

/// 一条已接受的 TCP 连接，满足装载器的 [`Connection`] 契约。
///
/// # 教案式注释
/// - **意图 (Why)**：协议探测需要“看但不取走”首部字节，升级后还要对解密数据做同样的事；
///   两个阶段共用一个对象，匹配器只面对 `dyn Connection`；
/// - **契约 (What)**：
///   - 升级前 `peek` 直接使用内核的 `MSG_PEEK`，字节仍留在套接字里；
///   - 升级后 `peek` 读取解密明文到预读缓冲区，随后的 `read` 先消费缓冲区；
///   - 任一 IO 失败都会把链路标记为 flawed 并登记原因，之后的匹配立即终止；
/// - **风险 (Trade-offs)**：套接字为阻塞模式，探测阶段的等待上限由 `with_probe_timeout` 决定；
///   未设置时一个静默的客户端会一直占住工作线程。
pub struct TcpLink {
    id: String,
    stream: TcpStream,
    upgrader: Option<TlsUpgrader>,
    tls: Option<ServerConnection>,
    read_ahead: Vec<u8>,
    flawed: bool,
    reason: Option<Cow<'static, str>>,
    protocol: Option<Arc<dyn Protocol>>,
    protocol_name: Option<Arc<str>>,
    active: bool,
    accepted_at: Instant,
}

impl TcpLink {
    /// 包装已接受的流；`upgrader` 为 `None` 表示该监听器不支持 TLS。
    pub fn new(stream: TcpStream, upgrader: Option<TlsUpgrader>) -> Self {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_owned(), |addr| addr.to_string());
        let local = stream
            .local_addr()
            .map_or_else(|_| "unknown".to_owned(), |addr| addr.to_string());
        Self {
            id: format!("{peer}@{local}"),
            stream,
            upgrader,
            tls: None,
            read_ahead: Vec::new(),
            flawed: false,
            reason: None,
            protocol: None,
            protocol_name: None,
            active: false,
            accepted_at: Instant::now(),
        }
    }

    /// 探测阶段的读超时，`activate` 时清除。
    pub fn with_probe_timeout(self, timeout: Duration) -> io::Result<Self> {
        self.stream.set_read_timeout(Some(timeout))?;
        Ok(self)
    }

    pub fn protocol(&self) -> Option<&Arc<dyn Protocol>> {
        self.protocol.as_ref()
    }

    pub fn protocol_name(&self) -> Option<&str> {
        self.protocol_name.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 自包装以来经过的时间。
    pub fn connected_for(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// 客户端在握手中给出的 SNI。
    pub fn server_name(&self) -> Option<&str> {
        self.tls.as_ref().and_then(|tls| tls.server_name())
    }

    fn fail(&mut self, err: LinkError) -> LinkError {
        warn!(
            target: "spark::link",
            conn = %self.id,
            code = err.code(),
            %err,
            "link flawed"
        );
        self.flawed = true;
        self.reason = Some(err.reason());
        err
    }

    fn fail_io(&mut self, kind: OperationKind, source: io::Error) -> io::Error {
        let kind_of = source.kind();
        let err = self.fail(LinkError::io(kind, source));
        io::Error::new(kind_of, err)
    }

    fn handshake(&mut self) -> Result<(), LinkError> {
        let Some(upgrader) = &self.upgrader else {
            return Err(LinkError::TlsUnavailable);
        };
        let mut session = upgrader.session()?;
        while session.is_handshaking() {
            session
                .complete_io(&mut self.stream)
                .map_err(|source| LinkError::io(HANDSHAKE, source))?;
        }
        debug!(
            target: "spark::link",
            conn = %self.id,
            version = ?session.protocol_version(),
            sni = session.server_name().unwrap_or("-"),
            "tls upgrade complete"
        );
        self.tls = Some(session);
        Ok(())
    }

    /// 至少解密出一段明文追加到预读缓冲区，返回新增字节数；0 表示对端已正常关闭。
    fn fill_read_ahead(&mut self) -> io::Result<usize> {
        let Some(tls) = self.tls.as_mut() else {
            return Ok(0);
        };
        let mut chunk = [0u8; READ_AHEAD_CHUNK];
        let mut transport_idle = false;
        loop {
            match tls.reader().read(&mut chunk) {
                Ok(n) => {
                    self.read_ahead.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err),
            }
            if transport_idle {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
            let (read, written) = tls.complete_io(&mut self.stream)?;
            transport_idle = read == 0 && written == 0;
        }
    }

    fn drain_read_ahead(&mut self, buf: &mut [u8]) -> usize {
        let n = self.read_ahead.len().min(buf.len());
        buf[..n].copy_from_slice(&self.read_ahead[..n]);
        self.read_ahead.drain(..n);
        n
    }
}

impl Connection for TcpLink {
    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.tls.is_none() {
            return self
                .stream
                .peek(buf)
                .map_err(|source| self.fail_io(PEEK, source));
        }
        if self.read_ahead.is_empty() {
            self.fill_read_ahead()
                .map_err(|source| self.fail_io(PEEK, source))?;
        }
        let n = self.read_ahead.len().min(buf.len());
        buf[..n].copy_from_slice(&self.read_ahead[..n]);
        Ok(n)
    }

    fn upgrade_to_tls(&mut self) -> bool {
        if self.tls.is_some() {
            return true;
        }
        match self.handshake() {
            Ok(()) => true,
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    fn is_flawed(&self) -> bool {
        self.flawed
    }

    fn set_failure_reason(&mut self, reason: Cow<'static, str>) {
        self.reason = Some(reason);
    }

    fn failure_reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    fn attach_protocol(&mut self, protocol: Arc<dyn Protocol>) {
        self.protocol = Some(protocol);
    }

    fn set_protocol_name(&mut self, name: Arc<str>) {
        self.protocol_name = Some(name);
    }

    fn activate(&mut self) -> bool {
        if self.protocol.is_none() {
            self.reason = Some(Cow::Borrowed("activated without a protocol"));
            return false;
        }
        let prepared = self
            .stream
            .set_read_timeout(None)
            .and_then(|()| self.stream.set_nodelay(true));
        if let Err(source) = prepared {
            self.fail(LinkError::io(ACTIVATE, source));
            return false;
        }
        self.active = true;
        true
    }
}

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.tls.is_none() {
            return self
                .stream
                .read(buf)
                .map_err(|source| self.fail_io(READ, source));
        }
        if self.read_ahead.is_empty()
            && self
                .fill_read_ahead()
                .map_err(|source| self.fail_io(READ, source))?
                == 0
        {
            return Ok(0);
        }
        Ok(self.drain_read_ahead(buf))
    }
}

impl Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(tls) = self.tls.as_mut() else {
            return self
                .stream
                .write(buf)
                .map_err(|source| self.fail_io(WRITE, source));
        };
        let written = tls.writer().write(buf)?;
        let mut flushed = Ok(());
        while tls.wants_write() {
            if let Err(source) = tls.write_tls(&mut self.stream) {
                flushed = Err(source);
                break;
            }
        }
        flushed.map_err(|source| self.fail_io(WRITE, source))?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(tls) = self.tls.as_mut() {
            tls.writer().flush()?;
            while tls.wants_write() {
                tls.write_tls(&mut self.stream)?;
            }
        }
        self.stream.flush()
    }
}

impl std::fmt::Debug for TcpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpLink")
            .field("id", &self.id)
            .field("tls", &self.tls.is_some())
            .field("flawed", &self.flawed)
            .field("protocol", &self.protocol_name)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
