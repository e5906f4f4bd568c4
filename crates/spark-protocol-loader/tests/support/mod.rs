//! 集成测试共享的连接、协议与模块载入替身。

#![allow(dead_code)]

use std::{
    borrow::Cow,
    collections::HashMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use spark_protocol_loader::{
    Connection, EntryPoint, EntryPoints, LoadRequest, ModuleImage, ModuleLoadError, ModuleLoader,
    ModuleResolver, PROTO_MAX, Protocol, ProtocolConfig, ProtocolFactory, ProtocolRegistry,
    ResolvedSymbol,
};

/// 内存中的连接：明文视图与升级后视图各一份字节。
pub struct MockConnection {
    pub id: String,
    pub plaintext: Vec<u8>,
    pub decrypted: Vec<u8>,
    pub upgrade_ok: bool,
    pub activate_ok: bool,
    /// `peek` 返回 IO 错误并把连接标记为 flawed。
    pub broken: bool,
    pub tls: bool,
    pub flawed: bool,
    pub upgrades: usize,
    pub activations: usize,
    pub reason: Option<String>,
    pub protocol: Option<Arc<dyn Protocol>>,
    pub protocol_name: Option<Arc<str>>,
}

impl MockConnection {
    pub fn new(plaintext: &[u8]) -> Self {
        Self {
            id: "user.1:7@client.test".to_owned(),
            plaintext: plaintext.to_vec(),
            decrypted: Vec::new(),
            upgrade_ok: true,
            activate_ok: true,
            broken: false,
            tls: false,
            flawed: false,
            upgrades: 0,
            activations: 0,
            reason: None,
            protocol: None,
            protocol_name: None,
        }
    }

    /// 升级后可见的明文。
    pub fn after_upgrade(mut self, decrypted: &[u8]) -> Self {
        self.decrypted = decrypted.to_vec();
        self
    }

    pub fn failing_upgrade(mut self) -> Self {
        self.upgrade_ok = false;
        self
    }

    pub fn failing_activation(mut self) -> Self {
        self.activate_ok = false;
        self
    }

    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

impl Connection for MockConnection {
    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.broken {
            self.flawed = true;
            self.reason = Some("connection reset by peer".to_owned());
            return Err(io::Error::from(io::ErrorKind::ConnectionReset));
        }
        let view = if self.tls {
            &self.decrypted
        } else {
            &self.plaintext
        };
        let n = view.len().min(buf.len());
        buf[..n].copy_from_slice(&view[..n]);
        Ok(n)
    }

    fn upgrade_to_tls(&mut self) -> bool {
        self.upgrades += 1;
        self.tls = self.upgrade_ok;
        self.upgrade_ok
    }

    fn is_tls(&self) -> bool {
        self.tls
    }

    fn is_flawed(&self) -> bool {
        self.flawed
    }

    fn set_failure_reason(&mut self, reason: Cow<'static, str>) {
        self.reason = Some(reason.into_owned());
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
        self.activations += 1;
        self.activate_ok
    }
}

/// TLS 要求：协议只接受某一种连接状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Tls,
    Any,
}

/// 根据首部魔数认领连接的协议。
pub struct PrefixProtocol {
    pub name: &'static str,
    pub prefix: &'static [u8],
    pub transport: Transport,
    pub code: i32,
    pub probes: Arc<AtomicUsize>,
    pub processed: Arc<AtomicUsize>,
}

impl PrefixProtocol {
    pub fn new(name: &'static str, prefix: &'static [u8], transport: Transport, code: i32) -> Self {
        Self {
            name,
            prefix,
            transport,
            code,
            probes: Arc::new(AtomicUsize::new(0)),
            processed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl Protocol for PrefixProtocol {
    fn match_probe(&self, conn: &mut dyn Connection) -> Option<Arc<dyn Protocol>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let transport_ok = match self.transport {
            Transport::Plain => !conn.is_tls(),
            Transport::Tls => conn.is_tls(),
            Transport::Any => true,
        };
        let mut head = [0u8; 16];
        let n = conn.peek(&mut head).ok()?;
        (transport_ok && head[..n].starts_with(self.prefix)).then(|| {
            Arc::new(Session {
                code: self.code,
                processed: self.processed.clone(),
            }) as Arc<dyn Protocol>
        })
    }

    fn process(&self, _conn: &mut dyn Connection) -> i32 {
        self.code
    }

    fn write_statistics(&self, buf: Option<&mut [u8]>, _sync: bool) -> usize {
        let blob = format!("<proto name=\"{}\" probes=\"{}\"/>", self.name, self.probe_count());
        match buf {
            None => blob.len(),
            Some(buf) => {
                let n = blob.len().min(buf.len());
                buf[..n].copy_from_slice(&blob.as_bytes()[..n]);
                n
            }
        }
    }
}

/// 每连接会话实例。
pub struct Session {
    pub code: i32,
    pub processed: Arc<AtomicUsize>,
}

impl Protocol for Session {
    fn match_probe(&self, _conn: &mut dyn Connection) -> Option<Arc<dyn Protocol>> {
        None
    }

    fn process(&self, _conn: &mut dyn Connection) -> i32 {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.code
    }

    fn write_statistics(&self, _buf: Option<&mut [u8]>, _sync: bool) -> usize {
        0
    }
}

/// 以名称查表的内建入口；端口取 `config.port`。
pub fn builtin(protocols: Vec<Arc<PrefixProtocol>>) -> EntryPoints {
    let table: HashMap<&'static str, Arc<PrefixProtocol>> = protocols
        .into_iter()
        .map(|protocol| (protocol.name, protocol))
        .collect();
    EntryPoints::builtin(
        move |name, _, _| {
            table
                .get(name)
                .map(|protocol| protocol.clone() as Arc<dyn Protocol>)
        },
        |_, _, config| config.port,
    )
}

pub fn registry_with(protocols: Vec<Arc<PrefixProtocol>>) -> ProtocolRegistry {
    let resolver = Arc::new(ModuleResolver::new(Arc::new(CountingLoader::default()), PROTO_MAX));
    ProtocolRegistry::new(ProtocolFactory::new(builtin(protocols), resolver))
}

pub fn config(port: i32) -> ProtocolConfig {
    ProtocolConfig::new(port, "test")
}

/// 模块内的协议：认领以 `XRD` 开头的连接。
pub fn module_get_protocol(
    name: &str,
    _params: &str,
    _config: &ProtocolConfig,
) -> Option<Arc<dyn Protocol>> {
    let name: &'static str = match name {
        "xroot" => "xroot",
        "cms" => "cms",
        _ => return None,
    };
    Some(Arc::new(PrefixProtocol::new(name, b"XRD", Transport::Any, 7)))
}

/// 模块自带的端口偏好：参数串可覆盖。
pub fn module_get_port(_name: &str, params: &str, config: &ProtocolConfig) -> i32 {
    params.trim().parse().unwrap_or(config.port)
}

pub struct XrdImage;

impl ModuleImage for XrdImage {
    fn resolve(&self, entry: EntryPoint) -> Option<ResolvedSymbol> {
        Some(match entry {
            EntryPoint::GetProtocol => ResolvedSymbol::GetProtocol(module_get_protocol),
            EntryPoint::GetProtocolPort => ResolvedSymbol::GetProtocolPort(module_get_port),
        })
    }
}

/// 记录载入次数的载入器；`libXrd*.so` 可载入，其他名称失败。
#[derive(Default)]
pub struct CountingLoader {
    pub loads: AtomicUsize,
}

impl CountingLoader {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for CountingLoader {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Arc<dyn ModuleImage>, ModuleLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if request.module.starts_with("libXrd") {
            Ok(Arc::new(XrdImage))
        } else {
            Err(ModuleLoadError::Open {
                detail: format!("{}: cannot open shared object file", request.module),
            })
        }
    }
}
