//! 回环套接字上的端到端匹配：明文直接命中、原地 TLS 升级、握手失败回收。

use std::{
    collections::HashMap,
    io::{Read, Write},
    net::{Shutdown, TcpStream},
    sync::{Arc, Once},
    thread,
    time::Duration,
};

use rcgen::generate_simple_self_signed;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, StreamOwned};
use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName};
use spark_link_tcp::{LinkListener, TlsUpgrader, dispatch, dispatch_on};
use spark_protocol_loader::{
    Connection, DispatcherSet, EntryPoints, ModuleImage, ModuleLoadError, ModuleLoader,
    ModuleResolver, PROTO_MAX, Protocol, ProtocolConfig, ProtocolFactory, ProtocolRegistry,
    Registration, module::LoadRequest,
};
use tracing_test::traced_test;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// 以首部魔数认领连接；`tls` 为真时只认领已升级的连接。
struct Magic {
    prefix: &'static [u8],
    tls: bool,
    code: i32,
}

impl Protocol for Magic {
    fn match_probe(&self, conn: &mut dyn Connection) -> Option<Arc<dyn Protocol>> {
        if conn.is_tls() != self.tls {
            return None;
        }
        let mut head = [0u8; 8];
        let n = conn.peek(&mut head).ok()?;
        head[..n].starts_with(self.prefix).then(|| {
            Arc::new(Magic {
                prefix: self.prefix,
                tls: self.tls,
                code: self.code,
            }) as Arc<dyn Protocol>
        })
    }

    fn process(&self, _conn: &mut dyn Connection) -> i32 {
        self.code
    }

    fn write_statistics(&self, _buf: Option<&mut [u8]>, _sync: bool) -> usize {
        0
    }
}

struct NoModules;

impl ModuleLoader for NoModules {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Arc<dyn ModuleImage>, ModuleLoadError> {
        Err(ModuleLoadError::Open {
            detail: format!("{} is not available in tests", request.module),
        })
    }
}

fn registry(port: u16) -> (ProtocolRegistry, DispatcherSet) {
    let table: HashMap<&'static str, (&'static [u8], bool, i32)> = HashMap::from([
        ("ping", (b"PING".as_slice(), false, 1)),
        ("http", (b"GET ".as_slice(), false, 200)),
        ("https", (b"GET ".as_slice(), true, 443)),
    ]);
    let builtin = EntryPoints::builtin(
        move |name, _, _| {
            table.get(name).map(|&(prefix, tls, code)| {
                Arc::new(Magic { prefix, tls, code }) as Arc<dyn Protocol>
            })
        },
        |_, _, config| config.port,
    );
    let resolver = Arc::new(ModuleResolver::new(Arc::new(NoModules), PROTO_MAX));
    let mut registry = ProtocolRegistry::new(ProtocolFactory::new(builtin, resolver));
    let config = ProtocolConfig::new(i32::from(port), "loopback");
    registry.register(Registration::builtin("ping", &config)).unwrap();
    registry.register(Registration::builtin("http", &config)).unwrap();
    registry
        .register(Registration::builtin("https", &config).with_tls(true))
        .unwrap();
    let dispatchers = DispatcherSet::build(&registry);
    (registry, dispatchers)
}

fn tls_configs() -> (Arc<ServerConfig>, Arc<ClientConfig>) {
    ensure_crypto_provider();
    let certified = generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    let cert: CertificateDer<'static> = certified.cert.der().clone();
    let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());

    let server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.clone()], key.into())
        .unwrap();

    let mut roots = RootCertStore::empty();
    roots.add(cert).unwrap();
    let client = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    (Arc::new(server), Arc::new(client))
}

#[test]
fn plaintext_client_is_matched_without_consuming_bytes() {
    let listener = LinkListener::bind("127.0.0.1:0")
        .unwrap()
        .with_probe_timeout(PROBE_TIMEOUT);
    let port = listener.local_addr().unwrap().port();
    let (registry, dispatchers) = registry(port);

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(b"PING 42\n").unwrap();
        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).unwrap();
        reply
    });

    let mut link = listener.accept().unwrap();
    assert_eq!(dispatch_on(&mut link, port, &dispatchers, &registry), 1);
    assert!(!link.is_tls());
    assert!(link.is_active());
    assert_eq!(link.protocol_name(), Some("ping"));

    let mut request = [0u8; 8];
    link.read_exact(&mut request).unwrap();
    assert_eq!(&request, b"PING 42\n");
    link.write_all(b"PONG").unwrap();

    assert_eq!(&client.join().unwrap(), b"PONG");
}

#[test]
fn tls_client_is_upgraded_in_place() {
    let (server_config, client_config) = tls_configs();
    let listener = LinkListener::bind("127.0.0.1:0")
        .unwrap()
        .with_tls(TlsUpgrader::new(server_config))
        .with_probe_timeout(PROBE_TIMEOUT);
    let port = listener.local_addr().unwrap().port();
    let (registry, dispatchers) = registry(port);

    let client = thread::spawn(move || {
        let name = ServerName::try_from("localhost").unwrap();
        let session = ClientConnection::new(client_config, name).unwrap();
        let tcp = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut tls = StreamOwned::new(session, tcp);
        tls.write_all(b"GET /secure HTTP/1.1\r\n\r\n").unwrap();
        tls.flush().unwrap();
        let mut reply = [0u8; 15];
        tls.read_exact(&mut reply).unwrap();
        reply
    });

    let mut link = listener.accept().unwrap();
    let dispatcher = dispatchers.get(port).unwrap();
    assert_eq!(
        dispatcher.describe(&registry),
        format!("port {port}: [ping, http, <tls>, ping, http, https]")
    );
    assert_eq!(dispatch(&mut link, dispatcher, &registry), 443);
    assert!(link.is_tls());
    assert_eq!(link.protocol_name(), Some("https"));
    assert_eq!(link.server_name(), Some("localhost"));

    let mut request = [0u8; 12];
    link.read_exact(&mut request).unwrap();
    assert_eq!(&request, b"GET /secure ");
    link.write_all(b"HTTP/1.1 200 OK").unwrap();
    link.flush().unwrap();

    assert_eq!(&client.join().unwrap(), b"HTTP/1.1 200 OK");
}

#[test]
#[traced_test]
fn failed_handshake_is_recycled_with_its_reason() {
    let (server_config, _) = tls_configs();
    let listener = LinkListener::bind("127.0.0.1:0")
        .unwrap()
        .with_tls(TlsUpgrader::new(server_config))
        .with_probe_timeout(PROBE_TIMEOUT);
    let port = listener.local_addr().unwrap().port();
    let (registry, dispatchers) = registry(port);

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(b"\x16\x03\x01\x00\x05hello").unwrap();
        stream.shutdown(Shutdown::Write).unwrap();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
    });

    let mut link = listener.accept().unwrap();
    assert_eq!(dispatch_on(&mut link, port, &dispatchers, &registry), -1);
    assert!(link.is_flawed());
    assert!(!link.is_tls());
    assert_eq!(link.failure_reason(), Some("TLS negotiation failed."));
    assert!(link.protocol().is_none());
    drop(link);
    client.join().unwrap();

    assert!(logs_contain("terminated TLS negotiation failed."));
    assert!(logs_contain("spark.link.tls.handshake_failed"));
}

#[test]
#[traced_test]
fn unknown_port_is_torn_down() {
    let listener = LinkListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (registry, dispatchers) = registry(port.wrapping_add(1).max(1));

    let client = thread::spawn(move || {
        let _stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    });
    let mut link = listener.accept().unwrap();
    client.join().unwrap();

    assert_eq!(dispatch_on(&mut link, port, &dispatchers, &registry), -1);
    assert_eq!(
        link.failure_reason(),
        Some("no protocol is registered on this port")
    );
    assert!(logs_contain("no protocol is registered on this port"));
}
