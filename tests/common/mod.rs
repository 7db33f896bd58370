#![allow(dead_code)]

use boring::asn1::Asn1Time;
use boring::bn::{BigNum, MsbOption};
use boring::ec::{EcGroup, EcKey};
use boring::hash::MessageDigest;
use boring::nid::Nid;
use boring::pkey::{PKey, Private};
use boring::ssl::{SslAcceptor, SslMethod};
use boring::x509::{X509NameBuilder, X509};
use probenet::base::context::Context;
use probenet::base::neterror::NetError;
use probenet::dns::{DnsEngine, LookupRecord, Resolve, Resolvers, Resolving};
use probenet::trace::Trace;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A strategy returning a fixed outcome and counting its calls.
pub struct MockResolver {
    pub engine: DnsEngine,
    pub outcome: Result<Vec<String>, NetError>,
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl MockResolver {
    pub fn new(engine: DnsEngine, outcome: Result<Vec<&str>, NetError>) -> Self {
        Self {
            engine,
            outcome: outcome.map(|v| v.into_iter().map(str::to_string).collect()),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Resolve for MockResolver {
    fn engine(&self) -> DnsEngine {
        self.engine
    }

    fn address(&self) -> String {
        format!("mock-{}", self.engine.tag())
    }

    fn lookup_host<'a>(
        &'a self,
        ctx: &'a Context,
        trace: &'a Arc<Trace>,
        domain: &'a str,
    ) -> Resolving<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let t0 = trace.time_since_zero();
            let outcome = ctx
                .run(async {
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    self.outcome.clone()
                })
                .await;
            let ips = outcome.clone().map(|addrs| {
                addrs
                    .iter()
                    .filter_map(|a| a.parse::<IpAddr>().ok())
                    .map(|ip| (ip, None))
                    .collect::<Vec<_>>()
            });
            trace.record_dns_lookup(
                LookupRecord {
                    engine: self.engine.tag(),
                    resolver_address: "",
                    hostname: domain,
                    query_type: "A",
                    t0,
                },
                &ips,
            );
            outcome
        })
    }
}

/// Three mocks wrapped in `Arc`s, so tests can read the call counters.
pub struct MockStrategies {
    pub system: Arc<MockResolver>,
    pub udp: Arc<MockResolver>,
    pub doh: Arc<MockResolver>,
}

impl MockStrategies {
    pub fn new(
        system: Result<Vec<&str>, NetError>,
        udp: Result<Vec<&str>, NetError>,
        doh: Result<Vec<&str>, NetError>,
    ) -> Self {
        Self {
            system: Arc::new(MockResolver::new(DnsEngine::System, system)),
            udp: Arc::new(MockResolver::new(DnsEngine::Udp, udp)),
            doh: Arc::new(MockResolver::new(DnsEngine::Https, doh)),
        }
    }

    /// Every strategy answers `127.0.0.1`.
    pub fn loopback() -> Self {
        Self::new(
            Ok(vec!["127.0.0.1"]),
            Ok(vec!["127.0.0.1"]),
            Ok(vec!["127.0.0.1"]),
        )
    }

    pub fn resolvers(&self) -> Resolvers {
        Resolvers::with_strategies(self.system.clone(), self.udp.clone(), self.doh.clone())
    }

    pub fn total_calls(&self) -> usize {
        self.system.calls() + self.udp.calls() + self.doh.calls()
    }
}

/// A local HTTP/1.1 server; every request head is kept for inspection.
pub struct TestServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, i: usize) -> String {
        self.requests.lock().unwrap()[i].clone()
    }
}

/// Listens on all IPv4 interfaces so that any 127.0.0.0/8 address reaches it.
pub async fn spawn_http_server<F>(respond: F) -> TestServer
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    spawn_server(None, respond).await
}

/// Like [`spawn_http_server`], behind TLS with a self-signed certificate
/// for `example.test`.
pub async fn spawn_https_server<F>(respond: F) -> TestServer
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    let (cert, key) = self_signed("example.test");
    let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls()).unwrap();
    builder.set_private_key(&key).unwrap();
    builder.set_certificate(&cert).unwrap();
    spawn_server(Some(Arc::new(builder.build())), respond).await
}

fn self_signed(common_name: &str) -> (X509, PKey<Private>) {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    let name = name.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    (builder.build(), key)
}

/// Reads one request head, records it and writes the response.
async fn serve_one<S, F>(mut socket: S, seen: Arc<Mutex<Vec<String>>>, respond: Arc<F>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    F: Fn(&str) -> String,
{
    let mut head = Vec::new();
    let mut buf = [0u8; 4096];
    while !String::from_utf8_lossy(&head).contains("\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    let response = respond(&head);
    seen.lock().unwrap().push(head);
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn spawn_server<F>(tls: Option<Arc<SslAcceptor>>, respond: F) -> TestServer
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("0.0.0.0:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let seen = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let seen = seen.clone();
            let respond = respond.clone();
            let tls = tls.clone();
            tokio::spawn(async move {
                match tls {
                    Some(acceptor) => {
                        if let Ok(stream) = tokio_boring::accept(&acceptor, socket).await {
                            serve_one(stream, seen, respond).await;
                        }
                    }
                    None => serve_one(socket, seen, respond).await,
                }
            });
        }
    });

    TestServer { addr, requests }
}

pub fn ok_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

pub fn redirect_response(location: &str, extra: &str) -> String {
    format!(
        "HTTP/1.1 302 Found\r\nLocation: {}\r\n{}Content-Length: 0\r\nConnection: close\r\n\r\n",
        location, extra
    )
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
