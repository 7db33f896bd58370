mod common;

use common::{
    closed_port, ok_response, redirect_response, spawn_http_server, spawn_https_server,
    MockStrategies,
};
use probenet::base::context::Context;
use probenet::base::neterror::NetError;
use probenet::webconnectivity::{
    BodyPermit, Config, ControlClient, ControlQuery, ControlRequest, ControlResponse,
    DnsResolvers, FlowKind, FlowSpec, MeasurementContext, Measurer, SecureFlow, Session,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

struct CountingClient {
    calls: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
    user_agents: Mutex<Vec<String>>,
}

impl ControlClient for CountingClient {
    fn query<'a>(
        &'a self,
        _ctx: &'a Context,
        _th_addr: &'a str,
        request: &'a ControlRequest,
    ) -> ControlQuery<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.endpoints
            .lock()
            .unwrap()
            .extend(request.tcp_connect.iter().cloned());
        if let Some(values) = request.http_request_headers.get("User-Agent") {
            self.user_agents.lock().unwrap().extend(values.iter().cloned());
        }
        Box::pin(async { Ok(ControlResponse::default()) })
    }
}

struct CountingSession(Arc<CountingClient>);

impl Session for CountingSession {
    fn control_client(&self) -> Arc<dyn ControlClient> {
        self.0.clone()
    }
}

fn counting_session() -> (Arc<CountingClient>, Arc<dyn Session>) {
    let client = Arc::new(CountingClient {
        calls: AtomicUsize::new(0),
        endpoints: Mutex::new(Vec::new()),
        user_agents: Mutex::new(Vec::new()),
    });
    let session: Arc<dyn Session> = Arc::new(CountingSession(client.clone()));
    (client, session)
}

fn test_config() -> Config {
    Config::default().with_max_runtime(20)
}

#[tokio::test]
async fn test_single_body_fetch_per_scheme_group() {
    let server = spawn_http_server(|_| ok_response("hello")).await;
    let strategies = MockStrategies::new(
        Ok(vec!["127.0.0.1"]),
        Ok(vec!["127.0.0.2"]),
        Ok(vec!["127.0.0.3", "127.0.0.1"]),
    );
    let measurer = Measurer::new(test_config()).with_resolvers(strategies.resolvers());

    let input = format!("http://example.test:{}/", server.addr.port());
    let m = measurer
        .run(CancellationToken::new(), &input, None)
        .await
        .unwrap();

    assert_eq!(server.hits(), 1);
    let tk = &m.test_keys;
    assert_eq!(tk.tcp_connect.len(), 3);
    assert!(tk.tcp_connect.iter().all(|c| c.status.success));
    assert_eq!(tk.requests.len(), 1);
    assert_eq!(tk.requests[0].response.code, 200);
    assert_eq!(tk.requests[0].response.body, "hello");
    // Explicit port on an http URL: no secure flows.
    assert!(tk.tls_handshakes.is_empty());
    assert!(m.summary.usable);
    assert_eq!(m.summary.successful_requests, 1);
    assert!(!m.measurement_start_time.is_empty());
}

#[tokio::test]
async fn test_host_header_and_path_are_preserved() {
    let server = spawn_http_server(|_| ok_response("")).await;
    let strategies = MockStrategies::loopback();
    let measurer = Measurer::new(test_config()).with_resolvers(strategies.resolvers());

    let input = format!("http://example.test:{}/a/b?q=1", server.addr.port());
    measurer
        .run(CancellationToken::new(), &input, None)
        .await
        .unwrap();

    let head = server.request(0).to_ascii_lowercase();
    assert!(head.starts_with("get /a/b?q=1 http/1.1"));
    assert!(head.contains(&format!("host: example.test:{}", server.addr.port())));
    assert!(head.contains("user-agent: "));
}

#[tokio::test]
async fn test_merges_strategies_and_partitions_queries() {
    let strategies = MockStrategies::new(
        Err(NetError::DnsNxdomain),
        Ok(vec!["1.2.3.4"]),
        Ok(vec!["5.6.7.8", "1.2.3.4"]),
    );
    let mctx = MeasurementContext::new(test_config(), strategies.resolvers());
    let cancel = CancellationToken::new();
    let ctx = Context::new(cancel.clone());

    let addresses = DnsResolvers {
        domain: "example.test".to_string(),
        url: Url::parse("http://example.test/").unwrap(),
        referer: None,
        session: None,
        depth: 0,
    }
    .run(&mctx, &ctx)
    .await;
    // The flows would dial 1.2.3.4 and 5.6.7.8; stop them.
    cancel.cancel();
    mctx.join().await;

    assert_eq!(addresses, vec!["1.2.3.4", "5.6.7.8"]);
    assert_eq!(strategies.total_calls(), 3);
    assert_eq!(mctx.dns_cache.get("example.test"), Some(addresses));

    let tk = mctx.test_keys.snapshot();
    assert_eq!(tk.queries.len(), 1);
    assert_eq!(tk.queries[0].engine, "getaddrinfo");
    assert_eq!(tk.queries[0].failure.as_deref(), Some("dns_nxdomain_error"));
    assert_eq!(tk.do53.queries.len(), 1);
    assert_eq!(tk.do53.queries[0].engine, "udp");
    assert_eq!(tk.doh.queries.len(), 1);
    assert_eq!(tk.doh.queries[0].engine, "doh");

    let mut indexes: Vec<i64> = tk
        .queries
        .iter()
        .chain(&tk.do53.queries)
        .chain(&tk.doh.queries)
        .map(|q| q.transaction_id)
        .collect();
    indexes.sort();
    indexes.dedup();
    assert_eq!(indexes.len(), 3);
}

#[tokio::test]
async fn test_cache_hit_skips_resolution() {
    let strategies = MockStrategies::loopback();
    let mctx = MeasurementContext::new(test_config(), strategies.resolvers());
    mctx.dns_cache.set("example.test", Vec::new());

    let addresses = DnsResolvers {
        domain: "example.test".to_string(),
        url: Url::parse("http://example.test/").unwrap(),
        referer: None,
        session: None,
        depth: 0,
    }
    .run(&mctx, &Context::default())
    .await;
    mctx.join().await;

    assert!(addresses.is_empty());
    assert_eq!(strategies.total_calls(), 0);
    assert!(mctx.test_keys.snapshot().queries.is_empty());
}

#[tokio::test]
async fn test_all_strategies_fail() {
    let strategies = MockStrategies::new(
        Err(NetError::DnsNxdomain),
        Err(NetError::GenericTimeout),
        Err(NetError::ConnectionRefused),
    );
    let (client, session) = counting_session();
    let config = test_config().with_th_addr("https://th.example.org");
    let measurer = Measurer::new(config).with_resolvers(strategies.resolvers());

    let m = measurer
        .run(CancellationToken::new(), "https://example.test/", Some(session))
        .await
        .unwrap();

    let tk = &m.test_keys;
    assert!(tk.tcp_connect.is_empty());
    assert!(tk.tls_handshakes.is_empty());
    assert!(tk.requests.is_empty());
    assert!(tk.fundamental_failure.is_none());
    assert_eq!(tk.queries.len() + tk.do53.queries.len() + tk.doh.queries.len(), 3);
    assert!(m.summary.usable);
    // The control still runs, with no endpoints to check.
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert!(client.endpoints.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_failure_is_evidence() {
    let port = closed_port().await;
    let strategies = MockStrategies::loopback();
    let measurer = Measurer::new(test_config()).with_resolvers(strategies.resolvers());

    let input = format!("http://example.test:{}/", port);
    let m = measurer
        .run(CancellationToken::new(), &input, None)
        .await
        .unwrap();

    let tk = &m.test_keys;
    assert_eq!(tk.tcp_connect.len(), 1);
    assert_eq!(tk.tcp_connect[0].ip, "127.0.0.1");
    assert_eq!(tk.tcp_connect[0].port, port);
    assert!(!tk.tcp_connect[0].status.success);
    assert_eq!(
        tk.tcp_connect[0].status.failure.as_deref(),
        Some("connection_refused")
    );
    assert!(tk.requests.is_empty());
    assert!(m.summary.usable);
}

#[tokio::test]
async fn test_tls_failure_skips_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n")
                .await;
            let _ = socket.shutdown().await;
        }
    });

    let strategies = MockStrategies::loopback();
    let measurer = Measurer::new(test_config()).with_resolvers(strategies.resolvers());
    let input = format!("https://example.test:{}/", port);
    let m = measurer
        .run(CancellationToken::new(), &input, None)
        .await
        .unwrap();

    let tk = &m.test_keys;
    assert_eq!(tk.tcp_connect.len(), 1);
    assert!(tk.tcp_connect[0].status.success);
    assert_eq!(tk.tls_handshakes.len(), 1);
    assert!(tk.tls_handshakes[0].failure.is_some());
    assert_eq!(tk.tls_handshakes[0].server_name, "example.test");
    assert!(tk.requests.is_empty());
}

#[tokio::test]
async fn test_cancellation_ends_measurement_promptly() {
    let strategies = MockStrategies::loopback();
    let slow = MockStrategies {
        system: Arc::new(
            common::MockResolver::new(
                probenet::dns::DnsEngine::System,
                Ok(vec!["127.0.0.1"]),
            )
            .with_delay(Duration::from_secs(30)),
        ),
        ..strategies
    };
    let measurer = Measurer::new(test_config()).with_resolvers(slow.resolvers());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let m = tokio::time::timeout(
        Duration::from_secs(5),
        measurer.run(cancel, "https://example.test/", None),
    )
    .await
    .expect("measurement did not stop after cancellation")
    .unwrap();
    assert!(m.test_runtime < 5.0);
    // The interrupted strategy still left its query behind.
    assert_eq!(m.test_keys.queries.len(), 1);
    assert_eq!(m.test_keys.queries[0].failure.as_deref(), Some("interrupted"));
}

#[tokio::test]
async fn test_redirect_carries_cookie_and_referer() {
    let server = spawn_http_server(|head| {
        if head.starts_with("GET /next ") {
            ok_response("landed")
        } else {
            redirect_response("/next", "Set-Cookie: session=abc; Path=/\r\n")
        }
    })
    .await;
    let strategies = MockStrategies::loopback();
    let (client, session) = counting_session();
    let config = test_config().with_th_addr("https://th.example.org");
    let measurer = Measurer::new(config).with_resolvers(strategies.resolvers());

    let input = format!("http://example.test:{}/", server.addr.port());
    let m = measurer
        .run(CancellationToken::new(), &input, Some(session))
        .await
        .unwrap();

    assert_eq!(server.hits(), 2);
    let second = server.request(1).to_ascii_lowercase();
    assert!(second.starts_with("get /next "));
    assert!(second.contains("cookie: session=abc"));
    assert!(second.contains(&format!("referer: {}", input)));

    // The second round reused the cached answer.
    assert_eq!(strategies.total_calls(), 3);
    assert_eq!(m.test_keys.requests.len(), 2);
    assert_eq!(m.test_keys.requests[0].response.code, 302);
    assert_eq!(m.test_keys.requests[1].response.body, "landed");

    // Redirect rounds do not repeat the control.
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *client.endpoints.lock().unwrap(),
        vec![format!("127.0.0.1:{}", server.addr.port())]
    );
    assert!(m.summary.control_available);
}

#[tokio::test]
async fn test_redirect_chain_is_capped() {
    let server = spawn_http_server(|_| redirect_response("/again", "")).await;
    let strategies = MockStrategies::loopback();
    let measurer =
        Measurer::new(test_config().with_max_redirects(2)).with_resolvers(strategies.resolvers());

    let input = format!("http://example.test:{}/", server.addr.port());
    let m = measurer
        .run(CancellationToken::new(), &input, None)
        .await
        .unwrap();

    assert_eq!(server.hits(), 3);
    assert_eq!(m.test_keys.requests.len(), 3);
    assert!(m.test_keys.requests.iter().all(|r| r.response.code == 302));
}

#[tokio::test]
async fn test_seeded_cookie_is_sent() {
    let server = spawn_http_server(|_| ok_response("")).await;
    let strategies = MockStrategies::loopback();
    let measurer = Measurer::new(test_config().with_cookie("consent=yes"))
        .with_resolvers(strategies.resolvers());

    let input = format!("http://example.test:{}/", server.addr.port());
    measurer
        .run(CancellationToken::new(), &input, None)
        .await
        .unwrap();

    assert!(server
        .request(0)
        .to_ascii_lowercase()
        .contains("cookie: consent=yes"));
}

#[tokio::test]
async fn test_measurement_serializes() {
    let server = spawn_http_server(|_| ok_response("x")).await;
    let strategies = MockStrategies::loopback();
    let measurer = Measurer::new(test_config()).with_resolvers(strategies.resolvers());

    let input = format!("http://example.test:{}/", server.addr.port());
    let m = measurer
        .run(CancellationToken::new(), &input, None)
        .await
        .unwrap();

    let json = serde_json::to_value(&m).unwrap();
    assert_eq!(json["input"], input);
    assert!(json["test_keys"]["requests"].is_array());
    assert!(json["test_keys"]["do53"]["queries"].is_array());
    assert!(json["test_keys"]["doh"]["tcp_connect"].is_array());
    assert_eq!(json["summary"]["requests"], 1);
}

#[tokio::test]
async fn test_single_body_fetch_per_secure_group() {
    let server = spawn_https_server(|_| ok_response("secure")).await;
    let port = server.addr.port();
    let mctx = MeasurementContext::new(test_config(), MockStrategies::loopback().resolvers());
    let ctx = Context::default();

    let permit = BodyPermit::available();
    for ip in ["127.0.0.1", "127.0.0.2", "127.0.0.3"] {
        let mut spec = FlowSpec::new(format!("{}:{}", ip, port), FlowKind::Web, permit.clone());
        spec.host_header = "example.test".to_string();
        let mut flow = SecureFlow::new(spec, "example.test");
        flow.insecure = true;
        flow.start(&mctx, &ctx);
    }
    mctx.join().await;

    let tk = mctx.test_keys.snapshot();
    assert_eq!(tk.tcp_connect.len(), 3);
    assert_eq!(tk.tls_handshakes.len(), 3);
    for handshake in &tk.tls_handshakes {
        assert_eq!(handshake.failure, None);
        assert!(handshake.no_tls_verify);
        assert_eq!(handshake.server_name, "example.test");
    }
    assert_eq!(tk.requests.len(), 1);
    assert_eq!(tk.requests[0].failure, None);
    assert_eq!(tk.requests[0].response.body, "secure");
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_unbuildable_request_is_recorded() {
    let server = spawn_http_server(|_| ok_response("never")).await;
    let strategies = MockStrategies::loopback();
    let config = test_config().with_user_agent("bad\nagent");
    let measurer = Measurer::new(config).with_resolvers(strategies.resolvers());

    let input = format!("http://example.test:{}/", server.addr.port());
    let m = measurer
        .run(CancellationToken::new(), &input, None)
        .await
        .unwrap();

    let tk = &m.test_keys;
    assert_eq!(tk.tcp_connect.len(), 1);
    assert_eq!(tk.requests.len(), 1);
    assert_eq!(tk.requests[0].failure.as_deref(), Some("invalid_url"));
    assert_eq!(tk.requests[0].request.method, "GET");
    assert_eq!(tk.requests[0].response.code, 0);
    assert!(tk.fundamental_failure.is_some());
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn test_truncated_body_is_kept() {
    let server = spawn_http_server(|_| {
        "HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial".to_string()
    })
    .await;
    let strategies = MockStrategies::loopback();
    let measurer = Measurer::new(test_config()).with_resolvers(strategies.resolvers());

    let input = format!("http://example.test:{}/", server.addr.port());
    let m = measurer
        .run(CancellationToken::new(), &input, None)
        .await
        .unwrap();

    let tk = &m.test_keys;
    assert_eq!(tk.requests.len(), 1);
    assert_eq!(tk.requests[0].response.code, 200);
    assert_eq!(tk.requests[0].response.body, "partial");
    assert!(tk.requests[0].failure.is_some());
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_control_uses_configured_user_agent() {
    let server = spawn_http_server(|_| ok_response("hello")).await;
    let strategies = MockStrategies::loopback();
    let (client, session) = counting_session();
    let config = test_config()
        .with_th_addr("https://th.example.org")
        .with_user_agent("custom-agent/1.0");
    let measurer = Measurer::new(config).with_resolvers(strategies.resolvers());

    let input = format!("http://example.test:{}/", server.addr.port());
    let m = measurer
        .run(CancellationToken::new(), &input, Some(session))
        .await
        .unwrap();

    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*client.user_agents.lock().unwrap(), vec!["custom-agent/1.0"]);
    assert!(server.request(0).contains("custom-agent/1.0"));
    assert_eq!(m.test_keys.requests.len(), 1);
}
