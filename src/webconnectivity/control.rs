//! The control flow: asks a test helper for its own view of the target.
//!
//! The test helper speaks a small JSON protocol over HTTP(S). The client
//! sends the URL plus the endpoints it resolved, and the helper answers
//! with its DNS, TCP connect and HTTP results. Reaching the helper is not
//! part of the evidence, so the control exchange runs on a throwaway trace.

use super::testkeys::TestKeys;
use crate::base::context::Context;
use crate::base::neterror::NetError;
use crate::dns::{GaiResolver, Resolve};
use crate::http::headers::{
    append_header, HTTP_HEADER_ACCEPT, HTTP_HEADER_ACCEPT_LANGUAGE, HTTP_HEADER_USER_AGENT,
};
use crate::http::responsebody::read_body_limited;
use crate::http::streamfactory::{path_and_query, HttpStream};
use crate::socket::connectjob::{join_host_port, ConnectJob};
use crate::trace::{OperationLogger, Trace};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use url::Url;

/// Upper bound for the whole control exchange.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest control response we accept.
const MAX_CONTROL_BODY: usize = 1 << 20;

/// What the client asks the test helper to measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub http_request: String,
    pub http_request_headers: BTreeMap<String, Vec<String>>,
    /// `ip:port` endpoints the helper should connect to.
    pub tcp_connect: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlTcpConnectResult {
    pub status: bool,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlHttpRequestResult {
    pub body_length: i64,
    pub failure: Option<String>,
    pub title: String,
    pub headers: BTreeMap<String, String>,
    pub status_code: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlDnsResult {
    pub failure: Option<String>,
    pub addrs: Vec<String>,
}

/// The test helper's independent view of the target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlResponse {
    pub tcp_connect: BTreeMap<String, ControlTcpConnectResult>,
    pub http_request: ControlHttpRequestResult,
    pub dns: ControlDnsResult,
}

/// Alias for the `Future` returned by a control client.
pub type ControlQuery<'a> =
    Pin<Box<dyn Future<Output = Result<ControlResponse, NetError>> + Send + 'a>>;

/// Submits a [`ControlRequest`] to the test helper at `th_addr`.
pub trait ControlClient: Send + Sync {
    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        th_addr: &'a str,
        request: &'a ControlRequest,
    ) -> ControlQuery<'a>;
}

/// The live measurement session; provides the test-helper client.
pub trait Session: Send + Sync {
    fn control_client(&self) -> Arc<dyn ControlClient>;
}

/// [`ControlClient`] that POSTs JSON over the crate's own HTTP stack.
#[derive(Debug, Clone, Default)]
pub struct HttpControlClient {
    resolver: GaiResolver,
}

impl HttpControlClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn connect(&self, ctx: &Context, url: &Url) -> Result<HttpStream, NetError> {
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;
        let job = match url.scheme() {
            "https" => ConnectJob::secure(host, &["h2", "http/1.1"]),
            "http" => ConnectJob::cleartext(),
            _ => return Err(NetError::InvalidUrl),
        };

        let trace = Arc::new(Trace::new(0, Instant::now()));
        let addrs = self.resolver.lookup_host(ctx, &trace, host).await?;
        let mut last_err = NetError::DnsNoAnswer;
        for addr in addrs {
            match job.connect(&trace, ctx, &join_host_port(&addr, port)).await {
                Ok(socket) => return HttpStream::handshake(socket).await,
                Err(e) if e.is_timeout_or_cancel() => return Err(e),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn exchange(
        &self,
        ctx: &Context,
        th_addr: &str,
        request: &ControlRequest,
    ) -> Result<ControlResponse, NetError> {
        let url = Url::parse(th_addr).map_err(|_| NetError::InvalidUrl)?;
        let body = serde_json::to_vec(request).map_err(NetError::unknown)?;
        let mut stream = self.connect(ctx, &url).await?;

        let mut headers = HeaderMap::new();
        append_header(&mut headers, "content-type", "application/json")?;
        append_header(&mut headers, "accept", "application/json")?;
        let authority = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        let req = stream.new_request(
            Method::POST,
            url.scheme(),
            &authority,
            &path_and_query(&url),
            headers,
            Bytes::from(body),
        )?;
        let resp = stream.send_request(req).await?;
        if resp.status() != StatusCode::OK {
            return Err(NetError::HttpRequestFailed);
        }
        let raw = read_body_limited(resp.into_body(), MAX_CONTROL_BODY).await?;
        serde_json::from_slice(&raw).map_err(|_| NetError::HttpInvalidResponse)
    }
}

impl ControlClient for HttpControlClient {
    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        th_addr: &'a str,
        request: &'a ControlRequest,
    ) -> ControlQuery<'a> {
        Box::pin(ctx.run(self.exchange(ctx, th_addr, request)))
    }
}

/// Builds the request for `url` and the resolved `addresses`.
///
/// `user_agent` replaces the default User-Agent, as it does for the
/// measurement's own requests.
pub fn new_control_request(
    url: &Url,
    addresses: &[String],
    user_agent: Option<&str>,
) -> ControlRequest {
    let port = url.port_or_known_default().unwrap_or(80);
    let mut headers = BTreeMap::new();
    headers.insert("Accept".to_string(), vec![HTTP_HEADER_ACCEPT.to_string()]);
    headers.insert(
        "Accept-Language".to_string(),
        vec![HTTP_HEADER_ACCEPT_LANGUAGE.to_string()],
    );
    headers.insert(
        "User-Agent".to_string(),
        vec![user_agent.unwrap_or(HTTP_HEADER_USER_AGENT).to_string()],
    );
    ControlRequest {
        http_request: url.to_string(),
        http_request_headers: headers,
        tcp_connect: addresses
            .iter()
            .map(|addr| join_host_port(addr, port))
            .collect(),
    }
}

/// Control task for one measurement.
pub struct Control {
    pub addresses: Vec<String>,
    pub session: Arc<dyn Session>,
    pub test_keys: Arc<TestKeys>,
    pub th_addr: String,
    pub url: Url,
    pub user_agent: Option<String>,
}

impl Control {
    pub fn start(self, tracker: &TaskTracker, ctx: &Context) {
        let ctx = ctx.clone();
        tracker.spawn(async move { self.run(&ctx).await });
    }

    pub async fn run(self, parent: &Context) {
        let ol = OperationLogger::new(0, format!("control for {} using {}", self.url, self.th_addr));
        let ctx = parent.with_timeout(CONTROL_TIMEOUT);
        let request =
            new_control_request(&self.url, &self.addresses, self.user_agent.as_deref());
        let client = self.session.control_client();
        match client.query(&ctx, &self.th_addr, &request).await {
            Ok(response) => {
                self.test_keys.set_control(response);
                ol.stop(None);
            }
            Err(e) => {
                self.test_keys.set_control_failure(&e);
                ol.stop(Some(&e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClient(Result<ControlResponse, NetError>);

    impl ControlClient for FixedClient {
        fn query<'a>(
            &'a self,
            _ctx: &'a Context,
            _th_addr: &'a str,
            request: &'a ControlRequest,
        ) -> ControlQuery<'a> {
            assert!(!request.tcp_connect.is_empty());
            let outcome = self.0.clone();
            Box::pin(async move { outcome })
        }
    }

    struct FixedSession(Arc<FixedClient>);

    impl Session for FixedSession {
        fn control_client(&self) -> Arc<dyn ControlClient> {
            self.0.clone()
        }
    }

    fn control(outcome: Result<ControlResponse, NetError>, tk: &Arc<TestKeys>) -> Control {
        Control {
            addresses: vec!["1.2.3.4".to_string(), "::1".to_string()],
            session: Arc::new(FixedSession(Arc::new(FixedClient(outcome)))),
            test_keys: tk.clone(),
            th_addr: "https://th.example.org".to_string(),
            url: Url::parse("https://example.com/").unwrap(),
            user_agent: None,
        }
    }

    #[test]
    fn test_request_endpoints_use_url_port() {
        let url = Url::parse("http://example.com:8080/a?b=c").unwrap();
        let req = new_control_request(&url, &["1.2.3.4".to_string(), "::1".to_string()], None);
        assert_eq!(req.tcp_connect, vec!["1.2.3.4:8080", "[::1]:8080"]);
        assert_eq!(req.http_request, "http://example.com:8080/a?b=c");
        assert_eq!(
            req.http_request_headers["User-Agent"],
            vec![HTTP_HEADER_USER_AGENT.to_string()]
        );
    }

    #[test]
    fn test_request_carries_configured_user_agent() {
        let url = Url::parse("https://example.com/").unwrap();
        let req = new_control_request(&url, &["1.2.3.4".to_string()], Some("custom/1.0"));
        assert_eq!(req.http_request_headers["User-Agent"], vec!["custom/1.0"]);
    }

    #[tokio::test]
    async fn test_success_is_recorded() {
        let tk = Arc::new(TestKeys::new());
        let mut response = ControlResponse::default();
        response.dns.addrs = vec!["1.2.3.4".to_string()];
        control(Ok(response.clone()), &tk)
            .run(&Context::default())
            .await;

        let data = tk.snapshot();
        assert_eq!(data.control, Some(response));
        assert!(data.control_failure.is_none());
        assert!(data.fundamental_failure.is_none());
    }

    #[tokio::test]
    async fn test_failure_is_evidence_not_fundamental() {
        let tk = Arc::new(TestKeys::new());
        control(Err(NetError::ConnectionRefused), &tk)
            .run(&Context::default())
            .await;

        let data = tk.snapshot();
        assert_eq!(data.control_failure.as_deref(), Some("connection_refused"));
        assert!(data.fundamental_failure.is_none());
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let raw = r#"{"tcp_connect":{"1.2.3.4:443":{"status":true,"failure":null}},"ip_info":{}}"#;
        let resp: ControlResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.tcp_connect["1.2.3.4:443"].status);
        assert_eq!(resp.http_request.status_code, 0);
    }
}
