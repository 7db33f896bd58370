//! Pieces shared by the cleartext and the secure flow.

use super::context::MeasurementContext;
use super::dnsresolvers::DnsResolvers;
use crate::base::context::Context;
use crate::base::neterror::NetError;
use crate::http::headers::{append_header, measurement_headers};
use crate::http::streamfactory::path_and_query;
use crate::http::{HttpResponse, HttpStream, HttpTransaction};
use crate::socket::connectjob::{join_host_port, split_host_port};
use crate::socket::stream::SocketType;
use crate::trace::Trace;
use bytes::Bytes;
use http::{HeaderMap, Method};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

/// Single-permit admission token shared by one scheme group.
///
/// Only the flow that wins [`BodyPermit::try_acquire`] fetches the body;
/// the permit is never given back.
#[derive(Debug, Clone)]
pub struct BodyPermit(Arc<AtomicBool>);

impl BodyPermit {
    /// A token with its single permit still available.
    pub fn available() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// A token that never grants the permit.
    pub fn exhausted() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Non-blocking; true for exactly one caller across all clones.
    pub fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// What the HTTP step of a flow is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Fetch a web page with GET.
    Web,
    /// Check a datacenter endpoint with POST.
    Datacenter,
}

impl FlowKind {
    pub fn method(self) -> Method {
        match self {
            FlowKind::Web => Method::GET,
            FlowKind::Datacenter => Method::POST,
        }
    }

    /// Response body cap in bytes.
    pub fn max_body(self) -> usize {
        match self {
            FlowKind::Web => 1 << 19,
            FlowKind::Datacenter => 1 << 22,
        }
    }
}

/// Per-address flow parameters.
#[derive(Debug, Clone)]
pub struct FlowSpec {
    /// `ip:port` to dial.
    pub address: String,
    pub kind: FlowKind,
    pub permit: BodyPermit,
    pub follow_redirects: bool,
    /// Host header; the dialed IP is used when empty.
    pub host_header: String,
    pub referer: Option<String>,
    pub url_path: String,
    pub url_query: Option<String>,
    /// Redirects followed to reach this flow.
    pub depth: usize,
}

impl FlowSpec {
    pub fn new(address: impl Into<String>, kind: FlowKind, permit: BodyPermit) -> Self {
        Self {
            address: address.into(),
            kind,
            permit,
            follow_redirects: false,
            host_header: String::new(),
            referer: None,
            url_path: "/".to_string(),
            url_query: None,
            depth: 0,
        }
    }

    /// The authority to put in the request URL.
    ///
    /// Port 80 is left out for `http`; every other combination is explicit.
    pub fn url_host(&self, scheme: &str) -> String {
        let (ip, port) = split_host_port(&self.address);
        let host = if self.host_header.is_empty() {
            ip
        } else {
            hostname_of(&self.host_header)
        };
        if scheme == "http" && port == 80 {
            if host.contains(':') {
                format!("[{}]", host)
            } else {
                host
            }
        } else {
            join_host_port(&host, port)
        }
    }

    /// The request URL as text, before any validation.
    pub fn raw_url(&self, scheme: &str) -> String {
        let path = if self.url_path.is_empty() {
            "/"
        } else {
            self.url_path.as_str()
        };
        let mut raw = format!("{}://{}{}", scheme, self.url_host(scheme), path);
        if let Some(query) = &self.url_query {
            raw.push('?');
            raw.push_str(query);
        }
        raw
    }

    pub fn request_url(&self, scheme: &str) -> Result<Url, NetError> {
        Url::parse(&self.raw_url(scheme)).map_err(|_| NetError::InvalidUrl)
    }

    fn authority(&self, url: &Url) -> String {
        if !self.host_header.is_empty() {
            return self.host_header.clone();
        }
        match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        }
    }
}

/// The host part of a `Host` header value, without brackets or port.
fn hostname_of(host_header: &str) -> String {
    if let Some(rest) = host_header.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest).to_string();
    }
    match host_header.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.parse::<u16>().is_ok() => {
            name.to_string()
        }
        _ => host_header.to_string(),
    }
}

/// Performs the HTTP step of a flow over an established socket.
///
/// Called by the flow holding the body permit, and appends exactly one
/// request record whatever happens. A request that cannot be built is also
/// a fundamental failure.
pub(crate) async fn fetch(
    mctx: &MeasurementContext,
    ctx: &Context,
    trace: &Arc<Trace>,
    spec: &FlowSpec,
    scheme: &str,
    socket: SocketType,
) -> Result<(Url, HttpResponse), NetError> {
    let started = trace.time_since_zero();
    let method = spec.kind.method();
    let alpn = socket.negotiated_alpn().unwrap_or_default();
    let raw_url = spec.raw_url(scheme);
    let transaction = HttpTransaction {
        trace,
        address: &spec.address,
        alpn: &alpn,
        url: &raw_url,
        max_body: spec.kind.max_body(),
    };
    let mut headers = HeaderMap::new();

    let prepared = async {
        let url = spec.request_url(scheme).inspect_err(|e| {
            mctx.test_keys.set_fundamental_failure(e);
        })?;
        headers = measurement_headers(mctx.config.user_agent.as_deref()).inspect_err(|e| {
            mctx.test_keys.set_fundamental_failure(e);
        })?;
        if let Some(referer) = &spec.referer {
            append_header(&mut headers, "referer", referer)?;
        }
        if let Some(cookie) = mctx.cookie_jar.cookie_header(&url) {
            append_header(&mut headers, "cookie", &cookie)?;
        }
        let mut stream = ctx.run(HttpStream::handshake(socket)).await?;
        let req = stream.new_request(
            method.clone(),
            scheme,
            &spec.authority(&url),
            &path_and_query(&url),
            headers.clone(),
            Bytes::new(),
        )?;
        Ok::<_, NetError>((url, stream, req))
    }
    .await;

    let (url, mut stream, req) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            let record = transaction.failed(started, &method, &headers, &e);
            mctx.test_keys.append_requests(vec![record]);
            return Err(e);
        }
    };

    let (record, outcome) = transaction.run(ctx, &mut stream, req).await;
    mctx.test_keys.append_requests(vec![record]);
    let resp = outcome?;

    for set_cookie in resp.set_cookies() {
        mctx.cookie_jar.store_response_cookie(&url, set_cookie);
    }
    Ok((url, resp))
}

/// Starts a new resolution round for the redirect target, if any.
pub(crate) fn maybe_follow_redirect(
    mctx: &MeasurementContext,
    ctx: &Context,
    spec: &FlowSpec,
    url: &Url,
    resp: &HttpResponse,
) {
    if !spec.follow_redirects || !resp.is_redirect() {
        return;
    }
    let Some(location) = resp.location(url) else {
        return;
    };
    if spec.depth >= mctx.config.max_redirects {
        tracing::info!(
            location = %location,
            depth = spec.depth,
            "not following redirect: too many redirects"
        );
        return;
    }
    let Some(domain) = location.host_str() else {
        return;
    };
    let domain = domain.trim_start_matches('[').trim_end_matches(']').to_string();
    tracing::info!(location = %location, depth = spec.depth + 1, "following redirect");
    DnsResolvers {
        domain,
        url: location,
        referer: Some(url.to_string()),
        session: None,
        depth: spec.depth + 1,
    }
    .start(mctx, ctx);
}
