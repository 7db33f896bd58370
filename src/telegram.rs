//! Telegram reachability.
//!
//! POSTs to every well-known datacenter (DC) address on ports 80 and 443
//! over cleartext HTTP, and checks that `http://web.telegram.org/`
//! redirects to its HTTPS version. The flows are the web connectivity ones,
//! so the evidence has the same shape.

use crate::base::context::Context;
use crate::base::neterror::NetError;
use crate::dns::Resolvers;
use crate::socket::connectjob::{join_host_port, split_host_port};
use crate::trace::archival::ArchivalHttpRequestResult;
use crate::trace::{OperationLogger, Trace};
use crate::webconnectivity::{
    BodyPermit, CleartextFlow, Config, FlowKind, FlowSpec, MeasurementContext, TestKeysData,
    DNS_LOOKUP_TIMEOUT,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Well-known datacenter addresses.
pub const DATACENTERS: [&str; 6] = [
    "149.154.175.50",
    "149.154.167.51",
    "149.154.175.100",
    "149.154.167.91",
    "149.154.171.5",
    "95.161.76.100",
];

pub const DATACENTER_PORTS: [u16; 2] = [80, 443];

pub const WEB_TELEGRAM_ORG: &str = "web.telegram.org";

#[derive(Debug, Clone, Default, Serialize)]
pub struct TelegramTestKeys {
    #[serde(flatten)]
    pub evidence: TestKeysData,
    /// No datacenter answered over HTTP.
    pub telegram_http_blocking: bool,
    /// No datacenter accepted a TCP connection.
    pub telegram_tcp_blocking: bool,
    pub telegram_web_failure: Option<String>,
    pub telegram_web_status: String,
}

impl TelegramTestKeys {
    /// Derives the verdicts; `datacenters` tells DC endpoints apart from
    /// the web check's addresses.
    pub fn from_evidence<S: AsRef<str>>(evidence: TestKeysData, datacenters: &[S]) -> Self {
        let is_dc = |ip: &str| datacenters.iter().any(|dc| dc.as_ref() == ip);

        let telegram_tcp_blocking = !evidence
            .tcp_connect
            .iter()
            .any(|c| is_dc(c.ip.as_str()) && c.status.success);
        let telegram_http_blocking = !evidence
            .requests
            .iter()
            .any(|r| is_dc(split_host_port(&r.address).0.as_str()) && r.failure.is_none());

        let web: Vec<&ArchivalHttpRequestResult> = evidence
            .requests
            .iter()
            .filter(|r| !is_dc(split_host_port(&r.address).0.as_str()))
            .collect();
        let telegram_web_failure = web_failure(&web);
        let telegram_web_status = match telegram_web_failure {
            Some(_) => "blocked",
            None => "ok",
        }
        .to_string();

        Self {
            evidence,
            telegram_http_blocking,
            telegram_tcp_blocking,
            telegram_web_failure,
            telegram_web_status,
        }
    }
}

/// Succeeds when any web request was redirected to `https://web.telegram.org`.
fn web_failure(requests: &[&ArchivalHttpRequestResult]) -> Option<String> {
    if requests.is_empty() {
        return Some(NetError::DnsNoAnswer.failure());
    }
    let mut failure = None;
    for req in requests {
        let outcome = match &req.failure {
            Some(f) => Err(f.clone()),
            None => check_redirect(req),
        };
        match outcome {
            Ok(()) => return None,
            Err(f) => {
                failure.get_or_insert(f);
            }
        }
    }
    failure
}

fn check_redirect(req: &ArchivalHttpRequestResult) -> Result<(), String> {
    if !matches!(req.response.code, 301 | 308) {
        return Err(NetError::HttpRequestFailed.failure());
    }
    let location = req
        .response
        .headers_list
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("location"))
        .map(|(_, value)| value.as_str())
        .ok_or_else(|| "telegram_missing_redirect_error".to_string())?;
    let base = Url::parse(&req.request.url).map_err(|_| NetError::InvalidUrl.failure())?;
    match base.join(location) {
        Ok(url) if url.scheme() == "https" && url.host_str() == Some(WEB_TELEGRAM_ORG) => Ok(()),
        _ => Err("telegram_invalid_redirect_error".to_string()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryKeys {
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelegramMeasurement {
    pub test_runtime: f64,
    pub test_keys: TelegramTestKeys,
    pub summary: SummaryKeys,
}

#[derive(Debug, Clone)]
pub struct Measurer {
    config: Config,
    resolvers: Option<Resolvers>,
    datacenters: Vec<String>,
    ports: Vec<u16>,
    web_check: bool,
}

impl Default for Measurer {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Measurer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            resolvers: None,
            datacenters: DATACENTERS.iter().map(|s| s.to_string()).collect(),
            ports: DATACENTER_PORTS.to_vec(),
            web_check: true,
        }
    }

    pub fn with_resolvers(mut self, resolvers: Resolvers) -> Self {
        self.resolvers = Some(resolvers);
        self
    }

    /// Replaces the datacenter endpoints, e.g. with local servers.
    pub fn with_datacenters(mut self, addresses: Vec<String>, ports: Vec<u16>) -> Self {
        self.datacenters = addresses;
        self.ports = ports;
        self
    }

    /// Skips the `web.telegram.org` redirect check.
    pub fn without_web_check(mut self) -> Self {
        self.web_check = false;
        self
    }

    pub async fn run(&self, cancel: CancellationToken) -> TelegramMeasurement {
        let resolvers = self.resolvers.clone().unwrap_or_default();
        let mctx = MeasurementContext::new(self.config.clone(), resolvers);
        let ctx = Context::new(cancel).with_timeout(self.config.max_runtime());
        let started = Instant::now();

        for port in &self.ports {
            for dc in &self.datacenters {
                let spec = FlowSpec::new(
                    join_host_port(dc, *port),
                    FlowKind::Datacenter,
                    BodyPermit::available(),
                );
                CleartextFlow::new(spec).start(&mctx, &ctx);
            }
        }
        if self.web_check {
            start_web_check(&mctx, &ctx);
        }
        mctx.join().await;

        let test_keys =
            TelegramTestKeys::from_evidence(mctx.test_keys.snapshot(), &self.datacenters);
        let summary = SummaryKeys {
            is_anomaly: test_keys.telegram_http_blocking,
        };
        TelegramMeasurement {
            test_runtime: started.elapsed().as_secs_f64(),
            test_keys,
            summary,
        }
    }
}

/// Resolves `web.telegram.org` with the system resolver and fetches
/// `http://web.telegram.org/` from every address.
fn start_web_check(mctx: &MeasurementContext, ctx: &Context) {
    let mctx = mctx.clone();
    let ctx = ctx.clone();
    let tracker = mctx.tracker.clone();
    tracker.spawn(async move {
        let index = mctx.ids.next();
        let trace = Arc::new(Trace::new(index, mctx.zero_time));
        let ol = OperationLogger::new(index, format!("lookup {} using system", WEB_TELEGRAM_ORG));
        let lookup_ctx = ctx.with_timeout(DNS_LOOKUP_TIMEOUT);
        let result = mctx
            .resolvers
            .system
            .lookup_host(&lookup_ctx, &trace, WEB_TELEGRAM_ORG)
            .await;
        mctx.test_keys.append_queries(trace.dns_lookups());
        ol.stop(result.as_ref().err());

        for addr in result.unwrap_or_default() {
            let mut spec = FlowSpec::new(
                join_host_port(&addr, 80),
                FlowKind::Web,
                BodyPermit::available(),
            );
            spec.host_header = WEB_TELEGRAM_ORG.to_string();
            CleartextFlow::new(spec).start(&mctx, &ctx);
        }
    });
}
