//! The DNS orchestrator.
//!
//! Resolves the target domain with all three strategies at once, merges
//! their answers, and fans out one cleartext and one secure flow per
//! address, plus the control flow on the first round.

use super::cleartextflow::CleartextFlow;
use super::context::MeasurementContext;
use super::control::{Control, Session};
use super::flow::{BodyPermit, FlowKind, FlowSpec};
use super::secureflow::SecureFlow;
use crate::base::context::Context;
use crate::dns::{merge_addresses, Resolve};
use crate::socket::connectjob::join_host_port;
use crate::trace::archival::ArchivalDnsLookupResult;
use crate::trace::{OperationLogger, Trace};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Upper bound for each strategy.
pub const DNS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(4);

/// Resolves `domain` and measures every address it maps to.
pub struct DnsResolvers {
    pub domain: String,
    /// The URL being measured (the redirect target on later rounds).
    pub url: Url,
    pub referer: Option<String>,
    /// Only set on the first round; the control is not repeated for redirects.
    pub session: Option<Arc<dyn Session>>,
    pub depth: usize,
}

impl std::fmt::Debug for DnsResolvers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsResolvers")
            .field("domain", &self.domain)
            .field("url", &self.url.as_str())
            .field("depth", &self.depth)
            .finish()
    }
}

impl DnsResolvers {
    /// Runs on the measurement's task tracker.
    pub fn start(self, mctx: &MeasurementContext, ctx: &Context) {
        let mctx = mctx.clone();
        let ctx = ctx.clone();
        let tracker = mctx.tracker.clone();
        tracker.spawn(async move {
            self.run(&mctx, &ctx).await;
        });
    }

    /// Resolves (or reuses the cached answer), starts the flows and returns
    /// the addresses used.
    pub async fn run(self, mctx: &MeasurementContext, ctx: &Context) -> Vec<String> {
        let addresses = match mctx.dns_cache.get(&self.domain) {
            Some(cached) => {
                tracing::debug!(domain = %self.domain, "dns cache hit");
                cached
            }
            None => {
                let addresses = self.lookup(mctx, ctx).await;
                mctx.dns_cache.set(&self.domain, addresses.clone());
                addresses
            }
        };
        tracing::info!(domain = %self.domain, addresses = ?addresses, "using addresses");

        self.start_cleartext_flows(mctx, ctx, &addresses);
        self.start_secure_flows(mctx, ctx, &addresses);
        self.maybe_start_control_flow(mctx, ctx, &addresses);
        addresses
    }

    async fn lookup(&self, mctx: &MeasurementContext, ctx: &Context) -> Vec<String> {
        let resolvers = &mctx.resolvers;
        let (system, udp, doh) = futures::join!(
            self.lookup_with(mctx, ctx, resolvers.system.as_ref()),
            self.lookup_with(mctx, ctx, resolvers.udp.as_ref()),
            self.lookup_with(mctx, ctx, resolvers.doh.as_ref()),
        );

        let (system_trace, system_addrs) = system;
        mctx.test_keys.append_queries(system_trace.dns_lookups());

        let (udp_trace, udp_addrs) = udp;
        let (do53, other) = split_queries(udp_trace.dns_lookups(), &["udp", "tcp"]);
        mctx.test_keys.append_queries(other);
        mctx.test_keys.with_do53(|tk| {
            tk.queries.extend(do53);
            tk.network_events.extend(udp_trace.network_events());
        });

        let (doh_trace, doh_addrs) = doh;
        let (doh_queries, other) = split_queries(doh_trace.dns_lookups(), &["doh"]);
        mctx.test_keys.append_queries(other);
        mctx.test_keys.with_doh(|tk| {
            tk.queries.extend(doh_queries);
            tk.network_events.extend(doh_trace.network_events());
            tk.tcp_connect.extend(doh_trace.tcp_connects());
            tk.tls_handshakes.extend(doh_trace.tls_handshakes());
        });

        merge_addresses([system_addrs, udp_addrs, doh_addrs])
    }

    /// Runs one strategy under its own index and deadline. Failures yield
    /// no addresses.
    ///
    /// The strategy is awaited directly: it honours `ctx` itself and must
    /// get to record its lookups when the deadline fires.
    async fn lookup_with(
        &self,
        mctx: &MeasurementContext,
        parent: &Context,
        resolver: &dyn Resolve,
    ) -> (Arc<Trace>, Vec<String>) {
        let ctx = parent.with_timeout(DNS_LOOKUP_TIMEOUT);
        let index = mctx.ids.next();
        let trace = Arc::new(Trace::new(index, mctx.zero_time));
        let server = match resolver.address() {
            address if address.is_empty() => "system".to_string(),
            address => address,
        };
        let ol = OperationLogger::new(index, format!("lookup {} using {}", self.domain, server));

        let result = resolver.lookup_host(&ctx, &trace, &self.domain).await;
        ol.stop(result.as_ref().err());
        (trace, result.unwrap_or_default())
    }

    fn flow_spec(&self, address: String, permit: &BodyPermit, follow_redirects: bool) -> FlowSpec {
        FlowSpec {
            address,
            kind: FlowKind::Web,
            permit: permit.clone(),
            follow_redirects,
            host_header: url_authority(&self.url),
            referer: self.referer.clone(),
            url_path: self.url.path().to_string(),
            url_query: self.url.query().map(str::to_string),
            depth: self.depth,
        }
    }

    /// One cleartext flow per address, for `http` URLs only.
    fn start_cleartext_flows(
        &self,
        mctx: &MeasurementContext,
        ctx: &Context,
        addresses: &[String],
    ) {
        if self.url.scheme() != "http" {
            return;
        }
        let permit = BodyPermit::available();
        let port = self.url.port().unwrap_or(80);
        for addr in addresses {
            let spec = self.flow_spec(join_host_port(addr, port), &permit, true);
            CleartextFlow::new(spec).start(mctx, ctx);
        }
    }

    /// One secure flow per address. Bodies are only fetched for `https`
    /// URLs; for `http` URLs the flows just validate the addresses.
    fn start_secure_flows(&self, mctx: &MeasurementContext, ctx: &Context, addresses: &[String]) {
        let is_https = self.url.scheme() == "https";
        let port = match self.url.port() {
            // The HTTPS port of http://host:8080/ is unknown.
            Some(_) if !is_https => return,
            Some(port) => port,
            None => 443,
        };
        let permit = if is_https {
            BodyPermit::available()
        } else {
            BodyPermit::exhausted()
        };
        let sni = self
            .url
            .host_str()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        for addr in addresses {
            let spec = self.flow_spec(join_host_port(addr, port), &permit, is_https);
            SecureFlow::new(spec, sni.clone()).start(mctx, ctx);
        }
    }

    fn maybe_start_control_flow(
        &self,
        mctx: &MeasurementContext,
        ctx: &Context,
        addresses: &[String],
    ) {
        let (Some(session), Some(th_addr)) = (&self.session, &mctx.config.th_addr) else {
            return;
        };
        Control {
            addresses: addresses.to_vec(),
            session: session.clone(),
            test_keys: mctx.test_keys.clone(),
            th_addr: th_addr.clone(),
            url: self.url.clone(),
            user_agent: mctx.config.user_agent.clone(),
        }
        .start(&mctx.tracker, ctx);
    }
}

/// The URL's host plus its port when one is given explicitly.
fn url_authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Separates the queries whose engine is one of `engines` from the rest.
fn split_queries(
    queries: Vec<ArchivalDnsLookupResult>,
    engines: &[&str],
) -> (Vec<ArchivalDnsLookupResult>, Vec<ArchivalDnsLookupResult>) {
    queries
        .into_iter()
        .partition(|q| engines.contains(&q.engine.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(engine: &str) -> ArchivalDnsLookupResult {
        ArchivalDnsLookupResult {
            answers: Vec::new(),
            engine: engine.to_string(),
            failure: None,
            hostname: "example.com".to_string(),
            query_type: "A".to_string(),
            resolver_address: String::new(),
            t0: 0.0,
            t: 0.0,
            transaction_id: 1,
        }
    }

    #[test]
    fn test_split_queries() {
        let (do53, other) = split_queries(
            vec![query("udp"), query("getaddrinfo"), query("tcp"), query("doh")],
            &["udp", "tcp"],
        );
        assert_eq!(do53.len(), 2);
        assert_eq!(other.len(), 2);
        assert!(other.iter().all(|q| q.engine != "udp" && q.engine != "tcp"));
    }

    #[test]
    fn test_url_authority() {
        assert_eq!(url_authority(&Url::parse("http://example.com/").unwrap()), "example.com");
        assert_eq!(
            url_authority(&Url::parse("http://example.com:8080/").unwrap()),
            "example.com:8080"
        );
        assert_eq!(url_authority(&Url::parse("https://example.com:443/").unwrap()), "example.com");
    }
}
