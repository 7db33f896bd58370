//! System resolver using getaddrinfo.
//!
//! `getaddrinfo` is blocking, so it runs on tokio's blocking pool. When the
//! context expires first the lookup is reported as timed out and the
//! blocking call is left to finish on its own.

use super::resolve::{dedup_ips, DnsEngine, LookupRecord, Resolve, Resolving};
use crate::base::context::{Context, IoResultExt};
use crate::base::neterror::NetError;
use crate::trace::Trace;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    pub fn new() -> Self {
        Self
    }

    async fn getaddrinfo(ctx: &Context, domain: &str) -> Result<Vec<IpAddr>, NetError> {
        if let Ok(ip) = domain.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let host = domain.to_string();
        ctx.run(async move {
            let addrs = tokio::task::spawn_blocking(move || {
                (host.as_str(), 0u16)
                    .to_socket_addrs()
                    .map(|iter| iter.map(|sa| sa.ip()).collect::<Vec<_>>())
            })
            .await
            .map_err(NetError::unknown)?
            .dns_classified()?;
            if addrs.is_empty() {
                return Err(NetError::DnsNoAnswer);
            }
            Ok(addrs)
        })
        .await
    }
}

impl Resolve for GaiResolver {
    fn engine(&self) -> DnsEngine {
        DnsEngine::System
    }

    fn address(&self) -> String {
        String::new()
    }

    fn lookup_host<'a>(
        &'a self,
        ctx: &'a Context,
        trace: &'a Arc<Trace>,
        domain: &'a str,
    ) -> Resolving<'a> {
        Box::pin(async move {
            let t0 = trace.time_since_zero();
            tracing::debug!(index = trace.index(), domain, "resolving via getaddrinfo");

            let result = Self::getaddrinfo(ctx, domain)
                .await
                .map(|ips| dedup_ips(ips.into_iter().map(|ip| (ip, None)).collect()));
            trace.record_dns_lookup(
                LookupRecord {
                    engine: DnsEngine::System.tag(),
                    resolver_address: "",
                    hostname: domain,
                    query_type: "ANY",
                    t0,
                },
                &result,
            );

            result.map(|ips| ips.into_iter().map(|(ip, _)| ip.to_string()).collect())
        })
    }
}
