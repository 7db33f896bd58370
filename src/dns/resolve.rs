//! Core resolver types and the `Resolve` capability.

use crate::base::context::Context;
use crate::base::neterror::{failure_of, NetError};
use crate::trace::archival::{ArchivalDnsAnswer, ArchivalDnsLookupResult};
use crate::trace::Trace;
use std::collections::HashSet;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;

/// Alias for the `Future` returned by a resolver strategy.
pub type Resolving<'a> = Pin<Box<dyn Future<Output = Result<Vec<String>, NetError>> + Send + 'a>>;

/// The resolution method a strategy implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsEngine {
    /// The host's stub resolver (`getaddrinfo`).
    System,
    /// Plain DNS over UDP (Do53).
    Udp,
    /// DNS over HTTPS.
    Https,
}

impl DnsEngine {
    /// The engine tag stored in DNS lookup records.
    pub fn tag(self) -> &'static str {
        match self {
            DnsEngine::System => "getaddrinfo",
            DnsEngine::Udp => "udp",
            DnsEngine::Https => "doh",
        }
    }
}

/// A pluggable resolution strategy: domain in, textual addresses out.
///
/// Implementations record their own DNS lookups (and any transport
/// activity) into the given trace, also when they fail. They bound
/// themselves with `ctx`, so a timeout or cancellation is recorded as a
/// failed lookup instead of dropping the record.
pub trait Resolve: Send + Sync {
    fn engine(&self) -> DnsEngine;

    /// Resolver address as written in lookup records (empty for the system).
    fn address(&self) -> String;

    fn lookup_host<'a>(
        &'a self,
        ctx: &'a Context,
        trace: &'a Arc<Trace>,
        domain: &'a str,
    ) -> Resolving<'a>;
}

impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn engine(&self) -> DnsEngine {
        (**self).engine()
    }

    fn address(&self) -> String {
        (**self).address()
    }

    fn lookup_host<'a>(
        &'a self,
        ctx: &'a Context,
        trace: &'a Arc<Trace>,
        domain: &'a str,
    ) -> Resolving<'a> {
        (**self).lookup_host(ctx, trace, domain)
    }
}

/// Parameters of one DNS lookup record.
#[derive(Debug, Clone, Copy)]
pub struct LookupRecord<'a> {
    pub engine: &'a str,
    pub resolver_address: &'a str,
    pub hostname: &'a str,
    pub query_type: &'a str,
    pub t0: f64,
}

impl Trace {
    /// Stores one DNS lookup; answers are the addresses that parse as IPs.
    pub fn record_dns_lookup(
        &self,
        lookup: LookupRecord<'_>,
        result: &Result<Vec<(IpAddr, Option<u32>)>, NetError>,
    ) {
        let answers = match result {
            Ok(ips) => ips
                .iter()
                .map(|(ip, ttl)| ArchivalDnsAnswer::from_ip(*ip, *ttl))
                .collect(),
            Err(_) => Vec::new(),
        };
        self.push_dns_lookup(ArchivalDnsLookupResult {
            answers,
            engine: lookup.engine.to_string(),
            failure: failure_of(result),
            hostname: lookup.hostname.to_string(),
            query_type: lookup.query_type.to_string(),
            resolver_address: lookup.resolver_address.to_string(),
            t0: lookup.t0,
            t: self.time_since_zero(),
            transaction_id: self.index(),
        });
    }
}

/// Unions strategy outputs into one deduplicated, IPv4-first sequence.
///
/// Order within the IPv4 and IPv6 groups is not part of the contract.
/// Entries that parse as neither family are kept at the tail.
pub fn merge_addresses<I, L>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = L>,
    L: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    let mut other = Vec::new();
    for addr in lists.into_iter().flatten() {
        if !seen.insert(addr.clone()) {
            continue;
        }
        match addr.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => v4.push(addr),
            Ok(IpAddr::V6(_)) => v6.push(addr),
            Err(_) => other.push(addr),
        }
    }
    v4.extend(v6);
    v4.extend(other);
    v4
}

/// Deduplicates IPs keeping the first TTL seen.
pub(crate) fn dedup_ips(ips: Vec<(IpAddr, Option<u32>)>) -> Vec<(IpAddr, Option<u32>)> {
    let mut seen = HashSet::new();
    ips.into_iter().filter(|(ip, _)| seen.insert(*ip)).collect()
}
