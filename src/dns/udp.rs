//! Do53 resolver: A and AAAA queries sent in parallel over UDP.

use super::resolve::{DnsEngine, LookupRecord, Resolve, Resolving};
use super::wire::{encode_query, parse_response};
use crate::base::context::{Context, IoResultExt};
use crate::base::neterror::NetError;
use crate::trace::archival::ArchivalNetworkEvent;
use crate::trace::Trace;
use hickory_resolver::proto::rr::RecordType;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Largest datagram we accept from the server.
const MAX_DATAGRAM: usize = 4096;

#[derive(Clone, Debug)]
pub struct UdpResolver {
    address: String,
}

impl UdpResolver {
    /// `address` is the server's `ip:port`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    fn record_io(
        &self,
        trace: &Trace,
        operation: &str,
        t0: f64,
        outcome: &Result<usize, NetError>,
    ) {
        trace.push_network_event(ArchivalNetworkEvent {
            address: Some(self.address.clone()),
            failure: outcome.as_ref().err().map(NetError::failure),
            num_bytes: outcome.as_ref().ok().copied(),
            operation: operation.to_string(),
            proto: Some("udp".to_string()),
            t0,
            t: trace.time_since_zero(),
            transaction_id: trace.index(),
        });
    }

    /// One query/response exchange on a fresh socket.
    async fn exchange(
        &self,
        trace: &Trace,
        server: SocketAddr,
        domain: &str,
        qtype: RecordType,
    ) -> Result<Vec<(IpAddr, Option<u32>)>, NetError> {
        let id: u16 = rand::random();
        let query = encode_query(domain, qtype, id)?;

        let bind: SocketAddr = if server.is_ipv6() {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await.classified()?;
        socket.connect(server).await.classified()?;

        let t0 = trace.time_since_zero();
        let sent = socket.send(&query).await.classified();
        self.record_io(trace, "write", t0, &sent);
        sent?;

        // Datagrams with a foreign id are dropped; the context deadline
        // bounds how long we keep listening.
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let t0 = trace.time_since_zero();
            let received = socket.recv(&mut buf).await.classified();
            self.record_io(trace, "read", t0, &received);
            let n = received?;
            match parse_response(&buf[..n], id, qtype) {
                Err(NetError::DnsServerMisbehaving) if is_foreign_id(&buf[..n], id) => continue,
                other => return other,
            }
        }
    }

    async fn lookup_one(
        &self,
        ctx: &Context,
        trace: &Trace,
        server: Result<SocketAddr, NetError>,
        domain: &str,
        qtype: RecordType,
    ) -> Result<Vec<(IpAddr, Option<u32>)>, NetError> {
        let t0 = trace.time_since_zero();
        let result = match server {
            Ok(server) => ctx.run(self.exchange(trace, server, domain, qtype)).await,
            Err(e) => Err(e),
        };
        trace.record_dns_lookup(
            LookupRecord {
                engine: DnsEngine::Udp.tag(),
                resolver_address: &self.address,
                hostname: domain,
                query_type: &qtype.to_string(),
                t0,
            },
            &result,
        );
        result
    }
}

fn is_foreign_id(raw: &[u8], expected: u16) -> bool {
    raw.len() >= 2 && u16::from_be_bytes([raw[0], raw[1]]) != expected
}

/// Combines the per-family outcomes of a parallel lookup.
///
/// Succeeds when either family produced addresses; otherwise the A
/// failure wins, falling back to the AAAA one.
pub(crate) fn combine_families(
    a: Result<Vec<(IpAddr, Option<u32>)>, NetError>,
    aaaa: Result<Vec<(IpAddr, Option<u32>)>, NetError>,
) -> Result<Vec<String>, NetError> {
    match (a, aaaa) {
        (Err(a_err), Err(_)) => Err(a_err),
        (a, aaaa) => {
            let addrs: Vec<String> = a
                .unwrap_or_default()
                .into_iter()
                .chain(aaaa.unwrap_or_default())
                .map(|(ip, _)| ip.to_string())
                .collect();
            if addrs.is_empty() {
                Err(NetError::DnsNoAnswer)
            } else {
                Ok(addrs)
            }
        }
    }
}

impl Resolve for UdpResolver {
    fn engine(&self) -> DnsEngine {
        DnsEngine::Udp
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    fn lookup_host<'a>(
        &'a self,
        ctx: &'a Context,
        trace: &'a Arc<Trace>,
        domain: &'a str,
    ) -> Resolving<'a> {
        Box::pin(async move {
            tracing::debug!(
                index = trace.index(),
                domain,
                server = %self.address,
                "resolving via udp"
            );
            let server = self
                .address
                .parse::<SocketAddr>()
                .map_err(|_| NetError::InvalidAddress);
            let (a, aaaa) = futures::join!(
                self.lookup_one(ctx, trace, server.clone(), domain, RecordType::A),
                self.lookup_one(ctx, trace, server, domain, RecordType::AAAA),
            );
            combine_families(a, aaaa)
        })
    }
}
