//! DNS over HTTPS (RFC 8484) using POST and `application/dns-message`.
//!
//! The DoH server's own name is resolved with the system resolver; those
//! lookups land in the same trace under the `getaddrinfo` engine. The A and
//! AAAA queries then share one TLS connection to the server.

use super::gai::GaiResolver;
use super::resolve::{DnsEngine, LookupRecord, Resolve, Resolving};
use super::udp::combine_families;
use super::wire::{decode_response, answers, encode_query};
use crate::base::context::Context;
use crate::base::neterror::NetError;
use crate::http::headers::append_header;
use crate::http::responsebody::read_body_limited;
use crate::http::streamfactory::{path_and_query, HttpStream};
use crate::socket::connectjob::{join_host_port, ConnectJob};
use crate::trace::Trace;
use bytes::Bytes;
use hickory_resolver::proto::rr::RecordType;
use http::{HeaderMap, Method, StatusCode};
use std::net::IpAddr;
use std::sync::Arc;
use url::Url;

const DNS_MESSAGE: &str = "application/dns-message";

/// Largest DoH response body we read.
const MAX_RESPONSE: usize = 1 << 16;

#[derive(Clone, Debug)]
pub struct DohResolver {
    url: String,
    system: GaiResolver,
}

impl DohResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            system: GaiResolver::new(),
        }
    }

    /// Resolves the server name and connects to the first address that
    /// completes both TCP and TLS.
    async fn connect(
        &self,
        ctx: &Context,
        trace: &Arc<Trace>,
        url: &Url,
    ) -> Result<HttpStream, NetError> {
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;
        let addrs = self.system.lookup_host(ctx, trace, host).await?;

        let job = ConnectJob::secure(host, &["h2", "http/1.1"]);
        let mut last_err = NetError::DnsNoAnswer;
        for addr in addrs {
            match job.connect(trace, ctx, &join_host_port(&addr, port)).await {
                Ok(socket) => return HttpStream::handshake(socket).await,
                Err(e) if e == NetError::Interrupted => return Err(e),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn round_trip(
        &self,
        stream: &mut HttpStream,
        url: &Url,
        domain: &str,
        qtype: RecordType,
    ) -> Result<Vec<(IpAddr, Option<u32>)>, NetError> {
        let query = encode_query(domain, qtype, 0)?;
        let mut headers = HeaderMap::new();
        append_header(&mut headers, "content-type", DNS_MESSAGE)?;
        append_header(&mut headers, "accept", DNS_MESSAGE)?;
        let authority = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        let req = stream.new_request(
            Method::POST,
            url.scheme(),
            &authority,
            &path_and_query(url),
            headers,
            Bytes::from(query),
        )?;

        let resp = stream.send_request(req).await?;
        if resp.status() != StatusCode::OK {
            return Err(NetError::DnsServerMisbehaving);
        }
        let content_type = resp
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with(DNS_MESSAGE) {
            return Err(NetError::DnsServerMisbehaving);
        }
        let body = read_body_limited(resp.into_body(), MAX_RESPONSE).await?;
        let message = decode_response(&body)?;
        answers(&message, qtype)
    }

    async fn lookup(
        &self,
        ctx: &Context,
        trace: &Arc<Trace>,
        domain: &str,
    ) -> Result<Vec<String>, NetError> {
        let url = Url::parse(&self.url).map_err(|_| NetError::InvalidUrl)?;
        let t0 = trace.time_since_zero();

        let results = ctx
            .run(async {
                let mut stream = self.connect(ctx, trace, &url).await?;
                let a = self.round_trip(&mut stream, &url, domain, RecordType::A).await;
                let a_t = trace.time_since_zero();
                let aaaa = self
                    .round_trip(&mut stream, &url, domain, RecordType::AAAA)
                    .await;
                Ok((a, a_t, aaaa))
            })
            .await;

        let (a, aaaa_t0, aaaa) = match results {
            Ok(outcome) => outcome,
            Err(e) => (Err(e.clone()), t0, Err(e)),
        };
        for (qtype, started, result) in [("A", t0, &a), ("AAAA", aaaa_t0, &aaaa)] {
            trace.record_dns_lookup(
                LookupRecord {
                    engine: DnsEngine::Https.tag(),
                    resolver_address: &self.url,
                    hostname: domain,
                    query_type: qtype,
                    t0: started,
                },
                result,
            );
        }
        combine_families(a, aaaa)
    }
}

impl Resolve for DohResolver {
    fn engine(&self) -> DnsEngine {
        DnsEngine::Https
    }

    fn address(&self) -> String {
        self.url.clone()
    }

    fn lookup_host<'a>(
        &'a self,
        ctx: &'a Context,
        trace: &'a Arc<Trace>,
        domain: &'a str,
    ) -> Resolving<'a> {
        Box::pin(async move {
            tracing::debug!(index = trace.index(), domain, url = %self.url, "resolving via doh");
            self.lookup(ctx, trace, domain).await
        })
    }
}
