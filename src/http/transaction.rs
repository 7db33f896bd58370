use crate::base::context::Context;
use crate::base::neterror::NetError;
use crate::http::response::HttpResponse;
use crate::http::responsebody::read_body_into;
use crate::http::streamfactory::HttpStream;
use crate::trace::archival::{
    headers_list, http_response, ArchivalHttpRequest, ArchivalHttpRequestResult,
};
use crate::trace::Trace;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, Request};
use http_body_util::Full;
use std::time::Duration;

/// Upper bound for one round trip, body included.
pub const HTTP_ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(15);

/// One measured request/response exchange over an [`HttpStream`].
///
/// Produces exactly one [`ArchivalHttpRequestResult`], also when the round
/// trip or the body read fails.
#[derive(Debug)]
pub struct HttpTransaction<'a> {
    pub trace: &'a Trace,
    /// `ip:port` of the connection.
    pub address: &'a str,
    /// Negotiated ALPN, empty for cleartext.
    pub alpn: &'a str,
    /// The full URL being fetched (the request URI may be origin-form).
    pub url: &'a str,
    pub max_body: usize,
}

impl HttpTransaction<'_> {
    pub async fn run(
        &self,
        ctx: &Context,
        stream: &mut HttpStream,
        req: Request<Full<Bytes>>,
    ) -> (ArchivalHttpRequestResult, Result<HttpResponse, NetError>) {
        let started = self.trace.time_since_zero();
        let request = ArchivalHttpRequest {
            headers_list: headers_list(req.headers()),
            method: req.method().to_string(),
            url: self.url.to_string(),
            x_transport: "tcp".to_string(),
        };

        let ctx = ctx.with_timeout(HTTP_ROUND_TRIP_TIMEOUT);
        let resp = match ctx.run(stream.send_request(req)).await {
            Ok(resp) => resp,
            Err(e) => {
                let record = self.record(started, request, None, &[], Some(&e));
                return (record, Err(e));
            }
        };

        let (parts, body) = resp.into_parts();
        let mut buf = BytesMut::new();
        let read = ctx.run(read_body_into(body, &mut buf, self.max_body)).await;
        let body = buf.freeze();
        let record = self.record(started, request, Some(&parts), &body, read.as_ref().err());
        let outcome = read.map(|()| HttpResponse {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            body,
        });
        (record, outcome)
    }

    /// The record of a transaction that failed before its request was sent,
    /// e.g. while building the headers or during the HTTP handshake.
    pub fn failed(
        &self,
        started: f64,
        method: &Method,
        headers: &HeaderMap,
        err: &NetError,
    ) -> ArchivalHttpRequestResult {
        let request = ArchivalHttpRequest {
            headers_list: headers_list(headers),
            method: method.to_string(),
            url: self.url.to_string(),
            x_transport: "tcp".to_string(),
        };
        self.record(started, request, None, &[], Some(err))
    }

    fn record(
        &self,
        started: f64,
        request: ArchivalHttpRequest,
        head: Option<&http::response::Parts>,
        body: &[u8],
        err: Option<&NetError>,
    ) -> ArchivalHttpRequestResult {
        ArchivalHttpRequestResult {
            network: "tcp".to_string(),
            address: self.address.to_string(),
            alpn: self.alpn.to_string(),
            failure: err.map(NetError::failure),
            request,
            response: http_response(
                head.map(|h| h.status),
                head.map(|h| &h.headers),
                body,
                self.max_body,
            ),
            t0: started,
            t: self.trace.time_since_zero(),
            transaction_id: self.trace.index(),
        }
    }
}
