//! Archival evidence records.
//!
//! Each record captures exactly one observed network operation. Records are
//! created once by the task that performed the operation and are never
//! mutated afterwards. Timestamps (`t0`, `t`) are seconds relative to the
//! measurement's zero time, and `transaction_id` is the trace index.

use base64::Engine;
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::net::IpAddr;

/// One resolved answer inside a DNS lookup record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalDnsAnswer {
    pub answer_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    pub ttl: Option<u32>,
}

impl ArchivalDnsAnswer {
    pub fn from_ip(ip: IpAddr, ttl: Option<u32>) -> Self {
        match ip {
            IpAddr::V4(v4) => Self {
                answer_type: "A".to_string(),
                ipv4: Some(v4.to_string()),
                ipv6: None,
                ttl,
            },
            IpAddr::V6(v6) => Self {
                answer_type: "AAAA".to_string(),
                ipv4: None,
                ipv6: Some(v6.to_string()),
                ttl,
            },
        }
    }
}

/// A DNS round trip (or a `getaddrinfo` call) performed by one engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalDnsLookupResult {
    pub answers: Vec<ArchivalDnsAnswer>,
    /// Engine tag: `getaddrinfo`, `udp`, `tcp` or `doh`.
    pub engine: String,
    pub failure: Option<String>,
    pub hostname: String,
    pub query_type: String,
    pub resolver_address: String,
    pub t0: f64,
    pub t: f64,
    pub transaction_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalTcpConnectStatus {
    pub blocked: Option<bool>,
    pub failure: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalTcpConnectResult {
    pub ip: String,
    pub port: u16,
    pub status: ArchivalTcpConnectStatus,
    pub t0: f64,
    pub t: f64,
    pub transaction_id: i64,
}

/// Binary data (e.g. a DER certificate) serialized as base64.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalBinaryData {
    pub format: String,
    pub data: String,
}

impl ArchivalBinaryData {
    pub fn new(raw: &[u8]) -> Self {
        Self {
            format: "base64".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalTlsHandshakeResult {
    pub network: String,
    pub address: String,
    pub cipher_suite: String,
    pub failure: Option<String>,
    pub negotiated_protocol: String,
    pub no_tls_verify: bool,
    pub peer_certificates: Vec<ArchivalBinaryData>,
    pub server_name: String,
    pub t0: f64,
    pub t: f64,
    pub tls_version: String,
    pub transaction_id: i64,
}

/// A single I/O operation (`read`, `write`) on a measured connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalNetworkEvent {
    pub address: Option<String>,
    pub failure: Option<String>,
    pub num_bytes: Option<usize>,
    pub operation: String,
    pub proto: Option<String>,
    pub t0: f64,
    pub t: f64,
    pub transaction_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalHttpRequest {
    pub headers_list: Vec<(String, String)>,
    pub method: String,
    pub url: String,
    pub x_transport: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ArchivalHttpResponse {
    pub body: String,
    pub body_is_truncated: bool,
    pub code: u16,
    pub headers_list: Vec<(String, String)>,
}

/// A complete HTTP transaction as seen from the measuring side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivalHttpRequestResult {
    pub network: String,
    pub address: String,
    pub alpn: String,
    pub failure: Option<String>,
    pub request: ArchivalHttpRequest,
    pub response: ArchivalHttpResponse,
    pub t0: f64,
    pub t: f64,
    pub transaction_id: i64,
}

/// Flattens a header map preserving repeated headers.
pub fn headers_list(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Builds the response half of an HTTP record from what was received.
///
/// `body` is the already-truncated body; it is flagged as truncated when
/// it reached `max_body` bytes.
pub fn http_response(
    status: Option<StatusCode>,
    headers: Option<&HeaderMap>,
    body: &[u8],
    max_body: usize,
) -> ArchivalHttpResponse {
    match status {
        Some(status) => ArchivalHttpResponse {
            body: String::from_utf8_lossy(body).into_owned(),
            body_is_truncated: max_body > 0 && body.len() >= max_body,
            code: status.as_u16(),
            headers_list: headers.map(headers_list).unwrap_or_default(),
        },
        None => ArchivalHttpResponse::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_dns_answer_family() {
        let a = ArchivalDnsAnswer::from_ip(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), Some(60));
        assert_eq!(a.answer_type, "A");
        assert_eq!(a.ipv4.as_deref(), Some("1.2.3.4"));

        let aaaa = ArchivalDnsAnswer::from_ip(IpAddr::V6(Ipv6Addr::LOCALHOST), None);
        assert_eq!(aaaa.answer_type, "AAAA");
        assert_eq!(aaaa.ipv6.as_deref(), Some("::1"));
    }

    #[test]
    fn test_http_response_truncation_flag() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/html".parse().unwrap());

        let full = http_response(Some(StatusCode::OK), Some(&headers), b"0123456789", 10);
        assert!(full.body_is_truncated);
        assert_eq!(full.code, 200);
        assert_eq!(full.headers_list[0].0, "content-type");

        let short = http_response(Some(StatusCode::OK), Some(&headers), b"0123", 10);
        assert!(!short.body_is_truncated);

        let missing = http_response(None, None, b"", 10);
        assert_eq!(missing.code, 0);
    }

    #[test]
    fn test_binary_data_is_base64() {
        let data = ArchivalBinaryData::new(b"hello");
        assert_eq!(data.format, "base64");
        assert_eq!(data.data, "aGVsbG8=");
    }
}
