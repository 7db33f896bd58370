use crate::base::context::{Context, IoResultExt};
use crate::base::neterror::{failure_of, NetError};
use crate::socket::stream::{SocketType, TracedStream};
use crate::trace::archival::{ArchivalTcpConnectResult, ArchivalTcpConnectStatus};
use crate::trace::Trace;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Upper bound for one TCP connect.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Splits `ip:port` (or `[v6]:port`) into its parts.
///
/// The port is 0 when it is missing or unparsable.
pub fn split_host_port(address: &str) -> (String, u16) {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return (addr.ip().to_string(), addr.port());
    }
    match address.rsplit_once(':') {
        Some((host, port)) => (
            host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port.parse().unwrap_or(0),
        ),
        None => (address.to_string(), 0),
    }
}

/// Joins a host and a port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

impl Trace {
    /// Dials `address` (an `ip:port` endpoint, no name resolution).
    ///
    /// Exactly one TCP connect record is stored, whatever the outcome.
    pub async fn dial_tcp(
        self: &Arc<Self>,
        ctx: &Context,
        address: &str,
    ) -> Result<TracedStream, NetError> {
        let t0 = self.time_since_zero();
        let ctx = ctx.with_timeout(TCP_CONNECT_TIMEOUT);
        let result = match address.parse::<SocketAddr>() {
            Ok(addr) => {
                ctx.run(async { TcpStream::connect(addr).await.classified() })
                    .await
            }
            Err(_) => Err(NetError::InvalidAddress),
        };

        let (ip, port) = split_host_port(address);
        self.push_tcp_connect(ArchivalTcpConnectResult {
            ip,
            port,
            status: ArchivalTcpConnectStatus {
                blocked: None,
                failure: failure_of(&result),
                success: result.is_ok(),
            },
            t0,
            t: self.time_since_zero(),
            transaction_id: self.index(),
        });

        result.map(|stream| TracedStream::new(stream, Arc::clone(self), address.to_string()))
    }
}

/// TCP connect followed by an optional TLS handshake.
#[derive(Debug, Clone, Default)]
pub struct ConnectJob {
    /// SNI for the handshake; `None` means cleartext.
    pub sni: Option<String>,
    pub alpn: Vec<String>,
    pub insecure: bool,
}

impl ConnectJob {
    pub fn cleartext() -> Self {
        Self::default()
    }

    pub fn secure(sni: impl Into<String>, alpn: &[&str]) -> Self {
        Self {
            sni: Some(sni.into()),
            alpn: alpn.iter().map(|p| p.to_string()).collect(),
            insecure: false,
        }
    }

    pub async fn connect(
        &self,
        trace: &Arc<Trace>,
        ctx: &Context,
        address: &str,
    ) -> Result<SocketType, NetError> {
        let stream = trace.dial_tcp(ctx, address).await?;
        match &self.sni {
            None => Ok(SocketType::Tcp(stream)),
            Some(sni) => {
                let alpn: Vec<&str> = self.alpn.iter().map(String::as_str).collect();
                let tls = trace
                    .tls_handshake(ctx, stream, sni, &alpn, self.insecure)
                    .await?;
                Ok(SocketType::Ssl(tls))
            }
        }
    }
}
