//! Measured sockets.
//!
//! [`TracedStream`] wraps a connected `TcpStream` and records one network
//! event per completed read or write into its [`Trace`]. TLS is layered on
//! top of it, so the recorded bytes are always the ones on the wire.
//!
//! [`SocketType`] is the connection handed to the HTTP layer: either the
//! traced TCP stream itself or a TLS session over it.

use crate::base::context::classify_io_error;
use crate::trace::archival::ArchivalNetworkEvent;
use crate::trace::Trace;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

/// A TCP connection that reports its I/O to a trace.
pub struct TracedStream {
    inner: TcpStream,
    trace: Arc<Trace>,
    address: String,
    read_started: Option<f64>,
    write_started: Option<f64>,
}

impl fmt::Debug for TracedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedStream")
            .field("address", &self.address)
            .field("index", &self.trace.index())
            .finish()
    }
}

impl TracedStream {
    pub fn new(inner: TcpStream, trace: Arc<Trace>, address: String) -> Self {
        Self {
            inner,
            trace,
            address,
            read_started: None,
            write_started: None,
        }
    }

    /// The `ip:port` this stream is connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn trace(&self) -> &Arc<Trace> {
        &self.trace
    }

    fn record(&self, operation: &str, t0: f64, outcome: Result<usize, &io::Error>) {
        let (num_bytes, failure) = match outcome {
            Ok(n) => (Some(n), None),
            Err(e) => (None, Some(classify_io_error(e).failure())),
        };
        self.trace.push_network_event(ArchivalNetworkEvent {
            address: Some(self.address.clone()),
            failure,
            num_bytes,
            operation: operation.to_string(),
            proto: Some("tcp".to_string()),
            t0,
            t: self.trace.time_since_zero(),
            transaction_id: self.trace.index(),
        });
    }
}

impl AsyncRead for TracedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let now = this.trace.time_since_zero();
        let t0 = *this.read_started.get_or_insert(now);
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.read_started = None;
                match &result {
                    Ok(()) => this.record("read", t0, Ok(buf.filled().len() - before)),
                    Err(e) => this.record("read", t0, Err(e)),
                }
                Poll::Ready(result)
            }
        }
    }
}

impl AsyncWrite for TracedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let now = this.trace.time_since_zero();
        let t0 = *this.write_started.get_or_insert(now);
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.write_started = None;
                match &result {
                    Ok(n) => this.record("write", t0, Ok(*n)),
                    Err(e) => this.record("write", t0, Err(e)),
                }
                Poll::Ready(result)
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// A measured connection, cleartext or TLS.
#[derive(Debug)]
pub enum SocketType {
    Tcp(TracedStream),
    Ssl(SslStream<TracedStream>),
}

impl SocketType {
    /// The ALPN protocol negotiated by TLS, if any.
    pub fn negotiated_alpn(&self) -> Option<String> {
        match self {
            SocketType::Tcp(_) => None,
            SocketType::Ssl(s) => s
                .ssl()
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
        }
    }

    pub fn address(&self) -> &str {
        match self {
            SocketType::Tcp(s) => s.address(),
            SocketType::Ssl(s) => s.get_ref().address(),
        }
    }
}

impl AsyncRead for SocketType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            SocketType::Ssl(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            SocketType::Ssl(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_flush(cx),
            SocketType::Ssl(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            SocketType::Ssl(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
