//! Single-use HTTP connections over measured sockets.

use crate::base::context::classify_hyper_error;
use crate::base::neterror::NetError;
use crate::http::headers::header_value;
use crate::socket::stream::SocketType;
use bytes::Bytes;
use http::header::HOST;
use http::{HeaderMap, Method, Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::task::JoinHandle;

enum Sender {
    Http1(http1::SendRequest<Full<Bytes>>),
    Http2(http2::SendRequest<Full<Bytes>>),
}

/// An HTTP/1.1 or HTTP/2 client bound to exactly one connection.
///
/// The connection driver runs in its own task and is aborted when the
/// stream is dropped, which closes the socket.
pub struct HttpStream {
    sender: Sender,
    driver: JoinHandle<()>,
}

impl std::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStream")
            .field("h2", &self.is_h2())
            .finish()
    }
}

impl HttpStream {
    /// Performs the HTTP handshake, choosing HTTP/2 when ALPN said `h2`.
    pub async fn handshake(socket: SocketType) -> Result<Self, NetError> {
        let use_h2 = socket.negotiated_alpn().as_deref() == Some("h2");
        let io = TokioIo::new(socket);

        if use_h2 {
            let (sender, conn) = http2::handshake(TokioExecutor::new(), io)
                .await
                .map_err(|e| classify_hyper_error(&e))?;
            let driver = tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(error = %e, "h2 connection closed");
                }
            });
            Ok(Self {
                sender: Sender::Http2(sender),
                driver,
            })
        } else {
            let (sender, conn) = http1::handshake(io)
                .await
                .map_err(|e| classify_hyper_error(&e))?;
            let driver = tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(error = %e, "h1 connection closed");
                }
            });
            Ok(Self {
                sender: Sender::Http1(sender),
                driver,
            })
        }
    }

    pub fn is_h2(&self) -> bool {
        matches!(self.sender, Sender::Http2(_))
    }

    /// Builds a request for this connection's protocol.
    ///
    /// HTTP/1.1 gets an origin-form URI plus a `Host` header; HTTP/2 gets an
    /// absolute URI whose authority is `authority`.
    pub fn new_request(
        &self,
        method: Method,
        scheme: &str,
        authority: &str,
        path_and_query: &str,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<Request<Full<Bytes>>, NetError> {
        let uri = if self.is_h2() {
            headers.remove(HOST);
            format!("{}://{}{}", scheme, authority, path_and_query)
        } else {
            headers.insert(HOST, header_value(authority)?);
            path_and_query.to_string()
        };
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(body))
            .map_err(|_| NetError::InvalidUrl)?;
        *req.headers_mut() = headers;
        Ok(req)
    }

    pub async fn send_request(
        &mut self,
        req: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, NetError> {
        let result = match &mut self.sender {
            Sender::Http1(sender) => match sender.ready().await {
                Ok(()) => sender.send_request(req).await,
                Err(e) => Err(e),
            },
            Sender::Http2(sender) => match sender.ready().await {
                Ok(()) => sender.send_request(req).await,
                Err(e) => Err(e),
            },
        };
        result.map_err(|e| classify_hyper_error(&e))
    }
}

/// The origin-form target of `url` (path plus optional query).
pub fn path_and_query(url: &url::Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
