//! Cancellation, deadlines and error classification.
//!
//! [`Context`] carries the parent cancellation signal plus an absolute
//! deadline through every task, the way a request context is threaded through
//! a network stack. The [`IoResultExt`] helpers turn low-level errors into
//! [`NetError`] failure classes.

use crate::base::neterror::NetError;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal plus optional deadline shared by a tree of operations.
#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl Context {
    /// Creates a root context driven by `cancel` and without a deadline.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Derives a child whose deadline is the earlier of ours and `now + timeout`.
    ///
    /// Cancelling the parent cancels the child; cancelling the child leaves
    /// the parent untouched.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Context {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drives `fut` until it completes, the context is cancelled, or the
    /// deadline expires, whichever happens first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, NetError>
    where
        F: Future<Output = Result<T, NetError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(NetError::Interrupted);
        }
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(NetError::Interrupted),
            _ = expired => Err(NetError::GenericTimeout),
            result = fut => result,
        }
    }
}

/// Classifies an I/O error into the failure taxonomy.
pub fn classify_io_error(err: &io::Error) -> NetError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
        io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
        io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => {
            NetError::ConnectionAlreadyClosed
        }
        io::ErrorKind::TimedOut => NetError::GenericTimeout,
        io::ErrorKind::UnexpectedEof => NetError::Eof,
        io::ErrorKind::HostUnreachable => NetError::HostUnreachable,
        io::ErrorKind::NetworkUnreachable => NetError::NetworkUnreachable,
        io::ErrorKind::InvalidInput => NetError::InvalidAddress,
        _ => NetError::unknown(err),
    }
}

/// Classifies a `getaddrinfo` failure, which only carries a message.
pub fn classify_getaddrinfo_error(err: &io::Error) -> NetError {
    let message = err.to_string();
    if message.contains("not known") || message.contains("nodename nor servname") {
        NetError::DnsNxdomain
    } else if message.contains("No address associated") {
        NetError::DnsNoAnswer
    } else if message.contains("Temporary failure") || message.contains("try again") {
        NetError::DnsTemporaryFailure
    } else {
        classify_io_error(err)
    }
}

/// Classifies a hyper error by looking for the I/O error underneath it.
pub fn classify_hyper_error(err: &hyper::Error) -> NetError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            return classify_io_error(io_err);
        }
        source = inner.source();
    }
    if err.is_incomplete_message() || err.is_closed() {
        NetError::Eof
    } else if err.is_timeout() {
        NetError::GenericTimeout
    } else if err.is_parse() {
        NetError::HttpInvalidResponse
    } else {
        NetError::unknown(err)
    }
}

/// Extension trait mapping I/O results into classified failures.
pub trait IoResultExt<T> {
    /// Classify a connection-level I/O error.
    fn classified(self) -> Result<T, NetError>;

    /// Classify a resolver-level I/O error.
    fn dns_classified(self) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn classified(self) -> Result<T, NetError> {
        self.map_err(|e| classify_io_error(&e))
    }

    fn dns_classified(self) -> Result<T, NetError> {
        self.map_err(|e| classify_getaddrinfo_error(&e))
    }
}
