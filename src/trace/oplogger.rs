use crate::base::neterror::NetError;
use std::time::Instant;

/// Logs the start and the outcome of one measured operation.
///
/// Every line is prefixed with `[#index]` so interleaved concurrent
/// operations can be told apart.
#[derive(Debug)]
pub struct OperationLogger {
    index: i64,
    message: String,
    started: Instant,
}

impl OperationLogger {
    pub fn new(index: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::debug!(index, "[#{}] {}...", index, message);
        Self {
            index,
            message,
            started: Instant::now(),
        }
    }

    /// Logs the outcome; `None` means success.
    pub fn stop(self, err: Option<&NetError>) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match err {
            None => tracing::info!(
                index = self.index,
                elapsed_ms,
                "[#{}] {}... ok",
                self.index,
                self.message
            ),
            Some(e) => tracing::info!(
                index = self.index,
                elapsed_ms,
                failure = %e,
                "[#{}] {}... {}",
                self.index,
                self.message,
                e
            ),
        }
    }
}
