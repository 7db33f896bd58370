use thiserror::Error;

/// Failure classification attached to every piece of evidence.
///
/// The `Display` form of each variant is the failure string written into
/// archival records, so downstream classification can tell local
/// timeouts and cancellation apart from interference such as resets.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Timeouts and cancellation
    #[error("generic_timeout_error")]
    GenericTimeout,
    #[error("interrupted")]
    Interrupted,

    // Connection Errors
    #[error("connection_refused")]
    ConnectionRefused,
    #[error("connection_reset")]
    ConnectionReset,
    #[error("connection_aborted")]
    ConnectionAborted,
    #[error("connection_already_closed")]
    ConnectionAlreadyClosed,
    #[error("host_unreachable")]
    HostUnreachable,
    #[error("network_unreachable")]
    NetworkUnreachable,
    #[error("eof_error")]
    Eof,

    // DNS Errors
    #[error("dns_nxdomain_error")]
    DnsNxdomain,
    #[error("dns_no_answer")]
    DnsNoAnswer,
    #[error("dns_refused_error")]
    DnsRefused,
    #[error("dns_server_misbehaving")]
    DnsServerMisbehaving,
    #[error("dns_temporary_failure")]
    DnsTemporaryFailure,

    // TLS Errors
    #[error("ssl_failed_handshake")]
    SslFailedHandshake,
    #[error("ssl_invalid_hostname")]
    SslInvalidHostname,
    #[error("ssl_unknown_authority")]
    SslUnknownAuthority,
    #[error("ssl_invalid_certificate")]
    SslInvalidCertificate,

    // HTTP and input Errors
    #[error("invalid_url")]
    InvalidUrl,
    #[error("invalid_address")]
    InvalidAddress,
    #[error("http_request_failed")]
    HttpRequestFailed,
    #[error("http_invalid_response")]
    HttpInvalidResponse,

    #[error("unknown_failure: {0}")]
    Unknown(String),
}

impl NetError {
    /// The failure string stored in archival records.
    pub fn failure(&self) -> String {
        self.to_string()
    }

    /// True for failures caused by our own deadlines or cancellation.
    pub fn is_timeout_or_cancel(&self) -> bool {
        matches!(self, NetError::GenericTimeout | NetError::Interrupted)
    }

    /// True for failures produced by the name resolution layer.
    pub fn is_dns(&self) -> bool {
        matches!(
            self,
            NetError::DnsNxdomain
                | NetError::DnsNoAnswer
                | NetError::DnsRefused
                | NetError::DnsServerMisbehaving
                | NetError::DnsTemporaryFailure
        )
    }

    pub fn unknown(detail: impl std::fmt::Display) -> Self {
        NetError::Unknown(detail.to_string())
    }
}

/// Converts an optional error into the optional failure string used by records.
pub fn failure_of<T>(result: &Result<T, NetError>) -> Option<String> {
    result.as_ref().err().map(NetError::failure)
}
