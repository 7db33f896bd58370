//! TLS handshaking over measured connections.
//!
//! The handshake runs on top of a [`TracedStream`], so the ClientHello and
//! everything after it shows up as network events of the same trace, and
//! the outcome is stored as one [`ArchivalTlsHandshakeResult`].

use crate::base::context::{classify_io_error, Context};
use crate::base::neterror::{failure_of, NetError};
use crate::socket::stream::TracedStream;
use crate::trace::archival::{ArchivalBinaryData, ArchivalTlsHandshakeResult};
use crate::trace::Trace;
use boring::ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslRef, SslVerifyMode, SslVersion};
use std::time::Duration;
use tokio_boring::{HandshakeError, SslStream};

/// Upper bound for one TLS handshake.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// OpenSSL X509_V_ERR_* codes we classify explicitly.
const X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT: i32 = 2;
const X509_V_ERR_CERT_NOT_YET_VALID: i32 = 9;
const X509_V_ERR_CERT_HAS_EXPIRED: i32 = 10;
const X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT: i32 = 18;
const X509_V_ERR_SELF_SIGNED_CERT_IN_CHAIN: i32 = 19;
const X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY: i32 = 20;
const X509_V_ERR_UNABLE_TO_VERIFY_LEAF_SIGNATURE: i32 = 21;
const X509_V_ERR_HOSTNAME_MISMATCH: i32 = 62;

/// ClientHello configuration used by every measured handshake.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub min_version: Option<SslVersion>,
    pub max_version: Option<SslVersion>,
    pub cipher_list: String,
    pub alpn_protos: Vec<String>,
    pub curves: Vec<String>,
    pub sigalgs: String,
    /// Skip certificate verification (the outcome is still recorded).
    pub insecure: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: Some(SslVersion::TLS1_2),
            max_version: Some(SslVersion::TLS1_3),
            cipher_list:
                "TLS_AES_128_GCM_SHA256:TLS_AES_256_GCM_SHA384:TLS_CHACHA20_POLY1305_SHA256:\
                ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:\
                ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:\
                ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:\
                ECDHE-RSA-AES128-SHA:ECDHE-RSA-AES256-SHA:\
                AES128-GCM-SHA256:AES256-GCM-SHA384:AES128-SHA:AES256-SHA"
                    .to_string(),
            alpn_protos: vec!["h2".to_string(), "http/1.1".to_string()],
            curves: vec![
                "X25519".to_string(),
                "P-256".to_string(),
                "P-384".to_string(),
            ],
            sigalgs: "ECDSA+SHA256:RSA-PSS+SHA256:RSA+SHA256:\
                ECDSA+SHA384:RSA-PSS+SHA384:RSA+SHA384:\
                RSA-PSS+SHA512:RSA+SHA512"
                .to_string(),
            insecure: false,
        }
    }
}

impl TlsConfig {
    /// Default configuration offering the given ALPN list.
    pub fn with_alpn(alpn: &[&str]) -> Self {
        Self {
            alpn_protos: alpn.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Apply this configuration to an SSL connector builder.
    pub fn apply_to_builder(&self, builder: &mut SslConnectorBuilder) -> Result<(), NetError> {
        if let Some(min) = self.min_version {
            builder
                .set_min_proto_version(Some(min))
                .map_err(NetError::unknown)?;
        }
        if let Some(max) = self.max_version {
            builder
                .set_max_proto_version(Some(max))
                .map_err(NetError::unknown)?;
        }

        builder
            .set_cipher_list(&self.cipher_list)
            .map_err(NetError::unknown)?;

        if !self.alpn_protos.is_empty() {
            builder
                .set_alpn_protos(&encode_alpn(&self.alpn_protos)?)
                .map_err(NetError::unknown)?;
        }

        if !self.sigalgs.is_empty() {
            builder
                .set_sigalgs_list(&self.sigalgs)
                .map_err(NetError::unknown)?;
        }

        if !self.curves.is_empty() {
            builder
                .set_curves_list(&self.curves.join(":"))
                .map_err(NetError::unknown)?;
        }

        if self.insecure {
            builder.set_verify(SslVerifyMode::NONE);
        } else {
            builder.set_verify(SslVerifyMode::PEER);
        }

        Ok(())
    }

    /// SNI must not be sent for raw IP addresses (RFC 6066).
    pub fn should_set_sni(host: &str) -> bool {
        host.parse::<std::net::IpAddr>().is_err()
    }
}

/// Encodes an ALPN list into the length-prefixed wire form.
pub fn encode_alpn(protos: &[String]) -> Result<Vec<u8>, NetError> {
    let mut wire = Vec::new();
    for proto in protos {
        let len = u8::try_from(proto.len()).map_err(|_| NetError::unknown("alpn too long"))?;
        wire.push(len);
        wire.extend_from_slice(proto.as_bytes());
    }
    Ok(wire)
}

/// Maps an X509 verification code to a failure class.
fn classify_verify_error(code: i32) -> NetError {
    match code {
        X509_V_ERR_HOSTNAME_MISMATCH => NetError::SslInvalidHostname,
        X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT
        | X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT
        | X509_V_ERR_SELF_SIGNED_CERT_IN_CHAIN
        | X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY
        | X509_V_ERR_UNABLE_TO_VERIFY_LEAF_SIGNATURE => NetError::SslUnknownAuthority,
        X509_V_ERR_CERT_NOT_YET_VALID | X509_V_ERR_CERT_HAS_EXPIRED => {
            NetError::SslInvalidCertificate
        }
        _ => NetError::SslInvalidCertificate,
    }
}

/// Classifies a failed handshake.
pub fn classify_handshake_error<S>(err: &HandshakeError<S>) -> NetError {
    if let Some(ssl) = err.ssl() {
        if let Err(verify) = ssl.verify_result() {
            return classify_verify_error(verify.as_raw());
        }
    }
    if let Some(io_err) = err.as_io_error() {
        return classify_io_error(io_err);
    }
    NetError::SslFailedHandshake
}

fn peer_certificates(ssl: &SslRef) -> Vec<ArchivalBinaryData> {
    ssl.peer_cert_chain()
        .map(|chain| {
            chain
                .iter()
                .filter_map(|cert| cert.to_der().ok())
                .map(|der| ArchivalBinaryData::new(&der))
                .collect()
        })
        .unwrap_or_default()
}

impl Trace {
    /// Performs a TLS handshake over `stream` and records its outcome.
    ///
    /// The handshake is bounded by [`TLS_HANDSHAKE_TIMEOUT`] on top of any
    /// deadline already carried by `ctx`.
    pub async fn tls_handshake(
        &self,
        ctx: &Context,
        stream: TracedStream,
        sni: &str,
        alpn: &[&str],
        insecure: bool,
    ) -> Result<SslStream<TracedStream>, NetError> {
        let t0 = self.time_since_zero();
        let address = stream.address().to_string();
        let config = TlsConfig {
            insecure,
            ..TlsConfig::with_alpn(alpn)
        };

        let ctx = ctx.with_timeout(TLS_HANDSHAKE_TIMEOUT);
        let result = ctx
            .run(async {
                let mut builder =
                    SslConnector::builder(SslMethod::tls()).map_err(NetError::unknown)?;
                config.apply_to_builder(&mut builder)?;
                let mut conf = builder.build().configure().map_err(NetError::unknown)?;
                if !TlsConfig::should_set_sni(sni) {
                    conf.set_use_server_name_indication(false);
                }
                if insecure {
                    conf.set_verify_hostname(false);
                }
                tokio_boring::connect(conf, sni, stream)
                    .await
                    .map_err(|e| classify_handshake_error(&e))
            })
            .await;

        let mut record = ArchivalTlsHandshakeResult {
            network: "tcp".to_string(),
            address,
            cipher_suite: String::new(),
            failure: failure_of(&result),
            negotiated_protocol: String::new(),
            no_tls_verify: insecure,
            peer_certificates: Vec::new(),
            server_name: sni.to_string(),
            t0,
            t: self.time_since_zero(),
            tls_version: String::new(),
            transaction_id: self.index(),
        };
        if let Ok(tls) = &result {
            let ssl = tls.ssl();
            record.cipher_suite = ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_default();
            record.negotiated_protocol = ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default();
            record.tls_version = ssl.version_str().to_string();
            record.peer_certificates = peer_certificates(ssl);
        }
        self.push_tls_handshake(record);

        match &result {
            Ok(_) => tracing::debug!(index = self.index(), sni, "tls handshake ok"),
            Err(e) => tracing::debug!(index = self.index(), sni, failure = %e, "tls handshake failed"),
        }
        result
    }
}
