//! Per-address HTTPS measurement: TCP connect, TLS handshake, then, when
//! admitted, the HTTP exchange over the negotiated protocol.

use super::context::MeasurementContext;
use super::flow::{fetch, maybe_follow_redirect, FlowSpec};
use crate::base::context::Context;
use crate::base::neterror::NetError;
use crate::socket::stream::SocketType;
use crate::trace::{OperationLogger, Trace};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SecureFlow {
    pub spec: FlowSpec,
    pub sni: String,
    /// ALPN preference, most preferred first.
    pub alpn: Vec<String>,
    /// Skips certificate verification; the handshake is still recorded.
    pub insecure: bool,
}

impl SecureFlow {
    pub fn new(spec: FlowSpec, sni: impl Into<String>) -> Self {
        Self {
            spec,
            sni: sni.into(),
            alpn: vec!["h2".to_string(), "http/1.1".to_string()],
            insecure: false,
        }
    }

    /// Runs the flow on the measurement's task tracker.
    pub fn start(self, mctx: &MeasurementContext, ctx: &Context) {
        let mctx = mctx.clone();
        let ctx = ctx.clone();
        let tracker = mctx.tracker.clone();
        tracker.spawn(async move { self.run(&mctx, &ctx).await });
    }

    pub async fn run(self, mctx: &MeasurementContext, ctx: &Context) {
        let index = mctx.ids.next();
        let trace = Arc::new(Trace::new(index, mctx.zero_time));
        let ol = OperationLogger::new(
            index,
            format!("SecureFlow {} (sni={})", self.spec.address, self.sni),
        );

        let outcome = self.measure(mctx, ctx, &trace).await;
        mctx.test_keys.append_network_events(trace.network_events());
        ol.stop(outcome.as_ref().err());
    }

    async fn measure(
        &self,
        mctx: &MeasurementContext,
        ctx: &Context,
        trace: &Arc<Trace>,
    ) -> Result<(), NetError> {
        let stream = trace.dial_tcp(ctx, &self.spec.address).await;
        mctx.test_keys.append_tcp_connect_results(trace.tcp_connects());
        let stream = stream?;

        let alpn: Vec<&str> = self.alpn.iter().map(String::as_str).collect();
        let tls = trace
            .tls_handshake(ctx, stream, &self.sni, &alpn, self.insecure)
            .await;
        mctx.test_keys.append_tls_handshakes(trace.tls_handshakes());
        let tls = tls?;

        if !self.spec.permit.try_acquire() {
            tracing::debug!(
                index = trace.index(),
                address = %self.spec.address,
                "body fetched by another flow"
            );
            return Ok(());
        }

        let (url, resp) = fetch(mctx, ctx, trace, &self.spec, "https", SocketType::Ssl(tls)).await?;
        maybe_follow_redirect(mctx, ctx, &self.spec, &url, &resp);
        Ok(())
    }
}
