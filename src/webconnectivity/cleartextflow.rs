//! Per-address HTTP measurement: TCP connect then, when admitted, GET/POST.

use super::context::MeasurementContext;
use super::flow::{fetch, maybe_follow_redirect, FlowSpec};
use crate::base::context::Context;
use crate::base::neterror::NetError;
use crate::socket::stream::SocketType;
use crate::trace::{OperationLogger, Trace};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CleartextFlow {
    pub spec: FlowSpec,
}

impl CleartextFlow {
    pub fn new(spec: FlowSpec) -> Self {
        Self { spec }
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
        let ol = OperationLogger::new(index, format!("CleartextFlow {}", self.spec.address));

        let outcome = self.measure(mctx, ctx, &trace).await;
        // The connection is closed by now, so the events are complete.
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

        if !self.spec.permit.try_acquire() {
            tracing::debug!(
                index = trace.index(),
                address = %self.spec.address,
                "body fetched by another flow"
            );
            return Ok(());
        }

        let (url, resp) = fetch(mctx, ctx, trace, &self.spec, "http", SocketType::Tcp(stream)).await?;
        maybe_follow_redirect(mctx, ctx, &self.spec, &url, &resp);
        Ok(())
    }
}
