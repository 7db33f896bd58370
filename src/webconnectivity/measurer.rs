//! Entry point of the web connectivity experiment.

use super::config::Config;
use super::context::MeasurementContext;
use super::control::Session;
use super::dnsresolvers::DnsResolvers;
use super::summary::SummaryKeys;
use super::testkeys::TestKeysData;
use crate::base::context::Context;
use crate::base::neterror::NetError;
use crate::dns::Resolvers;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use url::Url;

/// The result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub input: String,
    pub measurement_start_time: String,
    /// Seconds.
    pub test_runtime: f64,
    pub test_keys: TestKeysData,
    pub summary: SummaryKeys,
}

#[derive(Debug, Clone)]
pub struct Measurer {
    config: Config,
    resolvers: Option<Resolvers>,
}

impl Measurer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            resolvers: None,
        }
    }

    /// Replaces the strategies built from the configuration.
    pub fn with_resolvers(mut self, resolvers: Resolvers) -> Self {
        self.resolvers = Some(resolvers);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Measures `input`, returning once every spawned task has finished.
    ///
    /// Only an unusable input is an error; network failures are evidence.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        input: &str,
        session: Option<Arc<dyn Session>>,
    ) -> Result<Measurement, NetError> {
        let url = parse_input(input)?;
        let domain = url
            .host_str()
            .ok_or(NetError::InvalidUrl)?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let resolvers = self.resolvers.clone().unwrap_or_else(|| {
            Resolvers::new(
                Some(self.config.udp_address.as_str()),
                Some(self.config.doh_url.as_str()),
            )
        });
        let mctx = MeasurementContext::new(self.config.clone(), resolvers);
        for pair in &self.config.cookies {
            if !mctx.cookie_jar.seed(&url, pair) {
                tracing::warn!(cookie = %pair, "ignoring invalid cookie");
            }
        }

        let start_time = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        let started = Instant::now();
        let ctx = Context::new(cancel).with_timeout(self.config.max_runtime());
        tracing::info!(input, "starting measurement");

        DnsResolvers {
            domain,
            url,
            referer: None,
            session,
            depth: 0,
        }
        .start(&mctx, &ctx);
        mctx.join().await;

        let test_keys = mctx.test_keys.snapshot();
        let summary = SummaryKeys::from_test_keys(&test_keys);
        Ok(Measurement {
            input: input.to_string(),
            measurement_start_time: start_time,
            test_runtime: started.elapsed().as_secs_f64(),
            test_keys,
            summary,
        })
    }
}

/// Accepts `http` and `https` URLs with a host.
pub fn parse_input(input: &str) -> Result<Url, NetError> {
    let url = Url::parse(input).map_err(|_| NetError::InvalidUrl)?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(url),
        _ => Err(NetError::InvalidUrl),
    }
}
