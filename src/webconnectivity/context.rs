//! Collaborators shared by every task of one measurement.

use super::config::Config;
use super::testkeys::TestKeys;
use crate::cookies::CookieJar;
use crate::dns::{DnsCache, Resolvers};
use crate::trace::IdGenerator;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::task::TaskTracker;

/// Shared services handed to the resolvers, the flows and the control.
///
/// Cloning is cheap and every clone refers to the same state. The
/// tracker is the join barrier: the measurement is complete once it has
/// been closed and drained.
#[derive(Clone)]
pub struct MeasurementContext {
    pub config: Arc<Config>,
    pub cookie_jar: Arc<CookieJar>,
    pub dns_cache: Arc<DnsCache>,
    pub ids: Arc<IdGenerator>,
    pub resolvers: Resolvers,
    pub test_keys: Arc<TestKeys>,
    pub tracker: TaskTracker,
    pub zero_time: Instant,
}

impl MeasurementContext {
    pub fn new(config: Config, resolvers: Resolvers) -> Self {
        Self {
            config: Arc::new(config),
            cookie_jar: Arc::new(CookieJar::new()),
            dns_cache: Arc::new(DnsCache::new()),
            ids: Arc::new(IdGenerator::new()),
            resolvers,
            test_keys: Arc::new(TestKeys::new()),
            tracker: TaskTracker::new(),
            zero_time: Instant::now(),
        }
    }

    /// Closes the tracker and waits for every task, including the ones
    /// spawned by other tasks.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl std::fmt::Debug for MeasurementContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementContext")
            .field("config", &self.config)
            .field("resolvers", &self.resolvers)
            .field("cached_domains", &self.dns_cache.len())
            .field("cookies", &self.cookie_jar.len())
            .field("tasks", &self.tracker.len())
            .finish()
    }
}
