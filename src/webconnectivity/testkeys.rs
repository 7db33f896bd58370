//! The evidence aggregator shared by every task of one measurement.
//!
//! All mutation goes through one mutex whose critical sections only touch
//! memory. Readers take a [`TestKeys::snapshot`] once the task tracker has
//! been drained.

use super::control::ControlResponse;
use crate::base::neterror::NetError;
use crate::trace::archival::{
    ArchivalDnsLookupResult, ArchivalHttpRequestResult, ArchivalNetworkEvent,
    ArchivalTcpConnectResult, ArchivalTlsHandshakeResult,
};
use crate::trace::lock;
use serde::Serialize;
use std::sync::Mutex;

/// Evidence produced by the Do53 strategy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestKeysDo53 {
    pub queries: Vec<ArchivalDnsLookupResult>,
    pub network_events: Vec<ArchivalNetworkEvent>,
}

/// Evidence produced by the DoH strategy, transport included.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestKeysDoH {
    pub queries: Vec<ArchivalDnsLookupResult>,
    pub network_events: Vec<ArchivalNetworkEvent>,
    pub tcp_connect: Vec<ArchivalTcpConnectResult>,
    pub tls_handshakes: Vec<ArchivalTlsHandshakeResult>,
}

/// Everything collected so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestKeysData {
    pub queries: Vec<ArchivalDnsLookupResult>,
    pub do53: TestKeysDo53,
    pub doh: TestKeysDoH,
    pub network_events: Vec<ArchivalNetworkEvent>,
    pub tcp_connect: Vec<ArchivalTcpConnectResult>,
    pub tls_handshakes: Vec<ArchivalTlsHandshakeResult>,
    pub requests: Vec<ArchivalHttpRequestResult>,
    pub control: Option<ControlResponse>,
    pub control_failure: Option<String>,
    pub fundamental_failure: Option<String>,
}

#[derive(Debug, Default)]
pub struct TestKeys {
    data: Mutex<TestKeysData>,
}

impl TestKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_queries(&self, queries: Vec<ArchivalDnsLookupResult>) {
        lock(&self.data).queries.extend(queries);
    }

    pub fn append_tcp_connect_results(&self, connects: Vec<ArchivalTcpConnectResult>) {
        lock(&self.data).tcp_connect.extend(connects);
    }

    pub fn append_tls_handshakes(&self, handshakes: Vec<ArchivalTlsHandshakeResult>) {
        lock(&self.data).tls_handshakes.extend(handshakes);
    }

    pub fn append_network_events(&self, events: Vec<ArchivalNetworkEvent>) {
        lock(&self.data).network_events.extend(events);
    }

    pub fn append_requests(&self, requests: Vec<ArchivalHttpRequestResult>) {
        lock(&self.data).requests.extend(requests);
    }

    /// Runs `f` with exclusive access to the Do53 partition.
    pub fn with_do53<F: FnOnce(&mut TestKeysDo53)>(&self, f: F) {
        f(&mut lock(&self.data).do53);
    }

    /// Runs `f` with exclusive access to the DoH partition.
    pub fn with_doh<F: FnOnce(&mut TestKeysDoH)>(&self, f: F) {
        f(&mut lock(&self.data).doh);
    }

    /// Records the failure that makes the whole measurement unusable.
    ///
    /// Only the first call has an effect.
    pub fn set_fundamental_failure(&self, err: &NetError) {
        let mut data = lock(&self.data);
        if data.fundamental_failure.is_none() {
            data.fundamental_failure = Some(err.failure());
        }
    }

    pub fn set_control(&self, response: ControlResponse) {
        lock(&self.data).control = Some(response);
    }

    pub fn set_control_failure(&self, err: &NetError) {
        lock(&self.data).control_failure = Some(err.failure());
    }

    pub fn fundamental_failure(&self) -> Option<String> {
        lock(&self.data).fundamental_failure.clone()
    }

    /// A copy of everything collected so far.
    pub fn snapshot(&self) -> TestKeysData {
        lock(&self.data).clone()
    }
}
