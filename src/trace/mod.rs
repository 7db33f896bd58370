//! Per-operation evidence capture.
//!
//! A [`Trace`] is created for every measured task. It knows its index (the
//! `transaction_id` stamped on every record) and the measurement's zero
//! time, and it collects the records produced by the dialer, the TLS
//! handshaker and the resolver strategies that run under it. Collected
//! records are drained with the accessor methods once the operations have
//! completed.
//!
//! The TCP dialer and TLS handshaker live next to the socket code
//! ([`crate::socket`]) as further `impl Trace` blocks.

pub mod archival;
pub mod oplogger;

use archival::{
    ArchivalDnsLookupResult, ArchivalNetworkEvent, ArchivalTcpConnectResult,
    ArchivalTlsHandshakeResult,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

pub use oplogger::OperationLogger;

/// Process-wide monotonically increasing task index.
///
/// The first call to [`IdGenerator::next`] returns 1.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Evidence collector for one task.
#[derive(Debug)]
pub struct Trace {
    index: i64,
    zero_time: Instant,
    dns_lookups: Mutex<Vec<ArchivalDnsLookupResult>>,
    tcp_connects: Mutex<Vec<ArchivalTcpConnectResult>>,
    tls_handshakes: Mutex<Vec<ArchivalTlsHandshakeResult>>,
    network_events: Mutex<Vec<ArchivalNetworkEvent>>,
}

impl Trace {
    pub fn new(index: i64, zero_time: Instant) -> Self {
        Self {
            index,
            zero_time,
            dns_lookups: Mutex::default(),
            tcp_connects: Mutex::default(),
            tls_handshakes: Mutex::default(),
            network_events: Mutex::default(),
        }
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn zero_time(&self) -> Instant {
        self.zero_time
    }

    /// Seconds elapsed since the measurement's zero time.
    pub fn time_since_zero(&self) -> f64 {
        self.zero_time.elapsed().as_secs_f64()
    }

    pub(crate) fn push_dns_lookup(&self, record: ArchivalDnsLookupResult) {
        lock(&self.dns_lookups).push(record);
    }

    pub(crate) fn push_tcp_connect(&self, record: ArchivalTcpConnectResult) {
        lock(&self.tcp_connects).push(record);
    }

    pub(crate) fn push_tls_handshake(&self, record: ArchivalTlsHandshakeResult) {
        lock(&self.tls_handshakes).push(record);
    }

    pub(crate) fn push_network_event(&self, record: ArchivalNetworkEvent) {
        lock(&self.network_events).push(record);
    }

    /// Drains the DNS lookups collected so far.
    pub fn dns_lookups(&self) -> Vec<ArchivalDnsLookupResult> {
        std::mem::take(&mut *lock(&self.dns_lookups))
    }

    /// Drains the TCP connects collected so far.
    pub fn tcp_connects(&self) -> Vec<ArchivalTcpConnectResult> {
        std::mem::take(&mut *lock(&self.tcp_connects))
    }

    /// Drains the TLS handshakes collected so far.
    pub fn tls_handshakes(&self) -> Vec<ArchivalTlsHandshakeResult> {
        std::mem::take(&mut *lock(&self.tls_handshakes))
    }

    /// Drains the network events collected so far.
    pub fn network_events(&self) -> Vec<ArchivalNetworkEvent> {
        std::mem::take(&mut *lock(&self.network_events))
    }
}
