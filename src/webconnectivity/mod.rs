//! Web connectivity: measures one URL through every resolver and address.
//!
//! [`Measurer::run`] starts a [`DnsResolvers`] round for the input URL.
//! The round resolves the domain with the system, Do53 and DoH strategies
//! concurrently, then starts a [`CleartextFlow`] and a [`SecureFlow`] per
//! address and, on the first round only, the [`Control`] flow. Redirects
//! start further rounds. Every task writes into the shared [`TestKeys`] and
//! runs on the [`MeasurementContext`] task tracker, which the measurer
//! drains before reading the evidence.

mod cleartextflow;
mod config;
mod context;
pub mod control;
mod dnsresolvers;
mod flow;
mod measurer;
mod secureflow;
mod summary;
mod testkeys;

pub use cleartextflow::CleartextFlow;
pub use config::Config;
pub use context::MeasurementContext;
pub use control::{
    Control, ControlClient, ControlQuery, ControlRequest, ControlResponse, HttpControlClient,
    Session,
};
pub use dnsresolvers::{DnsResolvers, DNS_LOOKUP_TIMEOUT};
pub use flow::{BodyPermit, FlowKind, FlowSpec};
pub use measurer::{parse_input, Measurement, Measurer};
pub use secureflow::SecureFlow;
pub use summary::SummaryKeys;
pub use testkeys::{TestKeys, TestKeysData, TestKeysDo53, TestKeysDoH};
