//! # probenet
//!
//! A network interference measurement engine for Rust.
//!
//! `probenet` fetches a target through several independent network paths at
//! once and records what happened at every layer, so that a later analysis
//! can tell DNS tampering, TCP blocking, TLS blocking and HTTP blocking
//! apart.
//!
//! ## Features
//!
//! - **Multi-resolver DNS**: system, Do53 (UDP) and DNS over HTTPS run concurrently
//! - **Per-address flows**: TCP connect, TLS handshake and HTTP/1.1 or HTTP/2
//!   for every resolved address, with a single body fetch per scheme group
//! - **Evidence**: OONI-style archival records stamped with a task index and
//!   a time relative to the measurement start
//! - **Control**: optional comparison with a test helper's view
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use probenet::webconnectivity::{Config, Measurer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let measurer = Measurer::new(Config::default());
//!     let measurement = measurer
//!         .run(CancellationToken::new(), "https://example.com/", None)
//!         .await
//!         .unwrap();
//!     println!("{}", serde_json::to_string_pretty(&measurement).unwrap());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Failure classes, error classification and cancellation
//! - [`trace`] - Task indexes, zero time and archival records
//! - [`dns`] - Resolver strategies, DNS wire format and the session cache
//! - [`socket`] - Measured TCP connections and TLS handshakes
//! - [`http`] - Single-connection HTTP transactions
//! - [`cookies`] - The cookie jar shared by the flows of a measurement
//! - [`webconnectivity`] - The measurement orchestrator
//! - [`telegram`] - Telegram datacenter and web reachability

pub mod base;
pub mod cookies;
pub mod dns;
pub mod http;
pub mod socket;
pub mod telegram;
pub mod trace;
pub mod webconnectivity;
