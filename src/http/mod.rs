//! HTTP over measured connections.
//!
//! Every connection carries exactly one measured transaction: the flows
//! dial, optionally handshake, then hand the socket to [`HttpStream`].

pub mod headers;
pub mod response;
pub mod responsebody;
pub mod streamfactory;
pub mod transaction;

pub use response::HttpResponse;
pub use streamfactory::HttpStream;
pub use transaction::HttpTransaction;
