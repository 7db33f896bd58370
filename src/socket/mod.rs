//! Measured sockets.
//!
//! - [`connectjob`]: traced TCP dialing and the TCP → TLS connect sequence
//! - [`stream`]: network-event recording stream and the cleartext/TLS socket enum
//! - [`tls`]: BoringSSL ClientHello configuration and the traced handshake

pub mod connectjob;
pub mod stream;
pub mod tls;
