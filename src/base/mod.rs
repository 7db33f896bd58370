//! Base types and error handling.
//!
//! Provides foundational types shared by every layer:
//! - [`NetError`](neterror::NetError): failure classes recorded as evidence
//! - [`Context`](context::Context): cancellation and deadlines

pub mod context;
pub mod neterror;
