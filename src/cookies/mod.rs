//! Session cookie handling.
//!
//! | Type | Responsibility |
//! |------|----------------|
//! | [`CookieJar`](jar::CookieJar) | concurrent in-memory jar shared by one measurement |
//! | [`StoredCookie`](storedcookie::StoredCookie) | a single cookie with RFC 6265 matching |
//! | [`psl`] | public-suffix checks for the `Domain` attribute |

pub mod jar;
pub mod psl;
pub mod storedcookie;

pub use jar::CookieJar;
