//! Public Suffix List checks for the `Domain` cookie attribute.

use psl::{List, Psl};

/// True when `domain` is itself a public suffix such as `com` or `co.uk`.
pub fn is_public_suffix(domain: &str) -> bool {
    let lower = domain.to_ascii_lowercase();
    List.suffix(lower.as_bytes())
        .is_some_and(|suffix| suffix.as_bytes() == lower.as_bytes())
}

/// Whether a response from `host` may set a cookie for `cookie_domain`.
///
/// The domain must not be a public suffix and `host` must equal it or be
/// one of its subdomains.
pub fn domain_allowed(cookie_domain: &str, host: &str) -> bool {
    let cookie_domain = cookie_domain.trim_start_matches('.').to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    if cookie_domain.is_empty() || is_public_suffix(&cookie_domain) {
        return false;
    }
    host == cookie_domain || host.ends_with(&format!(".{}", cookie_domain))
}
