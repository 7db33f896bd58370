//! Response head plus the (possibly truncated) body.

use bytes::Bytes;
use http::header::{LOCATION, SET_COOKIE};
use http::{HeaderMap, StatusCode, Version};
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// True for the redirect statuses that are followed: 301, 302, 307, 308.
    pub fn is_redirect(&self) -> bool {
        matches!(self.status.as_u16(), 301 | 302 | 307 | 308)
    }

    /// The `Location` header resolved against `base`.
    pub fn location(&self, base: &Url) -> Option<Url> {
        let raw = self.headers.get(LOCATION)?.to_str().ok()?;
        base.join(raw).ok()
    }

    /// Raw `Set-Cookie` header values.
    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }
}
