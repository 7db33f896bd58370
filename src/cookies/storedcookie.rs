use time::OffsetDateTime;

/// One cookie held by the jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    /// Lowercase domain without a leading dot.
    pub domain: String,
    pub path: String,
    pub creation_time: OffsetDateTime,
    /// `None` for session cookies.
    pub expiration_time: Option<OffsetDateTime>,
    pub secure: bool,
    /// Set when the cookie had no `Domain` attribute.
    pub host_only: bool,
}

impl StoredCookie {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiration_time.is_some_and(|expiry| expiry <= now)
    }

    /// RFC 6265 domain-match against a request host.
    pub fn matches_host(&self, host: &str) -> bool {
        if host.eq_ignore_ascii_case(&self.domain) {
            return true;
        }
        if self.host_only || host.len() <= self.domain.len() {
            return false;
        }
        let split = host.len() - self.domain.len();
        host.is_char_boundary(split)
            && host[split..].eq_ignore_ascii_case(&self.domain)
            && host.as_bytes()[split - 1] == b'.'
    }

    /// RFC 6265 path-match against a request path.
    pub fn matches_path(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        request_path.starts_with(&self.path)
            && (self.path.ends_with('/')
                || request_path.as_bytes().get(self.path.len()) == Some(&b'/'))
    }
}

/// The default cookie path for a request path (RFC 6265 section 5.1.4).
pub fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(domain: &str, path: &str, host_only: bool) -> StoredCookie {
        StoredCookie {
            name: "n".to_string(),
            value: "v".to_string(),
            domain: domain.to_string(),
            path: path.to_string(),
            creation_time: OffsetDateTime::now_utc(),
            expiration_time: None,
            secure: false,
            host_only,
        }
    }

    #[test]
    fn test_host_only_requires_exact_match() {
        let c = cookie("example.com", "/", true);
        assert!(c.matches_host("example.com"));
        assert!(!c.matches_host("www.example.com"));
    }

    #[test]
    fn test_domain_cookie_matches_subdomains() {
        let c = cookie("example.com", "/", false);
        assert!(c.matches_host("www.example.com"));
        assert!(!c.matches_host("badexample.com"));
    }

    #[test]
    fn test_path_matching() {
        let c = cookie("example.com", "/docs", true);
        assert!(c.matches_path("/docs"));
        assert!(c.matches_path("/docs/a"));
        assert!(!c.matches_path("/docsx"));
        assert!(!c.matches_path("/"));
    }

    #[test]
    fn test_default_path() {
        assert_eq!(default_path("/"), "/");
        assert_eq!(default_path("/a"), "/");
        assert_eq!(default_path("/a/b"), "/a");
        assert_eq!(default_path(""), "/");
    }

    #[test]
    fn test_session_cookie_never_expires() {
        let c = cookie("example.com", "/", true);
        assert!(!c.is_expired(OffsetDateTime::now_utc()));
    }
}
