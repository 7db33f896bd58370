use crate::cookies::psl::domain_allowed;
use crate::cookies::storedcookie::{default_path, StoredCookie};
use cookie::Cookie;
use dashmap::DashMap;
use time::OffsetDateTime;
use url::Url;

/// Maximum cookies kept per domain; the oldest is evicted first.
const MAX_COOKIES_PER_DOMAIN: usize = 50;

/// In-memory cookie jar shared by the flows of one measurement.
///
/// Redirect rounds read cookies set by earlier responses, the way a
/// browser session would.
#[derive(Debug, Default)]
pub struct CookieJar {
    store: DashMap<String, Vec<StoredCookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, cookie: StoredCookie, now: OffsetDateTime) {
        let mut entry = self.store.entry(cookie.domain.clone()).or_default();
        entry.retain(|c| c.name != cookie.name || c.path != cookie.path);

        // An already-expired cookie only deletes its predecessor.
        if cookie.is_expired(now) {
            return;
        }

        while entry.len() >= MAX_COOKIES_PER_DOMAIN {
            let Some(oldest) = entry
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.creation_time)
                .map(|(i, _)| i)
            else {
                break;
            };
            entry.remove(oldest);
        }
        entry.push(cookie);
    }

    /// Parses one `Set-Cookie` value received from `url` and stores it.
    ///
    /// Returns false when the line was rejected.
    pub fn store_response_cookie(&self, url: &Url, set_cookie: &str) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let parsed = match Cookie::parse(set_cookie) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "ignoring malformed Set-Cookie");
                return false;
            }
        };

        let now = OffsetDateTime::now_utc();
        let (domain, host_only) = match parsed.domain() {
            Some(d) if !d.is_empty() => {
                if !domain_allowed(d, host) {
                    tracing::debug!(url = %url, domain = d, "rejecting cookie domain");
                    return false;
                }
                (d.trim_start_matches('.').to_ascii_lowercase(), false)
            }
            _ => (host.to_ascii_lowercase(), true),
        };

        let path = match parsed.path() {
            Some(p) if p.starts_with('/') => p.to_string(),
            _ => default_path(url.path()),
        };

        // Max-Age takes precedence over Expires.
        let expiration_time = match parsed.max_age() {
            Some(max_age) => Some(now + max_age),
            None => parsed.expires().and_then(|e| e.datetime()),
        };

        self.insert(
            StoredCookie {
                name: parsed.name().to_string(),
                value: parsed.value().to_string(),
                domain,
                path,
                creation_time: now,
                expiration_time,
                secure: parsed.secure().unwrap_or(false),
                host_only,
            },
            now,
        );
        true
    }

    /// Seeds a `name=value` pair as a host-only cookie for `url`.
    pub fn seed(&self, url: &Url, pair: &str) -> bool {
        match pair.split_once('=') {
            Some((name, _)) if !name.trim().is_empty() => {
                self.store_response_cookie(url, &format!("{}; Path=/", pair.trim()))
            }
            _ => false,
        }
    }

    /// Cookies to send with a request to `url`, longest path first.
    pub fn cookies_for_url(&self, url: &Url) -> Vec<StoredCookie> {
        let Some(host) = url.host_str() else {
            return Vec::new();
        };
        let host = host.to_ascii_lowercase();
        let now = OffsetDateTime::now_utc();
        let secure_scheme = url.scheme() == "https";

        let mut result: Vec<StoredCookie> = candidate_domains(&host)
            .into_iter()
            .filter_map(|domain| self.store.get(&domain))
            .flat_map(|entry| entry.value().clone())
            .filter(|c| c.matches_host(&host))
            .filter(|c| c.matches_path(url.path()))
            .filter(|c| secure_scheme || !c.secure)
            .filter(|c| !c.is_expired(now))
            .collect();

        result.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| a.creation_time.cmp(&b.creation_time))
        });
        result
    }

    /// The `Cookie` request header value for `url`, if any cookie applies.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let cookies = self.cookies_for_url(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn len(&self) -> usize {
        self.store.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The host itself plus every parent domain with at least two labels.
fn candidate_domains(host: &str) -> Vec<String> {
    let mut domains = vec![host.to_string()];
    if host.parse::<std::net::IpAddr>().is_ok() {
        return domains;
    }
    let labels: Vec<&str> = host.split('.').collect();
    for i in 1..labels.len().saturating_sub(1) {
        domains.push(labels[i..].join("."));
    }
    domains
}
