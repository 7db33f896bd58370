//! DNS resolution strategies.
//!
//! Three interchangeable strategies implement [`Resolve`]:
//! - [`GaiResolver`]: the host's stub resolver (getaddrinfo on the blocking pool)
//! - [`UdpResolver`]: A and AAAA queries over UDP to one server
//! - [`DohResolver`]: DNS over HTTPS with `application/dns-message`
//!
//! Every strategy records its lookups into the [`Trace`](crate::trace::Trace)
//! it is given, so the evidence survives failures. [`Resolvers`] bundles one
//! instance of each for an orchestrator, and [`DnsCache`] keeps the merged
//! answers for the rest of the session.

mod cache;
mod doh;
mod gai;
mod resolve;
mod udp;
pub mod wire;

pub use cache::DnsCache;
pub use doh::DohResolver;
pub use gai::GaiResolver;
pub use resolve::{merge_addresses, DnsEngine, LookupRecord, Resolve, Resolving};
pub use udp::UdpResolver;

use std::sync::Arc;

/// Default Do53 server.
pub const DEFAULT_UDP_ADDRESS: &str = "8.8.4.4:53";

/// Default DoH endpoint.
pub const DEFAULT_DOH_URL: &str = "https://mozilla.cloudflare-dns.com/dns-query";

/// The three strategies run by one orchestrator.
#[derive(Clone)]
pub struct Resolvers {
    pub system: Arc<dyn Resolve>,
    pub udp: Arc<dyn Resolve>,
    pub doh: Arc<dyn Resolve>,
}

impl std::fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolvers")
            .field("udp", &self.udp.address())
            .field("doh", &self.doh.address())
            .finish()
    }
}

impl Resolvers {
    /// Real strategies; `None` picks the defaults.
    pub fn new(udp_address: Option<&str>, doh_url: Option<&str>) -> Self {
        Self {
            system: Arc::new(GaiResolver::new()),
            udp: Arc::new(UdpResolver::new(udp_address.unwrap_or(DEFAULT_UDP_ADDRESS))),
            doh: Arc::new(DohResolver::new(doh_url.unwrap_or(DEFAULT_DOH_URL))),
        }
    }

    /// Arbitrary strategies, e.g. mocks in tests.
    pub fn with_strategies(
        system: Arc<dyn Resolve>,
        udp: Arc<dyn Resolve>,
        doh: Arc<dyn Resolve>,
    ) -> Self {
        Self { system, udp, doh }
    }
}

impl Default for Resolvers {
    fn default() -> Self {
        Self::new(None, None)
    }
}
