//! Measurement configuration.

use crate::base::neterror::NetError;
use crate::dns::{DEFAULT_DOH_URL, DEFAULT_UDP_ADDRESS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for one web connectivity run.
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DNS-over-HTTPS endpoint.
    pub doh_url: String,

    /// Do53 server as `ip:port`.
    pub udp_address: String,

    /// Test helper URL. No control flow runs without it.
    pub th_addr: Option<String>,

    /// Redirect chains longer than this are not followed.
    pub max_redirects: usize,

    /// Global deadline in seconds.
    pub max_runtime: u64,

    /// `name=value` cookies seeded for the input URL.
    pub cookies: Vec<String>,

    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            doh_url: DEFAULT_DOH_URL.to_string(),
            udp_address: DEFAULT_UDP_ADDRESS.to_string(),
            th_addr: None,
            max_redirects: 10,
            max_runtime: 90,
            cookies: Vec::new(),
            user_agent: None,
        }
    }
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self, NetError> {
        serde_json::from_str(raw).map_err(NetError::unknown)
    }

    pub fn with_doh_url(mut self, url: impl Into<String>) -> Self {
        self.doh_url = url.into();
        self
    }

    pub fn with_udp_address(mut self, address: impl Into<String>) -> Self {
        self.udp_address = address.into();
        self
    }

    pub fn with_th_addr(mut self, th_addr: impl Into<String>) -> Self {
        self.th_addr = Some(th_addr.into());
        self
    }

    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn with_max_runtime(mut self, seconds: u64) -> Self {
        self.max_runtime = seconds;
        self
    }

    pub fn with_cookie(mut self, pair: impl Into<String>) -> Self {
        self.cookies.push(pair.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime)
    }
}
