//! Session-scoped resolution cache.
//!
//! Entries never expire; a later `set` for the same domain replaces the
//! previous addresses.

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct DnsCache {
    entries: DashMap<String, Vec<String>>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses previously stored for `domain`.
    pub fn get(&self, domain: &str) -> Option<Vec<String>> {
        self.entries.get(domain).map(|entry| entry.value().clone())
    }

    pub fn set(&self, domain: &str, addresses: Vec<String>) {
        self.entries.insert(domain.to_string(), addresses);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
