//! Summary derived from the aggregated evidence.

use super::testkeys::TestKeysData;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryKeys {
    /// False when a fundamental failure makes the evidence unusable.
    pub usable: bool,
    pub control_available: bool,
    pub requests: usize,
    pub successful_requests: usize,
    pub tcp_connects: usize,
    pub successful_tcp_connects: usize,
}

impl SummaryKeys {
    pub fn from_test_keys(tk: &TestKeysData) -> Self {
        Self {
            usable: tk.fundamental_failure.is_none(),
            control_available: tk.control.is_some(),
            requests: tk.requests.len(),
            successful_requests: tk.requests.iter().filter(|r| r.failure.is_none()).count(),
            tcp_connects: tk.tcp_connect.len(),
            successful_tcp_connects: tk.tcp_connect.iter().filter(|c| c.status.success).count(),
        }
    }
}
