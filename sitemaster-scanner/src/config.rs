use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_REDIRECTS: usize = 5;
pub const DEFAULT_USER_AGENT: &str = concat!("SiteMaster/", env!("CARGO_PKG_VERSION"));

/// Tuning for link validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkCheckConfig {
    /// Maximum probes in flight for one page.
    pub workers: usize,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Redirect hops followed before giving up.
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for LinkCheckConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl LinkCheckConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
