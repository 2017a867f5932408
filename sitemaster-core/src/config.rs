use serde::{Deserialize, Serialize};
use sitemaster_scanner::LinkCheckConfig;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

pub const DEFAULT_PAGE_CONCURRENCY: usize = 4;

/// Options for a scan run. Every field has a default, so a config file
/// only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub link_check: LinkCheckConfig,
    /// Emit a mark for links that redirect before resolving.
    pub report_redirects: bool,
    /// Pages scanned at once when scanning a list of pages.
    pub page_concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            link_check: LinkCheckConfig::default(),
            report_redirects: true,
            page_concurrency: DEFAULT_PAGE_CONCURRENCY,
        }
    }
}

impl ScanConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })
    }
}
