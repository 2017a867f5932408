//! The contract every metric analyzer implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sitemaster_scanner::DocumentModel;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::marks::MarkDefinition;

/// Everything a plugin knows about the page besides its markup.
#[derive(Debug, Clone)]
pub struct PageContext {
    /// Canonical URL of the page; relative links resolve against it.
    pub url: Url,
    pub depth: u32,
    pub scan_id: String,
    /// Raised by the caller to abandon the pass.
    pub cancel: CancellationToken,
}

impl PageContext {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            depth: 0,
            scan_id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_scan_id(mut self, scan_id: impl Into<String>) -> Self {
        self.scan_id = scan_id.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One kind of finding emitted by a plugin for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkUsage {
    /// Machine name of the mark, resolved through the catalog later.
    pub mark: String,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl MarkUsage {
    pub fn new(mark: impl Into<String>, count: u32) -> Self {
        Self {
            mark: mark.into(),
            count,
            details: Vec::new(),
        }
    }

    /// One occurrence per detail line.
    pub fn from_details(mark: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            mark: mark.into(),
            count: details.len() as u32,
            details,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin '{plugin}' failed on {page_url}: {message}")]
    Run {
        plugin: String,
        page_url: String,
        message: String,
    },

    #[error("plugin '{plugin}' lifecycle hook failed: {message}")]
    Lifecycle { plugin: String, message: String },
}

impl PluginError {
    pub fn run(plugin: &str, page_url: &str, message: impl Into<String>) -> Self {
        PluginError::Run {
            plugin: plugin.to_string(),
            page_url: page_url.to_string(),
            message: message.into(),
        }
    }

    pub fn plugin(&self) -> &str {
        match self {
            PluginError::Run { plugin, .. } | PluginError::Lifecycle { plugin, .. } => plugin,
        }
    }
}

/// A pluggable analyzer.
///
/// `run` must not share mutable state with other plugins, and reports "no
/// findings" as an empty vector. The returned future is not required to be
/// `Send`: a pass runs its plugins on one task while it borrows the
/// document.
///
/// The lifecycle hooks return `Ok(false)` to decline an install, update or
/// uninstall; the version table is then left alone.
#[async_trait(?Send)]
pub trait MetricPlugin: Send + Sync {
    /// Machine name, unique within a registry.
    fn name(&self) -> &str;

    /// Declared version, `mmddyyyyxx` (date plus increment).
    fn version(&self) -> u64 {
        1
    }

    fn description(&self) -> &str {
        ""
    }

    /// Catalog entries this plugin can emit.
    fn marks(&self) -> Vec<MarkDefinition> {
        Vec::new()
    }

    async fn run(
        &self,
        context: &PageContext,
        document: &DocumentModel,
    ) -> Result<Vec<MarkUsage>, PluginError>;

    fn on_install(&self) -> Result<bool, PluginError> {
        Ok(true)
    }

    fn on_update(&self, _previous_version: u64) -> Result<bool, PluginError> {
        Ok(true)
    }

    fn on_uninstall(&self) -> Result<bool, PluginError> {
        Ok(true)
    }
}
