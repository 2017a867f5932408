//! Drives one page through parse, plugins, aggregation and delivery.
//!
//! A pass moves strictly forward through
//! `Fetched -> Parsed -> PluginsRunning -> Aggregated -> Delivered`, or
//! stops in `Failed`. Passes for different pages share nothing mutable
//! except the plugin registry snapshot and the mark catalog, so a failing
//! page never disturbs its siblings.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sitemaster_scanner::{DocumentModel, PageFetcher};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PassError, StoreError};
use crate::marks::{Mark, MarkCatalog};
use crate::plugin::{MarkUsage, MetricPlugin, PageContext, PluginError};
use crate::registry::PluginRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Fetched,
    Parsed,
    PluginsRunning,
    Aggregated,
    Delivered,
    Failed,
}

impl PassState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassState::Fetched => "fetched",
            PassState::Parsed => "parsed",
            PassState::PluginsRunning => "plugins_running",
            PassState::Aggregated => "aggregated",
            PassState::Delivered => "delivered",
            PassState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PassState::Delivered | PassState::Failed)
    }
}

/// A mark usage after catalog resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMark {
    pub plugin: String,
    pub mark: Mark,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Everything recorded for one page in one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageScanResult {
    pub scan_id: String,
    pub page_url: String,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub marks: Vec<RecordedMark>,
    pub scanned_at: DateTime<Utc>,
}

impl PageScanResult {
    /// Total occurrences of a mark on this page.
    pub fn mark_count(&self, machine_name: &str) -> u32 {
        self.marks
            .iter()
            .filter(|m| m.mark.machine_name == machine_name)
            .map(|m| m.count)
            .sum()
    }

    pub fn total_marks(&self) -> u32 {
        self.marks.iter().map(|m| m.count).sum()
    }
}

/// Persistence collaborator.
pub trait ScanStore: Send + Sync {
    fn save(&self, result: &PageScanResult) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub struct DeliveredPass {
    pub result: PageScanResult,
    pub plugin_errors: Vec<PluginError>,
    /// Catalog and storage problems that did not stop the pass.
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct FailedPass {
    pub page_url: String,
    pub error: PassError,
    pub plugin_errors: Vec<PluginError>,
}

#[derive(Debug)]
pub enum PassOutcome {
    Delivered(DeliveredPass),
    Failed(FailedPass),
}

impl PassOutcome {
    pub fn state(&self) -> PassState {
        match self {
            PassOutcome::Delivered(_) => PassState::Delivered,
            PassOutcome::Failed(_) => PassState::Failed,
        }
    }

    pub fn page_url(&self) -> &str {
        match self {
            PassOutcome::Delivered(pass) => &pass.result.page_url,
            PassOutcome::Failed(pass) => &pass.page_url,
        }
    }

    pub fn result(&self) -> Option<&PageScanResult> {
        match self {
            PassOutcome::Delivered(pass) => Some(&pass.result),
            PassOutcome::Failed(_) => None,
        }
    }

    pub fn plugin_errors(&self) -> &[PluginError] {
        match self {
            PassOutcome::Delivered(pass) => &pass.plugin_errors,
            PassOutcome::Failed(pass) => &pass.plugin_errors,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, PassOutcome::Delivered(_))
    }
}

/// State bookkeeping for one pass.
struct Pass<'a> {
    context: &'a PageContext,
    state: PassState,
}

impl<'a> Pass<'a> {
    fn new(context: &'a PageContext) -> Self {
        Self {
            context,
            state: PassState::Fetched,
        }
    }

    fn advance(&mut self, next: PassState) {
        debug_assert!(next > self.state, "pass cannot move from {:?} to {:?}", self.state, next);
        debug!("{}: {} -> {}", self.context.url, self.state.as_str(), next.as_str());
        self.state = next;
    }

    fn fail(mut self, error: PassError, plugin_errors: Vec<PluginError>) -> PassOutcome {
        warn!("Scan of {} failed: {}", self.context.url, error);
        self.advance(PassState::Failed);
        PassOutcome::Failed(FailedPass {
            page_url: self.context.url.to_string(),
            error,
            plugin_errors,
        })
    }
}

pub struct ScanOrchestrator {
    registry: Arc<PluginRegistry>,
    catalog: Arc<dyn MarkCatalog>,
    store: Option<Arc<dyn ScanStore>>,
}

impl ScanOrchestrator {
    pub fn new(registry: Arc<PluginRegistry>, catalog: Arc<dyn MarkCatalog>) -> Self {
        Self {
            registry,
            catalog,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ScanStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run one pass over markup that has already been fetched.
    pub async fn scan_page(&self, context: &PageContext, raw: &[u8]) -> PassOutcome {
        let mut pass = Pass::new(context);
        info!("Scanning {} (scan {})", context.url, context.scan_id);

        if context.cancel.is_cancelled() {
            return pass.fail(PassError::Cancelled, Vec::new());
        }

        let document = match DocumentModel::parse(raw) {
            Ok(document) => document,
            Err(e) => return pass.fail(e.into(), Vec::new()),
        };
        if document.recovered_errors() > 0 {
            debug!("{}: recovered from {} markup errors", context.url, document.recovered_errors());
        }
        pass.advance(PassState::Parsed);
        let title = document.title();

        pass.advance(PassState::PluginsRunning);
        let plugins = self.registry.active_plugins();
        let mut emitted: Vec<(String, MarkUsage)> = Vec::new();
        let mut plugin_errors = Vec::new();

        for plugin in plugins.iter() {
            match run_plugin(plugin.as_ref(), context, &document).await {
                Ok(usages) => {
                    debug!("{} emitted {} usages for {}", plugin.name(), usages.len(), context.url);
                    emitted.extend(usages.into_iter().map(|u| (plugin.name().to_string(), u)));
                }
                Err(e) => {
                    warn!("{}", e);
                    plugin_errors.push(e);
                }
            }

            if context.cancel.is_cancelled() {
                return pass.fail(PassError::Cancelled, plugin_errors);
            }
        }
        drop(document);

        pass.advance(PassState::Aggregated);
        let mut warnings = Vec::new();
        let marks = self.resolve_marks(emitted, &mut warnings);

        if context.cancel.is_cancelled() {
            return pass.fail(PassError::Cancelled, plugin_errors);
        }

        let result = PageScanResult {
            scan_id: context.scan_id.clone(),
            page_url: context.url.to_string(),
            depth: context.depth,
            title,
            marks,
            scanned_at: Utc::now(),
        };

        if let Some(store) = &self.store
            && let Err(e) = store.save(&result)
        {
            warn!("Failed to persist scan of {}: {}", context.url, e);
            warnings.push(format!("scan results were not persisted: {}", e));
        }

        pass.advance(PassState::Delivered);
        info!(
            "Scan of {} delivered: {} marks, {} plugin errors",
            context.url,
            result.total_marks(),
            plugin_errors.len()
        );

        PassOutcome::Delivered(DeliveredPass {
            result,
            plugin_errors,
            warnings,
        })
    }

    /// Fetch the page first, then run a pass over it.
    pub async fn scan_url(&self, context: &PageContext, fetcher: &dyn PageFetcher) -> PassOutcome {
        let fetched = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => Err(PassError::Cancelled),
            body = fetcher.fetch(context.url.as_str()) => body.map_err(|e| PassError::Fetch(e.to_string())),
        };

        match fetched {
            Ok(raw) => self.scan_page(context, &raw).await,
            Err(error) => Pass::new(context).fail(error, Vec::new()),
        }
    }

    /// Scan many pages with at most `concurrency` passes in flight.
    ///
    /// Outcomes come back in the order of `pages`; every page gets one.
    pub async fn scan_site(
        &self,
        pages: Vec<PageContext>,
        fetcher: &dyn PageFetcher,
        concurrency: usize,
    ) -> Vec<PassOutcome> {
        info!("Scanning {} pages, {} at a time", pages.len(), concurrency.max(1));

        let passes = pages.iter().map(|context| self.scan_url(context, fetcher));
        stream::iter(passes).buffered(concurrency.max(1)).collect().await
    }

    fn resolve_marks(&self, emitted: Vec<(String, MarkUsage)>, warnings: &mut Vec<String>) -> Vec<RecordedMark> {
        let mut marks = Vec::with_capacity(emitted.len());

        for (plugin, usage) in emitted {
            if usage.count == 0 {
                continue;
            }

            match self.catalog.mark(&usage.mark) {
                Ok(mark) => marks.push(RecordedMark {
                    plugin,
                    mark,
                    count: usage.count,
                    details: usage.details,
                }),
                Err(e) => {
                    warn!("Could not resolve mark {}: {}", usage.mark, e);
                    warnings.push(format!("mark '{}' from {} was dropped: {}", usage.mark, plugin, e));
                }
            }
        }

        marks
    }
}

/// A panicking plugin is reported like any other plugin fault.
async fn run_plugin(
    plugin: &dyn MetricPlugin,
    context: &PageContext,
    document: &DocumentModel,
) -> Result<Vec<MarkUsage>, PluginError> {
    match AssertUnwindSafe(plugin.run(context, document)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "plugin panicked".to_string());
            Err(PluginError::run(plugin.name(), context.url.as_str(), message))
        }
    }
}
