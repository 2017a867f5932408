pub mod config;
pub mod data;
pub mod error;
pub mod marks;
pub mod metrics;
pub mod plugin;
pub mod registry;
pub mod report;
pub mod scan;

pub use config::ScanConfig;
pub use data::Database;
pub use error::{ConfigError, LifecycleError, PassError, StoreError};
pub use marks::{InMemoryMarkCatalog, Mark, MarkCatalog, MarkDefinition};
pub use plugin::{MarkUsage, MetricPlugin, PageContext, PluginError};
pub use registry::{InMemoryVersionStore, PluginManager, PluginRegistry, SharedPlugin, UpdateAction, VersionStore};
pub use scan::{PageScanResult, PassOutcome, PassState, RecordedMark, ScanOrchestrator, ScanStore};
