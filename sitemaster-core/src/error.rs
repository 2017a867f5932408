use sitemaster_scanner::ParseError;
use thiserror::Error;

use crate::plugin::PluginError;

/// Failures of the storage collaborators (scan store, mark catalog,
/// plugin version table).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Why a page-scan pass ended in the `Failed` state.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("Could not parse page: {0}")]
    Parse(#[from] ParseError),

    #[error("Could not fetch page: {0}")]
    Fetch(String),

    #[error("Page scan was cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
