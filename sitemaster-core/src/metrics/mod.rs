pub mod images;
pub mod links;
pub mod title;

pub use images::ImageAltMetric;
pub use links::LinkMetric;
pub use title::TitleMetric;

use sitemaster_scanner::{LinkValidator, ScanError};
use std::sync::Arc;

use crate::config::ScanConfig;
use crate::registry::{PluginRegistry, SharedPlugin};

/// The built-in plugins, in the order they run.
pub fn builtin_plugins(config: &ScanConfig) -> Result<Vec<SharedPlugin>, ScanError> {
    let validator = LinkValidator::new(config.link_check.clone())?;

    let plugins: Vec<SharedPlugin> = vec![
        Arc::new(LinkMetric::new(validator).with_report_redirects(config.report_redirects)),
        Arc::new(TitleMetric),
        Arc::new(ImageAltMetric),
    ];
    Ok(plugins)
}

pub fn builtin_registry(config: &ScanConfig) -> Result<PluginRegistry, ScanError> {
    Ok(PluginRegistry::with_plugins(builtin_plugins(config)?))
}
