use async_trait::async_trait;
use sitemaster_scanner::DocumentModel;

use crate::marks::MarkDefinition;
use crate::plugin::{MarkUsage, MetricPlugin, PageContext, PluginError};

pub const MARK_TITLE_MISSING: &str = "title-missing";

/// Flags pages without a usable `<title>`.
pub struct TitleMetric;

impl TitleMetric {
    pub const NAME: &'static str = "metric_title";
}

#[async_trait(?Send)]
impl MetricPlugin for TitleMetric {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> u64 {
        1118201301
    }

    fn description(&self) -> &str {
        "Reports pages that have no title or an empty one"
    }

    fn marks(&self) -> Vec<MarkDefinition> {
        vec![MarkDefinition::new(
            MARK_TITLE_MISSING,
            "Missing page title",
            "The page has no <title> element, or it is empty",
        )]
    }

    async fn run(
        &self,
        _context: &PageContext,
        document: &DocumentModel,
    ) -> Result<Vec<MarkUsage>, PluginError> {
        if document.title().is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![MarkUsage::new(MARK_TITLE_MISSING, 1)])
    }
}
