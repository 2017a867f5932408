use async_trait::async_trait;
use sitemaster_scanner::DocumentModel;

use crate::marks::MarkDefinition;
use crate::plugin::{MarkUsage, MetricPlugin, PageContext, PluginError};

pub const MARK_IMAGE_ALT_MISSING: &str = "image-alt-missing";

/// Images need an `alt` attribute for screen readers. An empty `alt=""`
/// is a valid way to mark decoration, so only a missing attribute counts.
pub struct ImageAltMetric;

impl ImageAltMetric {
    pub const NAME: &'static str = "metric_image_alt";
}

#[async_trait(?Send)]
impl MetricPlugin for ImageAltMetric {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> u64 {
        1118201301
    }

    fn description(&self) -> &str {
        "Reports images without alternative text"
    }

    fn marks(&self) -> Vec<MarkDefinition> {
        vec![MarkDefinition::new(
            MARK_IMAGE_ALT_MISSING,
            "Image without alt text",
            "An <img> element has no alt attribute",
        )]
    }

    async fn run(
        &self,
        context: &PageContext,
        document: &DocumentModel,
    ) -> Result<Vec<MarkUsage>, PluginError> {
        let images = document
            .query("img")
            .map_err(|e| PluginError::run(Self::NAME, context.url.as_str(), e.to_string()))?;

        let missing: Vec<String> = images
            .iter()
            .filter(|img| !img.has_attr("alt"))
            .map(|img| img.attr("src").unwrap_or("(no src)").to_string())
            .collect();

        if missing.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![MarkUsage::from_details(MARK_IMAGE_ALT_MISSING, missing)])
    }
}
