// Broken, slow and redirecting links

use async_trait::async_trait;
use sitemaster_scanner::{extract_links, DocumentModel, Link, LinkCheckResult, LinkStatus, LinkValidator};
use std::collections::HashMap;
use tracing::debug;

use crate::marks::MarkDefinition;
use crate::plugin::{MarkUsage, MetricPlugin, PageContext, PluginError};

pub const MARK_BROKEN: &str = "link-broken";
pub const MARK_TIMEOUT: &str = "link-timeout";
pub const MARK_CONNECTION_FAILURE: &str = "link-connection-failure";
pub const MARK_REDIRECT_CHAIN_EXCEEDED: &str = "link-redirect-chain-exceeded";
pub const MARK_REDIRECT: &str = "link-redirect";

pub struct LinkMetric {
    validator: LinkValidator,
    report_redirects: bool,
}

impl LinkMetric {
    pub const NAME: &'static str = "metric_links";

    pub fn new(validator: LinkValidator) -> Self {
        Self {
            validator,
            report_redirects: true,
        }
    }

    pub fn with_report_redirects(mut self, report_redirects: bool) -> Self {
        self.report_redirects = report_redirects;
        self
    }
}

#[async_trait(?Send)]
impl MetricPlugin for LinkMetric {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> u64 {
        1118201302
    }

    fn description(&self) -> &str {
        "Checks every http(s) link on the page and reports broken, unreachable and redirecting links"
    }

    fn marks(&self) -> Vec<MarkDefinition> {
        vec![
            MarkDefinition::new(MARK_BROKEN, "Broken link", "The link target answered with an HTTP error"),
            MarkDefinition::new(MARK_TIMEOUT, "Link timed out", "The link target did not answer in time"),
            MarkDefinition::new(
                MARK_CONNECTION_FAILURE,
                "Unreachable link",
                "The link target's host could not be contacted",
            ),
            MarkDefinition::new(
                MARK_REDIRECT_CHAIN_EXCEEDED,
                "Too many redirects",
                "The link redirects more times than allowed",
            ),
            MarkDefinition::new(MARK_REDIRECT, "Redirecting link", "The link redirects to another URL"),
        ]
    }

    async fn run(
        &self,
        context: &PageContext,
        document: &DocumentModel,
    ) -> Result<Vec<MarkUsage>, PluginError> {
        let links = extract_links(&context.url, document);
        if links.is_empty() {
            return Ok(Vec::new());
        }

        let results = self
            .validator
            .validate(&links, &context.cancel)
            .await
            .map_err(|e| PluginError::run(Self::NAME, context.url.as_str(), e.to_string()))?;

        debug!("Checked {} links on {}", results.len(), context.url);
        Ok(marks_for_results(&links, &results, self.report_redirects))
    }
}

/// Turn probe results into mark usages, listing links in page order.
pub fn marks_for_results(
    links: &[Link],
    results: &HashMap<Link, LinkCheckResult>,
    report_redirects: bool,
) -> Vec<MarkUsage> {
    let mut broken = Vec::new();
    let mut timeouts = Vec::new();
    let mut unreachable = Vec::new();
    let mut too_many_redirects = Vec::new();
    let mut redirects = Vec::new();

    for link in links {
        let Some(result) = results.get(link) else {
            continue;
        };

        match result.status {
            LinkStatus::Reachable => {}
            LinkStatus::ClientError | LinkStatus::ServerError => broken.push(format!(
                "{} (HTTP {})",
                link.url,
                result.status_code.unwrap_or_default()
            )),
            LinkStatus::Timeout => timeouts.push(link.url.clone()),
            LinkStatus::ConnectionFailure => unreachable.push(match &result.message {
                Some(message) => format!("{} ({})", link.url, message),
                None => link.url.clone(),
            }),
            LinkStatus::RedirectChainExceeded => too_many_redirects.push(link.url.clone()),
            LinkStatus::Redirected if report_redirects => redirects.push(format!(
                "{} -> {}",
                link.url,
                result.final_url.as_deref().unwrap_or("?")
            )),
            LinkStatus::Redirected => {}
        }
    }

    [
        (MARK_BROKEN, broken),
        (MARK_TIMEOUT, timeouts),
        (MARK_CONNECTION_FAILURE, unreachable),
        (MARK_REDIRECT_CHAIN_EXCEEDED, too_many_redirects),
        (MARK_REDIRECT, redirects),
    ]
    .into_iter()
    .filter(|(_, details)| !details.is_empty())
    .map(|(mark, details)| MarkUsage::from_details(mark, details))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn link(url: &str) -> Link {
        Link::new(url, &Url::parse(url).unwrap())
    }

    fn results(entries: Vec<(Link, LinkCheckResult)>) -> HashMap<Link, LinkCheckResult> {
        entries.into_iter().collect()
    }

    #[test]
    fn test_marks_grouped_in_fixed_order() {
        let ok = link("http://a.example/");
        let missing = link("http://a.example/missing");
        let moved = link("http://a.example/moved");
        let slow = link("http://slow.example/");

        let links = vec![moved.clone(), ok.clone(), slow.clone(), missing.clone()];
        let results = results(vec![
            (ok.clone(), LinkCheckResult::new(ok.url.clone(), LinkStatus::Reachable)),
            (
                missing.clone(),
                LinkCheckResult::new(missing.url.clone(), LinkStatus::ClientError).with_status_code(404),
            ),
            (
                moved.clone(),
                LinkCheckResult::new(moved.url.clone(), LinkStatus::Redirected)
                    .with_final_url("http://a.example/new".to_string()),
            ),
            (slow.clone(), LinkCheckResult::new(slow.url.clone(), LinkStatus::Timeout)),
        ]);

        let usages = marks_for_results(&links, &results, true);

        let names: Vec<&str> = usages.iter().map(|u| u.mark.as_str()).collect();
        assert_eq!(names, vec![MARK_BROKEN, MARK_TIMEOUT, MARK_REDIRECT]);
        assert_eq!(usages[0].details, vec!["http://a.example/missing (HTTP 404)"]);
        assert_eq!(usages[2].details, vec!["http://a.example/moved -> http://a.example/new"]);
        assert!(usages.iter().all(|u| u.count == 1));
    }

    #[test]
    fn test_redirects_not_reported_when_disabled() {
        let moved = link("http://a.example/moved");
        let results = results(vec![(
            moved.clone(),
            LinkCheckResult::new(moved.url.clone(), LinkStatus::Redirected),
        )]);

        assert!(marks_for_results(&[moved], &results, false).is_empty());
    }

    #[test]
    fn test_all_reachable_emits_nothing() {
        let a = link("http://a.example/");
        let b = link("http://b.example/");
        let results = results(vec![
            (a.clone(), LinkCheckResult::new(a.url.clone(), LinkStatus::Reachable)),
            (b.clone(), LinkCheckResult::new(b.url.clone(), LinkStatus::Reachable)),
        ]);

        assert!(marks_for_results(&[a, b], &results, true).is_empty());
    }

    #[test]
    fn test_counts_match_details() {
        let links: Vec<Link> = (0..3)
            .map(|i| link(&format!("http://down{}.example/", i)))
            .collect();
        let results = results(
            links
                .iter()
                .map(|l| {
                    (
                        l.clone(),
                        LinkCheckResult::new(l.url.clone(), LinkStatus::ServerError).with_status_code(502),
                    )
                })
                .collect(),
        );

        let usages = marks_for_results(&links, &results, true);
        assert_eq!(usages.len(), 1);
        assert_eq!(usages[0].mark, MARK_BROKEN);
        assert_eq!(usages[0].count, 3);
    }
}
