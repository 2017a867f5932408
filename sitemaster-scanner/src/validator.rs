//! Concurrent reachability checks for extracted links.
//!
//! Probes run through a bounded `buffer_unordered` pool. Redirects are
//! followed hop by hop instead of by reqwest so the chain length and the
//! final URL can be reported.

use crate::config::LinkCheckConfig;
use crate::error::{Result, ScanError};
use crate::links::{is_checkable_scheme, Link};
use crate::result::{LinkCheckResult, LinkStatus};
use futures::stream::{self, StreamExt};
use reqwest::header::LOCATION;
use reqwest::{Client, Response, StatusCode};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

#[derive(Clone)]
pub struct LinkValidator {
    client: Client,
    config: LinkCheckConfig,
}

impl LinkValidator {
    pub fn new(config: LinkCheckConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .pool_max_idle_per_host(config.workers.max(1))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LinkCheckConfig {
        &self.config
    }

    /// Probe every unique link and return one result per link.
    ///
    /// Completion order is arbitrary; the map is only returned once every
    /// probe has finished. If `cancel` fires, remaining probes are dropped
    /// and the whole validation fails with [`ScanError::Cancelled`].
    pub async fn validate(
        &self,
        links: &[Link],
        cancel: &CancellationToken,
    ) -> Result<HashMap<Link, LinkCheckResult>> {
        let mut seen = HashSet::new();
        let unique: Vec<&Link> = links.iter().filter(|link| seen.insert(&link.url)).collect();
        let workers = self.config.workers.max(1);

        info!("Validating {} links with {} workers", unique.len(), workers);

        let probes = unique.into_iter().map(|link| async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.check_link(&link.url) => Some((link.clone(), result)),
            }
        });

        let results: Vec<Option<(Link, LinkCheckResult)>> =
            stream::iter(probes).buffer_unordered(workers).collect().await;

        if cancel.is_cancelled() {
            debug!("Link validation cancelled");
            return Err(ScanError::Cancelled);
        }

        let mut checked = HashMap::with_capacity(results.len());
        for (link, result) in results.into_iter().flatten() {
            checked.insert(link, result);
        }
        Ok(checked)
    }

    /// Follow one URL to its final answer.
    pub async fn check_link(&self, url: &str) -> LinkCheckResult {
        let mut current = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                return LinkCheckResult::new(url.to_string(), LinkStatus::ConnectionFailure)
                    .with_message(format!("invalid URL: {}", e));
            }
        };
        let mut redirects = 0;

        loop {
            let response = match self.probe(&current).await {
                Ok(response) => response,
                Err(e) => {
                    let mut result = categorize_error(url, &e).with_redirects(redirects);
                    if redirects > 0 {
                        result = result.with_final_url(current.to_string());
                    }
                    return result;
                }
            };

            let status = response.status();
            if !status.is_redirection() {
                return classify_response(url, status, &current, redirects);
            }

            let next = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|location| current.join(location).ok());

            let Some(next) = next else {
                return LinkCheckResult::new(url.to_string(), LinkStatus::Redirected)
                    .with_status_code(status.as_u16())
                    .with_final_url(current.to_string())
                    .with_redirects(redirects)
                    .with_message("redirect without a usable Location header");
            };

            if redirects >= self.config.max_redirects {
                return LinkCheckResult::new(url.to_string(), LinkStatus::RedirectChainExceeded)
                    .with_status_code(status.as_u16())
                    .with_final_url(current.to_string())
                    .with_redirects(redirects)
                    .with_message(format!("more than {} redirects", self.config.max_redirects));
            }

            if !is_checkable_scheme(next.scheme()) {
                return LinkCheckResult::new(url.to_string(), LinkStatus::ConnectionFailure)
                    .with_status_code(status.as_u16())
                    .with_final_url(next.to_string())
                    .with_redirects(redirects + 1)
                    .with_message(format!("redirect to unsupported scheme '{}'", next.scheme()));
            }

            redirects += 1;
            debug!("{} redirected ({}) to {}", current, status.as_u16(), next);
            current = next;
        }
    }

    /// HEAD first; some servers refuse it, so fall back to GET.
    async fn probe(&self, url: &Url) -> reqwest::Result<Response> {
        let response = self.client.head(url.clone()).send().await?;

        if matches!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            debug!("{} rejected HEAD ({}), retrying with GET", url, response.status());
            return self.client.get(url.clone()).send().await;
        }

        Ok(response)
    }
}

fn classify_response(url: &str, status: StatusCode, final_url: &Url, redirects: usize) -> LinkCheckResult {
    let kind = if status.is_client_error() {
        LinkStatus::ClientError
    } else if status.is_server_error() {
        LinkStatus::ServerError
    } else if redirects > 0 {
        LinkStatus::Redirected
    } else {
        LinkStatus::Reachable
    };

    let mut result = LinkCheckResult::new(url.to_string(), kind)
        .with_status_code(status.as_u16())
        .with_redirects(redirects);
    if redirects > 0 {
        result = result.with_final_url(final_url.to_string());
    }
    result
}

fn categorize_error(url: &str, error: &reqwest::Error) -> LinkCheckResult {
    let (status, message) = if error.is_timeout() {
        (LinkStatus::Timeout, "request timed out".to_string())
    } else if error.is_connect() {
        (LinkStatus::ConnectionFailure, format!("connection failed: {}", error))
    } else {
        (LinkStatus::ConnectionFailure, error.to_string())
    };

    LinkCheckResult::new(url.to_string(), status).with_message(message)
}
