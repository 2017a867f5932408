use crate::config::LinkCheckConfig;
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Instant;
use tracing::debug;

/// Supplies the raw markup of the page under audit.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Downloads pages over HTTP(S).
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &LinkCheckConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching {}", url);

        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(ScanError::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let body = response.bytes().await?;
        debug!("Fetched {} ({} bytes in {:?})", url, body.len(), start.elapsed());
        Ok(body.to_vec())
    }
}
