use serde::{Deserialize, Serialize};

/// Classification of one link probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Reachable,
    Redirected,
    ClientError,
    ServerError,
    RedirectChainExceeded,
    Timeout,
    ConnectionFailure,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Reachable => "reachable",
            LinkStatus::Redirected => "redirected",
            LinkStatus::ClientError => "client_error",
            LinkStatus::ServerError => "server_error",
            LinkStatus::RedirectChainExceeded => "redirect_chain_exceeded",
            LinkStatus::Timeout => "timeout",
            LinkStatus::ConnectionFailure => "connection_failure",
        }
    }

    /// Failures at the HTTP level: the host answered, the page is gone.
    pub fn is_broken(&self) -> bool {
        matches!(self, LinkStatus::ClientError | LinkStatus::ServerError)
    }

    /// Failures below HTTP: the host could not be talked to.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, LinkStatus::Timeout | LinkStatus::ConnectionFailure)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, LinkStatus::Reachable | LinkStatus::Redirected)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCheckResult {
    pub url: String,
    pub status: LinkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub redirects: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LinkCheckResult {
    pub fn new(url: String, status: LinkStatus) -> Self {
        Self {
            url,
            status,
            status_code: None,
            final_url: None,
            redirects: 0,
            message: None,
        }
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_final_url(mut self, final_url: String) -> Self {
        self.final_url = Some(final_url);
        self
    }

    pub fn with_redirects(mut self, redirects: usize) -> Self {
        self.redirects = redirects;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
