use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Fetch of {url} failed: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("Scan was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ScanError>;

/// Raw bytes that could not be turned into any document tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("document is empty")]
    Empty,

    #[error("input is not markup: {0}")]
    NotMarkup(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid query expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}
