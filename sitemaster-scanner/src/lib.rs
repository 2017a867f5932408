pub mod config;
pub mod document;
pub mod error;
pub mod fetch;
pub mod links;
pub mod result;
pub mod validator;

pub use config::LinkCheckConfig;
pub use document::{DocumentModel, Node};
pub use error::{ParseError, QueryError, ScanError};
pub use fetch::{HttpFetcher, PageFetcher};
pub use links::{extract_links, strip_fragment, Link};
pub use result::{LinkCheckResult, LinkStatus};
pub use validator::LinkValidator;
