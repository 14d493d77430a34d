//! Client side of the tracker: an HTTP client that passes the bearer token
//! explicitly on every call, plus a local task cache kept in sync with the
//! server's change feed.

mod api;
mod cache;
mod sse;
mod sync;

pub use api::{ApiClient, RetryPolicy};
pub use cache::TaskCache;
pub use sse::{SseDecoder, SseFrame};
pub use sync::TaskSync;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message}")]
    Api { status: StatusCode, message: String },
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("change feed closed")]
    FeedClosed,
}

impl ClientError {
    /// Whether a read that failed this way is worth trying again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => status.is_server_error(),
            Self::Decode(_) | Self::FeedClosed => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
