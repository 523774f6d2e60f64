//! Errors produced by the whale feed pipeline.
//!
//! None of these are fatal to the terminal: transport errors trigger a
//! reconnect, payload errors drop a single frame or event, and save errors
//! become a toast.

use thiserror::Error;

/// All errors generated in `whale-tape`.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("failed to decode JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid trade event: missing or malformed `{0}`")]
    InvalidEvent(&'static str),

    #[error("save rejected: {0}")]
    Save(String),

    #[error("pipeline command channel closed")]
    ChannelClosed,
}

impl FeedError {
    /// Short label for the status bar / toast.
    pub fn summary(&self) -> String {
        match self {
            FeedError::Http(e) if e.is_timeout() => "request timed out".to_string(),
            FeedError::Http(e) if e.is_connect() => "backend unreachable".to_string(),
            FeedError::Status { status, .. } => format!("HTTP {}", status),
            FeedError::Save(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}
