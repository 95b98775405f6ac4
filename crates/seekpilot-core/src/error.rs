//! Error types for seekpilot.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("duplicate plugin id: {0}")]
    DuplicatePlugin(String),

    #[error("duplicate workflow rule for plugin: {0}")]
    DuplicateRule(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Plugin panicked: {0}")]
    Panic(String),

    #[error("cdp timeout for {method}")]
    Timeout { method: String },

    #[error("channel closed")]
    ChannelClosed,

    #[error("channel error: {0}")]
    ChannelError(String),

    #[error("CDP error from {method}: {message}")]
    Remote { method: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("DevTools target error: {0}")]
    Target(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("workflow deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error originated in the request channel rather than the page.
    pub fn is_channel(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::ChannelClosed | Error::ChannelError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
