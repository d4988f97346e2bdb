//! Error types for the two external collaborators of the engine.
//!
//! Neither error ever escapes the engine: fetch failures degrade to the
//! skip-forward path and dispatch failures leave the event pending.

use thiserror::Error;

/// Failure reported by a [`crate::history::HistoryFetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response.
    #[error("history transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("history request for {cid} failed with status {status}")]
    Status {
        /// Conversation the request was for.
        cid: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded into events.
    #[error("history response could not be decoded: {0}")]
    Decode(String),

    /// No history source is available for the conversation.
    #[error("history unavailable for conversation {0}")]
    Unavailable(String),

    /// The configured history endpoint cannot be used.
    #[error("invalid history endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Failure reported by a [`crate::dispatch::Dispatcher`] for a single event.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The handler refused the event; it stays pending for a later pass.
    #[error("event rejected: {0}")]
    Rejected(String),

    /// The handler failed while processing the event.
    #[error("handler failed: {0}")]
    Handler(#[from] anyhow::Error),
}

impl DispatchError {
    /// Shorthand for [`DispatchError::Rejected`].
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}
