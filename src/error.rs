//! Error types for talking to the measurement API.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// A newer fetch superseded this one. Never shown to the user.
    #[error("fetch cancelled")]
    Cancelled,

    #[error("fetch failed: {status} ({url})")]
    Status { status: u16, url: String },

    #[error("network error: {0}")]
    Transport(String),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
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
