// Errors raised by the relay

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("a generation is already running")]
    AlreadyGenerating,

    #[error("failed to reach {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("API call failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("error reading stream: {0}")]
    Transport(String),

    #[error("malformed stream line: {0}")]
    Malformed(String),

    #[error("model server error: {0}")]
    Upstream(String),

    #[error("invalid config {path}: {reason}")]
    Config { path: String, reason: String },
}

impl RelayError {
    /// True for every failure that comes from talking to the endpoint.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::Status { .. }
                | Self::Transport(_)
                | Self::Malformed(_)
                | Self::Upstream(_)
        )
    }
}
