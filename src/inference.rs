// Contract between the controller and whatever produces generated text

use crate::error::RelayError;
use crate::session::GenerationRequest;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// One increment of generated text. May be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    pub text: String,
}

impl StreamFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Finite, single-pass sequence of fragments. An `Err` item ends the stream.
pub type FragmentStream = BoxStream<'static, Result<StreamFragment, RelayError>>;

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Open a streamed completion for `request`.
    ///
    /// Fails before the first fragment if the endpoint cannot be reached;
    /// later failures arrive as an `Err` item on the stream. Never retries.
    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, RelayError>;
}
