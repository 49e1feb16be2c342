//! Streaming chat relay between a local Ollama server and a display surface.
//!
//! A [`controller::GenerationController`] owns a single in-flight generation,
//! pulls fragments from an [`inference::InferenceClient`] and republishes the
//! accumulated text to a [`sink::DisplaySink`].

pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod inference;
pub mod ollama_api;
pub mod session;
pub mod sink;
pub mod surface;

pub use controller::GenerationController;
pub use error::RelayError;
pub use session::{GenerationRequest, GenerationStatus};
