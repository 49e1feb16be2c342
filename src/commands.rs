// Handles messages sent by the display surface

use crate::controller::GenerationController;
use crate::error::RelayError;
use crate::session::{GenerationReport, GenerationRequest};

use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Messages the display surface sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum InboundMessage {
    Chat {
        text: String,
        #[serde(default)]
        system: Option<String>,
    },
    Stop,
    Retry,
}

impl InboundMessage {
    /// Parse one line typed or posted by the surface.
    ///
    /// JSON objects are decoded as-is; `/stop` and `/retry` map to their
    /// commands and any other non-blank text is a chat prompt.
    pub fn parse_line(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if line.starts_with('{') {
            return serde_json::from_str(line).map(Some);
        }
        Ok(Some(match line {
            "/stop" => Self::Stop,
            "/retry" => Self::Retry,
            prompt => Self::Chat { text: prompt.to_string(), system: None },
        }))
    }
}

/// Routes inbound messages onto a controller.
pub struct CommandHandler {
    controller: Arc<GenerationController>,
    system: Option<String>,
}

impl CommandHandler {
    pub fn new(controller: Arc<GenerationController>) -> Self {
        Self { controller, system: None }
    }

    /// System instructions used when a chat message carries none.
    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    pub fn controller(&self) -> &Arc<GenerationController> {
        &self.controller
    }

    /// Apply one message. Returns the spawned generation when one was started.
    ///
    /// A chat or retry while a generation is running is dropped without
    /// telling the surface.
    pub async fn handle(&self, message: InboundMessage) -> Option<JoinHandle<GenerationReport>> {
        match message {
            InboundMessage::Chat { text, system } => {
                let request = match GenerationRequest::new(text) {
                    Ok(request) => request.with_system(system.or_else(|| self.system.clone())),
                    Err(e) => {
                        warn!("ignoring chat message: {}", e);
                        return None;
                    }
                };
                self.start(request).await
            }
            InboundMessage::Stop => {
                if !self.controller.cancel() {
                    debug!("stop received while idle");
                }
                None
            }
            InboundMessage::Retry => match self.controller.last_request() {
                Some(request) => self.start(request).await,
                None => {
                    debug!("retry received before any prompt");
                    None
                }
            },
        }
    }

    async fn start(&self, request: GenerationRequest) -> Option<JoinHandle<GenerationReport>> {
        match self.controller.start(request).await {
            Ok(handle) => Some(handle),
            Err(RelayError::AlreadyGenerating) => None,
            Err(e) => {
                warn!("failed to start generation: {}", e);
                None
            }
        }
    }
}
