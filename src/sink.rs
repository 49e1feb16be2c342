// Display side of the relay: what the controller reports and how it is posted

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::OnceLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Consumer of generation events. Calls are side-effect only and must not block.
///
/// `on_update` receives the whole transcript so far, once per fragment, in
/// arrival order. Every session ends with exactly one `on_complete`.
pub trait DisplaySink: Send + Sync {
    fn on_update(&self, accumulated_text: &str);
    fn on_stopped(&self, message: &str);
    fn on_error(&self, message: &str);
    fn on_complete(&self);
}

/// Messages posted to the display surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum OutboundMessage {
    ChatResponse { text: String },
    Stopped { text: String },
    Error { text: String },
    GenerationComplete,
}

fn reasoning_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^\s*<think>.*?(?:</think>\s*|$)").expect("valid regex"))
}

/// Remove a leading `<think>` block, closed or still streaming.
pub fn strip_reasoning(text: &str) -> Cow<'_, str> {
    reasoning_block().replace(text, "")
}

/// Posts outbound messages onto a channel read by the display surface.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<OutboundMessage>,
    hide_reasoning: bool,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<OutboundMessage>) -> Self {
        Self { tx, hide_reasoning: false }
    }

    pub fn hide_reasoning(mut self, hide: bool) -> Self {
        self.hide_reasoning = hide;
        self
    }

    fn display_text(&self, text: &str) -> String {
        if self.hide_reasoning {
            strip_reasoning(text).into_owned()
        } else {
            text.to_string()
        }
    }

    fn post(&self, message: OutboundMessage) {
        if self.tx.send(message).is_err() {
            debug!("display surface closed, dropping message");
        }
    }
}

impl DisplaySink for ChannelSink {
    fn on_update(&self, accumulated_text: &str) {
        self.post(OutboundMessage::ChatResponse { text: self.display_text(accumulated_text) });
    }

    fn on_stopped(&self, message: &str) {
        self.post(OutboundMessage::Stopped { text: self.display_text(message) });
    }

    fn on_error(&self, message: &str) {
        self.post(OutboundMessage::Error { text: message.to_string() });
    }

    fn on_complete(&self) {
        self.post(OutboundMessage::GenerationComplete);
    }
}
