// Handles communication with external AI API (Ollama)

use crate::config::{ModelOptions, RelayConfig};
use crate::error::RelayError;
use crate::inference::{FragmentStream, InferenceClient, StreamFragment};
use crate::session::GenerationRequest;

use async_trait::async_trait;
use futures_util::stream;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "no_options")]
    options: &'a ModelOptions,
}

fn no_options(options: &&ModelOptions) -> bool {
    options.is_empty()
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// One line of the `/api/chat` stream.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// A decoded stream line.
#[derive(Debug, PartialEq)]
enum ChatLine {
    Content(String),
    Done(Option<String>),
}

/// Splits a byte stream into newline-delimited JSON lines.
///
/// Bytes are buffered until a full line is seen, so chunk boundaries may fall
/// anywhere, including inside a multi-byte character.
#[derive(Debug, Default)]
struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<ChatLine, RelayError>> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(decoded) = decode_line(&line) {
                lines.push(decoded);
            }
        }
        lines
    }

    /// Decode whatever is left once the body has ended.
    fn finish(&mut self) -> Option<Result<ChatLine, RelayError>> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Option<Result<ChatLine, RelayError>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let chunk = match serde_json::from_str::<ChatChunk>(text) {
        Ok(chunk) => chunk,
        Err(_) => return Some(Err(RelayError::Malformed(text.to_string()))),
    };

    if let Some(error) = chunk.error {
        return Some(Err(RelayError::Upstream(error)));
    }

    let content = chunk.message.map(|m| m.content);
    if chunk.done {
        Some(Ok(ChatLine::Done(content.filter(|c| !c.is_empty()))))
    } else {
        Some(Ok(ChatLine::Content(content.unwrap_or_default())))
    }
}

struct Pump<S> {
    body: S,
    decoder: NdjsonDecoder,
    pending: VecDeque<Result<ChatLine, RelayError>>,
    eof: bool,
}

/// Turn a raw response body into a fragment stream that ends at `done`.
fn fragments<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let pump = Pump {
        body,
        decoder: NdjsonDecoder::default(),
        pending: VecDeque::new(),
        eof: false,
    };

    stream::unfold(Some(pump), |pump| async move {
        let mut pump = pump?;
        loop {
            if let Some(line) = pump.pending.pop_front() {
                return match line {
                    Ok(ChatLine::Content(text)) => Some((Ok(StreamFragment::new(text)), Some(pump))),
                    Ok(ChatLine::Done(Some(text))) => Some((Ok(StreamFragment::new(text)), None)),
                    Ok(ChatLine::Done(None)) => None,
                    Err(e) => Some((Err(e), None)),
                };
            }

            if pump.eof {
                return None;
            }

            match pump.body.next().await {
                Some(Ok(bytes)) => {
                    let lines = pump.decoder.push(bytes.as_ref());
                    pump.pending.extend(lines);
                }
                Some(Err(e)) => return Some((Err(RelayError::Transport(e.to_string())), None)),
                None => {
                    pump.eof = true;
                    pump.pending.extend(pump.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

/// Streams chat completions from an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    chat_url: String,
    model: String,
    options: ModelOptions,
}

impl OllamaClient {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            http: Client::new(),
            chat_url: config.chat_url(),
            model: config.model.clone(),
            options: config.options.clone(),
        }
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    fn request_body<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system() {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: request.prompt() });

        ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            options: &self.options,
        }
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, RelayError> {
        debug!(url = %self.chat_url, model = %self.model, "opening chat stream");

        let response = self
            .http
            .post(&self.chat_url)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|source| RelayError::Unreachable {
                url: self.chat_url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Status { status, body });
        }

        Ok(fragments(response.bytes_stream().boxed()))
    }
}
