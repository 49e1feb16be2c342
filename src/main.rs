use ollama_relay::commands::CommandHandler;
use ollama_relay::config::{self, ModelOptions, RelayConfig};
use ollama_relay::controller::GenerationController;
use ollama_relay::ollama_api::OllamaClient;
use ollama_relay::sink::ChannelSink;
use ollama_relay::surface;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Relay chat prompts to a local Ollama server and stream the replies back.
///
/// Reads messages from stdin, one per line: JSON such as
/// `{"command":"chat","text":"..."}`, or plain text, `/stop`, `/retry`.
/// Writes one JSON message per line to stdout.
#[derive(Debug, Parser)]
#[command(name = "ollama-relay", version)]
struct Cli {
    /// Config file (defaults to ~/.config/ollama-relay/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ollama server address
    #[arg(long)]
    host: Option<String>,

    /// Model to chat with
    #[arg(long, short)]
    model: Option<String>,

    /// System instructions sent before every prompt
    #[arg(long)]
    system: Option<String>,

    /// Threads the model server may use for this model
    #[arg(long)]
    num_thread: Option<u32>,

    /// Hide the model's <think> preamble from displayed text
    #[arg(long)]
    hide_reasoning: bool,
}

impl Cli {
    fn resolve_config(&self) -> Result<RelayConfig> {
        let mut cfg = match self.config.clone().or_else(config::config_path) {
            Some(path) => RelayConfig::load_from(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => RelayConfig::default(),
        }
        .with_env();

        if let Some(host) = &self.host {
            cfg.host = host.clone();
        }
        if let Some(model) = &self.model {
            cfg.model = model.clone();
        }
        if self.system.is_some() {
            cfg.system = self.system.clone();
        }
        if self.num_thread.is_some() {
            cfg.options = ModelOptions { num_thread: self.num_thread, ..cfg.options };
        }
        cfg.hide_reasoning |= self.hide_reasoning;
        Ok(cfg)
    }
}

// application entry point
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ollama_relay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = Cli::parse().resolve_config()?;
    let client = Arc::new(OllamaClient::new(&cfg));
    info!(url = %client.chat_url(), model = %cfg.model, "relay ready");

    let (tx, rx) = mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink::new(tx).hide_reasoning(cfg.hide_reasoning));
    let controller = Arc::new(GenerationController::new(client, sink));
    let handler = CommandHandler::new(controller.clone()).with_system(cfg.system.clone());

    let mut surface = tokio::spawn(surface::run(
        handler,
        BufReader::new(tokio::io::stdin()),
        rx,
        tokio::io::stdout(),
    ));

    loop {
        tokio::select! {
            served = &mut surface => {
                served.context("surface task panicked")?.context("display surface failed")?;
                return Ok(());
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                if !controller.cancel() {
                    info!("interrupted");
                    return Ok(());
                }
            }
        }
    }
}
