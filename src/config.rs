//! Relay configuration
//!
//! Resolved in order: built-in defaults, `~/.config/ollama-relay/config.json`,
//! environment (`OLLAMA_HOST`, `OLLAMA_RELAY_MODEL`), then command line flags.

use crate::error::RelayError;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "ollama-relay";

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "deepseek-r1:1.5b";

/// Runtime hints forwarded to the model server as `options`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_thread: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ModelOptions {
    pub fn is_empty(&self) -> bool {
        self.num_thread.is_none() && self.num_ctx.is_none() && self.temperature.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base address of the Ollama server
    pub host: String,

    /// Model identifier sent with every request
    pub model: String,

    /// System instructions prepended to every prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    pub options: ModelOptions,

    /// Strip a leading `<think>` block from displayed text
    pub hide_reasoning: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system: None,
            options: ModelOptions::default(),
            hide_reasoning: false,
        }
    }
}

/// Default config file location (~/.config/ollama-relay/config.json)
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|base| base.join(APP_NAME).join("config.json"))
}

impl RelayConfig {
    /// Load config from `path`, or return defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, RelayError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let config_error = |reason: String| RelayError::Config {
            path: path.display().to_string(),
            reason,
        };

        let content = fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| config_error(e.to_string()))
    }

    /// Apply environment overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("OLLAMA_HOST").filter(|v| !v.trim().is_empty()) {
            self.host = host;
        }
        if let Some(model) = lookup("OLLAMA_RELAY_MODEL").filter(|v| !v.trim().is_empty()) {
            self.model = model;
        }
        self
    }

    /// Host with a scheme and without a trailing slash.
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        }
    }

    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }
}
