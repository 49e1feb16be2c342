// Manages AI generation state and session handling

use crate::error::RelayError;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A prompt accepted for generation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    prompt: String,
    system: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Result<Self, RelayError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(RelayError::EmptyPrompt);
        }
        Ok(Self { prompt, system: None })
    }

    /// Attach system instructions. Blank instructions are dropped.
    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Generating,
    Stopped,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Generating)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerPhase {
    #[default]
    Idle,
    Generating,
    Finalizing,
}

#[derive(Debug, Clone)]
pub struct GenerationSession {
    id: Uuid,
    request: GenerationRequest,
    accumulated_text: String,
    fragments: usize,
    status: GenerationStatus,
    started_at: DateTime<Utc>,
}

impl GenerationSession {
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            accumulated_text: String::new(),
            fragments: 0,
            status: GenerationStatus::Generating,
            started_at: Utc::now(),
        }
    }

    /// Append a fragment to the transcript. Ignored once the session is terminal.
    pub fn append(&mut self, fragment: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.accumulated_text.push_str(fragment);
        self.fragments += 1;
        true
    }

    /// Freeze the transcript with a terminal status. The first terminal status wins.
    pub fn finish(&mut self, status: GenerationStatus) {
        if !self.status.is_terminal() && status.is_terminal() {
            self.status = status;
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn status(&self) -> GenerationStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Controller-owned state. One instance per controller; nothing is process-wide.
#[derive(Default)]
pub struct GenerationState {
    pub phase: ControllerPhase,
    pub session: Option<GenerationSession>,
    pub cancellation_token: Option<CancellationToken>,
    pub last_request: Option<GenerationRequest>,
}

/// Summary of a session once it reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub session_id: Uuid,
    pub status: GenerationStatus,
    pub text: String,
    pub fragments: usize,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_rejects_blank_prompt() {
        assert!(matches!(GenerationRequest::new(""), Err(RelayError::EmptyPrompt)));
        assert!(matches!(GenerationRequest::new("  \n"), Err(RelayError::EmptyPrompt)));

        let request = GenerationRequest::new("What is GDAL?")
            .unwrap()
            .with_system(Some("Be brief.".into()));
        assert_eq!(request.prompt(), "What is GDAL?");
        assert_eq!(request.system(), Some("Be brief."));
    }

    #[test]
    fn test_blank_system_is_dropped() {
        let request = GenerationRequest::new("hi").unwrap().with_system(Some("   ".into()));
        assert_eq!(request.system(), None);
    }

    #[test]
    fn test_transcript_frozen_after_finish() {
        let mut session = GenerationSession::new(GenerationRequest::new("hi").unwrap());
        assert!(session.append("Hel"));
        assert!(session.append(""));
        assert!(session.append("lo"));
        session.finish(GenerationStatus::Stopped);
        assert!(!session.append(" world"));
        session.finish(GenerationStatus::Completed);

        assert_eq!(session.accumulated_text(), "Hello");
        assert_eq!(session.fragments(), 3);
        assert_eq!(session.status(), GenerationStatus::Stopped);
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        let request = GenerationRequest::new("hi").unwrap();
        let a = GenerationSession::new(request.clone());
        let b = GenerationSession::new(request);
        assert_ne!(a.id(), b.id());
    }
}
