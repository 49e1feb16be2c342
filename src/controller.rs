//! Single-flight generation controller
//!
//! At most one session is `Generating` per controller. A session pulls
//! fragments from the inference client, appends them to its transcript and
//! reports the transcript after each one. Cancellation is checked at every
//! fragment boundary. Whatever ends a session, the sink sees exactly one
//! terminal event (none for a normal completion) followed by `on_complete`,
//! and only then is the slot released.

use crate::error::RelayError;
use crate::inference::InferenceClient;
use crate::session::{
    ControllerPhase, GenerationReport, GenerationRequest, GenerationSession, GenerationState,
    GenerationStatus,
};
use crate::sink::DisplaySink;

use chrono::Utc;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How the consuming loop ended.
enum Outcome {
    Completed,
    Stopped,
    Failed(String),
}

// The state lock is never held across an await, so a blocking mutex is
// enough and lets teardown run from `Drop`.
fn lock(state: &Mutex<GenerationState>) -> MutexGuard<'_, GenerationState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Teardown of a claimed session.
///
/// Created together with the claim. If it is dropped before `finish`, e.g.
/// because the future driving the session was dropped or its task aborted,
/// the session ends as `Stopped` and the slot is released.
struct SessionGuard {
    state: Arc<Mutex<GenerationState>>,
    sink: Arc<dyn DisplaySink>,
    finished: bool,
}

impl SessionGuard {
    fn finish(mut self, outcome: Outcome) -> GenerationReport {
        self.finished = true;
        self.teardown(outcome)
    }

    fn teardown(&self, outcome: Outcome) -> GenerationReport {
        let (status, error) = match outcome {
            Outcome::Completed => (GenerationStatus::Completed, None),
            Outcome::Stopped => (GenerationStatus::Stopped, None),
            Outcome::Failed(message) => (GenerationStatus::Failed, Some(message)),
        };

        let report = {
            let mut state = lock(&self.state);
            state.phase = ControllerPhase::Finalizing;
            state.cancellation_token = None;
            match state.session.as_mut() {
                Some(session) => {
                    session.finish(status);
                    GenerationReport {
                        session_id: session.id(),
                        status: session.status(),
                        text: session.accumulated_text().to_string(),
                        fragments: session.fragments(),
                        error,
                        started_at: session.started_at(),
                    }
                }
                None => GenerationReport {
                    session_id: Uuid::nil(),
                    status,
                    text: String::new(),
                    fragments: 0,
                    error,
                    started_at: Utc::now(),
                },
            }
        };

        match (&report.status, &report.error) {
            (GenerationStatus::Stopped, _) => self.sink.on_stopped(&report.text),
            (GenerationStatus::Failed, Some(message)) => {
                warn!(session = %report.session_id, "generation failed: {}", message);
                self.sink.on_error(&format!("Error: {}", message));
            }
            _ => {}
        }
        self.sink.on_complete();

        lock(&self.state).phase = ControllerPhase::Idle;

        info!(
            session = %report.session_id,
            status = ?report.status,
            fragments = report.fragments,
            elapsed_ms = (Utc::now() - report.started_at).num_milliseconds(),
            "generation finished"
        );
        report
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!("generation abandoned before finishing");
            self.teardown(Outcome::Stopped);
        }
    }
}

pub struct GenerationController {
    client: Arc<dyn InferenceClient>,
    sink: Arc<dyn DisplaySink>,
    state: Arc<Mutex<GenerationState>>,
}

impl GenerationController {
    pub fn new(client: Arc<dyn InferenceClient>, sink: Arc<dyn DisplaySink>) -> Self {
        Self {
            client,
            sink,
            state: Arc::new(Mutex::new(GenerationState::default())),
        }
    }

    /// Run a generation to its end.
    ///
    /// Returns `AlreadyGenerating` without touching the running session if
    /// another generation holds the slot. Dropping the returned future early
    /// ends the session as `Stopped`.
    pub async fn submit(&self, request: GenerationRequest) -> Result<GenerationReport, RelayError> {
        let (token, guard) = self.claim(&request)?;
        Ok(self.drive(request, token, guard).await)
    }

    /// Claim the slot now and run the generation on a spawned task.
    pub async fn start(
        self: &Arc<Self>,
        request: GenerationRequest,
    ) -> Result<JoinHandle<GenerationReport>, RelayError> {
        let (token, guard) = self.claim(&request)?;
        let controller = Arc::clone(self);
        Ok(tokio::spawn(async move { controller.drive(request, token, guard).await }))
    }

    /// Run `request` again as a new session. Same rules as [`submit`](Self::submit).
    pub async fn retry(&self, request: GenerationRequest) -> Result<GenerationReport, RelayError> {
        self.submit(request).await
    }

    /// Ask the running generation to stop at its next fragment boundary.
    ///
    /// Returns false, and does nothing, when no generation is running.
    pub fn cancel(&self) -> bool {
        let state = lock(&self.state);
        match (state.phase, &state.cancellation_token) {
            (ControllerPhase::Generating, Some(token)) => {
                token.cancel();
                debug!("cancellation requested");
                true
            }
            _ => false,
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        lock(&self.state).phase
    }

    /// Snapshot of the current or most recent session.
    pub fn session(&self) -> Option<GenerationSession> {
        lock(&self.state).session.clone()
    }

    /// The last request accepted for generation.
    pub fn last_request(&self) -> Option<GenerationRequest> {
        lock(&self.state).last_request.clone()
    }

    fn claim(&self, request: &GenerationRequest) -> Result<(CancellationToken, SessionGuard), RelayError> {
        let mut state = lock(&self.state);
        if state.phase != ControllerPhase::Idle {
            debug!("generation already running, dropping submit");
            return Err(RelayError::AlreadyGenerating);
        }

        let session = GenerationSession::new(request.clone());
        info!(session = %session.id(), "generation started");

        let token = CancellationToken::new();
        state.phase = ControllerPhase::Generating;
        state.session = Some(session);
        state.cancellation_token = Some(token.clone());
        state.last_request = Some(request.clone());

        let guard = SessionGuard {
            state: Arc::clone(&self.state),
            sink: Arc::clone(&self.sink),
            finished: false,
        };
        Ok((token, guard))
    }

    async fn drive(
        &self,
        request: GenerationRequest,
        token: CancellationToken,
        guard: SessionGuard,
    ) -> GenerationReport {
        let outcome = self.consume(&request, &token).await;
        guard.finish(outcome)
    }

    async fn consume(&self, request: &GenerationRequest, token: &CancellationToken) -> Outcome {
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Outcome::Stopped,
            opened = self.client.stream(request) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Outcome::Stopped,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    let transcript = {
                        let mut state = lock(&self.state);
                        state
                            .session
                            .as_mut()
                            .map(|session| {
                                session.append(&fragment.text);
                                session.accumulated_text().to_string()
                            })
                            .unwrap_or_default()
                    };
                    self.sink.on_update(&transcript);
                }
                Some(Err(e)) => return Outcome::Failed(e.to_string()),
                None => return Outcome::Completed,
            }
        }
    }
}
