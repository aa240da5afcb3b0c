//! Session lifecycle: one dedicated worker thread per running session.
//!
//! The [`Terminal`] loads the roster and settings on the caller's thread,
//! then hands a [`Session`] to a worker that owns the video source for the
//! session's whole life. Events flow out over a broadcast channel; lagging
//! subscribers lose the oldest events instead of stalling the worker.

use crate::attendance::{AttendanceStore, StoreError};
use crate::config::{ConfigError, PipelineConfig};
use crate::events::{FinishReason, SessionEvent};
use crate::notify::NotificationSink;
use crate::oracle::DetectionOracle;
use crate::session::{Session, SessionContext};
use crate::types::Identity;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rollcall_hw::{SourceKind, SourceSpec, VideoBackend, VideoSource};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("a session is already running")]
    AlreadyRunning,
    #[error("failed to load roster: {0}")]
    Roster(#[from] StoreError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to spawn session worker: {0}")]
    Spawn(std::io::Error),
    #[error("session worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Idle,
    Running,
    Stopping,
}

/// Source of local wall-clock time for attendance dates.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

struct Worker {
    id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Orchestrates attendance sessions against one video backend.
pub struct Terminal {
    config: PipelineConfig,
    backend: Arc<dyn VideoBackend>,
    ctx: SessionContext,
    clock: Clock,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<TerminalState>,
    worker: Mutex<Option<Worker>>,
}

impl Terminal {
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn VideoBackend>,
        oracle: Arc<dyn DetectionOracle>,
        store: Arc<dyn AttendanceStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            backend,
            ctx: SessionContext {
                oracle,
                store,
                notifier,
            },
            clock: Arc::new(|| chrono::Local::now().naive_local()),
            events,
            state: Mutex::new(TerminalState::Idle),
            worker: Mutex::new(None),
        }
    }

    /// Replace the wall clock (tests, replays with recorded dates).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Receive events from all future sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> TerminalState {
        self.reap_finished();
        *self.state.lock()
    }

    /// Load the roster, apply stored settings and launch a session worker.
    ///
    /// The returned receiver is subscribed before the worker starts, so it
    /// observes every event of this session including `SessionFinished`.
    pub fn start(&self, spec: SourceSpec) -> Result<broadcast::Receiver<SessionEvent>, PipelineError> {
        self.reap_finished();
        let mut slot = self.worker.lock();
        if slot.is_some() || *self.state.lock() != TerminalState::Idle {
            return Err(PipelineError::AlreadyRunning);
        }

        let config = self
            .config
            .clone()
            .with_settings(self.ctx.store.as_ref())
            .with_env()
            .validate()?;
        let roster = self.ctx.store.enrolled_identities()?;

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let rx = self.events.subscribe();
        tracing::info!(session = %id, identities = roster.len(), source = ?spec, "starting session");

        let job = SessionJob {
            id,
            spec,
            config,
            roster,
            backend: self.backend.clone(),
            ctx: self.ctx.clone(),
            clock: self.clock.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("rollcall-engine".into())
            .spawn(move || job.run())
            .map_err(PipelineError::Spawn)?;

        *slot = Some(Worker { id, cancel, handle });
        *self.state.lock() = TerminalState::Running;
        Ok(rx)
    }

    /// Cancel the running session and wait until its worker has released the
    /// source and exited. No-op when idle.
    pub fn stop(&self) -> Result<(), PipelineError> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        *self.state.lock() = TerminalState::Stopping;
        tracing::info!(session = %worker.id, "stopping session");
        worker.cancel.cancel();
        self.join(worker)
    }

    /// Block until the running session finishes on its own.
    pub fn wait(&self) -> Result<(), PipelineError> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        self.join(worker)
    }

    fn join(&self, worker: Worker) -> Result<(), PipelineError> {
        let result = worker.handle.join().map_err(|_| PipelineError::WorkerPanicked);
        *self.state.lock() = TerminalState::Idle;
        tracing::info!(session = %worker.id, "session worker joined");
        result
    }

    /// Join a worker that already exited so a new session may start.
    fn reap_finished(&self) {
        let finished = {
            let mut slot = self.worker.lock();
            match slot.as_ref() {
                Some(w) if w.handle.is_finished() => slot.take(),
                _ => None,
            }
        };
        if let Some(worker) = finished {
            if let Err(e) = self.join(worker) {
                tracing::warn!(error = %e, "session worker ended abnormally");
            }
        }
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "session did not shut down cleanly");
        }
    }
}

/// Everything the worker thread owns.
struct SessionJob {
    id: Uuid,
    spec: SourceSpec,
    config: PipelineConfig,
    roster: Vec<Identity>,
    backend: Arc<dyn VideoBackend>,
    ctx: SessionContext,
    clock: Clock,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl SessionJob {
    fn run(self) {
        let span = tracing::info_span!("session", id = %self.id);
        let _enter = span.enter();

        let mut source = match self.backend.open(&self.spec) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, source = ?self.spec, "failed to open video source");
                self.publish(SessionEvent::SessionFinished {
                    reason: FinishReason::OpenFailed,
                    detail: Some(e.to_string()),
                });
                return;
            }
        };
        let kind = source.kind();
        tracing::info!(?kind, "video source opened");

        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut session =
                Session::new(self.config.clone(), kind, self.roster.clone(), self.ctx.clone());
            let outcome = self.drive(source.as_mut(), &mut session);
            (outcome, session.frames_read(), session.identities_seen())
        }));

        source.release();
        let (reason, detail) = match run {
            Ok((outcome, frames, identities)) => {
                tracing::info!(reason = ?outcome.0, frames, identities, "session finished");
                outcome
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "session pipeline panicked");
                (FinishReason::Crashed, Some(message))
            }
        };
        self.publish(SessionEvent::SessionFinished { reason, detail });
    }

    fn drive(&self, source: &mut dyn VideoSource, session: &mut Session) -> (FinishReason, Option<String>) {
        let retries = match source.kind() {
            SourceKind::Live => self.config.live_read_retries,
            SourceKind::File => 0,
        };
        let mut failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return (FinishReason::Stopped, None);
            }

            match source.read() {
                Ok(Some(frame)) => {
                    failures = 0;
                    let progress = source.progress();
                    for event in session.handle_frame(frame, progress, (self.clock)()) {
                        self.publish(event);
                    }
                }
                Ok(None) => return (FinishReason::EndOfStream, None),
                Err(e) if failures < retries => {
                    failures += 1;
                    tracing::warn!(error = %e, attempt = failures, retries, "frame read failed; retrying");
                    self.publish(SessionEvent::Warning(format!("frame read failed: {e}")));
                }
                Err(e) => {
                    tracing::error!(error = %e, "frame read failed; ending session");
                    return (FinishReason::ReadFailed, Some(e.to_string()));
                }
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
