//! Session controller – the Idle/Recording state machine.
//!
//! All state lives behind one mutex, so start, stop and reset never run
//! concurrently against the same controller.  The recording state is the
//! presence of an [`ActiveSession`]; there is no separate flag to drift.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use bagrec_common::config::SessionConfig;
use bagrec_common::path::PathNamer;
use bagrec_common::protocol::{SessionState, StatusResponse};
use bagrec_common::selector::{self, FilterPolicy};

use crate::sink::{CaptureSink, Dispatcher, SinkFactory, SinkId, StorageConfig};

/// Source of the session-start instant.
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cannot create capture sink for {}: {cause:#}", .target.display())]
    SinkCreation { target: PathBuf, cause: anyhow::Error },

    #[error("Cannot register capture sink for {}: {cause:#}", .target.display())]
    Registration { target: PathBuf, cause: anyhow::Error },

    #[error("Cannot activate capture sink for {}: {cause:#}", .target.display())]
    Activation { target: PathBuf, cause: anyhow::Error },

    #[error("Capture sink for {} did not stop cleanly: {cause:#}", .target.display())]
    Deactivation { target: PathBuf, cause: anyhow::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(PathBuf),
    AlreadyRecording,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(PathBuf),
    NotRecording,
}

struct ActiveSession {
    id: SinkId,
    sink: Arc<dyn CaptureSink>,
    target: PathBuf,
    policy: FilterPolicy,
}

#[derive(Default)]
struct Inner {
    active: Option<ActiveSession>,
    namer: PathNamer,
    sessions_started: u64,
}

pub struct SessionController {
    session: SessionConfig,
    storage_id: String,
    factory: Arc<dyn SinkFactory>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Clock,
    inner: Mutex<Inner>,
}

impl SessionController {
    pub fn new(
        session: SessionConfig,
        storage_id: &str,
        factory: Arc<dyn SinkFactory>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self::with_clock(session, storage_id, factory, dispatcher, Box::new(Utc::now))
    }

    pub fn with_clock(
        session: SessionConfig,
        storage_id: &str,
        factory: Arc<dyn SinkFactory>,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Clock,
    ) -> Self {
        Self {
            session,
            storage_id: storage_id.to_string(),
            factory,
            dispatcher,
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        state_of(&self.lock())
    }

    pub fn status(&self) -> StatusResponse {
        let inner = self.lock();
        StatusResponse {
            state: state_of(&inner),
            target: inner
                .active
                .as_ref()
                .map(|a| a.target.to_string_lossy().into_owned()),
            policy: inner.active.as_ref().map(|a| a.policy.clone()),
            sessions_started: inner.sessions_started,
        }
    }

    /// Open a new session.  A no-op while already recording.
    ///
    /// On error the controller is left Idle with nothing registered.
    pub fn start_session(&self) -> Result<StartOutcome, SessionError> {
        let mut inner = self.lock();
        self.start_locked(&mut inner)
    }

    /// Close the open session, if any.
    ///
    /// The controller is Idle afterwards even when the sink reports an
    /// error while stopping.
    pub fn stop_session(&self) -> Result<StopOutcome, SessionError> {
        let mut inner = self.lock();
        self.stop_locked(&mut inner)
    }

    /// Stop then start under a single lock, rolling over to a new target.
    pub fn reset_session(&self) -> Result<StartOutcome, SessionError> {
        let mut inner = self.lock();
        if let Err(e) = self.stop_locked(&mut inner) {
            warn!("Reset: {e}");
        }
        self.start_locked(&mut inner)
    }

    /// Close the session whose sink `id` died on its own.  Returns its
    /// target, or `None` when `id` is not the open session.
    pub fn reap(&self, id: SinkId) -> Option<PathBuf> {
        let mut inner = self.lock();
        if inner.active.as_ref().map(|a| a.id) != Some(id) {
            return None;
        }
        let active = inner.active.take()?;

        if let Err(e) = active.sink.deactivate() {
            warn!("Cleaning up dead sink for {}: {e:#}", active.target.display());
        }
        self.dispatcher.deregister(active.id);
        warn!("Session {} ended without a stop request", active.target.display());
        Some(active.target)
    }

    fn start_locked(&self, inner: &mut Inner) -> Result<StartOutcome, SessionError> {
        if inner.active.is_some() {
            return Ok(StartOutcome::AlreadyRecording);
        }

        let policy = selector::resolve(&self.session.stream_selectors);
        let now = (self.clock)();
        let target = inner.namer.next(&self.session.output_root, &now);
        let storage = StorageConfig::for_session(target.clone(), &self.session, &self.storage_id);

        info!(
            "Starting session: target={}, file_duration={}s, topics={policy}",
            target.display(),
            self.session.file_duration_secs
        );

        let sink = self
            .factory
            .create(&storage, &policy)
            .map_err(|cause| SessionError::SinkCreation {
                target: target.clone(),
                cause,
            })?;

        let id = self
            .dispatcher
            .register(Arc::clone(&sink))
            .map_err(|cause| SessionError::Registration {
                target: target.clone(),
                cause,
            })?;

        if let Err(cause) = sink.activate() {
            self.dispatcher.deregister(id);
            return Err(SessionError::Activation { target, cause });
        }

        inner.active = Some(ActiveSession {
            id,
            sink,
            target: target.clone(),
            policy,
        });
        inner.sessions_started += 1;
        Ok(StartOutcome::Started(target))
    }

    fn stop_locked(&self, inner: &mut Inner) -> Result<StopOutcome, SessionError> {
        let Some(active) = inner.active.take() else {
            return Ok(StopOutcome::NotRecording);
        };

        let result = active.sink.deactivate();
        self.dispatcher.deregister(active.id);
        info!("Session closed: {}", active.target.display());

        match result {
            Ok(()) => Ok(StopOutcome::Stopped(active.target)),
            Err(cause) => Err(SessionError::Deactivation {
                target: active.target,
                cause,
            }),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Err(e) = self.stop_session() {
            error!("Stopping session on shutdown: {e}");
        }
    }
}

fn state_of(inner: &Inner) -> SessionState {
    if inner.active.is_some() {
        SessionState::Recording
    } else {
        SessionState::Idle
    }
}
