//! Capture sink collaborator interface.
//!
//! The session controller only ever sees these traits: a factory that
//! builds a sink for one session, the sink itself, and the dispatcher the
//! sink is registered with while it runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use bagrec_common::config::SessionConfig;
use bagrec_common::selector::FilterPolicy;

/// Writer cache bound handed to every session (10 MiB).
pub const MAX_CACHE_SIZE: u64 = 10 * 1024 * 1024;

/// How often the recorder looks for newly advertised topics.
pub const TOPIC_POLLING_INTERVAL: Duration = Duration::from_millis(1000);

/// Where and how a session's bag is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub uri: PathBuf,
    pub storage_id: String,
    /// Split size in bytes; 0 means unbounded.
    pub max_bagfile_size: u64,
    pub max_bagfile_duration: Duration,
    pub max_cache_size: u64,
    pub snapshot_mode: bool,
}

impl StorageConfig {
    pub fn for_session(uri: PathBuf, session: &SessionConfig, storage_id: &str) -> Self {
        Self {
            uri,
            storage_id: storage_id.to_string(),
            max_bagfile_size: 0,
            max_bagfile_duration: Duration::from_secs(session.file_duration_secs),
            max_cache_size: MAX_CACHE_SIZE,
            snapshot_mode: false,
        }
    }
}

/// Topic options derived from a [`FilterPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOptions {
    pub all: bool,
    pub topics: Vec<String>,
    pub polling_interval: Duration,
}

impl From<&FilterPolicy> for RecordOptions {
    fn from(policy: &FilterPolicy) -> Self {
        Self {
            all: policy.is_everything(),
            topics: policy.topics().to_vec(),
            polling_interval: TOPIC_POLLING_INTERVAL,
        }
    }
}

/// A live writer for one session.
pub trait CaptureSink: Send + Sync {
    /// Directory the sink writes into.
    fn target(&self) -> &Path;

    /// Begin persisting events.
    fn activate(&self) -> Result<()>;

    /// Stop persisting events and flush.  Safe to call on an inactive sink.
    fn deactivate(&self) -> Result<()>;

    /// `Some(reason)` if the sink has stopped on its own.
    fn check_alive(&self) -> Option<String>;
}

/// Builds sinks.  Creation must not start recording.
pub trait SinkFactory: Send + Sync {
    fn create(
        &self,
        storage: &StorageConfig,
        policy: &FilterPolicy,
    ) -> Result<Arc<dyn CaptureSink>>;
}

/// Identifier handed out by a [`Dispatcher`] on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(pub u64);

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// The concurrent substrate that drives registered sinks.
pub trait Dispatcher: Send + Sync {
    fn register(&self, sink: Arc<dyn CaptureSink>) -> Result<SinkId>;
    fn deregister(&self, id: SinkId);
}
