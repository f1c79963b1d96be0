//! Sink supervisor – the dispatcher live sinks are registered with.
//!
//! A monitor thread polls every registered sink and reports the ones that
//! stopped without being asked to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::sink::{CaptureSink, Dispatcher, SinkId};

struct Entry {
    sink: Arc<dyn CaptureSink>,
    reported: bool,
}

#[derive(Default)]
pub struct Supervisor {
    sinks: Mutex<HashMap<SinkId, Entry>>,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SinkId, Entry>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of currently registered sinks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check every registered sink once.  Returns the sinks found dead
    /// during this pass; each is reported only once.
    pub fn poll(&self) -> Vec<SinkId> {
        let mut dead = Vec::new();
        for (id, entry) in self.lock().iter_mut() {
            if entry.reported {
                continue;
            }
            if let Some(reason) = entry.sink.check_alive() {
                error!(
                    "Capture sink {id} ({}) stopped unexpectedly: {reason}",
                    entry.sink.target().display()
                );
                entry.reported = true;
                dead.push(*id);
            }
        }
        dead
    }

    /// Poll on a background thread until `shutdown` is set, handing every
    /// dead sink to `on_exit`.
    pub fn spawn_monitor<F>(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
        on_exit: F,
    ) -> std::io::Result<JoinHandle<()>>
    where
        F: Fn(SinkId) + Send + 'static,
    {
        let this = Arc::clone(self);
        std::thread::Builder::new()
            .name("sink-monitor".into())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    for id in this.poll() {
                        on_exit(id);
                    }
                    std::thread::sleep(interval);
                }
                debug!("Sink monitor finished");
            })
    }
}

impl Dispatcher for Supervisor {
    fn register(&self, sink: Arc<dyn CaptureSink>) -> Result<SinkId> {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!("Registered {id} for {}", sink.target().display());
        self.lock().insert(
            id,
            Entry {
                sink,
                reported: false,
            },
        );
        Ok(id)
    }

    fn deregister(&self, id: SinkId) {
        if self.lock().remove(&id).is_some() {
            info!("Deregistered {id}");
        }
    }
}
