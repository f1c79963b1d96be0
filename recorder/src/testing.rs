//! In-process doubles for the sink collaborators.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};

use bagrec_common::config::SessionConfig;
use bagrec_common::selector::FilterPolicy;

use crate::controller::SessionController;
use crate::sink::{CaptureSink, Dispatcher, SinkFactory, SinkId, StorageConfig};

pub struct FakeSink {
    target: PathBuf,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    fail_activation: AtomicBool,
    fail_deactivation: AtomicBool,
    died: Mutex<Option<String>>,
}

impl FakeSink {
    pub fn new(target: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            target: target.into(),
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
            fail_activation: AtomicBool::new(false),
            fail_deactivation: AtomicBool::new(false),
            died: Mutex::new(None),
        })
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }

    pub fn fail_deactivation(&self) {
        self.fail_deactivation.store(true, Ordering::SeqCst);
    }

    pub fn die(&self, reason: &str) {
        *self.died.lock().unwrap() = Some(reason.to_string());
    }
}

impl CaptureSink for FakeSink {
    fn target(&self) -> &Path {
        &self.target
    }

    fn activate(&self) -> Result<()> {
        if self.fail_activation.load(Ordering::SeqCst) {
            bail!("recorder exited immediately");
        }
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        if self.fail_deactivation.load(Ordering::SeqCst) {
            bail!("recorder did not exit");
        }
        Ok(())
    }

    fn check_alive(&self) -> Option<String> {
        self.died.lock().unwrap().clone()
    }
}

/// Records every `create` call and the sinks it handed out.
#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<(StorageConfig, FilterPolicy)>>,
    sinks: Mutex<Vec<Arc<FakeSink>>>,
    fail_creation: bool,
    fail_next_activation: AtomicBool,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_creation: true,
            ..Self::default()
        })
    }

    pub fn fail_next_activation(&self) {
        self.fail_next_activation.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<(StorageConfig, FilterPolicy)> {
        self.created.lock().unwrap().clone()
    }

    pub fn sinks(&self) -> Vec<Arc<FakeSink>> {
        self.sinks.lock().unwrap().clone()
    }
}

impl SinkFactory for FakeFactory {
    fn create(
        &self,
        storage: &StorageConfig,
        policy: &FilterPolicy,
    ) -> Result<Arc<dyn CaptureSink>> {
        if self.fail_creation {
            return Err(anyhow!("{} is not writable", storage.uri.display()));
        }
        self.created
            .lock()
            .unwrap()
            .push((storage.clone(), policy.clone()));

        let sink = FakeSink::new(storage.uri.clone());
        if self.fail_next_activation.swap(false, Ordering::SeqCst) {
            sink.fail_activation.store(true, Ordering::SeqCst);
        }
        self.sinks.lock().unwrap().push(sink.clone());
        Ok(sink)
    }
}

/// Synchronous dispatcher that only counts.
#[derive(Default)]
pub struct FakeDispatcher {
    next: AtomicU64,
    active: Mutex<Vec<SinkId>>,
    registrations: AtomicUsize,
    deregistrations: AtomicUsize,
    refuse: bool,
}

impl FakeDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            ..Self::default()
        })
    }

    pub fn active(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn deregistrations(&self) -> usize {
        self.deregistrations.load(Ordering::SeqCst)
    }
}

impl Dispatcher for FakeDispatcher {
    fn register(&self, _sink: Arc<dyn CaptureSink>) -> Result<SinkId> {
        if self.refuse {
            bail!("dispatcher is shutting down");
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let id = SinkId(self.next.fetch_add(1, Ordering::SeqCst));
        self.active.lock().unwrap().push(id);
        Ok(id)
    }

    fn deregister(&self, id: SinkId) {
        self.deregistrations.fetch_add(1, Ordering::SeqCst);
        self.active.lock().unwrap().retain(|a| *a != id);
    }
}

/// 2024-10-02T03:04:05Z, frozen.
pub fn fixed_clock() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-10-02T03:04:05Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn session(topics: &[&str]) -> SessionConfig {
    SessionConfig {
        output_root: PathBuf::from("/data"),
        file_duration_secs: 60,
        stream_selectors: topics.iter().map(|t| t.to_string()).collect(),
    }
}

pub fn controller_with(
    topics: &[&str],
    factory: Arc<FakeFactory>,
    dispatcher: Arc<FakeDispatcher>,
) -> SessionController {
    SessionController::with_clock(
        session(topics),
        "mcap",
        factory,
        dispatcher,
        Box::new(fixed_clock),
    )
}

pub fn controller(topics: &[&str]) -> (SessionController, Arc<FakeFactory>, Arc<FakeDispatcher>) {
    let factory = FakeFactory::new();
    let dispatcher = FakeDispatcher::new();
    let ctl = controller_with(topics, factory.clone(), dispatcher.clone());
    (ctl, factory, dispatcher)
}

/// In-memory log sink for asserting on emitted records.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a thread-local subscriber and return what it logged at
/// `info` and above, one record per line.
pub fn capture_logs(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .without_time()
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
