//! Bag capture – runs `ros2 bag record` as a child process per session.
//!
//! The recorder process owns the on-disk format and the file splitting;
//! this module only decides its arguments and its lifetime.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use bagrec_common::selector::FilterPolicy;

use crate::sink::{CaptureSink, RecordOptions, SinkFactory, StorageConfig};

/// How long a freshly spawned recorder must survive before it counts as started.
const SETTLE_TIME: Duration = Duration::from_millis(500);

/// How long a recorder gets to finalize its bag after SIGINT.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Creates [`ProcessSink`]s that invoke `<command> bag record`.
pub struct BagRecordFactory {
    command: String,
}

impl BagRecordFactory {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl SinkFactory for BagRecordFactory {
    fn create(
        &self,
        storage: &StorageConfig,
        policy: &FilterPolicy,
    ) -> Result<Arc<dyn CaptureSink>> {
        if let Some(root) = storage.uri.parent() {
            std::fs::create_dir_all(root)
                .with_context(|| format!("Cannot create data folder {}", root.display()))?;
            tempfile::tempfile_in(root)
                .with_context(|| format!("Data folder {} is not writable", root.display()))?;
        }
        // The recorder refuses to write into an existing directory.
        if storage.uri.exists() {
            bail!("Bag directory {} already exists", storage.uri.display());
        }

        let args = record_args(storage, &RecordOptions::from(policy));
        Ok(Arc::new(ProcessSink::new(
            &self.command,
            args,
            storage.uri.clone(),
        )))
    }
}

/// Arguments after the program name, e.g.
/// `bag record -o /data/Bag_... -s mcap --max-bag-size 0 ... /a /b`.
pub fn record_args(storage: &StorageConfig, options: &RecordOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "bag".into(),
        "record".into(),
        "-o".into(),
        storage.uri.to_string_lossy().into_owned(),
        "-s".into(),
        storage.storage_id.clone(),
        "--max-bag-size".into(),
        storage.max_bagfile_size.to_string(),
        "--max-bag-duration".into(),
        storage.max_bagfile_duration.as_secs().to_string(),
        "--max-cache-size".into(),
        storage.max_cache_size.to_string(),
        "--polling-interval".into(),
        options.polling_interval.as_millis().to_string(),
    ];
    if storage.snapshot_mode {
        args.push("--snapshot-mode".into());
    }
    if options.all {
        args.push("-a".into());
    } else {
        args.extend(options.topics.iter().cloned());
    }
    args
}

/// Sink backed by one recorder child process.
pub struct ProcessSink {
    program: String,
    args: Vec<String>,
    target: PathBuf,
    child: Mutex<Option<Child>>,
}

impl ProcessSink {
    pub fn new(program: &str, args: Vec<String>, target: PathBuf) -> Self {
        Self {
            program: program.to_string(),
            args,
            target,
            child: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CaptureSink for ProcessSink {
    fn target(&self) -> &Path {
        &self.target
    }

    fn activate(&self) -> Result<()> {
        let mut slot = self.lock();
        if slot.is_some() {
            bail!("Recorder for {} is already running", self.target.display());
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        info!("Spawning: {} {}", self.program, self.args.join(" "));

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        // Drain stderr so the pipe never fills up and blocks the recorder.
        if let Some(stderr) = child.stderr.take() {
            let name = self.program.clone();
            std::thread::Builder::new()
                .name("recorder-stderr".into())
                .spawn(move || {
                    let reader = BufReader::new(stderr);
                    for line in reader.lines() {
                        match line {
                            Ok(l) if l.is_empty() => {}
                            Ok(l) => warn!("[{name}] {l}"),
                            Err(_) => break,
                        }
                    }
                    debug!("{name} stderr stream ended");
                })
                .ok();
        }

        // Give the recorder a moment to fail on a bad target before declaring success.
        std::thread::sleep(SETTLE_TIME);
        match child.try_wait() {
            Ok(Some(status)) => {
                bail!(
                    "{} exited immediately with {status} while opening {}",
                    self.program,
                    self.target.display()
                );
            }
            Ok(None) => {}
            Err(e) => warn!("Cannot check {} status: {e}", self.program),
        }

        info!(
            "Recorder started (pid={}, target={})",
            child.id(),
            self.target.display()
        );
        *slot = Some(child);
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        let Some(mut child) = self.lock().take() else {
            return Ok(());
        };

        // Already gone: the pid may be reused, so do not signal it.
        if let Ok(Some(status)) = child.try_wait() {
            info!(
                "Recorder for {} had already exited with {status}",
                self.target.display()
            );
            return Ok(());
        }

        if let Err(e) = interrupt(&child) {
            warn!("Cannot interrupt recorder pid {}: {e}", child.id());
        }

        let deadline = Instant::now() + STOP_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("Recorder for {} exited with {status}", self.target.display());
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Ok(None) => {
                    warn!(
                        "Recorder for {} did not exit within {}s, killing it",
                        self.target.display(),
                        STOP_GRACE.as_secs()
                    );
                    child.kill().context("Cannot kill recorder")?;
                    child.wait().context("Cannot reap recorder")?;
                    return Ok(());
                }
                Err(e) => {
                    return Err(e).context("Cannot wait for recorder");
                }
            }
        }
    }

    fn check_alive(&self) -> Option<String> {
        let mut slot = self.lock();
        let child = slot.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(format!("recorder exited with {status}")),
            Ok(None) => None,
            Err(e) => Some(format!("cannot check recorder: {e}")),
        }
    }
}

impl Drop for ProcessSink {
    fn drop(&mut self) {
        if let Some(mut child) = self.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Ask the recorder to shut down cleanly so it finalizes the open file.
#[cfg(unix)]
fn interrupt(child: &Child) -> std::io::Result<()> {
    // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "no SIGINT on this platform",
    ))
}
