//! Control signal listener.
//!
//! Signals from every source (HTTP, rollover timer, startup) go through one
//! queue and are handled by one worker thread, in arrival order.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use bagrec_common::protocol::{BagControl, SessionState};

use crate::controller::{SessionController, StartOutcome, StopOutcome};
use crate::sink::SinkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Recording intent from the control channel.
    Enable(bool),
    /// Operator-requested reset: stop if recording, then start.
    Reset,
    /// Timer tick: roll over only while a session is open.
    Rollover,
    /// The supervisor found this sink dead.
    SinkExited(SinkId),
}

impl From<BagControl> for ControlSignal {
    fn from(msg: BagControl) -> Self {
        Self::Enable(msg.enable_recording)
    }
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enable(on) => write!(f, "enable_recording={on}"),
            Self::Reset => write!(f, "reset"),
            Self::Rollover => write!(f, "rollover"),
            Self::SinkExited(id) => write!(f, "{id} exited"),
        }
    }
}

/// What handling a signal did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Started(PathBuf),
    Stopped(PathBuf),
    /// The signal matched the current state.
    Ignored(SessionState),
    Failed(String),
}

pub struct ControlListener {
    controller: Arc<SessionController>,
}

impl ControlListener {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self { controller }
    }

    /// Apply one signal.  Each control message is logged once, together
    /// with what was done about it.
    pub fn handle(&self, signal: ControlSignal) -> SignalOutcome {
        let state = self.controller.state();
        match (signal, state) {
            (ControlSignal::Enable(true), SessionState::Idle) => {
                info!("Message received ({signal}): starting new recording");
                self.start()
            }
            (ControlSignal::Enable(false), SessionState::Recording) => {
                info!("Message received ({signal}): stopping existing recording");
                match self.controller.stop_session() {
                    Ok(StopOutcome::Stopped(target)) => SignalOutcome::Stopped(target),
                    Ok(StopOutcome::NotRecording) => SignalOutcome::Ignored(SessionState::Idle),
                    Err(e) => {
                        error!("{e}");
                        SignalOutcome::Failed(e.to_string())
                    }
                }
            }
            (ControlSignal::Enable(_), state) => {
                info!("Message received ({signal}): already {state}, ignoring");
                SignalOutcome::Ignored(state)
            }
            (ControlSignal::Rollover, SessionState::Idle) => {
                info!("Rollover tick while idle, ignoring");
                SignalOutcome::Ignored(SessionState::Idle)
            }
            (ControlSignal::Reset | ControlSignal::Rollover, _) => {
                info!("Message received ({signal}): rolling over to a new recording");
                match self.controller.reset_session() {
                    Ok(StartOutcome::Started(target)) => SignalOutcome::Started(target),
                    Ok(StartOutcome::AlreadyRecording) => {
                        SignalOutcome::Ignored(SessionState::Recording)
                    }
                    Err(e) => {
                        error!("Recording reset failed: {e}");
                        SignalOutcome::Failed(e.to_string())
                    }
                }
            }
            (ControlSignal::SinkExited(id), _) => match self.controller.reap(id) {
                Some(target) => {
                    info!(
                        "Recorder for {} exited on its own, waiting for the next enable signal",
                        target.display()
                    );
                    SignalOutcome::Stopped(target)
                }
                None => {
                    debug!("{id} is not the open session, ignoring");
                    SignalOutcome::Ignored(state)
                }
            },
        }
    }

    fn start(&self) -> SignalOutcome {
        match self.controller.start_session() {
            Ok(StartOutcome::Started(target)) => SignalOutcome::Started(target),
            Ok(StartOutcome::AlreadyRecording) => SignalOutcome::Ignored(SessionState::Recording),
            Err(e) => {
                error!("Cannot start recording, waiting for the next enable signal: {e}");
                SignalOutcome::Failed(e.to_string())
            }
        }
    }

    /// Handle signals until every sender is dropped.
    pub fn run(&self, rx: Receiver<ControlSignal>) {
        while let Ok(signal) = rx.recv() {
            self.handle(signal);
        }
        info!("Control listener finished");
    }
}

/// Run `listener` on its own thread.
pub fn spawn(
    listener: ControlListener,
    rx: Receiver<ControlSignal>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("control-listener".into())
        .spawn(move || listener.run(rx))
}

/// Enqueue a [`ControlSignal::Rollover`] every `interval` until `shutdown` is set.
pub fn spawn_rollover(
    tx: Sender<ControlSignal>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("rollover".into())
        .spawn(move || {
            info!("Rolling bags over every {}s", interval.as_secs());
            let mut next = Instant::now() + interval;
            while !shutdown.load(Ordering::Relaxed) {
                if Instant::now() >= next {
                    next += interval;
                    if tx.send(ControlSignal::Rollover).is_err() {
                        warn!("Control listener gone, stopping rollover");
                        break;
                    }
                }
                std::thread::sleep(Duration::from_millis(250).min(interval));
            }
            debug!("Rollover timer finished");
        })
}
