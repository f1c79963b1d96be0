//! bagrec – starts and stops bag recordings on request.
//!
//! This binary:
//! 1. Reads configuration from `bagrec.conf` (or a `.toml` file)
//! 2. Serves the control channel over HTTP
//! 3. Opens one `ros2 bag record` session at a time under
//!    `<DATA_FOLDER>/Bag_<UTC timestamp>` and closes it on request

mod capture;
mod controller;
mod listener;
mod server;
mod sink;
mod supervisor;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::capture::BagRecordFactory;
use crate::controller::SessionController;
use crate::listener::{ControlListener, ControlSignal};
use crate::supervisor::Supervisor;

/// How often registered recorders are checked for unexpected exits.
const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| bagrec_common::config::Config::default_path().to_string());
    let config =
        bagrec_common::config::load(&PathBuf::from(&config_path)).context("Config load failed")?;

    info!(
        "bagrec starting (listen={}, data_folder={}, file_duration={}s, topics={})",
        config.listen_addr,
        config.session.output_root.display(),
        config.session.file_duration_secs,
        config.session.stream_selectors.join(" "),
    );

    let shutdown = Arc::new(AtomicBool::new(false));

    // ── ctrl-c ───────────────────────────────────────────────────────
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
        info!("Shutdown signal received");
    })
    .context("Cannot set Ctrl-C handler")?;

    // ── sink supervisor + controller ─────────────────────────────────
    let supervisor = Arc::new(Supervisor::new());
    let controller = Arc::new(SessionController::new(
        config.session.clone(),
        &config.storage_id,
        Arc::new(BagRecordFactory::new(&config.record_command)),
        supervisor.clone(),
    ));

    // ── control listener ─────────────────────────────────────────────
    let (tx, rx) = mpsc::channel::<ControlSignal>();
    let listener_thread = listener::spawn(ControlListener::new(controller.clone()), rx)
        .context("Cannot spawn control listener")?;

    // Dead recorders go back through the queue so the controller drops them.
    let exits = tx.clone();
    let monitor = supervisor
        .spawn_monitor(MONITOR_INTERVAL, shutdown.clone(), move |id| {
            exits.send(ControlSignal::SinkExited(id)).ok();
        })
        .context("Cannot spawn sink monitor")?;

    if config.start_on_boot {
        tx.send(ControlSignal::Enable(true))
            .context("Control listener exited early")?;
    }

    let rollover = if config.reset_interval_secs > 0 {
        Some(
            listener::spawn_rollover(
                tx.clone(),
                Duration::from_secs(config.reset_interval_secs),
                shutdown.clone(),
            )
            .context("Cannot spawn rollover timer")?,
        )
    } else {
        None
    };

    // ── HTTP control server (runs until shutdown) ────────────────────
    let state = server::AppState::new(controller.clone(), tx);
    if let Err(e) = server::run(state, &config.listen_addr, shutdown.clone()).await {
        tracing::error!("HTTP server error: {e:#}");
        shutdown.store(true, Ordering::Relaxed);
    }

    // The listener drains its queue and exits once the last sender is
    // dropped, so join the sending threads first.
    tokio::task::spawn_blocking(move || {
        if let Some(handle) = rollover {
            handle.join().ok();
        }
        monitor.join().ok();
        listener_thread.join().ok();
    })
    .await
    .ok();

    if let Err(e) = controller.stop_session() {
        tracing::error!("{e}");
    }
    if supervisor.len() > 0 {
        tracing::warn!("{} capture sink(s) still registered at exit", supervisor.len());
    }
    info!("bagrec stopped");

    Ok(())
}
