//! Camwatch Monitor – listens to camera motion event streams, counts
//! alerts per camera and forwards them to Telegram.
//!
//! Threads:
//! 1. one stream listener per configured camera
//! 2. the delivery worker draining the persistent message queue
//! 3. the hourly reporter logging and resetting the alert counters
//!
//! The main thread supervises them and persists the queue on shutdown.

mod notifier;
mod queue;
mod reporter;
mod stream;

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use camwatch_common::alerts::AlertAggregator;
use camwatch_common::config::Config;

use crate::notifier::TelegramNotifier;
use crate::queue::{DeliveryQueue, HeldQueue, RETRY_DELAY};
use crate::stream::StreamWorker;

/// How often the supervisor checks on its workers.
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(1);

/// Named worker threads.
type Workers = Vec<(String, JoinHandle<()>)>;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| Config::default_path().to_string());
    let config =
        camwatch_common::config::load(&PathBuf::from(&config_path)).context("Config load failed")?;

    info!(
        "Camwatch Monitor starting ({} camera(s), site={})",
        config.cameras.len(),
        config.site_name
    );

    // ── shared state ─────────────────────────────────────────────────
    let queue = Arc::new(DeliveryQueue::load(&config.queue_file));
    let aggregator = Arc::new(AlertAggregator::new(
        config.site_name.clone(),
        config.camera_names(),
    ));

    // ── ctrl-c / SIGTERM ─────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("Cannot set Ctrl-C handler")?;

    let result = spawn_workers(&config, &queue, &aggregator)
        .and_then(|workers| supervise(workers, &shutdown_rx));

    // Held until exit so no stream thread rewrites the snapshot after this.
    let _held = persist_on_exit(&queue);

    if let Err(e) = result {
        error!("Supervisor failed: {e:#}");
        std::process::exit(1);
    }
    info!("Camwatch Monitor stopped");
    std::process::exit(0)
}

/// Save the queue, in-flight head included, and keep it locked.
fn persist_on_exit(queue: &DeliveryQueue) -> HeldQueue<'_> {
    let (held, written) = queue.persist_and_hold();
    match written {
        Ok(()) => info!("Unsent messages saved to persistent queue ({} pending)", held.len()),
        Err(e) => error!("Cannot persist delivery queue on shutdown: {e:#}"),
    }
    held
}

fn spawn_workers(
    config: &Config,
    queue: &Arc<DeliveryQueue>,
    aggregator: &Arc<AlertAggregator>,
) -> Result<Workers> {
    let mut workers = Vec::new();

    // ── camera stream listeners ──────────────────────────────────────
    for (i, camera) in config.cameras.iter().enumerate() {
        let name = camera.name.clone();
        let worker = StreamWorker::new(
            camera.clone(),
            &config.boundary,
            aggregator.clone(),
            queue.clone(),
        )?;
        let handle = std::thread::Builder::new()
            .name(format!("stream-{i}"))
            .spawn(move || worker.run())
            .with_context(|| format!("Cannot spawn stream thread for {name}"))?;
        info!("Started monitoring camera: {name}");
        workers.push((format!("stream listener for {name}"), handle));
    }

    // ── delivery worker ──────────────────────────────────────────────
    let notifier = TelegramNotifier::new(&config.telegram)?;
    let delivery_queue = queue.clone();
    let handle = std::thread::Builder::new()
        .name("delivery".into())
        .spawn(move || delivery_queue.run_worker(&notifier, RETRY_DELAY))
        .context("Cannot spawn delivery thread")?;
    workers.push(("message queue processor".into(), handle));

    // ── periodic reporter ────────────────────────────────────────────
    let report_aggregator = aggregator.clone();
    let log_path = config.alert_log_file.clone();
    let interval = Duration::from_secs(config.report_interval_secs);
    let handle = std::thread::Builder::new()
        .name("reporter".into())
        .spawn(move || reporter::run(report_aggregator, log_path, interval))
        .context("Cannot spawn reporter thread")?;
    workers.push(("periodic reporter".into(), handle));

    Ok(workers)
}

/// Wait for a shutdown signal. Workers never return on their own; one
/// that stops (a panic) is logged while the rest keep running. Returns the
/// workers still alive at shutdown.
fn supervise(mut workers: Workers, shutdown: &mpsc::Receiver<()>) -> Result<Workers> {
    info!("Application is running, press Ctrl+C to exit");
    loop {
        match shutdown.recv_timeout(SUPERVISE_INTERVAL) {
            Ok(()) => {
                info!("Shutdown signal received");
                return Ok(workers);
            }
            Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("Shutdown channel closed unexpectedly");
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        workers = reap_finished(workers);
    }
}

/// Join and log every worker that has stopped; keep the rest.
fn reap_finished(workers: Workers) -> Workers {
    let (finished, running): (Workers, Workers) =
        workers.into_iter().partition(|(_, h)| h.is_finished());
    for (name, handle) in finished {
        match handle.join() {
            Ok(()) => warn!("Worker stopped: {name}"),
            Err(_) => error!("Worker panicked: {name}"),
        }
    }
    running
}
