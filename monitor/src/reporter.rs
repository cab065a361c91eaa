//! Periodic reporting: snapshot the alert counters, zero them, and append
//! the snapshot to the counter log.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::{error, info};

use camwatch_common::alerts::{AlertAggregator, AlertCounts};

/// Run the reporting loop on its own thread.
pub fn run(aggregator: Arc<AlertAggregator>, log_path: PathBuf, interval: Duration) -> ! {
    info!(
        "Starting periodic reporter (every {}s → {})",
        interval.as_secs(),
        log_path.display()
    );
    // First report after one full interval; a startup block would be all zeros.
    loop {
        std::thread::sleep(interval);
        report_once(&aggregator, &log_path, Local::now());
    }
}

/// One reporting cycle. The counters are reset even if the log write fails.
pub fn report_once(aggregator: &AlertAggregator, log_path: &Path, now: DateTime<Local>) {
    let snapshot = aggregator.snapshot_and_reset();
    info!("Alert counts reset for {} camera(s)", snapshot.len());

    let text = format_report(now, &snapshot);
    match append_report(log_path, &text) {
        Ok(()) => info!("Alert counts logged to {}", log_path.display()),
        Err(e) => error!("Cannot write alert counts: {e:#}"),
    }
}

pub fn format_report(now: DateTime<Local>, snapshot: &[(String, AlertCounts)]) -> String {
    let mut out = format!("Timestamp: {}\n", now.format("%Y-%m-%d %H:%M:%S"));
    for (camera, c) in snapshot {
        out.push_str(&format!(
            "Camera: {camera}\n\
             00 sec gap: {}\n\
             10 sec gap: {}\n\
             30 sec gap: {}\n\
             60 sec gap: {}\n\n",
            c.immediate, c.gap10, c.gap30, c.gap60
        ));
    }
    out
}

pub fn append_report(path: &Path, text: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot open {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("Cannot write {}", path.display()))?;
    Ok(())
}
