//! Configuration parsing – reads the TOML file describing the cameras to
//! watch and where alerts go.
//!
//! ```toml
//! site_name = "Main store"
//!
//! [telegram]
//! bot_token = "123456:ABC"
//! chat_id = "-1001234567890"
//!
//! [[cameras]]
//! name = "Entrance"
//! url = "http://192.168.1.205/cgi-bin/eventManager.cgi?action=attach&codes=%5BVideoMotion%5D&heartbeat=5"
//! username = "admin"
//! password = "secret"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

/// Application configuration. Loaded once at startup and never mutated.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Location name shown in the alert banner.
    #[serde(default = "default_site_name")]
    pub site_name: String,

    // ── persistence ──────────────────────────────────────────────────
    /// JSON snapshot of undelivered alert messages.
    #[serde(default = "default_queue_file")]
    pub queue_file: PathBuf,
    /// Append-only log of the hourly alert counters.
    #[serde(default = "default_alert_log_file")]
    pub alert_log_file: PathBuf,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    // ── stream ───────────────────────────────────────────────────────
    /// Literal multipart boundary separating event records.
    #[serde(default = "default_boundary")]
    pub boundary: String,

    pub telegram: TelegramConfig,
    pub cameras: Vec<CameraConfig>,
}

/// Outbound messaging endpoint (Telegram Bot API).
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// One camera event stream.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

fn default_site_name() -> String {
    "camwatch".into()
}

fn default_queue_file() -> PathBuf {
    PathBuf::from("queue.json")
}

fn default_alert_log_file() -> PathBuf {
    PathBuf::from("alert_counts.log")
}

fn default_report_interval() -> u64 {
    3600
}

fn default_boundary() -> String {
    "--myboundary".into()
}

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}

impl Config {
    /// Default config path.
    pub fn default_path() -> &'static str {
        "/etc/camwatch/camwatch.toml"
    }

    /// Names of all configured cameras, in file order.
    pub fn camera_names(&self) -> Vec<String> {
        self.cameras.iter().map(|c| c.name.clone()).collect()
    }

    fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(Error::Config("no [[cameras]] configured".into()));
        }
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                return Err(Error::Config(format!("camera with url {} has no name", camera.url)));
            }
            if !seen.insert(camera.name.as_str()) {
                return Err(Error::Config(format!("duplicate camera name: {}", camera.name)));
            }
        }
        if self.telegram.bot_token.is_empty() || self.telegram.chat_id.is_empty() {
            return Err(Error::Config("telegram.bot_token and telegram.chat_id are required".into()));
        }
        if self.report_interval_secs == 0 {
            return Err(Error::Config("report_interval_secs must be at least 1".into()));
        }
        if self.boundary.is_empty() {
            return Err(Error::Config("boundary must not be empty".into()));
        }
        Ok(())
    }
}

/// Read and validate the configuration file at `path`.
pub fn load(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(&text).map_err(|e| match e {
        Error::Toml { source, .. } => Error::Toml {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;
    info!(
        "Loaded config from {} ({} camera(s))",
        path.display(),
        config.cameras.len()
    );
    Ok(config)
}

/// Parse configuration text. Split from [`load`] so tests need no files.
pub fn parse(text: &str) -> Result<Config> {
    let config: Config = toml::from_str(text).map_err(|source| Error::Toml {
        path: PathBuf::new(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

// ─── tests ───────────────────────────────────────────────────────────────
