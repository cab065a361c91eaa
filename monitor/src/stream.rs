//! Camera event stream listener.
//!
//! Each camera gets one worker thread holding a long-lived, digest
//! authenticated `GET` on its event URL. The chunked body is read line by
//! line, framed into records, turned into alert messages and pushed to the
//! delivery queue. Any failure drops back to a fixed 10 s backoff and a
//! fresh connection, forever.

use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{StatusCode, Url};
use tracing::{debug, error, info};

use camwatch_common::alerts::AlertAggregator;
use camwatch_common::config::CameraConfig;
use camwatch_common::digest::{self, DigestChallenge};
use camwatch_common::event::process_record;
use camwatch_common::framer::EventFramer;

use crate::queue::DeliveryQueue;

/// Connect timeout, and the longest a read may stall before the stream
/// counts as dead (cameras send a heartbeat every few seconds).
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed delay before reconnecting. Never grows.
pub const BACKOFF: Duration = Duration::from_secs(10);

pub enum StreamState {
    Connecting,
    Streaming(Response),
    Backoff,
}

pub struct StreamWorker {
    camera: CameraConfig,
    client: Client,
    framer: EventFramer,
    aggregator: Arc<AlertAggregator>,
    queue: Arc<DeliveryQueue>,
    backoff: Duration,
}

impl StreamWorker {
    pub fn new(
        camera: CameraConfig,
        boundary: &str,
        aggregator: Arc<AlertAggregator>,
        queue: Arc<DeliveryQueue>,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(STREAM_TIMEOUT)
            .timeout(STREAM_TIMEOUT)
            .build()
            .context("Cannot create HTTP client")?;
        Ok(Self {
            camera,
            client,
            framer: EventFramer::new(boundary),
            aggregator,
            queue,
            backoff: BACKOFF,
        })
    }

    /// Run the connection state machine until the process exits.
    pub fn run(mut self) -> ! {
        info!("Starting stream listener for camera: {}", self.camera.name);
        let mut state = StreamState::Connecting;
        loop {
            state = self.step(state);
        }
    }

    /// Advance the state machine by one transition.
    pub fn step(&mut self, state: StreamState) -> StreamState {
        match state {
            StreamState::Connecting => match self.connect() {
                Ok(resp) => StreamState::Streaming(resp),
                Err(e) => {
                    error!("Stream error for {}: {e:#}", self.camera.name);
                    StreamState::Backoff
                }
            },
            StreamState::Streaming(resp) => {
                match self.consume(BufReader::new(resp)) {
                    Ok(()) => error!("Event stream for {} ended", self.camera.name),
                    Err(e) => error!("Stream error for {}: {e:#}", self.camera.name),
                }
                StreamState::Backoff
            }
            StreamState::Backoff => {
                self.framer.reset();
                std::thread::sleep(self.backoff);
                StreamState::Connecting
            }
        }
    }

    /// Open the event stream, answering a digest challenge if one comes.
    fn connect(&self) -> Result<Response> {
        debug!("Connecting to stream: {}", self.camera.url);
        let resp = self
            .client
            .get(&self.camera.url)
            .send()
            .context("GET event stream")?;

        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            let challenge = resp
                .headers()
                .get_all(WWW_AUTHENTICATE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .find_map(|v| DigestChallenge::parse(v).ok())
                .context("401 without a usable digest challenge")?;
            drop(resp);
            let authorization = challenge.authorization(
                &self.camera.username,
                &self.camera.password,
                "GET",
                &request_uri(&self.camera.url)?,
                1,
                &digest::cnonce(),
            );
            self.client
                .get(&self.camera.url)
                .header(AUTHORIZATION, authorization)
                .send()
                .context("GET event stream (digest auth)")?
        } else {
            resp
        };

        if !resp.status().is_success() {
            anyhow::bail!("GET {} returned {}", self.camera.url, resp.status());
        }
        info!("Connected to event stream of {}", self.camera.name);
        Ok(resp)
    }

    /// Read lines until EOF, enqueueing an alert for every qualifying
    /// record. Returns `Ok` when the server closes the stream.
    fn consume<R: BufRead>(&mut self, mut reader: R) -> Result<()> {
        let mut raw = Vec::new();
        loop {
            raw.clear();
            let n = reader
                .read_until(b'\n', &mut raw)
                .context("Read event stream")?;
            if n == 0 {
                return Ok(());
            }

            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            debug!("Received line: {line}");

            let Some(record) = self.framer.push_line(line) else {
                continue;
            };
            let name = &self.camera.name;
            if let Some(message) = process_record(&record, name, &self.aggregator, Local::now()) {
                info!("Event detected on {name}, queueing alert");
                if let Err(e) = self.queue.enqueue(message) {
                    error!("Cannot persist delivery queue: {e:#}");
                }
            }
        }
    }
}

/// Request target used in the digest: path plus query, as sent on the wire.
fn request_uri(url: &str) -> Result<String> {
    let url = Url::parse(url).with_context(|| format!("Invalid camera url {url}"))?;
    Ok(match url.query() {
        Some(q) => format!("{}?{q}", url.path()),
        None => url.path().to_string(),
    })
}
