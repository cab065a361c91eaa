//! Durable FIFO of alert messages waiting to be delivered.
//!
//! The whole queue is rewritten to a JSON array on every enqueue so a
//! restart picks up whatever was still pending. A single worker drains it,
//! retrying the head message forever until the endpoint accepts it.
//!
//! The head stays in the queue while it is being sent and is only popped
//! after a confirmed send. Successful sends do not rewrite the snapshot,
//! so a crash can replay messages that already went out (at-least-once).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

/// Delay between attempts to send the same message.
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Outbound messaging endpoint.
pub trait MessageSender {
    fn send(&self, text: &str) -> Result<()>;
}

pub struct DeliveryQueue {
    path: PathBuf,
    messages: Mutex<VecDeque<String>>,
    available: Condvar,
}

impl DeliveryQueue {
    /// Empty queue persisting to `path`. Nothing is read or written yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            messages: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Restore the queue from its snapshot at `path`.
    ///
    /// A missing snapshot gives an empty queue; so does a corrupt one,
    /// after logging it.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let queue = Self::new(path);
        match read_snapshot(&queue.path) {
            Ok(Some(messages)) => {
                info!(
                    "Loaded {} message(s) from persistent queue {}",
                    messages.len(),
                    queue.path.display()
                );
                queue.lock().extend(messages);
            }
            Ok(None) => debug!("No persistent queue at {}", queue.path.display()),
            Err(e) => error!("Persistent queue is corrupt, starting fresh: {e:#}"),
        }
        queue
    }

    /// Append a message and persist the whole queue before returning.
    pub fn enqueue(&self, message: String) -> Result<()> {
        let mut messages = self.lock();
        messages.push_back(message);
        let written = write_snapshot(&self.path, &messages);
        drop(messages);
        self.available.notify_one();
        written
    }

    /// Rewrite the snapshot with the current contents, in-flight head
    /// included.
    pub fn persist(&self) -> Result<()> {
        let messages = self.lock();
        write_snapshot(&self.path, &messages)
    }

    /// Final persist on shutdown. The returned hold keeps the queue locked,
    /// so no stream thread can rewrite the snapshot while the process exits.
    pub fn persist_and_hold(&self) -> (HeldQueue<'_>, Result<()>) {
        let messages = self.lock();
        let written = write_snapshot(&self.path, &messages);
        (HeldQueue { messages }, written)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Block until a message is available and deliver it, retrying every
    /// `retry_delay` until `sender` succeeds.
    pub fn deliver_next(&self, sender: &dyn MessageSender, retry_delay: Duration) {
        let message = {
            let mut messages = self.lock();
            loop {
                if let Some(head) = messages.front() {
                    break head.clone();
                }
                messages = self
                    .available
                    .wait(messages)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        debug!("Processing message: {message}");
        let mut attempt = 1u64;
        while let Err(e) = sender.send(&message) {
            warn!("Send attempt {attempt} failed, retrying in {retry_delay:?}: {e:#}");
            std::thread::sleep(retry_delay);
            attempt += 1;
        }

        // Only this worker pops, so the head is still `message`.
        self.lock().pop_front();
    }

    /// Drain the queue for the rest of the process lifetime.
    pub fn run_worker(&self, sender: &dyn MessageSender, retry_delay: Duration) -> ! {
        info!("Starting message queue processor");
        loop {
            self.deliver_next(sender, retry_delay);
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The queue, locked until dropped.
pub struct HeldQueue<'a> {
    messages: MutexGuard<'a, VecDeque<String>>,
}

impl HeldQueue<'_> {
    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

fn read_snapshot(path: &Path) -> Result<Option<Vec<String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let messages = serde_json::from_str(&text)
        .with_context(|| format!("Invalid queue snapshot {}", path.display()))?;
    Ok(Some(messages))
}

/// Write to a sibling temp file and rename it over `path`, so a crash
/// mid-write leaves the previous snapshot intact.
fn write_snapshot(path: &Path, messages: &VecDeque<String>) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Cannot create temp file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, messages)?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Cannot sync queue snapshot {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("Cannot write queue snapshot {}", path.display()))?;
    debug!("Persisted {} message(s) to {}", messages.len(), path.display());
    Ok(())
}
