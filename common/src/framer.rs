//! Event framing – splits a camera's continuous line stream into records.
//!
//! The camera sends an endless multipart body where each part is separated
//! by a literal boundary line (`--myboundary` on Dahua-style firmware).
//! Lines arriving between two boundaries form one event record.

use tracing::{debug, warn};

/// Size after which a record still waiting for its boundary is suspicious.
pub const BUFFER_WARN_BYTES: usize = 1024 * 1024;

/// Accumulates lines until the boundary marker shows up.
#[derive(Debug)]
pub struct EventFramer {
    boundary: String,
    buffer: String,
    warned: bool,
}

impl EventFramer {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            buffer: String::new(),
            warned: false,
        }
    }

    /// Feed one line (without its terminator).
    ///
    /// Returns the completed record when `line` contains the boundary
    /// marker; the internal buffer is cleared for the next record.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if line.contains(&self.boundary) {
            debug!("Boundary detected in stream");
            self.warned = false;
            return Some(std::mem::take(&mut self.buffer));
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');

        if !self.warned && self.buffer.len() > BUFFER_WARN_BYTES {
            warn!(
                "Event record has grown to {} bytes without a boundary ({})",
                self.buffer.len(),
                self.boundary
            );
            self.warned = true;
        }
        None
    }

    /// Bytes buffered for the record in progress.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial record, e.g. after the connection was lost.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.warned = false;
    }
}
