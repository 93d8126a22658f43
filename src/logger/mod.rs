//! Structured event logging for rollup runs.
//!
//! Human diagnostics go straight to stderr with a `[GUR-*]` tag at the call
//! site. Per-directory outcomes can additionally be recorded as JSONL through
//! an [`EventLog`], which worker threads share.

pub mod jsonl;

use std::path::Path;

use parking_lot::Mutex;

use self::jsonl::{JsonlWriter, LogEntry};

/// Thread-safe handle to a JSONL writer.
pub struct EventLog {
    writer: Mutex<JsonlWriter>,
}

impl EventLog {
    /// Open (append) the event log at `path`; never fails, see [`JsonlWriter`].
    pub fn open(path: &Path) -> Self {
        Self {
            writer: Mutex::new(JsonlWriter::open(path)),
        }
    }

    pub fn record(&self, entry: &LogEntry) {
        self.writer.lock().write_entry(entry);
    }

    pub fn flush(&self) {
        self.writer.lock().flush();
    }

    /// Lines accepted so far, including ones diverted to stderr.
    pub fn lines_written(&self) -> u64 {
        self.writer.lock().lines_written()
    }
}
