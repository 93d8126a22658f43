//! JSONL event log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and written with a single `write_all`, so a
//! reader tailing the file never sees half a record.
//!
//! Degradation chain:
//! 1. Configured file path
//! 2. stderr with a `[GUR-JSONL]` prefix
//! 3. Silent discard (a rollup run never fails because of its event log)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RollupError};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Per-directory outcomes and run milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RollupComplete,
    RollupFailed,
    NotRolledUp,
    NotProcessed,
    CleanupWarning,
    WalkComplete,
}

/// A single JSONL record. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Rollup score (1-4) the event refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    /// Depth below the walk root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            path: None,
            score: None,
            level: None,
            dry_run: None,
            error_code: None,
            details: None,
        }
    }

    #[must_use]
    pub fn path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_string_lossy().into_owned());
        self
    }

    #[must_use]
    pub fn score(mut self, score: u8) -> Self {
        self.score = Some(score);
        self
    }

    #[must_use]
    pub fn level(mut self, level: usize) -> Self {
        self.level = Some(level);
        self
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    /// Attach an error's code and message.
    #[must_use]
    pub fn error(mut self, err: &RollupError) -> Self {
        self.error_code = Some(err.code().to_string());
        self.details = Some(err.to_string());
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

/// Append-only JSONL writer with stderr and discard fallbacks.
pub struct JsonlWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    lines_written: u64,
}

impl JsonlWriter {
    /// Open `path` for appending. Falls back to stderr if that fails.
    pub fn open(path: &Path) -> Self {
        let mut w = Self {
            path: path.to_path_buf(),
            writer: None,
            state: WriterState::Stderr,
            lines_written: 0,
        };
        match open_append(path) {
            Ok(file) => {
                w.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                w.state = WriterState::Normal;
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[GUR-JSONL] {e}; logging events to stderr");
            }
        }
        w
    }

    /// Write one entry as one line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[GUR-JSONL] serialize error: {e}");
                return;
            }
        };
        self.write_line(&line);
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut()
            && w.flush().is_err()
        {
            self.degrade();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, line: &str) {
        match self.state {
            WriterState::Normal => {
                let ok = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if ok {
                    self.lines_written += 1;
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[GUR-JSONL] {line}").is_ok() {
                    self.lines_written += 1;
                } else {
                    self.degrade();
                }
            }
            WriterState::Discard => {}
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::Normal => {
                let _ = writeln!(
                    io::stderr(),
                    "[GUR-JSONL] write to {} failed, using stderr",
                    self.path.display()
                );
                WriterState::Stderr
            }
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| RollupError::io(parent, source))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| RollupError::io(path, source))
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_separate_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut writer = JsonlWriter::open(&path);
        assert_eq!(writer.state(), "normal");

        writer.write_entry(
            &LogEntry::new(EventType::RollupComplete, Severity::Info)
                .path(Path::new("/idx/a"))
                .score(4)
                .level(1),
        );
        writer.write_entry(&LogEntry::new(EventType::WalkComplete, Severity::Info));
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "rollup_complete");
        assert_eq!(first["severity"], "info");
        assert_eq!(first["path"], "/idx/a");
        assert_eq!(first["score"], 4);
        assert_eq!(writer.lines_written(), 2);
    }

    #[test]
    fn unset_fields_are_omitted() {
        let json =
            serde_json::to_string(&LogEntry::new(EventType::NotRolledUp, Severity::Info)).unwrap();
        assert!(!json.contains("\"path\""));
        assert!(!json.contains("\"score\""));
        assert!(!json.contains("\"error_code\""));
    }

    #[test]
    fn error_fields_carry_code() {
        let err = RollupError::MissingSummary {
            path: PathBuf::from("/idx/a/db.db"),
        };
        let entry = LogEntry::new(EventType::NotProcessed, Severity::Error).error(&err);
        assert_eq!(entry.error_code.as_deref(), Some("GUR-2002"));
        assert!(entry.details.unwrap().contains("/idx/a/db.db"));
    }

    #[test]
    fn unwritable_path_falls_back_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        // A regular file cannot be a parent directory.
        let mut writer = JsonlWriter::open(&blocker.join("events.jsonl"));
        assert_eq!(writer.state(), "stderr");
        writer.write_entry(&LogEntry::new(EventType::CleanupWarning, Severity::Warning));
        assert_eq!(writer.lines_written(), 1);
    }
}
