//! Append-only log of delivered messages.
//!
//! Every message delivered to a Peterson-Kearns process is appended here
//! before the process applies it. One line per message:
//!
//! ```text
//! From: 1, To: 0, Value: 20, VectorClock: {0: 1, 1: 2}
//! ```
//!
//! The clock is the sender's clock at send time. Lines that fail to parse
//! are logged and skipped on read.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use cutpoint_core::{ProcessId, VectorClock};

use crate::error::StoreError;

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Sender.
    pub from: ProcessId,
    /// Receiver.
    pub to: ProcessId,
    /// Payload.
    pub value: i64,
    /// Sender's vector clock at send time.
    pub clock: VectorClock,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "From: {}, To: {}, Value: {}, VectorClock: {}",
            self.from, self.to, self.value, self.clock
        )
    }
}

impl FromStr for LogEntry {
    type Err = StoreError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: String| StoreError::Malformed {
            location: line.to_string(),
            reason,
        };

        let rest = line
            .trim()
            .strip_prefix("From: ")
            .ok_or_else(|| malformed("missing From".into()))?;
        let (from, rest) = rest
            .split_once(", To: ")
            .ok_or_else(|| malformed("missing To".into()))?;
        let (to, rest) = rest
            .split_once(", Value: ")
            .ok_or_else(|| malformed("missing Value".into()))?;
        let (value, clock) = rest
            .split_once(", VectorClock: ")
            .ok_or_else(|| malformed("missing VectorClock".into()))?;

        let value = value
            .trim()
            .parse::<i64>()
            .map_err(|e| malformed(format!("bad value: {e}")))?;
        let clock = clock
            .parse::<VectorClock>()
            .map_err(|e| malformed(e.to_string()))?;

        Ok(Self {
            from: ProcessId::new(from.trim()),
            to: ProcessId::new(to.trim()),
            value,
            clock,
        })
    }
}

/// Append-only message log.
pub trait MessageLog: Send + Sync {
    /// Appends one entry atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be written.
    fn append(&self, entry: &LogEntry) -> Result<(), StoreError>;

    /// All readable entries in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    fn entries(&self) -> Result<Vec<LogEntry>, StoreError>;
}

/// In-memory log for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryMessageLog {
    entries: RwLock<Vec<LogEntry>>,
}

impl InMemoryMessageLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl MessageLog for InMemoryMessageLog {
    fn append(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.entries.read().clone())
    }
}

/// Text file with one line per entry.
#[derive(Debug)]
pub struct FileMessageLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileMessageLog {
    /// Log at `path`. The file and its parent directory are created on the
    /// first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageLog for FileMessageLog {
    fn append(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(format!("{entry}\n").as_bytes())?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match line.parse::<LogEntry>() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "malformed log line skipped");
                    None
                }
            })
            .collect())
    }
}
