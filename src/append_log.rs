//! Append-only JSON-lines logs
//!
//! Shared storage for the revocation ledger and the issued-serial registry. Each
//! record has a unique key. A file-backed log replays every line into an in-memory
//! index on open and appends one synced line per insert; a failed append is rolled
//! back to the previous file length so the file never keeps a partial line.

use crate::error::{CaError, CaResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// A record stored in an [`AppendLog`]
pub(crate) trait LogRecord: Serialize + DeserializeOwned + Clone + Send {
    /// Unique key of the record
    fn key(&self) -> &str;
}

/// Destination of appended lines
pub(crate) trait LogSink: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogSink for File {
    fn current_len(&self) -> io::Result<u64> {
        self.metadata().map(|m| m.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Append `line` to `sink`, restoring the previous length if the write fails
///
/// # Errors
/// - [`CaError::Io`] if the write failed and was rolled back
/// - [`CaError::Storage`] if the write failed and the rollback failed too
pub(crate) fn append_line<S: LogSink>(sink: &mut S, line: &[u8]) -> CaResult<()> {
    let len = sink.current_len()?;
    let written = sink
        .write_all(line)
        .and_then(|_| sink.flush())
        .and_then(|_| sink.sync());
    match written {
        Ok(()) => Ok(()),
        Err(write_err) => match sink.truncate_to(len) {
            Ok(()) => Err(CaError::Io(write_err)),
            Err(trunc_err) => Err(CaError::Storage(format!(
                "Append failed ({}) and rollback to {} bytes failed: {}",
                write_err, len, trunc_err
            ))),
        },
    }
}

struct LogState<T> {
    file: Option<File>,
    entries: Vec<T>,
    by_key: HashMap<String, usize>,
    // Set when a failed append could not be rolled back
    failed: bool,
}

impl<T: LogRecord> LogState<T> {
    fn new(file: Option<File>) -> Self {
        Self {
            file,
            entries: Vec::new(),
            by_key: HashMap::new(),
            failed: false,
        }
    }

    fn push(&mut self, record: T) {
        self.by_key
            .insert(record.key().to_string(), self.entries.len());
        self.entries.push(record);
    }
}

/// Keyed, append-only record log, optionally backed by a JSON-lines file
pub(crate) struct AppendLog<T> {
    label: &'static str,
    state: Mutex<LogState<T>>,
}

impl<T: LogRecord> AppendLog<T> {
    pub(crate) fn in_memory(label: &'static str) -> Self {
        Self {
            label,
            state: Mutex::new(LogState::new(None)),
        }
    }

    /// Open (or create) the log file and replay its records
    ///
    /// A line that fails to parse is fatal. Duplicate keys keep their first record.
    pub(crate) fn open(path: &Path, label: &'static str) -> CaResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut records = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: T = serde_json::from_str(&line).map_err(|e| {
                    CaError::Storage(format!(
                        "Corrupt {} {} at line {}: {}",
                        label,
                        path.display(),
                        line_no + 1,
                        e
                    ))
                })?;
                records.push(record);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut state = LogState::new(Some(file));
        for record in records {
            if state.by_key.contains_key(record.key()) {
                warn!(key = %record.key(), log = label, "Duplicate record in log file ignored");
                continue;
            }
            state.push(record);
        }
        info!(
            path = %path.display(),
            log = label,
            entries = state.entries.len(),
            "Opened append-only log"
        );
        Ok(Self {
            label,
            state: Mutex::new(state),
        })
    }

    /// Insert `record`; `Ok(false)` if its key is already present
    pub(crate) fn insert(&self, record: T) -> CaResult<bool> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;
        if state.failed {
            return Err(CaError::Storage(format!(
                "{} is unusable after a failed write",
                self.label
            )));
        }
        if state.by_key.contains_key(record.key()) {
            return Ok(false);
        }
        if let Some(file) = state.file.as_mut() {
            let mut line = serde_json::to_vec(&record)
                .map_err(|e| CaError::Storage(format!("Failed to encode record: {}", e)))?;
            line.push(b'\n');
            if let Err(e) = append_line(file, &line) {
                if matches!(e, CaError::Storage(_)) {
                    error!(log = self.label, error = %e, "Log left in an inconsistent state");
                    state.failed = true;
                }
                return Err(e);
            }
        }
        state.push(record);
        Ok(true)
    }

    pub(crate) fn get(&self, key: &str) -> Option<T> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.by_key.get(key).map(|&idx| state.entries[idx].clone())
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_key
            .contains_key(key)
    }

    /// All records in insertion order
    pub(crate) fn entries(&self) -> Vec<T> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }
}
