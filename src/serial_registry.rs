//! Issued-serial registry
//!
//! Every serial number handed out is recorded here before the certificate leaves
//! the issuer. With a file-backed registry the record survives restarts, so a
//! serial issued by an earlier run is never issued again.

use crate::append_log::{AppendLog, LogRecord};
use crate::error::CaResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One issued certificate, keyed by serial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedSerialEntry {
    pub serial_number: String,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LogRecord for IssuedSerialEntry {
    fn key(&self) -> &str {
        &self.serial_number
    }
}

pub trait IssuedSerialStore: Send + Sync {
    /// Record `entry`; `Ok(false)` if its serial is already present
    fn record(&self, entry: IssuedSerialEntry) -> CaResult<bool>;

    fn contains(&self, serial_number: &str) -> CaResult<bool>;

    fn len(&self) -> CaResult<usize>;

    fn is_empty(&self) -> CaResult<bool> {
        Ok(self.len()? == 0)
    }
}

pub struct MemoryIssuedSerialStore {
    log: AppendLog<IssuedSerialEntry>,
}

impl MemoryIssuedSerialStore {
    pub fn new() -> Self {
        Self {
            log: AppendLog::in_memory("issued-serial registry"),
        }
    }
}

impl Default for MemoryIssuedSerialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IssuedSerialStore for MemoryIssuedSerialStore {
    fn record(&self, entry: IssuedSerialEntry) -> CaResult<bool> {
        self.log.insert(entry)
    }

    fn contains(&self, serial_number: &str) -> CaResult<bool> {
        Ok(self.log.contains(serial_number))
    }

    fn len(&self) -> CaResult<usize> {
        Ok(self.log.len())
    }
}

/// Append-only JSON-lines registry file
pub struct FileIssuedSerialStore {
    path: PathBuf,
    log: AppendLog<IssuedSerialEntry>,
}

impl FileIssuedSerialStore {
    /// Open (or create) the registry and replay it; a corrupt line is fatal
    pub fn open(path: impl AsRef<Path>) -> CaResult<Self> {
        let path = path.as_ref().to_path_buf();
        let log = AppendLog::open(&path, "issued-serial registry")?;
        Ok(Self { path, log })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IssuedSerialStore for FileIssuedSerialStore {
    fn record(&self, entry: IssuedSerialEntry) -> CaResult<bool> {
        self.log.insert(entry)
    }

    fn contains(&self, serial_number: &str) -> CaResult<bool> {
        Ok(self.log.contains(serial_number))
    }

    fn len(&self) -> CaResult<usize> {
        Ok(self.log.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaError;
    use std::fs;

    fn entry(serial: &str) -> IssuedSerialEntry {
        let now = Utc::now();
        IssuedSerialEntry {
            serial_number: serial.to_string(),
            email: "alice@example.com".to_string(),
            issued_at: now,
            expires_at: now,
        }
    }

    #[test]
    fn test_memory_store_rejects_duplicates() {
        let store = MemoryIssuedSerialStore::new();
        assert!(store.record(entry("42")).unwrap());
        assert!(!store.record(entry("42")).unwrap());
        assert!(store.contains("42").unwrap());
        assert!(!store.contains("43").unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("issued.jsonl");
        {
            let store = FileIssuedSerialStore::open(&path).unwrap();
            assert!(store.record(entry("abc")).unwrap());
            assert!(store.record(entry("def")).unwrap());
        }

        let store = FileIssuedSerialStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.len().unwrap(), 2);
        assert!(store.contains("abc").unwrap());
        assert!(!store.record(entry("def")).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_corrupt_registry_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issued.jsonl");
        fs::write(&path, "{\"serial_number\":\"ab\"}\n").unwrap();
        assert!(matches!(
            FileIssuedSerialStore::open(&path),
            Err(CaError::Storage(_))
        ));
    }
}
