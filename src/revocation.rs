//! Revocation ledger
//!
//! An append-only record of revoked serial numbers. Each serial may be revoked
//! once; a second revocation of the same serial is rejected with
//! [`CaError::AlreadyRevoked`] and the first entry stays authoritative.
//!
//! Two stores are provided:
//! - [`MemoryRevocationStore`]: process lifetime only
//! - [`FileRevocationStore`]: one JSON object per line, appended and synced on
//!   every revocation, replayed on open; a failed append is truncated away

use crate::append_log::{AppendLog, LogRecord};
use crate::error::{CaError, CaResult};
use crate::serial::normalize_serial;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reason recorded when the caller gives none
pub const DEFAULT_REVOCATION_REASON: &str = "unspecified";

/// One revoked serial number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub serial_number: String,
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
}

impl LogRecord for RevocationEntry {
    fn key(&self) -> &str {
        &self.serial_number
    }
}

/// Backing storage with unique-insert semantics per serial
pub trait RevocationStore: Send + Sync {
    /// Insert `entry`, failing with [`CaError::AlreadyRevoked`] if its serial exists
    fn insert(&self, entry: RevocationEntry) -> CaResult<()>;

    fn get(&self, serial_number: &str) -> CaResult<Option<RevocationEntry>>;

    /// All entries in insertion order
    fn entries(&self) -> CaResult<Vec<RevocationEntry>>;
}

fn insert_unique(log: &AppendLog<RevocationEntry>, entry: RevocationEntry) -> CaResult<()> {
    let serial = entry.serial_number.clone();
    if log.insert(entry)? {
        Ok(())
    } else {
        Err(CaError::AlreadyRevoked(serial))
    }
}

pub struct MemoryRevocationStore {
    log: AppendLog<RevocationEntry>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self {
            log: AppendLog::in_memory("revocation ledger"),
        }
    }
}

impl Default for MemoryRevocationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RevocationStore for MemoryRevocationStore {
    fn insert(&self, entry: RevocationEntry) -> CaResult<()> {
        insert_unique(&self.log, entry)
    }

    fn get(&self, serial_number: &str) -> CaResult<Option<RevocationEntry>> {
        Ok(self.log.get(serial_number))
    }

    fn entries(&self) -> CaResult<Vec<RevocationEntry>> {
        Ok(self.log.entries())
    }
}

/// Append-only JSON-lines file store
pub struct FileRevocationStore {
    path: PathBuf,
    log: AppendLog<RevocationEntry>,
}

impl FileRevocationStore {
    /// Open (or create) the ledger file and replay its entries
    ///
    /// A line that fails to parse is fatal: silently skipping it could un-revoke
    /// a certificate. Duplicate serials in the file keep their first entry.
    pub fn open(path: impl AsRef<Path>) -> CaResult<Self> {
        let path = path.as_ref().to_path_buf();
        let log = AppendLog::open(&path, "revocation ledger")?;
        Ok(Self { path, log })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RevocationStore for FileRevocationStore {
    fn insert(&self, entry: RevocationEntry) -> CaResult<()> {
        insert_unique(&self.log, entry)
    }

    fn get(&self, serial_number: &str) -> CaResult<Option<RevocationEntry>> {
        Ok(self.log.get(serial_number))
    }

    fn entries(&self) -> CaResult<Vec<RevocationEntry>> {
        Ok(self.log.entries())
    }
}

pub struct RevocationLedger {
    store: Box<dyn RevocationStore>,
}

impl RevocationLedger {
    pub fn new(store: Box<dyn RevocationStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryRevocationStore::new()))
    }

    /// Revoke `serial_number`, stamping the entry with the current time
    ///
    /// # Errors
    /// - [`CaError::InputFormat`] if the serial is not hex
    /// - [`CaError::AlreadyRevoked`] if the serial was revoked before
    /// - [`CaError::Storage`] / [`CaError::Io`] if the entry cannot be persisted
    pub fn record(&self, serial_number: &str, reason: Option<&str>) -> CaResult<RevocationEntry> {
        let serial = normalize_serial(serial_number)?;
        let reason = match reason.map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => DEFAULT_REVOCATION_REASON.to_string(),
        };
        let entry = RevocationEntry {
            serial_number: serial,
            reason,
            revoked_at: Utc::now(),
        };
        self.store.insert(entry.clone())?;
        info!(
            serial = %entry.serial_number,
            reason = %entry.reason,
            "Certificate revoked"
        );
        Ok(entry)
    }

    /// Revocation entry for `serial_number`, if any
    pub fn is_revoked(&self, serial_number: &str) -> CaResult<Option<RevocationEntry>> {
        let serial = normalize_serial(serial_number)?;
        let entry = self.store.get(&serial)?;
        debug!(serial = %serial, revoked = entry.is_some(), "Revocation lookup");
        Ok(entry)
    }

    /// All entries, most recently revoked first
    pub fn list(&self) -> CaResult<Vec<RevocationEntry>> {
        let mut entries = self.store.entries()?;
        // Reverse first so the stable sort keeps later insertions ahead on ties
        entries.reverse();
        entries.sort_by(|a, b| b.revoked_at.cmp(&a.revoked_at));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_and_lookup() {
        let ledger = RevocationLedger::in_memory();
        let entry = ledger.record("0ABCDEF", Some("key-compromise")).unwrap();
        assert_eq!(entry.serial_number, "abcdef");

        let found = ledger.is_revoked("abcdef").unwrap().unwrap();
        assert_eq!(found.reason, "key-compromise");
        assert!(ledger.is_revoked("123456").unwrap().is_none());
    }

    #[test]
    fn test_default_reason() {
        let ledger = RevocationLedger::in_memory();
        assert_eq!(ledger.record("01", None).unwrap().reason, "unspecified");
        assert_eq!(ledger.record("02", Some("  ")).unwrap().reason, "unspecified");
    }

    #[test]
    fn test_duplicate_revocation_keeps_first_entry() {
        let ledger = RevocationLedger::in_memory();
        ledger.record("beef", Some("superseded")).unwrap();
        let err = ledger.record("BEEF", Some("key-compromise")).unwrap_err();
        assert!(matches!(err, CaError::AlreadyRevoked(ref s) if s == "beef"));
        assert_eq!(ledger.is_revoked("beef").unwrap().unwrap().reason, "superseded");
        assert_eq!(ledger.list().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_serial_is_input_error() {
        let ledger = RevocationLedger::in_memory();
        assert!(matches!(
            ledger.record("not-hex", None),
            Err(CaError::InputFormat(_))
        ));
        assert!(matches!(
            ledger.is_revoked(""),
            Err(CaError::InputFormat(_))
        ));
    }

    #[test]
    fn test_list_most_recent_first() {
        let ledger = RevocationLedger::in_memory();
        ledger.record("a1", None).unwrap();
        ledger.record("a2", None).unwrap();
        ledger.record("a3", None).unwrap();
        let serials: Vec<String> = ledger
            .list()
            .unwrap()
            .into_iter()
            .map(|e| e.serial_number)
            .collect();
        assert_eq!(serials, vec!["a3", "a2", "a1"]);
    }

    #[test]
    fn test_concurrent_revocations_of_one_serial() {
        let ledger = Arc::new(RevocationLedger::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || ledger.record("cafe", Some(&format!("r{}", i))).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
        assert_eq!(ledger.list().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger").join("revocations.jsonl");
        {
            let ledger = RevocationLedger::new(Box::new(FileRevocationStore::open(&path).unwrap()));
            ledger.record("d00d", Some("key-compromise")).unwrap();
            ledger.record("f00d", None).unwrap();
        }

        let store = FileRevocationStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        let ledger = RevocationLedger::new(Box::new(store));
        assert_eq!(
            ledger.is_revoked("D00D").unwrap().unwrap().reason,
            "key-compromise"
        );
        assert!(matches!(
            ledger.record("f00d", None),
            Err(CaError::AlreadyRevoked(_))
        ));
        assert_eq!(ledger.list().unwrap().len(), 2);

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_corrupt_ledger_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revocations.jsonl");
        fs::write(&path, "{\"serial_number\":\"ab\"\n").unwrap();
        assert!(matches!(
            FileRevocationStore::open(&path),
            Err(CaError::Storage(_))
        ));
    }
}
