//! Tamper-evident audit log
//!
//! Append-only JSONL where each record carries a SHA-256 hash chained from
//! the previous record. Verifying the chain detects any modification,
//! insertion, or deletion. Writes are serialised under one lock; the file
//! is opened in append mode per write and fsynced before the lock is
//! released.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::{ContainmentError, ContainmentResult};

const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Append-only hash-chained JSONL audit log.
///
/// Each line has the form
/// `{"ts": ..., "event_type": ..., "data": ..., "prev_hash": ..., "hash": ...}`
/// where `hash` is SHA-256 over `prev_hash || canonical_json(record without
/// "hash")`. The first record chains from a 64-zero genesis hash.
pub struct AuditLog {
    path: PathBuf,
    // Guards both the file append and the chained prev_hash.
    state: Mutex<String>,
}

impl AuditLog {
    /// Open (or create) an audit log at `path`, resuming the chain from
    /// the last record if the file already exists.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let prev_hash = Self::load_last_hash(&path);
        Self {
            path,
            state: Mutex::new(prev_hash),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append a new entry.
    pub fn write(&self, event_type: &str, data: Value) -> ContainmentResult<()> {
        let mut prev_hash = self.state.lock();

        let mut record = Map::new();
        record.insert("ts".into(), Value::String(chrono::Utc::now().to_rfc3339()));
        record.insert("event_type".into(), Value::String(event_type.to_string()));
        record.insert("data".into(), data);
        record.insert("prev_hash".into(), Value::String(prev_hash.clone()));
        let hash = Self::compute_hash(&record);
        record.insert("hash".into(), Value::String(hash.clone()));

        let mut line = serde_json::to_string(&record)
            .map_err(|e| ContainmentError::Backend(format!("audit serialization failed: {}", e)))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ContainmentError::Backend(format!("audit dir creation failed: {}", e))
                })?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ContainmentError::Backend(format!("audit open failed: {}", e)))?;
        file.write_all(line.as_bytes())
            .map_err(|e| ContainmentError::Backend(format!("audit write failed: {}", e)))?;
        file.sync_all()
            .map_err(|e| ContainmentError::Backend(format!("audit fsync failed: {}", e)))?;

        *prev_hash = hash;
        Ok(())
    }

    /// Walk the file and verify every record's hash and chaining. An empty
    /// or absent log is vacuously valid.
    pub fn verify_chain(&self) -> bool {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(_) => return true,
        };

        let mut prev = GENESIS_HASH.to_string();
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { return false };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(Value::Object(record)) = serde_json::from_str::<Value>(line) else {
                return false;
            };

            let stored_hash = match record.get("hash").and_then(Value::as_str) {
                Some(hash) => hash.to_string(),
                None => return false,
            };
            if record.get("prev_hash").and_then(Value::as_str) != Some(prev.as_str()) {
                return false;
            }

            let mut without_hash = record.clone();
            without_hash.remove("hash");
            if Self::compute_hash(&without_hash) != stored_hash {
                return false;
            }
            prev = stored_hash;
        }
        true
    }

    /// SHA-256 over `prev_hash || canonical_json(record)`. The canonical
    /// form relies on `serde_json::Map` keeping keys sorted.
    fn compute_hash(record: &Map<String, Value>) -> String {
        let prev = record
            .get("prev_hash")
            .and_then(Value::as_str)
            .unwrap_or(GENESIS_HASH);
        let canonical = serde_json::to_string(record).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(prev.as_bytes());
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn load_last_hash(path: &std::path::Path) -> String {
        let Ok(file) = std::fs::File::open(path) else {
            return GENESIS_HASH.to_string();
        };
        let mut last = GENESIS_HASH.to_string();
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<Value>(&line) {
                if let Some(hash) = record.get("hash").and_then(Value::as_str) {
                    last = hash.to_string();
                }
            }
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_empty_log_is_vacuously_valid() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        assert!(log.verify_chain());
    }

    #[test]
    fn test_write_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));

        log.write("POLICY_DENIED", json!({"policy": "budget"})).unwrap();
        log.write("CHAIN_HALTED", json!({"reason": "cost"})).unwrap();
        assert!(log.verify_chain());

        let content = std::fs::read_to_string(log.path()).unwrap();
        let first: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(
            first.get("prev_hash").and_then(Value::as_str),
            Some(GENESIS_HASH)
        );
    }

    #[test]
    fn test_tampering_breaks_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        log.write("A", json!({"n": 1})).unwrap();
        log.write("B", json!({"n": 2})).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let tampered = content.replace("\"n\":1", "\"n\":9");
        assert_ne!(content, tampered);
        std::fs::write(log.path(), tampered).unwrap();

        assert!(!log.verify_chain());
    }

    #[test]
    fn test_deleting_a_record_breaks_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        log.write("A", json!({})).unwrap();
        log.write("B", json!({})).unwrap();
        log.write("C", json!({})).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let without_middle: Vec<&str> = content
            .lines()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, l)| l)
            .collect();
        std::fs::write(log.path(), format!("{}\n", without_middle.join("\n"))).unwrap();

        assert!(!log.verify_chain());
    }

    #[test]
    fn test_reopening_resumes_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let log = AuditLog::new(&path);
        log.write("A", json!({"n": 1})).unwrap();
        drop(log);

        let reopened = AuditLog::new(&path);
        reopened.write("B", json!({"n": 2})).unwrap();
        assert!(reopened.verify_chain());
    }

    #[test]
    fn test_concurrent_writers_produce_a_valid_chain() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(AuditLog::new(dir.path().join("audit.jsonl")));

        let handles: Vec<_> = (0..10)
            .map(|writer| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        log.write("WRITE", json!({"writer": writer, "seq": i})).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().filter(|l| !l.trim().is_empty()).count(), 1000);
        assert!(log.verify_chain());

        let reopened = AuditLog::new(log.path());
        assert!(reopened.verify_chain());
    }
}
