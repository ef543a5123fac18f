//! Standard event sinks: stdout, JSONL file, composite fan-out, null.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::events::{Event, EventSink};
use crate::types::{Severity, SinkError};

/// Serialises each event to one JSON line on stdout.
///
/// Events below `min_severity` are dropped.
pub struct StdoutSink {
    min_severity: Severity,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            min_severity: Severity::Debug,
        }
    }

    pub fn with_min_severity(min_severity: Severity) -> Self {
        Self { min_severity }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for StdoutSink {
    fn emit(&self, event: &Event) -> Result<(), SinkError> {
        if event.severity < self.min_severity {
            return Ok(());
        }
        let line = serde_json::to_string(event)?;
        println!("{}", line);
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
///
/// Writes are serialised under one lock and issued as a single append so
/// concurrent emitters never interleave within a line. Queries are a
/// linear scan of the file.
pub struct JsonlFileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl EventSink for JsonlFileSink {
    fn emit(&self, event: &Event) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn query_by_run_id(&self, run_id: &str) -> Vec<Value> {
        let _guard = self.write_lock.lock();
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        let mut results = Vec::new();
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<Value>(&line) {
                if value.get("run_id").and_then(|v| v.as_str()) == Some(run_id) {
                    results.push(value);
                }
            }
        }
        results
    }
}

/// Fans out to child sinks, catching per-child failures.
pub struct CompositeSink {
    children: Vec<Arc<dyn EventSink>>,
}

impl CompositeSink {
    pub fn new(children: Vec<Arc<dyn EventSink>>) -> Self {
        Self { children }
    }
}

impl EventSink for CompositeSink {
    fn emit(&self, event: &Event) -> Result<(), SinkError> {
        for child in &self.children {
            if let Err(e) = child.emit(event) {
                tracing::warn!("composite sink child failed: {}", e);
            }
        }
        Ok(())
    }

    fn query_by_run_id(&self, run_id: &str) -> Vec<Value> {
        for child in &self.children {
            let results = child.query_by_run_id(run_id);
            if !results.is_empty() {
                return results;
            }
        }
        Vec::new()
    }
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) -> Result<(), SinkError> {
        Ok(())
    }
}
