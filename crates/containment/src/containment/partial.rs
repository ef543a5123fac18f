//! Bounded preservation of partial agent output
//!
//! When a chain halts mid-run, whatever the agent produced so far is worth
//! keeping. The buffer is append-only with chunk-count and byte-size caps;
//! overflow is a recoverable signal carrying evidence of exactly what was
//! truncated, never a crash.

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::types::{PartialBufferOverflow, TruncationPoint};

pub const DEFAULT_MAX_CHUNKS: usize = 256;
pub const DEFAULT_MAX_BYTES: usize = 1_048_576;

#[derive(Debug, Default)]
struct BufferState {
    chunks: Vec<String>,
    total_bytes: usize,
    truncated: bool,
}

/// Append-only buffer for partial results with hard caps.
#[derive(Debug)]
pub struct PartialResultBuffer {
    max_chunks: usize,
    max_bytes: usize,
    state: Mutex<BufferState>,
}

impl Default for PartialResultBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNKS, DEFAULT_MAX_BYTES)
    }
}

impl PartialResultBuffer {
    pub fn new(max_chunks: usize, max_bytes: usize) -> Self {
        Self {
            max_chunks,
            max_bytes,
            state: Mutex::new(BufferState::default()),
        }
    }

    /// Append a chunk. On overflow the chunk is dropped, the buffer is
    /// marked truncated, and the error reports what was kept.
    pub fn append(&self, chunk: &str) -> Result<(), PartialBufferOverflow> {
        let mut state = self.state.lock();

        if state.chunks.len() >= self.max_chunks {
            state.truncated = true;
            return Err(PartialBufferOverflow {
                kept_chunks: state.chunks.len(),
                total_chunks: state.chunks.len() + 1,
                kept_bytes: state.total_bytes,
                total_bytes: state.total_bytes + chunk.len(),
                truncation_point: TruncationPoint::ChunkCount,
            });
        }

        if state.total_bytes + chunk.len() > self.max_bytes {
            state.truncated = true;
            return Err(PartialBufferOverflow {
                kept_chunks: state.chunks.len(),
                total_chunks: state.chunks.len() + 1,
                kept_bytes: state.total_bytes,
                total_bytes: state.total_bytes + chunk.len(),
                truncation_point: TruncationPoint::ByteSize,
            });
        }

        state.total_bytes += chunk.len();
        state.chunks.push(chunk.to_string());
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    pub fn byte_count(&self) -> usize {
        self.state.lock().total_bytes
    }

    pub fn is_truncated(&self) -> bool {
        self.state.lock().truncated
    }

    /// Everything accepted so far, joined in append order.
    pub fn joined(&self) -> String {
        self.state.lock().chunks.join("")
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.chunks.clear();
        state.total_bytes = 0;
        state.truncated = false;
    }

    /// JSON snapshot; the `truncated` key appears only after an overflow.
    pub fn snapshot(&self) -> Map<String, Value> {
        let state = self.state.lock();
        let mut map = Map::new();
        map.insert(
            "chunks".into(),
            Value::Array(state.chunks.iter().cloned().map(Value::String).collect()),
        );
        map.insert("bytes".into(), Value::from(state.total_bytes));
        if state.truncated {
            map.insert("truncated".into(), Value::Bool(true));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_join() {
        let buf = PartialResultBuffer::default();
        buf.append("hello ").unwrap();
        buf.append("world").unwrap();
        assert_eq!(buf.joined(), "hello world");
        assert_eq!(buf.chunk_count(), 2);
        assert_eq!(buf.byte_count(), 11);
    }

    #[test]
    fn test_chunk_count_overflow_evidence() {
        let buf = PartialResultBuffer::new(3, 1024);
        for _ in 0..3 {
            buf.append("x").unwrap();
        }
        let err = buf.append("x").unwrap_err();
        assert_eq!(err.truncation_point, TruncationPoint::ChunkCount);
        assert_eq!(err.kept_chunks, 3);
        assert_eq!(err.total_chunks, 4);
        assert!(buf.is_truncated());
    }

    #[test]
    fn test_byte_size_overflow_evidence() {
        let buf = PartialResultBuffer::new(100, 10);
        buf.append("123456789").unwrap();
        let err = buf.append("ab").unwrap_err();
        assert_eq!(err.truncation_point, TruncationPoint::ByteSize);
        assert_eq!(err.kept_bytes, 9);
        assert_eq!(err.total_bytes, 11);
        // The overflowing chunk was dropped, earlier content kept.
        assert_eq!(buf.joined(), "123456789");
    }

    #[test]
    fn test_snapshot_truncated_key_only_after_overflow() {
        let buf = PartialResultBuffer::new(1, 1024);
        buf.append("kept").unwrap();
        assert!(!buf.snapshot().contains_key("truncated"));

        let _ = buf.append("dropped");
        assert_eq!(buf.snapshot().get("truncated"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_clear_resets_everything() {
        let buf = PartialResultBuffer::new(1, 1024);
        buf.append("a").unwrap();
        let _ = buf.append("b");
        buf.clear();
        assert_eq!(buf.chunk_count(), 0);
        assert!(!buf.is_truncated());
        buf.append("fresh").unwrap();
    }
}
