//! Core types and data structures for the containment engine

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod context;
pub mod error;

pub use context::*;
pub use error::*;

/// Outcome of a containment policy evaluation.
///
/// Variants are declared in escalation order so that `Ord` gives the
/// combination rule directly: when two boundaries disagree, the higher
/// decision wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "ALLOW")]
    Allow,
    #[serde(rename = "DEGRADE")]
    Degrade,
    #[serde(rename = "RETRY")]
    Retry,
    #[serde(rename = "QUEUE")]
    Queue,
    #[serde(rename = "QUARANTINE")]
    Quarantine,
    #[serde(rename = "HALT")]
    Halt,
}

impl Decision {
    /// Combine two decisions; the more severe one wins.
    pub fn escalate(self, other: Decision) -> Decision {
        self.max(other)
    }

    /// Wire name used in event lines and export payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Degrade => "DEGRADE",
            Decision::Retry => "RETRY",
            Decision::Queue => "QUEUE",
            Decision::Quarantine => "QUARANTINE",
            Decision::Halt => "HALT",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity attached to structured event lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique identifier for nodes in the per-chain execution graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time-ordered identifier for event lines (UUIDv7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_escalation_order() {
        assert!(Decision::Allow < Decision::Degrade);
        assert!(Decision::Degrade < Decision::Retry);
        assert!(Decision::Retry < Decision::Queue);
        assert!(Decision::Queue < Decision::Quarantine);
        assert!(Decision::Quarantine < Decision::Halt);
    }

    #[test]
    fn test_decision_escalate_picks_highest() {
        assert_eq!(Decision::Allow.escalate(Decision::Halt), Decision::Halt);
        assert_eq!(Decision::Retry.escalate(Decision::Degrade), Decision::Retry);
        assert_eq!(Decision::Queue.escalate(Decision::Queue), Decision::Queue);
    }

    #[test]
    fn test_decision_serializes_to_wire_name() {
        let json = serde_json::to_string(&Decision::Quarantine).unwrap();
        assert_eq!(json, "\"QUARANTINE\"");
        let back: Decision = serde_json::from_str("\"HALT\"").unwrap();
        assert_eq!(back, Decision::Halt);
    }

    #[test]
    fn test_severity_lowercase_wire_format() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn test_event_ids_are_uuid_v7() {
        let id = EventId::new();
        assert_eq!(id.0.get_version_num(), 7);
    }
}
