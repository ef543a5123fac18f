//! Scheduler enums, configuration, and queue entries

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Scheduling priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// User-facing / production traffic.
    P0,
    /// Normal (default).
    P1,
    /// Batch / offline.
    P2,
}

/// Priority ordering for dispatch (index 0 pops first).
pub const PRIORITY_ORDER: [Priority; 3] = [Priority::P0, Priority::P1, Priority::P2];

impl Priority {
    /// The priority one level above, or `None` if already P0.
    pub fn above(self) -> Option<Priority> {
        match self {
            Priority::P0 => None,
            Priority::P1 => Some(Priority::P0),
            Priority::P2 => Some(Priority::P1),
        }
    }
}

/// Result of a scheduler admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitDecision {
    /// Dispatch immediately; the inflight slot is already taken.
    Allow,
    /// Capacity exhausted; the entry was queued.
    Queued { step_id: String, reason: String },
    /// Queue at capacity; the entry was dropped.
    Rejected { reason: String },
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub org_max_inflight: usize,
    pub team_max_inflight: usize,
    pub org_queue_capacity: usize,
    pub team_queue_capacity: usize,
    pub starvation_threshold_ms: u64,
    /// Weighted-round-robin weight per team (default 1).
    pub team_weights: HashMap<String, u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            org_max_inflight: 32,
            team_max_inflight: 8,
            org_queue_capacity: 10_000,
            team_queue_capacity: 2_000,
            starvation_threshold_ms: 30_000,
            team_weights: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn team_weight(&self, team: &str) -> u32 {
        self.team_weights.get(team).copied().unwrap_or(1)
    }
}

/// An entry in the scheduler queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub step_id: String,
    pub run_id: String,
    pub session_id: String,
    pub org: String,
    pub team: String,
    pub priority: Priority,
    pub queued_at: Instant,
    pub kind: String,
    pub model: String,
}

impl QueueEntry {
    pub fn new(
        step_id: impl Into<String>,
        run_id: impl Into<String>,
        org: impl Into<String>,
        team: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            run_id: run_id.into(),
            session_id: String::new(),
            org: org.into(),
            team: team.into(),
            priority,
            queued_at: Instant::now(),
            kind: "llm_call".to_string(),
            model: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_promotion_ladder() {
        assert_eq!(Priority::P2.above(), Some(Priority::P1));
        assert_eq!(Priority::P1.above(), Some(Priority::P0));
        assert_eq!(Priority::P0.above(), None);
    }

    #[test]
    fn test_default_team_weight_is_one() {
        let mut config = SchedulerConfig::default();
        config.team_weights.insert("search".into(), 4);
        assert_eq!(config.team_weight("search"), 4);
        assert_eq!(config.team_weight("anything-else"), 1);
    }
}
