//! Hierarchical scheduler: admission, weighted fair queuing, starvation
//! promotion
//!
//! Admission is gated by process-wide inflight caps per organisation and
//! per team. A step that cannot run immediately is queued; a step that
//! cannot even be queued is rejected. Dispatch drains the weighted fair
//! queue as completions free inflight slots.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::events::{event_types, Event, EventBus};
use crate::types::Severity;

pub mod queue;
pub mod types;

pub use queue::{TeamQueue, WeightedFairQueue};
pub use types::{AdmitDecision, Priority, QueueEntry, SchedulerConfig, PRIORITY_ORDER};

struct SchedulerState {
    queue: WeightedFairQueue,
    org_inflight: usize,
    team_inflight: HashMap<String, usize>,
}

/// Admission controller over the weighted fair queue.
pub struct Scheduler {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    bus: Option<EventBus>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                queue: WeightedFairQueue::new(config.clone()),
                org_inflight: 0,
                team_inflight: HashMap::new(),
            }),
            config,
            bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Admit a step. Returns `Allow` with the inflight slot taken,
    /// `Queued` when capacity is exhausted, or `Rejected` when the queue
    /// itself is full.
    pub fn admit(&self, entry: QueueEntry) -> AdmitDecision {
        let mut state = self.state.lock();

        let team_inflight = state.team_inflight.get(&entry.team).copied().unwrap_or(0);
        let has_capacity = state.org_inflight < self.config.org_max_inflight
            && team_inflight < self.config.team_max_inflight
            && state.queue.total_size() == 0;

        if has_capacity {
            state.org_inflight += 1;
            *state.team_inflight.entry(entry.team.clone()).or_insert(0) += 1;
            drop(state);
            self.emit(event_types::SCHEDULER_ADMIT_ALLOWED, &entry, Severity::Info);
            self.emit(event_types::SCHEDULER_INFLIGHT_INC, &entry, Severity::Debug);
            return AdmitDecision::Allow;
        }

        if state.queue.is_full() {
            drop(state);
            self.emit(event_types::SCHEDULER_ADMIT_REJECTED, &entry, Severity::Warn);
            return AdmitDecision::Rejected {
                reason: "org queue at capacity".to_string(),
            };
        }

        let step_id = entry.step_id.clone();
        let reason = if state.org_inflight >= self.config.org_max_inflight {
            "org inflight cap reached".to_string()
        } else if team_inflight >= self.config.team_max_inflight {
            format!("team '{}' inflight cap reached", entry.team)
        } else {
            "entries already queued ahead".to_string()
        };

        if !state.queue.enqueue(entry.clone()) {
            drop(state);
            self.emit(event_types::SCHEDULER_ADMIT_REJECTED, &entry, Severity::Warn);
            return AdmitDecision::Rejected {
                reason: format!("team '{}' queue at capacity", entry.team),
            };
        }
        drop(state);
        self.emit(event_types::SCHEDULER_ADMIT_QUEUED, &entry, Severity::Info);
        self.emit(event_types::SCHEDULER_QUEUE_ENQUEUED, &entry, Severity::Debug);
        AdmitDecision::Queued { step_id, reason }
    }

    /// Pop the next queued entry per weighted round robin, taking its
    /// inflight slot. Returns `None` when the org cap is reached or the
    /// queue is empty.
    pub fn dispatch_next(&self) -> Option<QueueEntry> {
        let mut state = self.state.lock();
        if state.org_inflight >= self.config.org_max_inflight {
            return None;
        }
        let entry = state.queue.dispatch()?;
        state.org_inflight += 1;
        *state.team_inflight.entry(entry.team.clone()).or_insert(0) += 1;
        drop(state);
        self.emit(event_types::SCHEDULER_QUEUE_DEQUEUED, &entry, Severity::Debug);
        self.emit(event_types::SCHEDULER_INFLIGHT_INC, &entry, Severity::Debug);
        Some(entry)
    }

    /// Release the inflight slot taken at admission or dispatch.
    pub fn complete(&self, entry: &QueueEntry) {
        let mut state = self.state.lock();
        state.org_inflight = state.org_inflight.saturating_sub(1);
        if let Some(count) = state.team_inflight.get_mut(&entry.team) {
            *count = count.saturating_sub(1);
        }
        drop(state);
        self.emit(event_types::SCHEDULER_INFLIGHT_DEC, entry, Severity::Debug);
    }

    /// Promote entries that have waited beyond the starvation threshold.
    pub fn promote_starved(&self) -> Vec<QueueEntry> {
        let threshold = Duration::from_millis(self.config.starvation_threshold_ms);
        let promoted = self.state.lock().queue.promote_all_starved(threshold);
        for entry in &promoted {
            self.emit(event_types::SCHEDULER_PRIORITY_BOOST, entry, Severity::Info);
        }
        promoted
    }

    pub fn org_inflight(&self) -> usize {
        self.state.lock().org_inflight
    }

    pub fn team_inflight(&self, team: &str) -> usize {
        self.state.lock().team_inflight.get(team).copied().unwrap_or(0)
    }

    pub fn queued_total(&self) -> usize {
        self.state.lock().queue.total_size()
    }

    fn emit(&self, event_type: &str, entry: &QueueEntry, severity: Severity) {
        let Some(bus) = &self.bus else { return };
        let mut payload = Map::new();
        payload.insert("step_id".into(), Value::String(entry.step_id.clone()));
        payload.insert("org".into(), Value::String(entry.org.clone()));
        payload.insert("team".into(), Value::String(entry.team.clone()));
        payload.insert("priority".into(), Value::String(format!("{:?}", entry.priority)));
        let event = Event::new(event_type, &entry.run_id)
            .with_severity(severity)
            .with_step_id(&entry.step_id)
            .with_payload(payload);
        bus.emit(&event);
    }
}
