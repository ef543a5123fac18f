//! Structured event stream for the containment engine
//!
//! Two record kinds live here. [`SafetyEvent`] is the immutable record of a
//! non-ALLOW decision (or lifecycle milestone) appended to a chain's event
//! list. [`Event`] is the envelope written to sinks: one JSON line with a
//! time-ordered id, severity, labels, and a free-form payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::types::{Decision, EventId, Severity, SinkError};

pub mod sinks;

pub use sinks::{CompositeSink, JsonlFileSink, NullSink, StdoutSink};

/// String constants for all event types.
pub mod event_types {
    // Run lifecycle
    pub const RUN_CREATED: &str = "run.created";
    pub const RUN_STATE_CHANGED: &str = "run.state_changed";
    pub const RUN_FINISHED: &str = "run.finished";

    // Session lifecycle
    pub const SESSION_CREATED: &str = "session.created";
    pub const SESSION_FINISHED: &str = "session.finished";

    // Step lifecycle
    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_SUCCEEDED: &str = "step.succeeded";
    pub const STEP_FAILED: &str = "step.failed";

    // LLM calls
    pub const LLM_CALL_STARTED: &str = "llm.call.started";
    pub const LLM_CALL_SUCCEEDED: &str = "llm.call.succeeded";
    pub const LLM_CALL_FAILED: &str = "llm.call.failed";

    // Tool calls
    pub const TOOL_CALL_STARTED: &str = "tool.call.started";
    pub const TOOL_CALL_SUCCEEDED: &str = "tool.call.succeeded";
    pub const TOOL_CALL_FAILED: &str = "tool.call.failed";

    // Retry
    pub const RETRY_SCHEDULED: &str = "retry.scheduled";
    pub const RETRY_EXHAUSTED: &str = "retry.exhausted";

    // Circuit breaker
    pub const BREAKER_OPENED: &str = "breaker.opened";
    pub const BREAKER_HALF_OPEN: &str = "breaker.half_open";
    pub const BREAKER_CLOSED: &str = "breaker.closed";

    // Budget
    pub const BUDGET_CHECK: &str = "budget.check";
    pub const BUDGET_EXCEEDED: &str = "BUDGET_EXCEEDED";
    pub const BUDGET_WINDOW_EXCEEDED: &str = "BUDGET_WINDOW_EXCEEDED";
    pub const TOKEN_BUDGET_EXCEEDED: &str = "TOKEN_BUDGET_EXCEEDED";
    pub const INPUT_COMPRESSION: &str = "INPUT_COMPRESSION";
    pub const SAFE_MODE: &str = "SAFE_MODE";
    pub const POLICY_APPLIED: &str = "POLICY_APPLIED";
    pub const POLICY_DENIED: &str = "POLICY_DENIED";

    // Control signals
    pub const CHAIN_TIMEOUT: &str = "TIMEOUT";
    pub const CHAIN_CIRCUIT_OPEN: &str = "CHAIN_CIRCUIT_OPEN";
    pub const ABORT_TRIGGERED: &str = "abort.triggered";
    pub const TIMEOUT_TRIGGERED: &str = "timeout.triggered";
    pub const LOOP_DETECTED: &str = "loop.detected";
    pub const MAX_STEPS_EXCEEDED: &str = "session.max_steps_exceeded";
    pub const PARTIAL_PRESERVED: &str = "partial.preserved";

    // Scheduler
    pub const SCHEDULER_ADMIT_ALLOWED: &str = "scheduler.admit.allowed";
    pub const SCHEDULER_ADMIT_QUEUED: &str = "scheduler.admit.queued";
    pub const SCHEDULER_ADMIT_REJECTED: &str = "scheduler.admit.rejected";
    pub const SCHEDULER_QUEUE_ENQUEUED: &str = "scheduler.queue.enqueued";
    pub const SCHEDULER_QUEUE_DEQUEUED: &str = "scheduler.queue.dequeued";
    pub const SCHEDULER_QUEUE_DROPPED: &str = "scheduler.queue.dropped";
    pub const SCHEDULER_INFLIGHT_INC: &str = "scheduler.inflight.inc";
    pub const SCHEDULER_INFLIGHT_DEC: &str = "scheduler.inflight.dec";
    pub const SCHEDULER_PRIORITY_BOOST: &str = "scheduler.priority_boost";
}

/// Immutable record of a containment decision.
///
/// Created when a hook returns a non-ALLOW result or when a lifecycle
/// milestone fires. Once appended to a chain's event list it is never
/// mutated or removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyEvent {
    /// Machine-readable category, e.g. `"BUDGET_WINDOW_EXCEEDED"` or
    /// `"tool.call.failed"`.
    pub event_type: String,
    pub decision: Decision,
    pub reason: String,
    /// Name of the hook or layer that produced the decision.
    pub hook: String,
    pub request_id: Option<String>,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SafetyEvent {
    pub fn new(
        event_type: impl Into<String>,
        decision: Decision,
        reason: impl Into<String>,
        hook: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            decision,
            reason: reason.into(),
            hook: hook.into(),
            request_id: None,
            ts: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Static labels attached to every event line of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Labels {
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub model_default: String,
}

/// One structured event line as written by the sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub ts: DateTime<Utc>,
    pub run_id: String,
    pub session_id: Option<String>,
    pub step_id: Option<String>,
    pub parent_step_id: Option<String>,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            event_id: EventId::new(),
            ts: Utc::now(),
            run_id: run_id.into(),
            session_id: None,
            step_id: None,
            parent_step_id: None,
            severity: Severity::Info,
            event_type: event_type.into(),
            labels: Labels::default(),
            payload: Map::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_step_id(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Wrap a [`SafetyEvent`] for the sink stream. The chain id becomes the
    /// run id and the decision details move into the payload.
    pub fn from_safety_event(event: &SafetyEvent, chain_id: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("decision".into(), Value::String(event.decision.as_str().into()));
        payload.insert("reason".into(), Value::String(event.reason.clone()));
        payload.insert("hook".into(), Value::String(event.hook.clone()));
        if let Some(request_id) = &event.request_id {
            payload.insert("request_id".into(), Value::String(request_id.clone()));
        }
        if !event.metadata.is_empty() {
            payload.insert("metadata".into(), Value::Object(event.metadata.clone()));
        }
        let severity = match event.decision {
            Decision::Allow => Severity::Info,
            Decision::Degrade | Decision::Retry | Decision::Queue => Severity::Warn,
            Decision::Quarantine | Decision::Halt => Severity::Error,
        };
        let mut wrapped = Event::new(event.event_type.clone(), chain_id).with_severity(severity);
        wrapped.ts = event.ts;
        wrapped.payload = payload;
        wrapped
    }
}

/// Destination for event lines.
///
/// `emit` must serialise writes internally; the bus calls it from many
/// threads. `query_by_run_id` is optional and defaults to empty.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event) -> Result<(), SinkError>;

    fn query_by_run_id(&self, _run_id: &str) -> Vec<Value> {
        Vec::new()
    }
}

/// Dispatches events to all registered sinks.
///
/// Individual sink errors are logged and skipped, never propagated.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn emit(&self, event: &Event) {
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event) {
                tracing::warn!("event sink failed for event {}: {}", event.event_type, e);
            }
        }
    }

    /// Query events by run id via the first sink that returns any.
    pub fn query_by_run_id(&self, run_id: &str) -> Vec<Value> {
        for sink in &self.sinks {
            let results = sink.query_by_run_id(run_id);
            if !results.is_empty() {
                return results;
            }
        }
        Vec::new()
    }
}

/// Build the default sink set: stdout + JSONL file, or the null sink when
/// `EVENTS_DISABLED` is set.
pub fn default_sinks(jsonl_path: impl Into<std::path::PathBuf>) -> Vec<Arc<dyn EventSink>> {
    if crate::config::events_disabled() {
        return vec![Arc::new(NullSink)];
    }
    vec![
        Arc::new(StdoutSink::new()),
        Arc::new(JsonlFileSink::new(jsonl_path)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ListSink {
        events: Mutex<Vec<Event>>,
    }

    impl ListSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }
    }

    impl EventSink for ListSink {
        fn emit(&self, event: &Event) -> Result<(), SinkError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn emit(&self, _event: &Event) -> Result<(), SinkError> {
            Err(SinkError::Io("boom".into()))
        }
    }

    #[test]
    fn test_bus_fans_out_to_all_sinks() {
        let a = Arc::new(ListSink::new());
        let b = Arc::new(ListSink::new());
        let bus = EventBus::new(vec![a.clone(), b.clone()]);

        bus.emit(&Event::new(event_types::RUN_CREATED, "run-1"));

        assert_eq!(a.events.lock().len(), 1);
        assert_eq!(b.events.lock().len(), 1);
    }

    #[test]
    fn test_bus_isolates_failing_sink() {
        let good = Arc::new(ListSink::new());
        let bus = EventBus::new(vec![Arc::new(FailingSink), good.clone()]);

        bus.emit(&Event::new(event_types::RUN_CREATED, "run-1"));

        assert_eq!(good.events.lock().len(), 1);
    }

    #[test]
    fn test_safety_event_wrapping_preserves_decision() {
        let se = SafetyEvent::new(
            event_types::BUDGET_EXCEEDED,
            Decision::Halt,
            "over limit",
            "BudgetEnforcer",
        )
        .with_request_id("req-9");
        let event = Event::from_safety_event(&se, "chain-1");

        assert_eq!(event.run_id, "chain-1");
        assert_eq!(event.event_type, event_types::BUDGET_EXCEEDED);
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(
            event.payload.get("decision").and_then(|v| v.as_str()),
            Some("HALT")
        );
        assert_eq!(
            event.payload.get("request_id").and_then(|v| v.as_str()),
            Some("req-9")
        );
    }
}
