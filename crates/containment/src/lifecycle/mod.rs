//! Run / Session / Step state machine
//!
//! Explicit transition tables for long-running orchestrations. Every
//! allowed transition is listed; anything else fails with
//! [`ContainmentError::InvalidTransition`]. Terminal transitions stamp
//! `finished_at`, and a failed run records a short error summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::events::Labels;
use crate::types::{ContainmentError, ContainmentResult};

pub mod persistence;

pub use persistence::{JsonFileBackend, MemoryBackend, PersistenceBackend};

/// Run lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Degraded,
    Halted,
    Quarantined,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Degraded => "degraded",
            RunStatus::Halted => "halted",
            RunStatus::Quarantined => "quarantined",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled)
    }

    fn allowed_transitions(&self) -> &'static [RunStatus] {
        match self {
            RunStatus::Running => &[
                RunStatus::Degraded,
                RunStatus::Halted,
                RunStatus::Quarantined,
                RunStatus::Succeeded,
                RunStatus::Failed,
                RunStatus::Canceled,
            ],
            RunStatus::Degraded => &[
                RunStatus::Running,
                RunStatus::Halted,
                RunStatus::Quarantined,
                RunStatus::Succeeded,
                RunStatus::Failed,
                RunStatus::Canceled,
            ],
            RunStatus::Halted => &[RunStatus::Failed, RunStatus::Canceled],
            RunStatus::Quarantined => &[RunStatus::Halted, RunStatus::Failed, RunStatus::Canceled],
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled => &[],
        }
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Halted,
    Succeeded,
    Failed,
    Canceled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Halted => "halted",
            SessionStatus::Succeeded => "succeeded",
            SessionStatus::Failed => "failed",
            SessionStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Succeeded | SessionStatus::Failed | SessionStatus::Canceled
        )
    }

    fn allowed_transitions(&self) -> &'static [SessionStatus] {
        match self {
            SessionStatus::Running => &[
                SessionStatus::Halted,
                SessionStatus::Succeeded,
                SessionStatus::Failed,
                SessionStatus::Canceled,
            ],
            SessionStatus::Halted => &[SessionStatus::Failed, SessionStatus::Canceled],
            SessionStatus::Succeeded | SessionStatus::Failed | SessionStatus::Canceled => &[],
        }
    }
}

/// Step lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Succeeded,
    Failed,
    Canceled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Started)
    }

    fn allowed_transitions(&self) -> &'static [StepStatus] {
        match self {
            StepStatus::Started => {
                &[StepStatus::Succeeded, StepStatus::Failed, StepStatus::Canceled]
            }
            _ => &[],
        }
    }
}

/// Spend tracked on a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunBudget {
    pub limit_usd: f64,
    pub used_usd: f64,
    pub limit_tokens: u64,
    pub used_tokens: u64,
}

/// Per-session counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCounters {
    pub steps_total: u64,
    pub llm_calls: u64,
    pub tool_calls: u64,
    pub retries_total: u64,
}

/// Classified error attached to a failed step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepError {
    pub error_type: String,
    pub message: String,
    pub retryable: bool,
}

/// One long-running orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub labels: Labels,
    pub budget: RunBudget,
    pub error_summary: Option<String>,
}

impl Run {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7().to_string(),
            created_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            labels: Labels::default(),
            budget: RunBudget::default(),
            error_summary: None,
        }
    }
}

impl Default for Run {
    fn default() -> Self {
        Self::new()
    }
}

/// One agent session inside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub agent_name: String,
    pub max_steps: u64,
    pub counters: SessionCounters,
}

impl Session {
    pub fn new(run_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::now_v7().to_string(),
            run_id: run_id.into(),
            created_at: Utc::now(),
            finished_at: None,
            status: SessionStatus::Running,
            agent_name: agent_name.into(),
            max_steps: 100,
            counters: SessionCounters::default(),
        }
    }
}

/// One call inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub session_id: String,
    pub run_id: String,
    pub parent_step_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: StepStatus,
    pub model: Option<String>,
    pub tool: Option<String>,
    pub latency_ms: Option<u64>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub cost_usd: Option<f64>,
    pub error: Option<StepError>,
}

impl Step {
    pub fn new(session_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            step_id: Uuid::now_v7().to_string(),
            session_id: session_id.into(),
            run_id: run_id.into(),
            parent_step_id: None,
            created_at: Utc::now(),
            finished_at: None,
            status: StepStatus::Started,
            model: None,
            tool: None,
            latency_ms: None,
            tokens_in: None,
            tokens_out: None,
            cost_usd: None,
            error: None,
        }
    }
}

/// Transition a run in place. Terminal transitions stamp `finished_at`; a
/// failed run records the reason as its error summary.
pub fn transition_run(run: &mut Run, new_status: RunStatus, reason: &str) -> ContainmentResult<()> {
    if !run.status.allowed_transitions().contains(&new_status) {
        return Err(ContainmentError::InvalidTransition {
            entity: "Run",
            from: run.status.as_str().to_string(),
            to: new_status.as_str().to_string(),
        });
    }
    run.status = new_status;
    if new_status.is_terminal() {
        run.finished_at = Some(Utc::now());
        if new_status == RunStatus::Failed && !reason.is_empty() {
            run.error_summary = Some(reason.to_string());
        }
    }
    tracing::debug!(run_id = run.run_id.as_str(), status = new_status.as_str(), "run transition");
    Ok(())
}

/// Transition a session in place.
pub fn transition_session(
    session: &mut Session,
    new_status: SessionStatus,
) -> ContainmentResult<()> {
    if !session.status.allowed_transitions().contains(&new_status) {
        return Err(ContainmentError::InvalidTransition {
            entity: "Session",
            from: session.status.as_str().to_string(),
            to: new_status.as_str().to_string(),
        });
    }
    session.status = new_status;
    if new_status.is_terminal() {
        session.finished_at = Some(Utc::now());
    }
    Ok(())
}

/// Transition a step in place.
pub fn transition_step(step: &mut Step, new_status: StepStatus) -> ContainmentResult<()> {
    if !step.status.allowed_transitions().contains(&new_status) {
        return Err(ContainmentError::InvalidTransition {
            entity: "Step",
            from: format!("{:?}", step.status).to_lowercase(),
            to: format!("{:?}", new_status).to_lowercase(),
        });
    }
    step.status = new_status;
    if new_status.is_terminal() {
        step.finished_at = Some(Utc::now());
    }
    Ok(())
}

/// Serialise a run to the persistence payload (enum values as strings).
pub fn run_to_value(run: &Run) -> Value {
    serde_json::to_value(run).unwrap_or(Value::Null)
}

/// Restore a run from a persistence payload.
pub fn run_from_value(value: &Value) -> Option<Run> {
    serde_json::from_value(value.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_RUN_STATUSES: [RunStatus; 7] = [
        RunStatus::Running,
        RunStatus::Degraded,
        RunStatus::Halted,
        RunStatus::Quarantined,
        RunStatus::Succeeded,
        RunStatus::Failed,
        RunStatus::Canceled,
    ];

    #[test]
    fn test_run_happy_path() {
        let mut run = Run::new();
        transition_run(&mut run, RunStatus::Succeeded, "").unwrap();
        assert!(run.finished_at.is_some());
        assert!(run.error_summary.is_none());
    }

    #[test]
    fn test_run_failure_records_summary() {
        let mut run = Run::new();
        transition_run(&mut run, RunStatus::Halted, "").unwrap();
        transition_run(&mut run, RunStatus::Failed, "budget exhausted").unwrap();
        assert_eq!(run.error_summary.as_deref(), Some("budget exhausted"));
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_degraded_can_recover_to_running() {
        let mut run = Run::new();
        transition_run(&mut run, RunStatus::Degraded, "").unwrap();
        transition_run(&mut run, RunStatus::Running, "").unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());
    }

    #[test]
    fn test_terminal_states_admit_nothing() {
        for terminal in [RunStatus::Succeeded, RunStatus::Failed, RunStatus::Canceled] {
            for target in ALL_RUN_STATUSES {
                let mut run = Run::new();
                run.status = terminal;
                let err = transition_run(&mut run, target, "").unwrap_err();
                assert!(matches!(err, ContainmentError::InvalidTransition { .. }));
            }
        }
    }

    #[test]
    fn test_every_pair_matches_table_exactly() {
        for from in ALL_RUN_STATUSES {
            for to in ALL_RUN_STATUSES {
                let mut run = Run::new();
                run.status = from;
                let allowed = from.allowed_transitions().contains(&to);
                let result = transition_run(&mut run, to, "");
                assert_eq!(result.is_ok(), allowed, "pair {:?} -> {:?}", from, to);
                if allowed {
                    assert_eq!(run.finished_at.is_some(), to.is_terminal());
                }
            }
        }
    }

    #[test]
    fn test_halted_run_cannot_succeed() {
        let mut run = Run::new();
        transition_run(&mut run, RunStatus::Halted, "").unwrap();
        let err = transition_run(&mut run, RunStatus::Succeeded, "").unwrap_err();
        match err {
            ContainmentError::InvalidTransition { entity, from, to } => {
                assert_eq!(entity, "Run");
                assert_eq!(from, "halted");
                assert_eq!(to, "succeeded");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_session_table() {
        let mut session = Session::new("run-1", "researcher");
        transition_session(&mut session, SessionStatus::Halted).unwrap();
        transition_session(&mut session, SessionStatus::Failed).unwrap();
        assert!(session.finished_at.is_some());

        let mut fresh = Session::new("run-1", "researcher");
        transition_session(&mut fresh, SessionStatus::Succeeded).unwrap();
        let err = transition_session(&mut fresh, SessionStatus::Running).unwrap_err();
        assert!(matches!(err, ContainmentError::InvalidTransition { .. }));
    }

    #[test]
    fn test_step_single_hop() {
        let mut step = Step::new("s-1", "run-1");
        transition_step(&mut step, StepStatus::Succeeded).unwrap();
        assert!(step.finished_at.is_some());
        let err = transition_step(&mut step, StepStatus::Failed).unwrap_err();
        assert!(matches!(err, ContainmentError::InvalidTransition { .. }));
    }

    #[test]
    fn test_run_round_trips_through_value() {
        let mut run = Run::new();
        run.labels.team = "search".into();
        transition_run(&mut run, RunStatus::Degraded, "").unwrap();

        let value = run_to_value(&run);
        assert_eq!(value.get("status").and_then(|v| v.as_str()), Some("degraded"));

        let restored = run_from_value(&value).unwrap();
        assert_eq!(restored.status, RunStatus::Degraded);
        assert_eq!(restored.labels.team, "search");
        assert_eq!(restored.run_id, run.run_id);
    }
}
