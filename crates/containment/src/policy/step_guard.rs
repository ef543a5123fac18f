//! Step ceiling for autonomous agent iterations

use parking_lot::Mutex;
use serde_json::Value;

use crate::policy::RuntimePolicy;
use crate::types::{PolicyContext, PolicyDecision};

#[derive(Debug, Default)]
struct StepState {
    current_step: u64,
    last_result: Option<Value>,
}

/// Limits the number of steps an autonomous agent can take.
///
/// When the ceiling is hit, the last partial result fed through `step` is
/// preserved so callers can extract whatever output the agent produced
/// before the halt.
#[derive(Debug)]
pub struct AgentStepGuard {
    max_steps: u64,
    state: Mutex<StepState>,
}

impl AgentStepGuard {
    pub fn new(max_steps: u64) -> Self {
        Self {
            max_steps,
            state: Mutex::new(StepState::default()),
        }
    }

    /// Record one agent step. Returns true if more steps are allowed.
    pub fn step(&self, result: Option<Value>) -> bool {
        let mut state = self.state.lock();
        state.current_step += 1;
        if let Some(result) = result {
            state.last_result = Some(result);
        }
        if state.current_step >= self.max_steps {
            tracing::warn!(
                current_step = state.current_step,
                max_steps = self.max_steps,
                "agent step limit reached"
            );
            return false;
        }
        true
    }

    pub fn current_step(&self) -> u64 {
        self.state.lock().current_step
    }

    pub fn remaining_steps(&self) -> u64 {
        let state = self.state.lock();
        self.max_steps.saturating_sub(state.current_step)
    }

    pub fn is_exceeded(&self) -> bool {
        self.state.lock().current_step >= self.max_steps
    }

    /// Last partial result, preserved across halts until `reset`.
    pub fn last_result(&self) -> Option<Value> {
        self.state.lock().last_result.clone()
    }
}

impl RuntimePolicy for AgentStepGuard {
    /// Uses the internal step counter, not `context.step_count`; this guard
    /// tracks its own state across `step` calls.
    fn check(&self, _context: &PolicyContext) -> PolicyDecision {
        let state = self.state.lock();
        if state.current_step >= self.max_steps {
            let mut decision = PolicyDecision::deny(
                self.policy_type(),
                format!(
                    "Step limit reached: {}/{}",
                    state.current_step, self.max_steps
                ),
            );
            decision.partial_result = state.last_result.clone();
            return decision;
        }
        PolicyDecision::allow(self.policy_type())
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.current_step = 0;
        state.last_result = None;
    }

    fn policy_type(&self) -> &'static str {
        "step_limit"
    }
}
