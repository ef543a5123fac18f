//! Runtime policy primitives and their AND-composition pipeline
//!
//! A policy primitive enforces one invariant over a chain (cost ceiling,
//! step limit, retry budget, failure streak, semantic similarity). Any type
//! implementing [`RuntimePolicy`] composes into a [`PolicyPipeline`];
//! adding a constraint is appending a primitive, removal is a rebuild.

use std::sync::Arc;

use crate::types::{PolicyContext, PolicyDecision};

pub mod budget;
pub mod circuit_breaker;
pub mod minimal_response;
pub mod retry;
pub mod semantic;
pub mod step_guard;

pub use budget::BudgetEnforcer;
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use minimal_response::MinimalResponsePolicy;
pub use retry::RetryContainer;
pub use semantic::SemanticLoopGuard;
pub use step_guard::AgentStepGuard;

/// Contract for runtime policy primitives.
///
/// Implementations are internally locked: `check` and `reset` take `&self`
/// and must be safe to call from many threads. `check` never mutates
/// enforcement state; state evolves only through the primitive's explicit
/// recording operations (`spend`, `step`, `record_success`, ...).
pub trait RuntimePolicy: Send + Sync {
    /// Evaluate whether the operation should be allowed.
    fn check(&self, context: &PolicyContext) -> PolicyDecision;

    /// Reset policy state to initial conditions.
    fn reset(&self);

    /// Unique identifier for this policy type (e.g. `"budget"`).
    fn policy_type(&self) -> &'static str;
}

/// AND-composition of [`RuntimePolicy`] instances.
///
/// Evaluates policies in registration order. The first denial stops
/// evaluation and is returned; if all pass, a synthetic allow with
/// `policy_type = "pipeline"` is returned. There is no override mechanism.
#[derive(Clone, Default)]
pub struct PolicyPipeline {
    policies: Vec<Arc<dyn RuntimePolicy>>,
}

impl PolicyPipeline {
    pub fn new(policies: Vec<Arc<dyn RuntimePolicy>>) -> Self {
        Self { policies }
    }

    /// Append a policy to the pipeline.
    pub fn add(&mut self, policy: Arc<dyn RuntimePolicy>) {
        self.policies.push(policy);
    }

    /// Evaluate all policies. First denial wins.
    pub fn evaluate(&self, context: &PolicyContext) -> PolicyDecision {
        for policy in &self.policies {
            let decision = policy.check(context);
            if !decision.allowed {
                tracing::info!(
                    "policy pipeline denied by {}: {}",
                    decision.policy_type,
                    decision.reason
                );
                return decision;
            }
        }
        PolicyDecision {
            allowed: true,
            policy_type: "pipeline".into(),
            reason: "All policies passed".into(),
            partial_result: None,
        }
    }

    /// Policy type strings in evaluation order.
    pub fn policy_types(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.policy_type()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
