//! Composite safety container for a single agent invocation boundary
//!
//! Assembles independent primitives into one unified policy pipeline. All
//! primitives are optional; omitted ones are simply not evaluated.

use std::sync::Arc;

use crate::containment::partial::PartialResultBuffer;
use crate::policy::{
    AgentStepGuard, BudgetEnforcer, CircuitBreaker, PolicyPipeline, RetryContainer,
    RuntimePolicy, SemanticLoopGuard,
};
use crate::types::{PolicyContext, PolicyDecision};

/// Composite check-and-reset boundary over the policy primitive set.
#[derive(Default)]
pub struct SafetyContainer {
    pub budget: Option<Arc<BudgetEnforcer>>,
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
    pub retry: Option<Arc<RetryContainer>>,
    pub step_guard: Option<Arc<AgentStepGuard>>,
    pub semantic_guard: Option<Arc<SemanticLoopGuard>>,
    pub partial_buffer: Option<Arc<PartialResultBuffer>>,
}

impl SafetyContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(mut self, budget: Arc<BudgetEnforcer>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn with_retry(mut self, retry: Arc<RetryContainer>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_step_guard(mut self, step_guard: Arc<AgentStepGuard>) -> Self {
        self.step_guard = Some(step_guard);
        self
    }

    pub fn with_semantic_guard(mut self, guard: Arc<SemanticLoopGuard>) -> Self {
        self.semantic_guard = Some(guard);
        self
    }

    pub fn with_partial_buffer(mut self, buffer: Arc<PartialResultBuffer>) -> Self {
        self.partial_buffer = Some(buffer);
        self
    }

    fn pipeline(&self) -> PolicyPipeline {
        let mut policies: Vec<Arc<dyn RuntimePolicy>> = Vec::new();
        if let Some(budget) = &self.budget {
            policies.push(budget.clone());
        }
        if let Some(breaker) = &self.circuit_breaker {
            policies.push(breaker.clone());
        }
        if let Some(retry) = &self.retry {
            policies.push(retry.clone());
        }
        if let Some(step_guard) = &self.step_guard {
            policies.push(step_guard.clone());
        }
        if let Some(semantic) = &self.semantic_guard {
            policies.push(semantic.clone());
        }
        PolicyPipeline::new(policies)
    }

    /// Evaluate all active policies against the given context.
    pub fn check(&self, cost_usd: f64, step_count: u64, entity_id: &str, chain_id: &str) -> PolicyDecision {
        let mut context = PolicyContext::new()
            .with_cost(cost_usd)
            .with_step_count(step_count)
            .with_chain_id(chain_id);
        context.entity_id = entity_id.to_string();
        self.pipeline().evaluate(&context)
    }

    /// Reset all active primitives and clear the partial buffer.
    pub fn reset(&self) {
        if let Some(budget) = &self.budget {
            budget.reset();
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.reset();
        }
        if let Some(retry) = &self.retry {
            retry.reset();
        }
        if let Some(step_guard) = &self.step_guard {
            step_guard.reset();
        }
        if let Some(semantic) = &self.semantic_guard {
            semantic.reset();
        }
        if let Some(buffer) = &self.partial_buffer {
            buffer.clear();
        }
    }

    /// Policy type strings for all active primitives, in evaluation order.
    pub fn active_policies(&self) -> Vec<&'static str> {
        self.pipeline().policy_types()
    }
}
