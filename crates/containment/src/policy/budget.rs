//! Chain-level budget enforcement for LLM calls

use parking_lot::Mutex;

use crate::policy::RuntimePolicy;
use crate::types::{ContainmentError, ContainmentResult, PolicyContext, PolicyDecision};

// Tolerance for accumulated f64 rounding; five $0.01 spends must exactly
// fill a $0.05 budget.
const BUDGET_EPSILON: f64 = 1e-9;

#[derive(Debug, Default)]
struct BudgetState {
    spent_usd: f64,
    call_count: u64,
}

/// Tracks cumulative cost across a chain of calls and stops when the
/// ceiling is reached.
///
/// `spend` is atomic check-then-add: a spend that would push the total past
/// the limit is rejected without being recorded, so under N racing equal
/// spends exactly `limit / amount` succeed.
#[derive(Debug)]
pub struct BudgetEnforcer {
    limit_usd: f64,
    state: Mutex<BudgetState>,
}

impl BudgetEnforcer {
    pub fn new(limit_usd: f64) -> Self {
        Self {
            limit_usd,
            state: Mutex::new(BudgetState::default()),
        }
    }

    /// Record spending. Returns `Ok(true)` if the amount was accepted,
    /// `Ok(false)` if it would exceed the limit (nothing is recorded).
    pub fn spend(&self, amount_usd: f64) -> ContainmentResult<bool> {
        if amount_usd < 0.0 {
            return Err(ContainmentError::InvalidArgument(format!(
                "spend amount must be non-negative, got {}",
                amount_usd
            )));
        }
        let mut state = self.state.lock();
        if state.spent_usd + amount_usd > self.limit_usd + BUDGET_EPSILON {
            tracing::warn!(
                spent_usd = state.spent_usd,
                limit_usd = self.limit_usd,
                amount_usd,
                "budget exceeded"
            );
            return Ok(false);
        }
        state.spent_usd += amount_usd;
        state.call_count += 1;
        Ok(true)
    }

    pub fn limit_usd(&self) -> f64 {
        self.limit_usd
    }

    /// Total amount spent so far.
    pub fn spent_usd(&self) -> f64 {
        self.state.lock().spent_usd
    }

    /// Remaining budget in USD.
    pub fn remaining_usd(&self) -> f64 {
        let state = self.state.lock();
        (self.limit_usd - state.spent_usd).max(0.0)
    }

    /// True once the budget can accept no further spend.
    pub fn is_exceeded(&self) -> bool {
        self.state.lock().spent_usd >= self.limit_usd - BUDGET_EPSILON
    }

    /// Number of accepted spends.
    pub fn call_count(&self) -> u64 {
        self.state.lock().call_count
    }

    /// Budget utilization as a fraction (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.limit_usd <= 0.0 {
            return f64::INFINITY;
        }
        self.state.lock().spent_usd / self.limit_usd
    }
}

impl RuntimePolicy for BudgetEnforcer {
    /// Evaluates whether the projected cost (spent + `ctx.cost_usd`) would
    /// exceed the limit. Does NOT record spending; use `spend` after the
    /// operation.
    fn check(&self, context: &PolicyContext) -> PolicyDecision {
        let state = self.state.lock();
        let projected = state.spent_usd + context.cost_usd;
        if projected > self.limit_usd + BUDGET_EPSILON {
            return PolicyDecision::deny(
                self.policy_type(),
                format!(
                    "Budget would exceed: ${:.2} > ${:.2}",
                    projected, self.limit_usd
                ),
            );
        }
        PolicyDecision::allow(self.policy_type())
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.spent_usd = 0.0;
        state.call_count = 0;
        tracing::info!("budget reset");
    }

    fn policy_type(&self) -> &'static str {
        "budget"
    }
}
