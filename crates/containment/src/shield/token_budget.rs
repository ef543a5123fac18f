//! Cumulative token budget with a DEGRADE band and concurrency-safe
//! reservations
//!
//! The caller reports actual usage via `record_usage` after each call; the
//! hook projects committed plus pending totals in `before_llm_call` so two
//! concurrent callers cannot both be admitted at the brink.

use parking_lot::Mutex;

use crate::events::event_types;
use crate::shield::{HookDecision, PreDispatchHook};
use crate::types::{ContainmentError, ContainmentResult, Decision, ToolCallContext};

#[derive(Debug, Default)]
struct TokenState {
    output_total: u64,
    input_total: u64,
    pending_output: u64,
    pending_input: u64,
}

/// Cumulative token budget limiter.
///
/// Decision logic on projected totals:
///   - output >= max_output                    -> HALT
///   - output >= degrade_threshold * max_output -> DEGRADE
///   - total  >= max_total (when enabled)       -> HALT
///   - total  >= degrade_threshold * max_total  -> DEGRADE
/// On pass, the estimate from the call context is reserved atomically.
pub struct TokenBudgetHook {
    max_output_tokens: u64,
    /// 0 disables the combined input+output cap.
    max_total_tokens: u64,
    degrade_threshold: f64,
    state: Mutex<TokenState>,
}

impl TokenBudgetHook {
    pub fn new(max_output_tokens: u64, max_total_tokens: u64, degrade_threshold: f64) -> Self {
        Self {
            max_output_tokens,
            max_total_tokens,
            degrade_threshold,
            state: Mutex::new(TokenState::default()),
        }
    }

    pub fn output_total(&self) -> u64 {
        self.state.lock().output_total
    }

    pub fn input_total(&self) -> u64 {
        self.state.lock().input_total
    }

    pub fn total(&self) -> u64 {
        let state = self.state.lock();
        state.output_total + state.input_total
    }

    pub fn pending_output(&self) -> u64 {
        self.state.lock().pending_output
    }

    /// Record token usage after a call completes, releasing the pending
    /// reservation made at admission.
    pub fn record_usage(&self, output_tokens: u64, input_tokens: u64) {
        let mut state = self.state.lock();
        state.pending_output = state.pending_output.saturating_sub(output_tokens);
        state.pending_input = state.pending_input.saturating_sub(input_tokens);
        state.output_total += output_tokens;
        state.input_total += input_tokens;
    }

    /// Record usage from signed counts; negative counts are caller bugs.
    pub fn record_usage_checked(
        &self,
        output_tokens: i64,
        input_tokens: i64,
    ) -> ContainmentResult<()> {
        if output_tokens < 0 || input_tokens < 0 {
            return Err(ContainmentError::InvalidArgument(format!(
                "token counts must be non-negative, got output={}, input={}",
                output_tokens, input_tokens
            )));
        }
        self.record_usage(output_tokens as u64, input_tokens as u64);
        Ok(())
    }

    /// Release a previously made reservation without recording usage (call
    /// failed or was abandoned).
    pub fn release_reservation(&self, estimated_out: u64, estimated_in: u64) {
        let mut state = self.state.lock();
        state.pending_output = state.pending_output.saturating_sub(estimated_out);
        state.pending_input = state.pending_input.saturating_sub(estimated_in);
    }
}

impl PreDispatchHook for TokenBudgetHook {
    fn before_llm_call(&self, ctx: &ToolCallContext) -> Option<HookDecision> {
        let estimated_out = ctx.tokens_out.unwrap_or(0);
        let estimated_in = ctx.tokens_in.unwrap_or(0);

        let mut state = self.state.lock();
        let projected_output = state.output_total + state.pending_output + estimated_out;

        if projected_output >= self.max_output_tokens {
            return Some(HookDecision::new(
                Decision::Halt,
                "TokenBudgetHook",
                event_types::TOKEN_BUDGET_EXCEEDED,
                format!(
                    "projected output {} tokens >= cap {}",
                    projected_output, self.max_output_tokens
                ),
            ));
        }

        let degrade_at_output = self.degrade_threshold * self.max_output_tokens as f64;
        let mut degraded = projected_output as f64 >= degrade_at_output;

        if self.max_total_tokens > 0 {
            let projected_input = state.input_total + state.pending_input + estimated_in;
            let projected_total = projected_output + projected_input;
            if projected_total >= self.max_total_tokens {
                return Some(HookDecision::new(
                    Decision::Halt,
                    "TokenBudgetHook",
                    event_types::TOKEN_BUDGET_EXCEEDED,
                    format!(
                        "projected total {} tokens >= cap {}",
                        projected_total, self.max_total_tokens
                    ),
                ));
            }
            let degrade_at_total = self.degrade_threshold * self.max_total_tokens as f64;
            degraded = degraded || projected_total as f64 >= degrade_at_total;
        }

        if degraded {
            return Some(HookDecision::new(
                Decision::Degrade,
                "TokenBudgetHook",
                event_types::TOKEN_BUDGET_EXCEEDED,
                format!(
                    "projected output {} tokens inside degrade band (cap {})",
                    projected_output, self.max_output_tokens
                ),
            ));
        }

        // Reserve the estimate so concurrent callers see it.
        state.pending_output += estimated_out;
        state.pending_input += estimated_in;
        None
    }
}
