//! Rolling time-window call-count limiter

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::events::event_types;
use crate::shield::{HookDecision, PreDispatchHook};
use crate::types::{Decision, ToolCallContext};

/// Limits the number of calls admitted within a rolling time window.
///
/// Invocation timestamps live in a deque; entries older than the window are
/// pruned on every call. At `degrade_threshold * max_calls` the hook starts
/// returning DEGRADE; at `max_calls` it HALTs.
pub struct BudgetWindowHook {
    max_calls: usize,
    window: Duration,
    degrade_threshold: f64,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl BudgetWindowHook {
    pub fn new(max_calls: usize, window: Duration, degrade_threshold: f64) -> Self {
        Self {
            max_calls,
            window,
            degrade_threshold,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Calls currently inside the window (prunes expired entries).
    pub fn current_count(&self) -> usize {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        Self::prune(&mut timestamps, now, self.window);
        timestamps.len()
    }

    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

impl PreDispatchHook for BudgetWindowHook {
    fn before_llm_call(&self, _ctx: &ToolCallContext) -> Option<HookDecision> {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        Self::prune(&mut timestamps, now, self.window);

        let count = timestamps.len();
        if count >= self.max_calls {
            return Some(HookDecision::new(
                Decision::Halt,
                "BudgetWindowHook",
                event_types::BUDGET_WINDOW_EXCEEDED,
                format!(
                    "call window exhausted: {} calls in the last {:?} (max {})",
                    count, self.window, self.max_calls
                ),
            ));
        }

        // A degraded call still proceeds, so it still occupies the window.
        timestamps.push_back(now);

        let degrade_at = (self.degrade_threshold * self.max_calls as f64).ceil() as usize;
        if count >= degrade_at {
            return Some(HookDecision::new(
                Decision::Degrade,
                "BudgetWindowHook",
                event_types::BUDGET_WINDOW_EXCEEDED,
                format!(
                    "call window near limit: {} of {} calls used",
                    count, self.max_calls
                ),
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_until_degrade_threshold() {
        let hook = BudgetWindowHook::new(5, Duration::from_secs(60), 0.8);
        let ctx = ToolCallContext::new("r1");

        for _ in 0..4 {
            assert!(hook.before_llm_call(&ctx).is_none());
        }
        assert_eq!(hook.current_count(), 4);
    }

    #[test]
    fn test_degrade_then_halt_sequence() {
        let hook = BudgetWindowHook::new(5, Duration::from_secs(60), 0.8);
        let ctx = ToolCallContext::new("r1");

        let mut decisions = Vec::new();
        for _ in 0..6 {
            decisions.push(hook.before_llm_call(&ctx).map(|d| d.decision));
        }
        assert_eq!(
            decisions,
            vec![
                None,
                None,
                None,
                None,
                Some(Decision::Degrade),
                Some(Decision::Halt),
            ]
        );
    }

    #[test]
    fn test_halts_once_window_is_full() {
        // degrade_threshold 1.0 disables the DEGRADE band.
        let hook = BudgetWindowHook::new(3, Duration::from_secs(60), 1.0);
        let ctx = ToolCallContext::new("r1");

        for _ in 0..3 {
            assert!(hook.before_llm_call(&ctx).is_none());
        }
        let decision = hook.before_llm_call(&ctx).unwrap();
        assert_eq!(decision.decision, Decision::Halt);
        assert_eq!(decision.event_type, event_types::BUDGET_WINDOW_EXCEEDED);
    }

    #[test]
    fn test_window_expiry_frees_capacity() {
        let hook = BudgetWindowHook::new(2, Duration::from_millis(30), 1.0);
        let ctx = ToolCallContext::new("r1");

        assert!(hook.before_llm_call(&ctx).is_none());
        assert!(hook.before_llm_call(&ctx).is_none());
        assert_eq!(hook.before_llm_call(&ctx).unwrap().decision, Decision::Halt);

        std::thread::sleep(Duration::from_millis(50));
        assert!(hook.before_llm_call(&ctx).is_none());
    }
}
