//! Multi-tier graceful degradation before HALT
//!
//! Tiers activate as the cost fraction rises:
//! MODEL_DOWNGRADE -> CONTEXT_TRIM -> RATE_LIMIT (the final HALT belongs to
//! the budget enforcer). Higher-severity tiers take precedence when several
//! thresholds are met at once.

use std::collections::HashMap;
use std::time::Duration;

/// The degradation action a caller is obligated to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum DegradationAction {
    /// Switch to the named cheaper model.
    ModelDowngrade { from: String, to: String },
    /// Invoke the caller's context trimmer before dispatch.
    ContextTrim,
    /// Sleep for the carried delay before dispatch.
    RateLimit { delay: Duration },
}

/// One rung of the ladder: the action plus the reason it fired.
#[derive(Debug, Clone)]
pub struct DegradationStep {
    pub action: DegradationAction,
    pub reason: String,
}

/// Configuration for the [`DegradationLadder`].
#[derive(Debug, Clone)]
pub struct DegradationConfig {
    /// Mapping from expensive model name to cheaper fallback.
    pub model_map: HashMap<String, String>,
    /// Delay applied at the RATE_LIMIT tier.
    pub rate_limit: Duration,
    pub model_downgrade_threshold: f64,
    pub context_trim_threshold: f64,
    pub rate_limit_threshold: f64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            model_map: HashMap::new(),
            rate_limit: Duration::from_millis(1000),
            model_downgrade_threshold: 0.80,
            context_trim_threshold: 0.85,
            rate_limit_threshold: 0.90,
        }
    }
}

/// Derives the appropriate degradation tier from the cost fraction
/// `cost_accumulated / max_cost_usd`.
pub struct DegradationLadder {
    config: DegradationConfig,
}

impl DegradationLadder {
    pub fn new(config: DegradationConfig) -> Self {
        Self { config }
    }

    /// Return the degradation step for the current spend, or `None` below
    /// all thresholds. `max_cost_usd` must be positive for any tier to
    /// fire.
    pub fn evaluate(
        &self,
        cost_accumulated: f64,
        max_cost_usd: f64,
        current_model: &str,
    ) -> Option<DegradationStep> {
        if max_cost_usd <= 0.0 {
            return None;
        }
        let fraction = cost_accumulated / max_cost_usd;

        if fraction >= self.config.rate_limit_threshold {
            tracing::debug!(fraction, "degradation ladder: rate limit tier");
            return Some(DegradationStep {
                action: DegradationAction::RateLimit {
                    delay: self.config.rate_limit,
                },
                reason: format!(
                    "cost at {:.0}% of ceiling; rate limiting",
                    fraction * 100.0
                ),
            });
        }

        if fraction >= self.config.context_trim_threshold {
            tracing::debug!(fraction, "degradation ladder: context trim tier");
            return Some(DegradationStep {
                action: DegradationAction::ContextTrim,
                reason: format!(
                    "cost at {:.0}% of ceiling; context trim recommended",
                    fraction * 100.0
                ),
            });
        }

        if fraction >= self.config.model_downgrade_threshold {
            if let Some(fallback) = self.config.model_map.get(current_model) {
                tracing::debug!(
                    fraction,
                    from = current_model,
                    to = fallback.as_str(),
                    "degradation ladder: model downgrade tier"
                );
                return Some(DegradationStep {
                    action: DegradationAction::ModelDowngrade {
                        from: current_model.to_string(),
                        to: fallback.clone(),
                    },
                    reason: format!(
                        "cost at {:.0}% of ceiling; downgrading model",
                        fraction * 100.0
                    ),
                });
            }
        }

        None
    }

    /// Block for the delay carried by a RATE_LIMIT step. Other actions are
    /// no-ops here; the caller owns trimming and model switching.
    pub fn apply_rate_limit(&self, step: &DegradationStep) {
        if let DegradationAction::RateLimit { delay } = step.action {
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder_with_model_map() -> DegradationLadder {
        let mut config = DegradationConfig::default();
        config.model_map.insert("gpt-4o".into(), "gpt-4o-mini".into());
        config.rate_limit = Duration::from_millis(5);
        DegradationLadder::new(config)
    }

    #[test]
    fn test_below_all_thresholds_is_none() {
        let ladder = ladder_with_model_map();
        assert!(ladder.evaluate(0.5, 1.0, "gpt-4o").is_none());
    }

    #[test]
    fn test_model_downgrade_tier_carries_fallback() {
        let ladder = ladder_with_model_map();
        let step = ladder.evaluate(0.82, 1.0, "gpt-4o").unwrap();
        assert_eq!(
            step.action,
            DegradationAction::ModelDowngrade {
                from: "gpt-4o".into(),
                to: "gpt-4o-mini".into(),
            }
        );
    }

    #[test]
    fn test_downgrade_tier_without_mapping_is_none() {
        let ladder = ladder_with_model_map();
        assert!(ladder.evaluate(0.82, 1.0, "claude-unknown").is_none());
    }

    #[test]
    fn test_context_trim_tier() {
        let ladder = ladder_with_model_map();
        let step = ladder.evaluate(0.86, 1.0, "gpt-4o").unwrap();
        assert_eq!(step.action, DegradationAction::ContextTrim);
    }

    #[test]
    fn test_rate_limit_tier_wins_when_all_satisfied() {
        let ladder = ladder_with_model_map();
        let step = ladder.evaluate(0.95, 1.0, "gpt-4o").unwrap();
        assert!(matches!(step.action, DegradationAction::RateLimit { .. }));
    }

    #[test]
    fn test_non_positive_ceiling_disables_ladder() {
        let ladder = ladder_with_model_map();
        assert!(ladder.evaluate(10.0, 0.0, "gpt-4o").is_none());
    }

    #[test]
    fn test_apply_rate_limit_sleeps_for_delay() {
        let ladder = ladder_with_model_map();
        let step = ladder.evaluate(0.95, 1.0, "gpt-4o").unwrap();
        let start = std::time::Instant::now();
        ladder.apply_rate_limit(&step);
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
