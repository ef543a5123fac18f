//! Call-boundary context records and policy decision values

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Immutable snapshot describing a single LLM or tool invocation.
///
/// All fields except `request_id` are optional so callers populate only
/// what they have available. Constructed fresh per call, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub tool_name: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolCallContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: None,
            session_id: None,
            tool_name: None,
            model: None,
            endpoint: None,
            tokens_in: None,
            tokens_out: None,
            cost_usd: None,
            metadata: Map::new(),
        }
    }

    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tokens(mut self, tokens_in: u64, tokens_out: u64) -> Self {
        self.tokens_in = Some(tokens_in);
        self.tokens_out = Some(tokens_out);
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Context passed to `RuntimePolicy::check` for evaluation.
///
/// Carries ambient information about the current LLM call or agent step.
/// Policies inspect relevant fields and ignore the rest.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub cost_usd: f64,
    pub step_count: u64,
    pub entity_id: String,
    pub chain_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl PolicyContext {
    pub fn new() -> Self {
        Self {
            cost_usd: 0.0,
            step_count: 0,
            entity_id: String::new(),
            chain_id: String::new(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_step_count(mut self, step_count: u64) -> Self {
        self.step_count = step_count;
        self
    }

    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = chain_id.into();
        self
    }
}

impl Default for PolicyContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a `RuntimePolicy::check` evaluation.
///
/// `allowed == false` denies the operation, with a reason and an optional
/// partial result preserved from the guard that fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub policy_type: String,
    pub reason: String,
    pub partial_result: Option<Value>,
}

impl PolicyDecision {
    pub fn allow(policy_type: impl Into<String>) -> Self {
        Self {
            allowed: true,
            policy_type: policy_type.into(),
            reason: String::new(),
            partial_result: None,
        }
    }

    pub fn deny(policy_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            policy_type: policy_type.into(),
            reason: reason.into(),
            partial_result: None,
        }
    }

    pub fn with_partial_result(mut self, partial: Value) -> Self {
        self.partial_result = Some(partial);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_context_builder() {
        let ctx = ToolCallContext::new("req-1")
            .with_tool_name("search")
            .with_model("gpt-4o")
            .with_tokens(120, 40)
            .with_cost(0.03);
        assert_eq!(ctx.request_id, "req-1");
        assert_eq!(ctx.tool_name.as_deref(), Some("search"));
        assert_eq!(ctx.tokens_in, Some(120));
        assert_eq!(ctx.cost_usd, Some(0.03));
    }

    #[test]
    fn test_policy_decision_deny_carries_reason() {
        let d = PolicyDecision::deny("budget", "over limit");
        assert!(!d.allowed);
        assert_eq!(d.policy_type, "budget");
        assert_eq!(d.reason, "over limit");
        assert!(d.partial_result.is_none());
    }
}
