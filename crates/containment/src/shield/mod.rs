//! Shield hooks and pipeline
//!
//! The shield defines the boundaries where a containment decision may be
//! injected: before an LLM dispatch, before a tool dispatch, before
//! outbound HTTP, on an exception from dispatch, and before cost is
//! committed. A hook returning `None` has no opinion; the pipeline treats
//! that as ALLOW. The decision lattice is the only contract between hooks
//! and the pipeline.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::types::{Decision, ToolCallContext};

pub mod budget_window;
pub mod degradation;
pub mod input_compression;
pub mod safe_mode;
pub mod token_budget;

pub use budget_window::BudgetWindowHook;
pub use degradation::{DegradationAction, DegradationConfig, DegradationLadder, DegradationStep};
pub use input_compression::InputCompressionHook;
pub use safe_mode::SafeModeHook;
pub use token_budget::TokenBudgetHook;

/// A hook's resolved opinion: the lattice decision plus the reason and
/// evidence that the resulting [`crate::events::SafetyEvent`] will carry.
#[derive(Debug, Clone)]
pub struct HookDecision {
    pub decision: Decision,
    /// Machine-readable category for the safety event.
    pub event_type: String,
    pub reason: String,
    /// Name of the hook implementation that fired.
    pub hook: String,
    pub metadata: Map<String, Value>,
}

impl HookDecision {
    pub fn new(
        decision: Decision,
        hook: impl Into<String>,
        event_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            decision,
            event_type: event_type.into(),
            reason: reason.into(),
            hook: hook.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Synthetic ALLOW used when no hook has an opinion.
    pub fn allow(hook: impl Into<String>) -> Self {
        Self::new(Decision::Allow, hook, "", "")
    }
}

/// Evaluated before every LLM dispatch.
pub trait PreDispatchHook: Send + Sync {
    fn before_llm_call(&self, ctx: &ToolCallContext) -> Option<HookDecision>;
}

/// Evaluated before every tool dispatch.
pub trait ToolDispatchHook: Send + Sync {
    fn before_tool_call(&self, ctx: &ToolCallContext) -> Option<HookDecision>;
}

/// Evaluated before an outbound HTTP request.
pub trait EgressBoundaryHook: Send + Sync {
    fn before_egress(&self, ctx: &ToolCallContext, url: &str, method: &str)
        -> Option<HookDecision>;
}

/// Evaluated when a dispatch raises an error.
pub trait RetryBoundaryHook: Send + Sync {
    fn on_error(&self, ctx: &ToolCallContext, err: &anyhow::Error) -> Option<HookDecision>;
}

/// Evaluated before recording a cost charge.
pub trait BudgetBoundaryHook: Send + Sync {
    fn before_charge(&self, ctx: &ToolCallContext, cost_usd: f64) -> Option<HookDecision>;
}

/// Holds one optional hook of each kind and resolves their opinions.
///
/// The error boundary fails closed: with no retry hook registered,
/// `on_error` resolves to HALT. The legacy ALLOW behaviour is an explicit
/// opt-in.
#[derive(Clone, Default)]
pub struct ShieldPipeline {
    pre_dispatch: Option<Arc<dyn PreDispatchHook>>,
    tool_dispatch: Option<Arc<dyn ToolDispatchHook>>,
    egress: Option<Arc<dyn EgressBoundaryHook>>,
    retry: Option<Arc<dyn RetryBoundaryHook>>,
    budget: Option<Arc<dyn BudgetBoundaryHook>>,
    allow_on_unhandled_error: bool,
}

impl ShieldPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pre_dispatch(mut self, hook: Arc<dyn PreDispatchHook>) -> Self {
        self.pre_dispatch = Some(hook);
        self
    }

    pub fn with_tool_dispatch(mut self, hook: Arc<dyn ToolDispatchHook>) -> Self {
        self.tool_dispatch = Some(hook);
        self
    }

    pub fn with_egress(mut self, hook: Arc<dyn EgressBoundaryHook>) -> Self {
        self.egress = Some(hook);
        self
    }

    pub fn with_retry(mut self, hook: Arc<dyn RetryBoundaryHook>) -> Self {
        self.retry = Some(hook);
        self
    }

    pub fn with_budget(mut self, hook: Arc<dyn BudgetBoundaryHook>) -> Self {
        self.budget = Some(hook);
        self
    }

    /// Opt in to the legacy behaviour where an unhandled dispatch error
    /// resolves to ALLOW instead of HALT.
    pub fn with_legacy_allow_on_error(mut self) -> Self {
        self.allow_on_unhandled_error = true;
        self
    }

    pub fn before_llm_call(&self, ctx: &ToolCallContext) -> HookDecision {
        match &self.pre_dispatch {
            Some(hook) => hook
                .before_llm_call(ctx)
                .unwrap_or_else(|| HookDecision::allow("ShieldPipeline")),
            None => HookDecision::allow("ShieldPipeline"),
        }
    }

    pub fn before_tool_call(&self, ctx: &ToolCallContext) -> HookDecision {
        match &self.tool_dispatch {
            Some(hook) => hook
                .before_tool_call(ctx)
                .unwrap_or_else(|| HookDecision::allow("ShieldPipeline")),
            None => HookDecision::allow("ShieldPipeline"),
        }
    }

    pub fn before_egress(&self, ctx: &ToolCallContext, url: &str, method: &str) -> HookDecision {
        match &self.egress {
            Some(hook) => hook
                .before_egress(ctx, url, method)
                .unwrap_or_else(|| HookDecision::allow("ShieldPipeline")),
            None => HookDecision::allow("ShieldPipeline"),
        }
    }

    pub fn on_error(&self, ctx: &ToolCallContext, err: &anyhow::Error) -> HookDecision {
        match &self.retry {
            Some(hook) => hook
                .on_error(ctx, err)
                .unwrap_or_else(|| HookDecision::allow("ShieldPipeline")),
            None => {
                if self.allow_on_unhandled_error {
                    HookDecision::allow("ShieldPipeline")
                } else {
                    HookDecision::new(
                        Decision::Halt,
                        "ShieldPipeline",
                        "DISPATCH_ERROR",
                        format!("unhandled dispatch error: {}", err),
                    )
                }
            }
        }
    }

    pub fn before_charge(&self, ctx: &ToolCallContext, cost_usd: f64) -> HookDecision {
        match &self.budget {
            Some(hook) => hook
                .before_charge(ctx, cost_usd)
                .unwrap_or_else(|| HookDecision::allow("ShieldPipeline")),
            None => HookDecision::allow("ShieldPipeline"),
        }
    }

    pub fn has_retry_hook(&self) -> bool {
        self.retry.is_some()
    }
}
