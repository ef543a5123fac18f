//! Emergency kill-switch hook
//!
//! When enabled, blocks all tool dispatch and suppresses retries. When
//! disabled, it has no opinion anywhere and defers to the pipeline.

use crate::events::event_types;
use crate::shield::{HookDecision, PreDispatchHook, RetryBoundaryHook};
use crate::types::{Decision, ToolCallContext};

/// Emergency kill-switch that halts tool calls and retries.
pub struct SafeModeHook {
    enabled: bool,
}

impl SafeModeHook {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Construct from the `SAFE_MODE` environment toggle.
    pub fn from_env() -> Self {
        Self::new(crate::config::safe_mode_enabled())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl PreDispatchHook for SafeModeHook {
    /// Block dispatch when enabled and a tool_name is present.
    fn before_llm_call(&self, ctx: &ToolCallContext) -> Option<HookDecision> {
        if self.enabled && ctx.tool_name.is_some() {
            return Some(HookDecision::new(
                Decision::Halt,
                "SafeModeHook",
                event_types::SAFE_MODE,
                "safe mode active: tool dispatch blocked",
            ));
        }
        None
    }
}

impl RetryBoundaryHook for SafeModeHook {
    /// Suppress retries when enabled.
    fn on_error(&self, _ctx: &ToolCallContext, _err: &anyhow::Error) -> Option<HookDecision> {
        if self.enabled {
            return Some(HookDecision::new(
                Decision::Halt,
                "SafeModeHook",
                event_types::SAFE_MODE,
                "safe mode active: retry suppressed",
            ));
        }
        None
    }
}
