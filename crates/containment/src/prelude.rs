//! Convenience re-exports for downstream callers
//!
//! ```
//! use veronica_containment::prelude::*;
//!
//! let ctx = ExecutionContext::new(ExecutionConfig::default(), ChainMetadata::default());
//! let outcome = ctx
//!     .wrap_llm_call(|| Ok("hi".to_string()), WrapOptions::default())
//!     .unwrap();
//! assert_eq!(outcome.decision, Decision::Allow);
//! ```

pub use crate::audit::AuditLog;
pub use crate::clients::{DummyClient, LlmClient, NullClient};
pub use crate::containment::{
    CancellationToken, ChainMetadata, ContextSnapshot, ExecutionConfig, ExecutionContext,
    NodeKind, NodeRecord, NodeStatus, PartialResultBuffer, SafetyContainer, WrapOptions,
    WrapOutcome,
};
pub use crate::distributed::{BudgetBackend, LocalBudgetBackend, SharedStoreBudgetBackend};
pub use crate::events::{
    event_types, CompositeSink, Event, EventBus, EventSink, JsonlFileSink, Labels, NullSink,
    SafetyEvent, StdoutSink,
};
pub use crate::lifecycle::{
    transition_run, transition_session, transition_step, JsonFileBackend, MemoryBackend,
    PersistenceBackend, Run, RunStatus, Session, SessionStatus, Step, StepStatus,
};
pub use crate::policy::{
    AgentStepGuard, BreakerState, BudgetEnforcer, CircuitBreaker, MinimalResponsePolicy,
    PolicyPipeline, RetryContainer, RuntimePolicy, SemanticLoopGuard,
};
pub use crate::scheduler::{AdmitDecision, Priority, QueueEntry, Scheduler, SchedulerConfig};
pub use crate::shield::{
    BudgetBoundaryHook, BudgetWindowHook, DegradationAction, DegradationConfig, DegradationLadder,
    EgressBoundaryHook, HookDecision, InputCompressionHook, PreDispatchHook, RetryBoundaryHook,
    SafeModeHook, ShieldPipeline, TokenBudgetHook, ToolDispatchHook,
};
pub use crate::types::{
    ContainmentError, ContainmentResult, Decision, PolicyContext, PolicyDecision, Severity,
    ToolCallContext,
};
