//! VERONICA execution containment engine
//!
//! A safety containment layer interposed between autonomous LLM agents and
//! the models and tools they invoke. Independent policy primitives are
//! evaluated at every call boundary, a shield pipeline of hooks produces a
//! [`Decision`](types::Decision) per call, and an execution context wraps
//! each invocation with retry, timeout, and cost accounting. Every
//! non-ALLOW decision becomes an immutable safety event.

pub mod audit;
pub mod budget;
pub mod clients;
pub mod compliance;
pub mod config;
pub mod containment;
pub mod distributed;
pub mod events;
pub mod lifecycle;
pub mod policy;
pub mod prelude;
pub mod scheduler;
pub mod shield;
pub mod types;

// Re-export the surface most callers touch.
pub use containment::{
    ChainMetadata, ContextSnapshot, ExecutionConfig, ExecutionContext, PartialResultBuffer,
    SafetyContainer, WrapOptions, WrapOutcome,
};
pub use events::{Event, EventBus, SafetyEvent};
pub use policy::{
    AgentStepGuard, BudgetEnforcer, CircuitBreaker, PolicyPipeline, RetryContainer, RuntimePolicy,
    SemanticLoopGuard,
};
pub use shield::ShieldPipeline;
pub use types::{ContainmentError, ContainmentResult, Decision, PolicyContext, PolicyDecision, ToolCallContext};
