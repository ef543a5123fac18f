//! Chain-level execution containment
//!
//! Public surface:
//! - [`ExecutionContext`]: lifespan-scoped container for one agent chain
//! - [`ExecutionConfig`]: hard limits (cost, steps, retries, timeout)
//! - [`ChainMetadata`]: immutable chain descriptor (service, team, IDs, tags)
//! - [`WrapOptions`] / [`WrapOutcome`]: per-call options and result
//! - [`ContextSnapshot`]: immutable snapshot of chain state
//! - [`CancellationToken`]: single-set cooperative cancellation signal
//! - [`ExecutionGraph`] / [`NodeRecord`]: per-chain call DAG
//! - [`PartialResultBuffer`]: bounded preservation of partial output
//! - [`SafetyContainer`]: composite primitive boundary

pub mod container;
pub mod execution_context;
pub mod execution_graph;
pub mod partial;

pub use container::SafetyContainer;
pub use execution_context::{
    CancellationToken, ChainMetadata, ContextSnapshot, ExecutionConfig, ExecutionContext,
    WrapOptions, WrapOutcome,
};
pub use execution_graph::{ExecutionGraph, NodeKind, NodeRecord, NodeStatus};
pub use partial::PartialResultBuffer;
