//! Lifespan-scoped containment boundary for one agent chain
//!
//! An [`ExecutionContext`] owns the policy primitives, shield pipeline,
//! event list, node DAG, and cancellation token for a single chain. Every
//! outgoing LLM or tool call is wrapped; the wrap runs the policy and
//! shield checks, invokes the callable with retry handling, records cost
//! and a node, and returns a [`Decision`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::containment::execution_graph::{ExecutionGraph, NodeKind, NodeRecord, NodeStatus};
use crate::events::{event_types, Event, EventBus, SafetyEvent};
use crate::policy::{AgentStepGuard, BreakerState, BudgetEnforcer, CircuitBreaker, RetryContainer, RuntimePolicy};
use crate::shield::ShieldPipeline;
use crate::types::{ContainmentError, ContainmentResult, Decision, PolicyContext, ToolCallContext};

/// Hard limits for one chain.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub max_cost_usd: f64,
    pub max_steps: u64,
    pub max_retries_total: u32,
    /// 0 disables the deadline.
    pub timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_cost_usd: 1.0,
            max_steps: 25,
            max_retries_total: 3,
            timeout_ms: 0,
        }
    }
}

/// Immutable chain descriptor carried into snapshots and exports.
#[derive(Debug, Clone)]
pub struct ChainMetadata {
    pub chain_id: String,
    pub request_id: String,
    pub service: Option<String>,
    pub team: Option<String>,
    pub model: Option<String>,
    pub tags: HashMap<String, String>,
}

impl Default for ChainMetadata {
    fn default() -> Self {
        Self {
            chain_id: Uuid::new_v4().to_string(),
            request_id: Uuid::new_v4().to_string(),
            service: None,
            team: None,
            model: None,
            tags: HashMap::new(),
        }
    }
}

/// Per-call options passed alongside the wrapped callable.
#[derive(Debug, Clone, Default)]
pub struct WrapOptions {
    pub operation_name: String,
    pub cost_estimate_hint: f64,
    pub tool_name: Option<String>,
    pub model: Option<String>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub metadata: Map<String, Value>,
}

impl WrapOptions {
    pub fn named(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Self::default()
        }
    }

    pub fn with_cost_estimate(mut self, cost_usd: f64) -> Self {
        self.cost_estimate_hint = cost_usd;
        self
    }

    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }
}

/// What a wrap call produced: the decision, and the callable's value when
/// the call ran to completion. Callers must check the decision before using
/// the value.
#[derive(Debug)]
pub struct WrapOutcome<T> {
    pub decision: Decision,
    pub value: Option<T>,
}

impl<T> WrapOutcome<T> {
    fn denied(decision: Decision) -> Self {
        Self {
            decision,
            value: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// Immutable snapshot of a chain at a point in time.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub chain_id: String,
    pub request_id: String,
    pub step_count: u64,
    pub cost_usd_accumulated: f64,
    pub retries_used: u64,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    pub elapsed_ms: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub nodes: Vec<NodeRecord>,
    pub events: Vec<SafetyEvent>,
}

/// Single-set cooperative cancellation signal.
#[derive(Debug, Default)]
pub struct CancellationToken {
    flag: AtomicBool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token. Idempotent; a token is never cleared.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct ContextState {
    graph: ExecutionGraph,
    events: Vec<SafetyEvent>,
    retries_used: u64,
    aborted: bool,
    abort_reason: Option<String>,
    closed: bool,
}

/// Per-chain containment boundary.
pub struct ExecutionContext {
    config: ExecutionConfig,
    metadata: ChainMetadata,
    pipeline: ShieldPipeline,
    budget: BudgetEnforcer,
    step_guard: AgentStepGuard,
    retry: Option<Arc<RetryContainer>>,
    breaker: Option<Arc<CircuitBreaker>>,
    bus: Option<EventBus>,
    token: Arc<CancellationToken>,
    state: Mutex<ContextState>,
    started_at: Instant,
    started_at_utc: chrono::DateTime<chrono::Utc>,
    watcher_shutdown: Option<Sender<()>>,
    watcher: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl ExecutionContext {
    /// Create a context and start its timeout watcher (when `timeout_ms`
    /// is non-zero).
    pub fn new(config: ExecutionConfig, metadata: ChainMetadata) -> Self {
        let token = Arc::new(CancellationToken::new());
        let (watcher_shutdown, watcher) = if config.timeout_ms > 0 {
            let (tx, rx) = bounded::<()>(1);
            let watch_token = token.clone();
            let deadline = Duration::from_millis(config.timeout_ms);
            let handle = std::thread::spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(deadline) {
                    watch_token.set();
                    tracing::warn!(timeout_ms = deadline.as_millis() as u64, "chain deadline reached");
                }
            });
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        Self {
            budget: BudgetEnforcer::new(config.max_cost_usd),
            step_guard: AgentStepGuard::new(config.max_steps),
            config,
            metadata,
            pipeline: ShieldPipeline::new(),
            retry: None,
            breaker: None,
            bus: None,
            token,
            state: Mutex::new(ContextState {
                graph: ExecutionGraph::new(),
                events: Vec::new(),
                retries_used: 0,
                aborted: false,
                abort_reason: None,
                closed: false,
            }),
            started_at: Instant::now(),
            started_at_utc: chrono::Utc::now(),
            watcher_shutdown,
            watcher: Mutex::new(None),
        }
        .finish_watcher(watcher)
    }

    fn finish_watcher(self, handle: Option<std::thread::JoinHandle<()>>) -> Self {
        *self.watcher.lock() = handle;
        self
    }

    pub fn with_pipeline(mut self, pipeline: ShieldPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_retry(mut self, retry: Arc<RetryContainer>) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Attach a circuit breaker, binding it to this chain. Fails if the
    /// breaker is already bound to a different chain.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> ContainmentResult<Self> {
        breaker.bind(&self.metadata.chain_id)?;
        self.breaker = Some(breaker);
        Ok(self)
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn chain_id(&self) -> &str {
        &self.metadata.chain_id
    }

    pub fn metadata(&self) -> &ChainMetadata {
        &self.metadata
    }

    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        self.token.clone()
    }

    /// Wrap an outgoing LLM call.
    pub fn wrap_llm_call<T, F>(&self, f: F, options: WrapOptions) -> ContainmentResult<WrapOutcome<T>>
    where
        F: FnMut() -> anyhow::Result<T>,
    {
        self.wrap_call(NodeKind::Llm, f, options)
    }

    /// Wrap an outgoing tool call. Identical to the LLM wrap except the
    /// tool dispatch hook fires and the charge boundary is skipped.
    pub fn wrap_tool_call<T, F>(&self, f: F, options: WrapOptions) -> ContainmentResult<WrapOutcome<T>>
    where
        F: FnMut() -> anyhow::Result<T>,
    {
        self.wrap_call(NodeKind::Tool, f, options)
    }

    /// Abort the chain explicitly: sets the cancellation token and records
    /// the abort.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.token.set();
        let mut state = self.state.lock();
        if !state.aborted {
            state.aborted = true;
            state.abort_reason = Some(reason.clone());
        }
        let event = SafetyEvent::new(
            event_types::ABORT_TRIGGERED,
            Decision::Halt,
            reason,
            "ExecutionContext",
        )
        .with_request_id(&self.metadata.request_id);
        state.events.push(event);
    }

    /// Immutable snapshot of the chain.
    pub fn get_snapshot(&self) -> ContextSnapshot {
        let state = self.state.lock();
        ContextSnapshot {
            chain_id: self.metadata.chain_id.clone(),
            request_id: self.metadata.request_id.clone(),
            step_count: self.step_guard.current_step(),
            cost_usd_accumulated: self.budget.spent_usd(),
            retries_used: state.retries_used,
            aborted: state.aborted,
            abort_reason: state.abort_reason.clone(),
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            started_at: self.started_at_utc,
            nodes: state.graph.nodes().to_vec(),
            events: state.events.clone(),
        }
    }

    /// Aggregates of the node DAG for export payloads.
    pub fn graph_summary(&self) -> Map<String, Value> {
        self.state.lock().graph.aggregates()
    }

    /// Close the chain: cancel the timeout watcher, set the token, mark
    /// the context closed, and flush events to the attached bus. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.token.set();
        if let Some(tx) = &self.watcher_shutdown {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.watcher.lock().take() {
            let _ = handle.join();
        }
        if let Some(bus) = &self.bus {
            let events = self.state.lock().events.clone();
            for event in &events {
                bus.emit(&Event::from_safety_event(event, &self.metadata.chain_id));
            }
        }
        tracing::debug!(chain_id = self.metadata.chain_id.as_str(), "execution context closed");
    }

    // ------------------------------------------------------------------
    // Wrap internals
    // ------------------------------------------------------------------

    fn wrap_call<T, F>(
        &self,
        kind: NodeKind,
        mut f: F,
        options: WrapOptions,
    ) -> ContainmentResult<WrapOutcome<T>>
    where
        F: FnMut() -> anyhow::Result<T>,
    {
        if self.state.lock().closed {
            return Err(ContainmentError::ContextClosed(self.metadata.chain_id.clone()));
        }

        // Deadline check before anything else; the callable is never
        // invoked on an expired chain.
        if self.token.is_set() {
            self.record_timeout("chain deadline reached before dispatch");
            return Ok(WrapOutcome::denied(Decision::Halt));
        }

        // Fast-fail while the breaker is open.
        if let Some(breaker) = &self.breaker {
            if breaker.state() == BreakerState::Open {
                self.record_event(
                    SafetyEvent::new(
                        event_types::CHAIN_CIRCUIT_OPEN,
                        Decision::Halt,
                        format!(
                            "circuit open: {} consecutive failures",
                            breaker.failure_count()
                        ),
                        "CircuitBreaker",
                    )
                    .with_request_id(&self.metadata.request_id),
                );
                return Ok(WrapOutcome::denied(Decision::Halt));
            }
        }

        // Step ceiling.
        let step_check = self.step_guard.check(&self.policy_context(0.0));
        if !step_check.allowed {
            self.record_event(
                SafetyEvent::new(
                    event_types::MAX_STEPS_EXCEEDED,
                    Decision::Halt,
                    step_check.reason,
                    "AgentStepGuard",
                )
                .with_request_id(&self.metadata.request_id),
            );
            self.mark_aborted("step limit reached");
            return Ok(WrapOutcome::denied(Decision::Halt));
        }

        // Budget projection with the caller's cost hint.
        let cost = options.cost_estimate_hint;
        if cost > 0.0 {
            let budget_check = self.budget.check(&self.policy_context(cost));
            if !budget_check.allowed {
                self.record_event(
                    SafetyEvent::new(
                        event_types::BUDGET_EXCEEDED,
                        Decision::Halt,
                        budget_check.reason,
                        "BudgetEnforcer",
                    )
                    .with_request_id(&self.metadata.request_id),
                );
                self.mark_aborted("budget exceeded");
                return Ok(WrapOutcome::denied(Decision::Halt));
            }
        }

        // Shield boundary.
        let call_ctx = self.call_context(kind, &options);
        let hook_decision = match kind {
            NodeKind::Llm => self.pipeline.before_llm_call(&call_ctx),
            NodeKind::Tool => self.pipeline.before_tool_call(&call_ctx),
        };
        let mut degraded = false;
        if hook_decision.decision != Decision::Allow {
            self.record_event(
                SafetyEvent::new(
                    hook_decision.event_type.clone(),
                    hook_decision.decision,
                    hook_decision.reason.clone(),
                    hook_decision.hook.clone(),
                )
                .with_request_id(&self.metadata.request_id)
                .with_metadata(hook_decision.metadata.clone()),
            );
            if hook_decision.decision >= Decision::Retry {
                if hook_decision.decision >= Decision::Quarantine {
                    self.mark_aborted(&hook_decision.reason);
                }
                return Ok(WrapOutcome::denied(hook_decision.decision));
            }
            // DEGRADE: the call proceeds; the caller applies the action.
            degraded = true;
        }

        self.step_guard.step(None);
        let node_id = self.state.lock().graph.open_node(kind, &self.operation_name(kind, &options));

        // Invoke, routing errors through the retry boundary.
        let mut node_retries = 0u32;
        let value = loop {
            let call_result = match &self.retry {
                Some(retry) => {
                    let result = retry.execute(&mut f);
                    let attempts = retry.attempt_count();
                    if attempts > 1 {
                        let extra = (attempts - 1) as u64;
                        node_retries += attempts - 1;
                        self.state.lock().retries_used += extra;
                    }
                    result
                }
                None => f(),
            };

            match call_result {
                Ok(value) => break value,
                Err(err) => {
                    if self.token.is_set() {
                        self.close_node(node_id, NodeStatus::Halted, 0.0, node_retries);
                        self.record_timeout("chain deadline reached during dispatch");
                        return Ok(WrapOutcome::denied(Decision::Halt));
                    }

                    let error_decision = self.pipeline.on_error(&call_ctx, &err);
                    let failed_type = match kind {
                        NodeKind::Llm => event_types::LLM_CALL_FAILED,
                        NodeKind::Tool => event_types::TOOL_CALL_FAILED,
                    };
                    let reason = if error_decision.reason.is_empty() {
                        err.to_string()
                    } else {
                        error_decision.reason.clone()
                    };
                    self.record_event(
                        SafetyEvent::new(failed_type, error_decision.decision, reason.clone(), error_decision.hook.clone())
                            .with_request_id(&self.metadata.request_id),
                    );
                    self.record_breaker_failure();

                    match error_decision.decision {
                        Decision::Retry => {
                            let exhausted = {
                                let mut state = self.state.lock();
                                if state.retries_used >= self.config.max_retries_total as u64 {
                                    true
                                } else {
                                    state.retries_used += 1;
                                    false
                                }
                            };
                            if exhausted {
                                self.record_event(
                                    SafetyEvent::new(
                                        event_types::RETRY_EXHAUSTED,
                                        Decision::Halt,
                                        format!(
                                            "retry budget exhausted after {} retries",
                                            self.config.max_retries_total
                                        ),
                                        "ExecutionContext",
                                    )
                                    .with_request_id(&self.metadata.request_id),
                                );
                                self.close_node(node_id, NodeStatus::Error, 0.0, node_retries);
                                self.mark_aborted("retry budget exhausted");
                                return Ok(WrapOutcome::denied(Decision::Halt));
                            }
                            node_retries += 1;
                            continue;
                        }
                        Decision::Degrade => {
                            // A degraded error stops retrying; the caller
                            // applies the degradation action and may
                            // re-issue the call.
                            self.close_node(node_id, NodeStatus::Error, 0.0, node_retries);
                            return Ok(WrapOutcome::denied(Decision::Degrade));
                        }
                        Decision::Allow => {
                            // Legacy opt-in: the error is the caller's
                            // problem; the chain keeps running.
                            self.close_node(node_id, NodeStatus::Error, 0.0, node_retries);
                            return Ok(WrapOutcome {
                                decision: Decision::Allow,
                                value: None,
                            });
                        }
                        decision => {
                            self.close_node(node_id, NodeStatus::Error, 0.0, node_retries);
                            self.mark_aborted(&reason);
                            return Ok(WrapOutcome::denied(decision));
                        }
                    }
                }
            }
        };

        if let Some(breaker) = &self.breaker {
            breaker.record_success();
        }

        // Charge boundary fires for LLM calls only.
        if kind == NodeKind::Llm {
            let charge = self.pipeline.before_charge(&call_ctx, cost);
            if charge.decision != Decision::Allow {
                self.record_event(
                    SafetyEvent::new(
                        charge.event_type.clone(),
                        charge.decision,
                        charge.reason.clone(),
                        charge.hook.clone(),
                    )
                    .with_request_id(&self.metadata.request_id),
                );
                if charge.decision >= Decision::Retry {
                    self.close_node(node_id, NodeStatus::Halted, 0.0, node_retries);
                    if charge.decision >= Decision::Quarantine {
                        self.mark_aborted(&charge.reason);
                    }
                    return Ok(WrapOutcome::denied(charge.decision));
                }
                degraded = true;
            }
        }

        // Deadline re-check: a result that arrives after the deadline is
        // discarded and never charged.
        if self.token.is_set() {
            self.close_node(node_id, NodeStatus::Halted, 0.0, node_retries);
            self.record_timeout("chain deadline reached after dispatch");
            return Ok(WrapOutcome::denied(Decision::Halt));
        }

        if cost > 0.0 {
            match self.budget.spend(cost)? {
                true => {}
                false => {
                    self.record_event(
                        SafetyEvent::new(
                            event_types::BUDGET_EXCEEDED,
                            Decision::Halt,
                            format!(
                                "budget exceeded: ${:.2} spent of ${:.2}",
                                self.budget.spent_usd(),
                                self.config.max_cost_usd
                            ),
                            "BudgetEnforcer",
                        )
                        .with_request_id(&self.metadata.request_id),
                    );
                    self.close_node(node_id, NodeStatus::Halted, 0.0, node_retries);
                    self.mark_aborted("budget exceeded");
                    return Ok(WrapOutcome::denied(Decision::Halt));
                }
            }
        }

        self.close_node(node_id, NodeStatus::Success, cost, node_retries);
        Ok(WrapOutcome {
            decision: if degraded { Decision::Degrade } else { Decision::Allow },
            value: Some(value),
        })
    }

    fn operation_name(&self, kind: NodeKind, options: &WrapOptions) -> String {
        if options.operation_name.is_empty() {
            match kind {
                NodeKind::Llm => "llm_call".to_string(),
                NodeKind::Tool => "tool_call".to_string(),
            }
        } else {
            options.operation_name.clone()
        }
    }

    fn call_context(&self, kind: NodeKind, options: &WrapOptions) -> ToolCallContext {
        let mut ctx = ToolCallContext::new(&self.metadata.request_id);
        ctx.session_id = Some(self.metadata.chain_id.clone());
        ctx.tool_name = match kind {
            NodeKind::Tool => Some(
                options
                    .tool_name
                    .clone()
                    .unwrap_or_else(|| self.operation_name(kind, options)),
            ),
            NodeKind::Llm => options.tool_name.clone(),
        };
        ctx.model = options.model.clone().or_else(|| self.metadata.model.clone());
        ctx.tokens_in = options.tokens_in;
        ctx.tokens_out = options.tokens_out;
        ctx.cost_usd = Some(options.cost_estimate_hint);
        ctx.metadata = options.metadata.clone();
        ctx
    }

    fn policy_context(&self, cost_usd: f64) -> PolicyContext {
        PolicyContext::new()
            .with_cost(cost_usd)
            .with_step_count(self.step_guard.current_step())
            .with_chain_id(&self.metadata.chain_id)
    }

    fn record_event(&self, event: SafetyEvent) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.events.push(event);
    }

    fn record_timeout(&self, reason: &str) {
        self.record_event(
            SafetyEvent::new(event_types::CHAIN_TIMEOUT, Decision::Halt, reason, "ExecutionContext")
                .with_request_id(&self.metadata.request_id),
        );
        self.mark_aborted(reason);
    }

    fn record_breaker_failure(&self) {
        if let Some(breaker) = &self.breaker {
            let was_open = breaker.state() == BreakerState::Open;
            let now = breaker.record_failure();
            if now == BreakerState::Open && !was_open {
                self.record_event(
                    SafetyEvent::new(
                        event_types::BREAKER_OPENED,
                        Decision::Halt,
                        format!(
                            "failure threshold reached ({} consecutive failures)",
                            breaker.failure_count()
                        ),
                        "CircuitBreaker",
                    )
                    .with_request_id(&self.metadata.request_id),
                );
            }
        }
    }

    fn close_node(&self, node_id: crate::types::NodeId, status: NodeStatus, cost: f64, retries: u32) {
        self.state.lock().graph.close_node(node_id, status, cost, retries);
    }

    fn mark_aborted(&self, reason: &str) {
        let mut state = self.state.lock();
        if !state.aborted {
            state.aborted = true;
            state.abort_reason = Some(reason.to_string());
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.close();
    }
}
