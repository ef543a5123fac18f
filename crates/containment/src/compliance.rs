//! Compliance export payload serialisation
//!
//! Pure functions turning snapshots into the JSON payload the compliance
//! collector ingests: a chain-level summary upserted on the server plus a
//! batch of safety events. No I/O here.

use serde_json::{Map, Value};

use crate::containment::{ChainMetadata, ContextSnapshot, NodeRecord};
use crate::events::SafetyEvent;

/// Convert a [`SafetyEvent`] to its export dict.
pub fn serialize_safety_event(event: &SafetyEvent) -> Value {
    let mut map = Map::new();
    map.insert("event_type".into(), Value::String(event.event_type.clone()));
    map.insert("decision".into(), Value::String(event.decision.as_str().into()));
    map.insert("reason".into(), Value::String(event.reason.clone()));
    map.insert("hook".into(), Value::String(event.hook.clone()));
    map.insert(
        "request_id".into(),
        event
            .request_id
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    map.insert("ts".into(), Value::String(event.ts.to_rfc3339()));
    map.insert("metadata".into(), Value::Object(event.metadata.clone()));
    Value::Object(map)
}

/// Convert a [`NodeRecord`] to its export dict.
pub fn serialize_node_record(node: &NodeRecord) -> Value {
    let mut map = Map::new();
    map.insert("node_id".into(), Value::String(node.node_id.to_string()));
    map.insert(
        "parent_id".into(),
        node.parent_id
            .map(|id| Value::String(id.to_string()))
            .unwrap_or(Value::Null),
    );
    map.insert("kind".into(), Value::String(node.kind.as_str().into()));
    map.insert("operation_name".into(), Value::String(node.operation_name.clone()));
    map.insert("start_ts".into(), Value::String(node.start_ts.to_rfc3339()));
    map.insert(
        "end_ts".into(),
        node.end_ts
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null),
    );
    map.insert("status".into(), Value::String(node.status.as_str().into()));
    map.insert("cost_usd".into(), Value::from(node.cost_usd));
    map.insert("retries_used".into(), Value::from(node.retries_used));
    Value::Object(map)
}

/// Build the ingest payload from a snapshot.
///
/// Returns `{ "chain": {...}, "events": [...] }`. The chain summary picks
/// up service/team/model/tags from the metadata and the graph aggregates
/// when provided.
pub fn serialize_snapshot(
    snapshot: &ContextSnapshot,
    metadata: Option<&ChainMetadata>,
    graph_summary: Option<&Map<String, Value>>,
) -> Value {
    let mut chain = Map::new();
    chain.insert("chain_id".into(), Value::String(snapshot.chain_id.clone()));
    chain.insert("request_id".into(), Value::String(snapshot.request_id.clone()));
    chain.insert("step_count".into(), Value::from(snapshot.step_count));
    chain.insert("cost_usd".into(), Value::from(snapshot.cost_usd_accumulated));
    chain.insert("retries_used".into(), Value::from(snapshot.retries_used));
    chain.insert("aborted".into(), Value::Bool(snapshot.aborted));
    chain.insert(
        "abort_reason".into(),
        snapshot
            .abort_reason
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    chain.insert("elapsed_ms".into(), Value::from(snapshot.elapsed_ms));
    chain.insert("started_at".into(), Value::String(snapshot.started_at.to_rfc3339()));

    if let Some(metadata) = metadata {
        if let Some(service) = &metadata.service {
            chain.insert("service".into(), Value::String(service.clone()));
        }
        if let Some(team) = &metadata.team {
            chain.insert("team".into(), Value::String(team.clone()));
        }
        if let Some(model) = &metadata.model {
            chain.insert("model".into(), Value::String(model.clone()));
        }
        if !metadata.tags.is_empty() {
            chain.insert(
                "tags".into(),
                serde_json::to_value(&metadata.tags).unwrap_or_default(),
            );
        }
    }
    if let Some(summary) = graph_summary {
        chain.insert("graph_summary".into(), Value::Object(summary.clone()));
    }

    let events: Vec<Value> = snapshot.events.iter().map(serialize_safety_event).collect();

    let mut payload = Map::new();
    payload.insert("chain".into(), Value::Object(chain));
    payload.insert("events".into(), Value::Array(events));
    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containment::{ChainMetadata, ExecutionConfig, ExecutionContext, WrapOptions};
    use crate::types::Decision;

    fn sample_snapshot() -> (ContextSnapshot, ChainMetadata, Map<String, Value>) {
        let mut metadata = ChainMetadata::default();
        metadata.service = Some("support-bot".into());
        metadata.team = Some("assist".into());
        metadata.tags.insert("env".into(), "staging".into());

        let ctx = ExecutionContext::new(
            ExecutionConfig {
                max_cost_usd: 0.02,
                ..ExecutionConfig::default()
            },
            metadata.clone(),
        );
        ctx.wrap_llm_call(|| Ok(()), WrapOptions::named("answer").with_cost_estimate(0.01))
            .unwrap();
        ctx.wrap_llm_call(|| Ok(()), WrapOptions::named("answer").with_cost_estimate(0.05))
            .unwrap();
        let summary = ctx.graph_summary();
        (ctx.get_snapshot(), metadata, summary)
    }

    #[test]
    fn test_payload_has_chain_and_events() {
        let (snapshot, metadata, summary) = sample_snapshot();
        let payload = serialize_snapshot(&snapshot, Some(&metadata), Some(&summary));

        let chain = payload.get("chain").unwrap();
        assert_eq!(chain.get("chain_id").and_then(Value::as_str), Some(snapshot.chain_id.as_str()));
        assert_eq!(chain.get("service").and_then(Value::as_str), Some("support-bot"));
        assert_eq!(chain.get("team").and_then(Value::as_str), Some("assist"));
        assert!(chain.get("graph_summary").is_some());
        assert_eq!(chain.get("aborted").and_then(Value::as_bool), Some(true));

        let events = payload.get("events").and_then(Value::as_array).unwrap();
        assert_eq!(events.len(), snapshot.events.len());
        assert!(!events.is_empty());
        assert!(events[0].get("decision").is_some());
    }

    #[test]
    fn test_event_serialisation_fields() {
        let event = SafetyEvent::new("BUDGET_EXCEEDED", Decision::Halt, "over", "BudgetEnforcer")
            .with_request_id("req-1");
        let value = serialize_safety_event(&event);
        assert_eq!(value.get("event_type").and_then(Value::as_str), Some("BUDGET_EXCEEDED"));
        assert_eq!(value.get("decision").and_then(Value::as_str), Some("HALT"));
        assert_eq!(value.get("request_id").and_then(Value::as_str), Some("req-1"));
        assert!(value.get("ts").and_then(Value::as_str).is_some());
    }

    #[test]
    fn test_node_serialisation_fields() {
        let (snapshot, _, _) = sample_snapshot();
        let value = serialize_node_record(&snapshot.nodes[0]);
        assert_eq!(value.get("kind").and_then(Value::as_str), Some("llm"));
        assert_eq!(value.get("status").and_then(Value::as_str), Some("success"));
        assert_eq!(value.get("parent_id"), Some(&Value::Null));
    }
}
