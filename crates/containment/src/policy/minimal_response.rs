//! Response-constraint injection for system messages
//!
//! Shapes LLM output rather than blocking it: when enabled, structured
//! conciseness constraints are appended to the system message. The original
//! message is always preserved.

use serde_json::{Map, Value};

use crate::events::{event_types, SafetyEvent};
use crate::types::Decision;

/// Injects conciseness constraints into system messages.
#[derive(Debug, Clone)]
pub struct MinimalResponsePolicy {
    pub enabled: bool,
    pub max_bullets: u32,
    pub allow_questions: bool,
    pub max_questions: u32,
}

impl Default for MinimalResponsePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_bullets: 5,
            allow_questions: false,
            max_questions: 1,
        }
    }
}

impl MinimalResponsePolicy {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    fn build_constraints(&self) -> String {
        let question_rule = if self.allow_questions {
            format!("At most {} question if essential.", self.max_questions)
        } else {
            "No follow-up questions.".to_string()
        };
        format!(
            "\n\n--- RESPONSE CONSTRAINTS ---\n\
             - Answer in 1 line (conclusion first).\n\
             - Use at most {} bullet points if elaboration needed.\n\
             - If uncertain, state 'uncertain' in 1 line + suggest 1 next action.\n\
             - {}\n\
             --- END CONSTRAINTS ---",
            self.max_bullets, question_rule
        )
    }

    /// Append constraint text to a system message. Returns the message
    /// unchanged when disabled.
    pub fn inject(&self, system_message: &str) -> String {
        if !self.enabled {
            return system_message.to_string();
        }
        format!("{}{}", system_message, self.build_constraints())
    }

    /// Inject the policy into a request map. The original system message is
    /// preserved under `_original_system` for audit purposes.
    pub fn wrap_request(&self, request: &Map<String, Value>) -> Map<String, Value> {
        if !self.enabled {
            return request.clone();
        }
        let Some(Value::String(system)) = request.get("system") else {
            return request.clone();
        };
        let mut result = request.clone();
        result.insert("_original_system".into(), Value::String(system.clone()));
        result.insert("system".into(), Value::String(self.inject(system)));
        result
    }

    /// SafetyEvent recording that this policy was applied. Callers record
    /// it only when the policy is enabled.
    pub fn applied_event(&self, request_id: Option<&str>) -> SafetyEvent {
        let mut event = SafetyEvent::new(
            event_types::POLICY_APPLIED,
            Decision::Allow,
            "minimal_response_policy applied",
            "MinimalResponsePolicy",
        );
        if let Some(request_id) = request_id {
            event = event.with_request_id(request_id);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disabled_is_a_noop() {
        let policy = MinimalResponsePolicy::default();
        assert_eq!(policy.inject("You are helpful."), "You are helpful.");
    }

    #[test]
    fn test_inject_appends_and_preserves_original() {
        let policy = MinimalResponsePolicy::enabled();
        let injected = policy.inject("You are helpful.");
        assert!(injected.starts_with("You are helpful."));
        assert!(injected.contains("RESPONSE CONSTRAINTS"));
        assert!(injected.contains("No follow-up questions."));
    }

    #[test]
    fn test_wrap_request_keeps_original_system() {
        let policy = MinimalResponsePolicy::enabled();
        let mut request = Map::new();
        request.insert("system".into(), json!("base prompt"));
        request.insert("user".into(), json!("question"));

        let wrapped = policy.wrap_request(&request);
        assert_eq!(wrapped.get("_original_system"), Some(&json!("base prompt")));
        assert!(wrapped
            .get("system")
            .and_then(|v| v.as_str())
            .unwrap()
            .contains("RESPONSE CONSTRAINTS"));
        assert_eq!(wrapped.get("user"), Some(&json!("question")));
    }

    #[test]
    fn test_wrap_request_without_system_key_unchanged() {
        let policy = MinimalResponsePolicy::enabled();
        let mut request = Map::new();
        request.insert("user".into(), json!("question"));
        assert_eq!(policy.wrap_request(&request), request);
    }

    #[test]
    fn test_question_rule_when_allowed() {
        let mut policy = MinimalResponsePolicy::enabled();
        policy.allow_questions = true;
        policy.max_questions = 2;
        assert!(policy.inject("x").contains("At most 2 question if essential."));
    }
}
