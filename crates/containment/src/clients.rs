//! Pluggable LLM client contract
//!
//! The containment core never inspects prompt or response content; this
//! contract exists so callers can inject whichever provider they use. The
//! core works without any client at all.

use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Contract for pluggable LLM clients. Implementations must be
/// thread-safe.
pub trait LlmClient: Send + Sync {
    /// Generate a text response. May fail with any provider error.
    fn generate(&self, prompt: &str, context: Option<&Map<String, Value>>)
        -> anyhow::Result<String>;
}

/// Client that fails loudly when invoked. The default, so the core keeps
/// working when no LLM is configured.
pub struct NullClient;

impl LlmClient for NullClient {
    fn generate(
        &self,
        _prompt: &str,
        _context: Option<&Map<String, Value>>,
    ) -> anyhow::Result<String> {
        anyhow::bail!("no LLM client configured; inject one to enable LLM-backed features")
    }
}

/// Fixed-response client for tests.
pub struct DummyClient {
    fixed_response: String,
    call_count: Mutex<u64>,
    last_prompt: Mutex<Option<String>>,
}

impl DummyClient {
    pub fn new(fixed_response: impl Into<String>) -> Self {
        Self {
            fixed_response: fixed_response.into(),
            call_count: Mutex::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> u64 {
        *self.call_count.lock()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().clone()
    }
}

impl LlmClient for DummyClient {
    fn generate(
        &self,
        prompt: &str,
        _context: Option<&Map<String, Value>>,
    ) -> anyhow::Result<String> {
        *self.call_count.lock() += 1;
        *self.last_prompt.lock() = Some(prompt.to_string());
        Ok(self.fixed_response.clone())
    }
}
