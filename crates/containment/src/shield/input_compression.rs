//! Oversized-input guard with hashed evidence
//!
//! Estimates the token count of an input string (length / 4 by default) and
//! degrades or halts when it crosses the configured thresholds. Raw input
//! text never reaches event metadata; only a SHA-256 prefix does.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::events::event_types;
use crate::shield::{HookDecision, PreDispatchHook};
use crate::types::{Decision, ToolCallContext};

/// Metadata key under which callers place the candidate input text.
pub const INPUT_METADATA_KEY: &str = "input";

const HASH_PREFIX_LEN: usize = 16;

type TokenEstimator = fn(&str) -> u64;

fn default_estimator(input: &str) -> u64 {
    (input.len() / 4) as u64
}

/// Flags inputs large enough to need compression or rejection.
pub struct InputCompressionHook {
    compress_threshold: u64,
    halt_threshold: u64,
    estimator: TokenEstimator,
}

impl InputCompressionHook {
    pub fn new(compress_threshold: u64, halt_threshold: u64) -> Self {
        Self {
            compress_threshold,
            halt_threshold,
            estimator: default_estimator,
        }
    }

    /// Override the length/4 heuristic with a caller-supplied estimator.
    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Evaluate an input string directly. Returns `None` below the
    /// compress threshold.
    pub fn evaluate(&self, input: &str) -> Option<HookDecision> {
        let estimated_tokens = (self.estimator)(input);
        if estimated_tokens < self.compress_threshold {
            return None;
        }

        let digest = Sha256::digest(input.as_bytes());
        let sha_prefix = hex::encode(&digest[..HASH_PREFIX_LEN / 2]);

        let decision = if estimated_tokens >= self.halt_threshold {
            Decision::Halt
        } else {
            Decision::Degrade
        };

        let mut metadata = Map::new();
        metadata.insert("estimated_tokens".into(), Value::from(estimated_tokens));
        metadata.insert("input_sha256".into(), Value::String(sha_prefix));
        metadata.insert("decision".into(), Value::String(decision.as_str().into()));

        Some(
            HookDecision::new(
                decision,
                "InputCompressionHook",
                event_types::INPUT_COMPRESSION,
                format!(
                    "input estimated at {} tokens (compress at {}, halt at {})",
                    estimated_tokens, self.compress_threshold, self.halt_threshold
                ),
            )
            .with_metadata(metadata),
        )
    }
}

impl PreDispatchHook for InputCompressionHook {
    /// Reads the candidate input from `ctx.metadata["input"]`; contexts
    /// without one pass untouched.
    fn before_llm_call(&self, ctx: &ToolCallContext) -> Option<HookDecision> {
        let input = ctx.metadata.get(INPUT_METADATA_KEY)?.as_str()?;
        self.evaluate(input)
    }
}
