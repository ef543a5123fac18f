//! Semantic loop detection over a rolling window of LLM outputs
//!
//! Compares recent outputs pairwise with word-level Jaccard similarity.
//! Exact repetition is a stronger signal than near-duplication and gets a
//! distinct reason.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use regex::Regex;

use crate::policy::RuntimePolicy;
use crate::types::{PolicyContext, PolicyDecision};

#[derive(Debug, Clone)]
struct WindowEntry {
    normalized: String,
    tokens: HashSet<String>,
}

/// Detects semantic loop patterns in LLM output via Jaccard similarity.
///
/// Maintains a rolling window of recent outputs. On each check, all pairs
/// whose normalised texts meet `min_chars` are compared; the guard denies
/// on exact equality or similarity at or above the threshold.
pub struct SemanticLoopGuard {
    window: usize,
    jaccard_threshold: f64,
    min_chars: usize,
    whitespace: Regex,
    buffer: Mutex<VecDeque<WindowEntry>>,
}

impl SemanticLoopGuard {
    pub fn new(window: usize, jaccard_threshold: f64, min_chars: usize) -> Self {
        Self {
            window,
            jaccard_threshold,
            min_chars,
            whitespace: Regex::new(r"\s+").expect("static whitespace pattern"),
            buffer: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    /// Lowercase, trim, and collapse internal whitespace.
    fn normalize(&self, text: &str) -> String {
        self.whitespace
            .replace_all(text.trim(), " ")
            .to_lowercase()
    }

    fn tokenize(normalized: &str) -> HashSet<String> {
        normalized.split(' ').map(str::to_string).collect()
    }

    /// Jaccard similarity between two word sets. Two empty sets are
    /// identical.
    fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let intersection = a.intersection(b).count();
        let union = a.union(b).count();
        if union == 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }

    /// Append `text` to the rolling buffer without checking.
    pub fn record(&self, text: &str) {
        let normalized = self.normalize(text);
        let tokens = Self::tokenize(&normalized);
        let mut buffer = self.buffer.lock();
        if buffer.len() == self.window {
            buffer.pop_front();
        }
        buffer.push_back(WindowEntry { normalized, tokens });
    }

    /// Check the current buffer for semantic loops.
    pub fn check_buffer(&self) -> PolicyDecision {
        let buffer = self.buffer.lock();
        let entries: Vec<&WindowEntry> = buffer.iter().collect();

        for i in 0..entries.len() {
            if entries[i].normalized.len() < self.min_chars {
                continue;
            }
            for j in (i + 1)..entries.len() {
                if entries[j].normalized.len() < self.min_chars {
                    continue;
                }
                if entries[i].normalized == entries[j].normalized {
                    return PolicyDecision::deny(
                        self.policy_type(),
                        format!(
                            "semantic_loop: exact repetition detected (entry {} == entry {})",
                            i, j
                        ),
                    );
                }
                let sim = Self::jaccard(&entries[i].tokens, &entries[j].tokens);
                if sim >= self.jaccard_threshold {
                    return PolicyDecision::deny(
                        self.policy_type(),
                        format!(
                            "semantic_loop: Jaccard similarity {:.3} >= {} (entries {} and {})",
                            sim, self.jaccard_threshold, i, j
                        ),
                    );
                }
            }
        }
        PolicyDecision::allow(self.policy_type())
    }

    /// Record `text` and immediately check for loops.
    pub fn feed(&self, text: &str) -> PolicyDecision {
        self.record(text);
        self.check_buffer()
    }
}

impl RuntimePolicy for SemanticLoopGuard {
    fn check(&self, _context: &PolicyContext) -> PolicyDecision {
        self.check_buffer()
    }

    fn reset(&self) {
        self.buffer.lock().clear();
    }

    fn policy_type(&self) -> &'static str {
        "semantic_loop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTENCE: &str =
        "The model keeps producing the same answer over and over again today.";

    #[test]
    fn test_first_feed_allows() {
        let guard = SemanticLoopGuard::new(3, 0.92, 10);
        assert!(guard.feed(SENTENCE).allowed);
    }

    #[test]
    fn test_exact_repetition_denies_with_distinct_reason() {
        let guard = SemanticLoopGuard::new(3, 0.92, 10);
        assert!(guard.feed(SENTENCE).allowed);
        let decision = guard.feed(SENTENCE);
        assert!(!decision.allowed);
        assert_eq!(decision.policy_type, "semantic_loop");
        assert!(decision.reason.contains("exact repetition"));
    }

    #[test]
    fn test_normalisation_catches_case_and_whitespace_variants() {
        let guard = SemanticLoopGuard::new(3, 0.92, 10);
        guard.feed("The Answer  Is   Forty Two, obviously and clearly");
        let decision = guard.feed("the answer is forty two, obviously and clearly");
        assert!(!decision.allowed);
        assert!(decision.reason.contains("exact repetition"));
    }

    #[test]
    fn test_near_duplicate_trips_jaccard() {
        let guard = SemanticLoopGuard::new(3, 0.80, 10);
        guard.feed("alpha beta gamma delta epsilon zeta eta theta iota kappa");
        let decision = guard.feed("alpha beta gamma delta epsilon zeta eta theta iota lambda");
        assert!(!decision.allowed);
        assert!(decision.reason.contains("Jaccard similarity"));
    }

    #[test]
    fn test_short_outputs_are_skipped() {
        let guard = SemanticLoopGuard::new(3, 0.92, 80);
        guard.feed("ok");
        assert!(guard.feed("ok").allowed);
    }

    #[test]
    fn test_window_evicts_old_entries() {
        let guard = SemanticLoopGuard::new(2, 0.92, 10);
        guard.feed(SENTENCE);
        guard.feed("Something entirely different happened in this run right now.");
        // The first sentence has been evicted, so repeating it is fine.
        assert!(guard.feed(SENTENCE).allowed);
    }

    #[test]
    fn test_reset_clears_buffer() {
        let guard = SemanticLoopGuard::new(3, 0.92, 10);
        guard.feed(SENTENCE);
        guard.reset();
        assert!(guard.feed(SENTENCE).allowed);
    }

    #[test]
    fn test_distinct_outputs_allowed() {
        let guard = SemanticLoopGuard::new(3, 0.92, 10);
        assert!(guard.feed("First the agent fetched the page and parsed it.").allowed);
        assert!(guard.feed("Then it summarised the table into bullet points.").allowed);
        assert!(guard.feed("Finally it produced a short conclusion paragraph.").allowed);
    }
}
