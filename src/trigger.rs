//! Trigger matching and the edge-triggered switch signal.
//!
//! Matchers are evaluated against a lower-cased view of each output chunk
//! (or against a parsed log event) and are side-effect-free. A match raises
//! the [`TriggerSignal`], which latches at most once per episode: the
//! consumer must `acknowledge()` before the signal can fire again.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

/// A single trigger predicate.
///
/// Substring matchers expect their needle pre-lowercased; construction
/// through [`TriggerMatcher::substring`] and friends guarantees that.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerMatcher {
    /// Case-insensitive substring match.
    Substring(String),
    /// All substrings must be present (case-insensitive).
    AllSubstrings(Vec<String>),
    /// Top-level string field equality on a structured log event.
    Field { key: String, value: String },
}

impl TriggerMatcher {
    pub fn substring(needle: &str) -> Self {
        Self::Substring(needle.to_lowercase())
    }

    pub fn all_substrings(needles: &[&str]) -> Self {
        Self::AllSubstrings(needles.iter().map(|n| n.to_lowercase()).collect())
    }

    /// Evaluate against an already lower-cased text chunk.
    fn matches_lower(&self, lower: &str) -> bool {
        match self {
            Self::Substring(needle) => lower.contains(needle.as_str()),
            Self::AllSubstrings(needles) => needles.iter().all(|n| lower.contains(n.as_str())),
            // Field equality never matches free text; it is log-event only.
            Self::Field { .. } => false,
        }
    }

    /// Evaluate against a parsed structured log event.
    fn matches_event(&self, event: &Value) -> bool {
        match self {
            Self::Field { key, value } => event
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|v| v.eq_ignore_ascii_case(value)),
            // Substring matchers apply to the serialized event text, so a
            // phrase inside a nested message body still matches.
            _ => self.matches_lower(&event.to_string().to_lowercase()),
        }
    }
}

/// Ordered list of trigger predicates.
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    matchers: Vec<TriggerMatcher>,
}

impl TriggerSet {
    pub fn new(matchers: Vec<TriggerMatcher>) -> Self {
        Self { matchers }
    }

    /// The phrases Claude Code is known to emit when the subscription
    /// quota runs out.
    pub fn usage_limit_defaults() -> Self {
        Self::new(vec![
            TriggerMatcher::substring("usage limit reached"),
            TriggerMatcher::substring("rate limit"),
            TriggerMatcher::all_substrings(&["usage", "resets"]),
        ])
    }

    /// Build a set from user-configured phrases, replacing the defaults.
    pub fn from_phrases(phrases: &[String]) -> Self {
        Self::new(
            phrases
                .iter()
                .map(|p| TriggerMatcher::substring(p))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Does any matcher fire on this output chunk?
    pub fn matches_chunk(&self, chunk: &str) -> bool {
        let lower = chunk.to_lowercase();
        self.matchers.iter().any(|m| m.matches_lower(&lower))
    }

    /// Does any matcher fire on this structured log event?
    pub fn matches_event(&self, event: &Value) -> bool {
        self.matchers.iter().any(|m| m.matches_event(event))
    }
}

/// Single-producer/single-consumer edge-triggered signal.
///
/// `raise()` latches only while the signal is armed; repeated matches
/// within one episode are collapsed into a single pending raise. The
/// consumer observes it with `take()` and re-arms with `acknowledge()`
/// once the episode has been fully handled, so one usage-limit episode
/// can never cause a restart storm.
#[derive(Debug, Default)]
pub struct TriggerSignal {
    pending: AtomicBool,
    disarmed: AtomicBool,
}

impl TriggerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns true only for the first raise of an
    /// episode; later raises before `acknowledge()` are ignored.
    pub fn raise(&self) -> bool {
        if self.disarmed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.pending.store(true, Ordering::SeqCst);
        true
    }

    /// Consume a pending raise, if any.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    /// Re-arm for the next episode. Must be called by the consumer after
    /// the current episode has been handled.
    pub fn acknowledge(&self) {
        self.pending.store(false, Ordering::SeqCst);
        self.disarmed.store(false, Ordering::SeqCst);
    }
}
