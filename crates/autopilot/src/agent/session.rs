//! Session-scoped counters for one agent run.
//!
//! A [`SessionState`] is created fresh for every run and passed by reference
//! to whatever needs it. It owns the session id, the item-id sequence used in
//! lifecycle events, and the accumulated token and cost totals.

use crate::api::transport::TokenUsage;
use chrono::Utc;

/// Per-run identifiers and totals.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    session_id: String,
    next_item: u64,
    /// Accumulated model cost in USD.
    pub cost: f64,
    /// Accumulated token counts.
    pub usage: TokenUsage,
}

impl SessionState {
    /// Start a session with an id derived from the current time.
    pub fn new() -> Self {
        Self::with_id(format!("sess_{}", Utc::now().timestamp_millis()))
    }

    pub fn with_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            next_item: 0,
            cost: 0.0,
            usage: TokenUsage::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `item_0`, `item_1`, ... in call order.
    pub fn next_item_id(&mut self) -> String {
        let id = format!("item_{}", self.next_item);
        self.next_item += 1;
        id
    }

    /// Add one model call's cost and usage.
    pub fn record_call(&mut self, cost: f64, usage: TokenUsage) {
        self.cost += cost;
        self.usage.add(usage);
    }

    /// Clear counters and totals. The session id is kept.
    pub fn reset(&mut self) {
        self.next_item = 0;
        self.cost = 0.0;
        self.usage = TokenUsage::default();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_format() {
        let s = SessionState::new();
        let millis = s.session_id().strip_prefix("sess_").unwrap();
        assert!(millis.parse::<i64>().unwrap() > 1_600_000_000_000);
    }

    #[test]
    fn item_ids_are_sequential() {
        let mut s = SessionState::with_id("sess_1");
        assert_eq!(s.next_item_id(), "item_0");
        assert_eq!(s.next_item_id(), "item_1");
        assert_eq!(s.next_item_id(), "item_2");
    }

    #[test]
    fn record_and_reset() {
        let mut s = SessionState::with_id("sess_1");
        s.next_item_id();
        s.record_call(0.5, TokenUsage { input: 10, output: 2, cached: 4 });
        s.record_call(0.25, TokenUsage { input: 5, output: 1, cached: 0 });
        assert!((s.cost - 0.75).abs() < f64::EPSILON);
        assert_eq!(s.usage, TokenUsage { input: 15, output: 3, cached: 4 });

        s.reset();
        assert_eq!(s.cost, 0.0);
        assert_eq!(s.usage, TokenUsage::default());
        assert_eq!(s.next_item_id(), "item_0");
        assert_eq!(s.session_id(), "sess_1");
    }
}
