//! Model pricing and cumulative usage accounting.
//!
//! The provider normally reports billed cost per request. When it does not,
//! cost is estimated from the per-million-token table in
//! [`pricing_for_model`]. [`CostTracker`] accumulates both paths so the
//! client-side cost guard and the end-of-run summary see the same totals.

/// Per-model pricing for cost estimation (USD per 1M tokens).
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    /// Price per 1M input tokens.
    pub input_per_million: f64,
    /// Price per 1M output tokens.
    pub output_per_million: f64,
}

impl ModelPricing {
    const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Estimate cost for given token counts.
    pub fn estimate_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (completion_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self::new(3.0, 15.0)
    }
}

/// Lookup approximate pricing for a model by name.
///
/// Matches on the segment after the last `/` so an org prefix such as
/// `"acme/sonnet-distill"` does not pick up another vendor's pricing by
/// accident.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();

    // Approximate. Only used when the provider omits `usage.cost`.
    let table: &[(&[&str], ModelPricing)] = &[
        (&["opus"], ModelPricing::new(15.0, 75.0)),
        (&["sonnet"], ModelPricing::new(3.0, 15.0)),
        (&["haiku"], ModelPricing::new(0.80, 4.0)),
        (&["gpt-4o-mini", "4o-mini"], ModelPricing::new(0.15, 0.60)),
        (&["gpt-4o", "gpt-4.1", "gpt-4"], ModelPricing::new(2.50, 10.0)),
        (&["gpt-5"], ModelPricing::new(1.25, 10.0)),
        (&["deepseek"], ModelPricing::new(0.27, 1.10)),
    ];
    for (needles, pricing) in table {
        if needles.iter().any(|n| name.contains(n)) {
            return pricing.clone();
        }
    }

    if name.starts_with("o1") || name.starts_with("o3") {
        ModelPricing::new(15.0, 60.0)
    } else if name.contains("gemini") && name.contains("flash") {
        ModelPricing::new(0.30, 2.50)
    } else if name.contains("gemini") {
        ModelPricing::new(1.25, 10.0)
    } else {
        ModelPricing::default()
    }
}

/// Cumulative usage for one client (or one run).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CostTracker {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_cached_tokens: u64,
    pub total_cost_usd: f64,
    pub request_count: u64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request.
    pub fn record(&mut self, prompt_tokens: u32, completion_tokens: u32, cached_tokens: u32, cost: f64) {
        self.total_prompt_tokens += u64::from(prompt_tokens);
        self.total_completion_tokens += u64::from(completion_tokens);
        self.total_cached_tokens += u64::from(cached_tokens);
        self.total_cost_usd += cost;
        self.request_count += 1;
    }

    /// Total tokens consumed.
    pub fn total_tokens(&self) -> u64 {
        self.total_prompt_tokens + self.total_completion_tokens
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "{} request(s), tokens: {} prompt ({} cached) + {} completion = {} total, cost: ${:.4}",
            self.request_count,
            self.total_prompt_tokens,
            self.total_cached_tokens,
            self.total_completion_tokens,
            self.total_tokens(),
            self.total_cost_usd,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_estimation() {
        let pricing = ModelPricing::new(3.0, 15.0);
        let cost = pricing.estimate_cost(1_000_000, 100_000);
        assert!((cost - 4.5).abs() < 0.01);
    }

    #[test]
    fn tracker_accumulates_requests() {
        let mut tracker = CostTracker::new();
        tracker.record(1000, 500, 200, 0.01);
        tracker.record(2000, 1000, 0, 0.02);
        assert_eq!(tracker.total_prompt_tokens, 3000);
        assert_eq!(tracker.total_completion_tokens, 1500);
        assert_eq!(tracker.total_cached_tokens, 200);
        assert_eq!(tracker.request_count, 2);
        assert!((tracker.total_cost_usd - 0.03).abs() < 1e-9);
    }

    #[test]
    fn pricing_lookup_known_models() {
        assert!(pricing_for_model("anthropic/claude-opus-4").input_per_million > 10.0);
        assert!(pricing_for_model("anthropic/claude-3.5-haiku").input_per_million < 1.0);
        assert_eq!(
            pricing_for_model("openai/o3-mini"),
            ModelPricing::new(15.0, 60.0)
        );
        assert_eq!(pricing_for_model("some-unknown-model"), ModelPricing::default());
    }

    #[test]
    fn org_prefix_does_not_match() {
        // "opus-labs" is the org, the model itself is unknown.
        assert_eq!(
            pricing_for_model("opus-labs/custom-model"),
            ModelPricing::default()
        );
    }

    #[test]
    fn summary_mentions_requests_and_cost() {
        let mut tracker = CostTracker::new();
        tracker.record(1000, 500, 0, 0.5);
        let summary = tracker.summary();
        assert!(summary.starts_with("1 request(s)"));
        assert!(summary.contains("$0.5000"));
    }
}
