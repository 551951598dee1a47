//! Configuration for the [`Harness`](super::harness::Harness).
//!
//! Every knob has a default suited to long unattended runs. Override the
//! common ones with the `with_*` builders, or set nested module configs
//! through struct update syntax:
//!
//! ```ignore
//! let config = LoopConfig::new("anthropic/claude-sonnet-4")
//!     .with_max_iterations(50)
//!     .with_cost_limit(5.0);
//!
//! let config = LoopConfig {
//!     context: ContextConfig::new().with_model_context_limit(128_000),
//!     ..LoopConfig::new("openai/gpt-4.1")
//! };
//! ```

use crate::ReasoningEffort;
use crate::api::retry::RetryConfig;
use crate::context::ContextConfig;
use crate::tools::ExecutorConfig;

/// Default iteration ceiling.
pub const DEFAULT_MAX_ITERATIONS: u32 = 400;

/// Default spend ceiling in USD.
pub const DEFAULT_COST_LIMIT: f64 = 100.0;

/// Default per-response token limit.
pub const DEFAULT_MAX_TOKENS: u32 = 16_384;

/// Default size, in estimated tokens, a single tool result is truncated to.
pub const DEFAULT_MAX_OUTPUT_TOKENS: usize = 2_500;

/// Settings for one agent run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// OpenRouter model identifier.
    pub model: String,
    /// Model calls before the loop gives up.
    pub max_iterations: u32,
    /// Accumulated cost (USD) at which the loop stops.
    pub cost_limit: f64,
    /// Response token limit per call.
    pub max_tokens: u32,
    /// Tool output is middle-out truncated to this many estimated tokens.
    pub max_output_tokens: usize,
    /// Mark prompt-cache breakpoints on each request.
    pub cache_enabled: bool,
    /// Reasoning effort for models that support it. `None` omits the field.
    pub reasoning: Option<ReasoningEffort>,
    pub temperature: f32,
    /// Attempts and backoff for model calls.
    pub retry: RetryConfig,
    /// Token and image budgets.
    pub context: ContextConfig,
    /// Tool executor settings.
    pub tools: ExecutorConfig,
    /// Images attached to the transcript after one batch of tool calls.
    pub max_images_per_turn: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            cost_limit: DEFAULT_COST_LIMIT,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            cache_enabled: true,
            reasoning: Some(ReasoningEffort::High),
            temperature: 0.0,
            retry: RetryConfig::default(),
            context: ContextConfig::default(),
            tools: ExecutorConfig::default(),
            max_images_per_turn: 5,
        }
    }
}

impl LoopConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_cost_limit(mut self, usd: f64) -> Self {
        self.cost_limit = usd;
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn with_max_output_tokens(mut self, n: usize) -> Self {
        self.max_output_tokens = n;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// `ReasoningEffort::None` disables reasoning entirely.
    pub fn with_reasoning(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning = (effort != ReasoningEffort::None).then_some(effort);
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn with_tools(mut self, tools: ExecutorConfig) -> Self {
        self.tools = tools;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = LoopConfig::new("m");
        assert_eq!(c.model, "m");
        assert_eq!(c.max_iterations, 400);
        assert_eq!(c.cost_limit, 100.0);
        assert_eq!(c.max_tokens, 16_384);
        assert_eq!(c.max_output_tokens, 2_500);
        assert!(c.cache_enabled);
        assert_eq!(c.reasoning, Some(ReasoningEffort::High));
        assert_eq!(c.retry.max_attempts, 5);
        assert_eq!(c.max_images_per_turn, 5);
    }

    #[test]
    fn reasoning_none_clears() {
        let c = LoopConfig::default().with_reasoning(ReasoningEffort::None);
        assert_eq!(c.reasoning, None);
        let c = c.with_reasoning(ReasoningEffort::Low);
        assert_eq!(c.reasoning, Some(ReasoningEffort::Low));
    }

    #[test]
    fn builders_chain() {
        let c = LoopConfig::new("m")
            .with_max_iterations(3)
            .with_cost_limit(1.5)
            .with_max_tokens(100)
            .with_max_output_tokens(10)
            .with_cache(false)
            .with_temperature(0.5)
            .with_retry(RetryConfig::immediate());
        assert_eq!(c.max_iterations, 3);
        assert_eq!(c.cost_limit, 1.5);
        assert_eq!(c.max_tokens, 100);
        assert_eq!(c.max_output_tokens, 10);
        assert!(!c.cache_enabled);
        assert_eq!(c.temperature, 0.5);
        assert_eq!(c.retry.base_delay, std::time::Duration::ZERO);
    }
}
