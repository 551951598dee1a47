//! Context budget configuration.
//!
//! All thresholds used by the context manager derive from [`ContextConfig`].
//! The derived numbers live on [`TokenBudget`], a pure function of the
//! config, so every stage of the pipeline agrees on what "over budget" means.
//!
//! # Example
//!
//! ```
//! use autopilot::context::budget::ContextConfig;
//!
//! let config = ContextConfig::default()
//!     .with_model_context_limit(128_000)
//!     .with_output_reserve(16_000);
//!
//! let budget = config.budget();
//! assert_eq!(budget.usable, 112_000);
//! assert_eq!(budget.overflow_threshold, 67_200);
//! ```

/// Default context window in tokens.
pub const DEFAULT_CONTEXT_LIMIT: usize = 200_000;

/// Default tokens held back for the model's response.
pub const DEFAULT_OUTPUT_RESERVE: usize = 32_000;

/// Fraction of the usable window at which compaction work starts.
pub const DEFAULT_COMPACTION_FRACTION: f64 = 0.6;

/// Fraction of the usable window the compactor aims to leave behind.
pub const DEFAULT_COMPACTION_TARGET_FRACTION: f64 = 0.45;

/// Settings for the tool-output pruner.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneConfig {
    /// Number of most recent user turns whose tool outputs are never touched.
    pub protect_last_turns: usize,
    /// Tool-output tokens (newest first, outside the protected turns) that
    /// stay intact before pruning starts.
    pub prune_protect: usize,
    /// Pruning is skipped unless it would recover more than this.
    pub prune_minimum: usize,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            protect_last_turns: 2,
            prune_protect: 40_000,
            prune_minimum: 20_000,
        }
    }
}

/// Settings for the image evictor.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageConfig {
    /// Provider limit on images per request.
    pub hard_ceiling: usize,
    /// Image count the evictor trims down to.
    pub soft_target: usize,
    /// Headroom kept below the hard ceiling when forced to evict.
    pub buffer: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            hard_ceiling: 100,
            soft_target: 10,
            buffer: 5,
        }
    }
}

/// Configuration for context management.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    /// Model context window in tokens.
    pub model_context_limit: usize,
    /// Tokens reserved for the response.
    pub output_reserve: usize,
    /// Overflow threshold as a fraction of usable tokens.
    pub compaction_fraction: f64,
    /// Compaction target as a fraction of usable tokens.
    pub compaction_target_fraction: f64,
    /// Leading messages (system prompt, instruction) the compactor never
    /// summarizes.
    pub protected_message_count: usize,
    pub prune: PruneConfig,
    pub images: ImageConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            model_context_limit: DEFAULT_CONTEXT_LIMIT,
            output_reserve: DEFAULT_OUTPUT_RESERVE,
            compaction_fraction: DEFAULT_COMPACTION_FRACTION,
            compaction_target_fraction: DEFAULT_COMPACTION_TARGET_FRACTION,
            protected_message_count: 2,
            prune: PruneConfig::default(),
            images: ImageConfig::default(),
        }
    }
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the context window size (in tokens).
    pub fn with_model_context_limit(mut self, tokens: usize) -> Self {
        self.model_context_limit = tokens;
        self
    }

    /// Set tokens reserved for model output.
    pub fn with_output_reserve(mut self, tokens: usize) -> Self {
        self.output_reserve = tokens;
        self
    }

    pub fn with_compaction_fraction(mut self, fraction: f64) -> Self {
        self.compaction_fraction = fraction;
        self
    }

    pub fn with_prune(mut self, prune: PruneConfig) -> Self {
        self.prune = prune;
        self
    }

    pub fn with_images(mut self, images: ImageConfig) -> Self {
        self.images = images;
        self
    }

    /// Derived thresholds.
    pub fn budget(&self) -> TokenBudget {
        let usable = self.model_context_limit.saturating_sub(self.output_reserve);
        TokenBudget {
            usable,
            overflow_threshold: (usable as f64 * self.compaction_fraction) as usize,
            compaction_target: (usable as f64 * self.compaction_target_fraction) as usize,
        }
    }
}

/// Thresholds derived from a [`ContextConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    /// Context window minus the output reserve.
    pub usable: usize,
    /// Estimated size above which the transcript is overflowing.
    pub overflow_threshold: usize,
    /// Size the compactor tries to reach.
    pub compaction_target: usize,
}

impl TokenBudget {
    pub fn is_overflow(&self, estimated_tokens: usize) -> bool {
        estimated_tokens > self.overflow_threshold
    }

    /// Percentage of the usable window consumed (for log lines).
    pub fn usage_pct(&self, estimated_tokens: usize) -> f64 {
        if self.usable == 0 {
            return 100.0;
        }
        estimated_tokens as f64 / self.usable as f64 * 100.0
    }
}
