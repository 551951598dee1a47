//! Per-turn context management.
//!
//! [`ContextManager::manage`] is called once before every model request. It
//! applies the cheapest remedy that brings the transcript back under the
//! overflow threshold:
//!
//! 1. image eviction (always, whenever the image count exceeds the soft
//!    target; the provider ceiling is independent of the token budget)
//! 2. tool-output pruning
//! 3. AI compaction, best effort
//!
//! Every stage is a pure transform over an owned `Vec<Message>`.

use crate::Message;
use crate::api::transport::LlmTransport;
use crate::context::budget::{ContextConfig, TokenBudget};
use crate::context::compaction::{CompactionConfig, CompactionStatus, compact};
use crate::context::estimate::estimate_transcript;
use crate::context::images::{count_images, evict_images};
use crate::context::prune::prune_tool_outputs;
use tracing::{debug, info};

/// The furthest stage [`ContextManager::manage`] reached.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextStage {
    /// Under the threshold after image eviction; nothing else ran.
    WithinBudget,
    /// Pruning alone brought the transcript under the threshold.
    Pruned,
    /// The compactor ran (or declined to).
    Compaction(CompactionStatus),
}

/// What one call to [`ContextManager::manage`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub images_before: usize,
    pub images_after: usize,
    pub threshold: usize,
    pub stage: ContextStage,
}

impl ContextReport {
    pub fn is_over_budget(&self) -> bool {
        self.tokens_after > self.threshold
    }

    /// One-line summary for logging.
    pub fn to_log_string(&self) -> String {
        let stage = match &self.stage {
            ContextStage::WithinBudget => "within budget".to_string(),
            ContextStage::Pruned => "pruned".to_string(),
            ContextStage::Compaction(CompactionStatus::Compacted { summarized, .. }) => {
                format!("compacted {summarized} message(s)")
            }
            ContextStage::Compaction(CompactionStatus::Skipped(skip)) => {
                format!("compaction skipped ({skip:?})")
            }
            ContextStage::Compaction(CompactionStatus::Failed(e)) => {
                format!("compaction failed ({e})")
            }
        };
        format!(
            "Context: {} -> {} tokens (threshold {}), images {} -> {}, {}",
            self.tokens_before,
            self.tokens_after,
            self.threshold,
            self.images_before,
            self.images_after,
            stage
        )
    }
}

/// Keeps a transcript inside its token and image budgets.
#[derive(Debug, Clone, Default)]
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn budget(&self) -> TokenBudget {
        self.config.budget()
    }

    /// Image eviction alone, for use right after images are appended.
    pub fn evict_images(&self, messages: Vec<Message>) -> Vec<Message> {
        evict_images(messages, &self.config.images)
    }

    /// Fit the transcript to budget. `force` runs pruning and compaction even
    /// when under the threshold.
    pub async fn manage(
        &self,
        transport: &dyn LlmTransport,
        messages: Vec<Message>,
        force: bool,
    ) -> (Vec<Message>, ContextReport) {
        let budget = self.budget();
        let tokens_before = estimate_transcript(&messages);
        let images_before = count_images(&messages);

        let messages = if images_before > self.config.images.soft_target {
            self.evict_images(messages)
        } else {
            messages
        };

        let report = |messages: &[Message], stage: ContextStage| ContextReport {
            tokens_before,
            tokens_after: estimate_transcript(messages),
            images_before,
            images_after: count_images(messages),
            threshold: budget.overflow_threshold,
            stage,
        };

        let tokens = estimate_transcript(&messages);
        if !budget.is_overflow(tokens) && !force {
            let r = report(&messages, ContextStage::WithinBudget);
            return (messages, r);
        }
        debug!(
            "Context over threshold: {tokens} > {} ({:.0}% of usable)",
            budget.overflow_threshold,
            budget.usage_pct(tokens)
        );

        let messages = prune_tool_outputs(messages, &self.config.prune);
        let pruned_tokens = estimate_transcript(&messages);
        if !budget.is_overflow(pruned_tokens) && !force {
            info!("Pruning recovered {} tokens", tokens.saturating_sub(pruned_tokens));
            let r = report(&messages, ContextStage::Pruned);
            return (messages, r);
        }

        let compaction = CompactionConfig::from_context(&self.config);
        let (messages, status) = compact(transport, messages, &compaction).await;
        let r = report(&messages, ContextStage::Compaction(status));
        (messages, r)
    }
}
