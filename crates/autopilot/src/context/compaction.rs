//! Tier-2 eviction: summarize a block of older messages with the model.
//!
//! The transcript is split into three parts:
//!
//! - **Protected prefix**: the first `protected` messages (system prompt and
//!   task instruction). Never modified.
//! - **Compaction block**: `[protected, start)`. Sent to the model together
//!   with [`COMPACTION_PROMPT`] and replaced by a single user message holding
//!   the summary.
//! - **Kept suffix**: `[start..]`. Always begins on an assistant message, so
//!   every tool result it contains still follows its own tool call.
//!
//! Compaction is best effort. A failed or empty summary returns the input
//! untouched, and a fallback boundary may leave the transcript above target.

use crate::api::transport::{ChatOptions, LlmTransport};
use crate::context::budget::ContextConfig;
use crate::context::estimate::{estimate_text, estimate_transcript};
use crate::context::orphans::repair_orphans;
use crate::{Message, MessageRole};
use std::ops::Range;
use tracing::{debug, info, warn};

/// Instruction appended to the compaction block.
pub const COMPACTION_PROMPT: &str = "\
Context checkpoint. Write a handoff note for the model that will pick this task up from here.

Cover:
- progress so far and the decisions behind it
- constraints, preferences and facts that still matter
- remaining work, as concrete next steps
- files created or changed, and how
- errors hit and how they were resolved (or not)

Keep it tight and structured. Bullet points are fine.";

/// Prepended to the summary when it is spliced back into the transcript.
pub const SUMMARY_PREFIX: &str = "\
An earlier session worked on this task and left the handoff note below. The \
tool state it produced (files, processes) is still in place. Continue from \
where it stopped and do not redo finished work.

Handoff note:

";

/// Tokens assumed for the summary when sizing the kept suffix.
pub const SUMMARY_TOKEN_ESTIMATE: usize = 4096;

/// Response limit for the summarization call.
pub const SUMMARY_MAX_TOKENS: u32 = 4096;

/// Compactor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionConfig {
    /// Leading messages never summarized.
    pub protected: usize,
    /// Estimated size the compacted transcript should fit in.
    pub target_tokens: usize,
    pub summary_token_estimate: usize,
    pub summary_max_tokens: u32,
}

impl CompactionConfig {
    pub fn from_context(config: &ContextConfig) -> Self {
        Self {
            protected: config.protected_message_count,
            target_tokens: config.budget().compaction_target,
            summary_token_estimate: SUMMARY_TOKEN_ESTIMATE,
            summary_max_tokens: SUMMARY_MAX_TOKENS,
        }
    }

    pub fn with_target_tokens(mut self, tokens: usize) -> Self {
        self.target_tokens = tokens;
        self
    }
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self::from_context(&ContextConfig::default())
    }
}

/// Where to cut the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPlan {
    /// Length of the protected prefix.
    pub protected: usize,
    /// First index of the kept suffix (always an assistant message).
    pub start: usize,
    /// Whether `start` is the fallback boundary that does not meet the target.
    pub fallback: bool,
}

impl CompactionPlan {
    pub fn compaction_range(&self) -> Range<usize> {
        self.protected..self.start
    }
}

/// Why no compaction was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionSkip {
    /// Already at or under target.
    UnderTarget,
    /// Fewer than two assistant messages after the protected prefix.
    TooFewAssistants,
    /// The only admissible boundary leaves nothing to summarize.
    EmptyRange,
}

/// Result of a compaction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CompactionStatus {
    /// Block of `summarized` messages replaced by a summary of
    /// `summary_tokens` estimated tokens.
    Compacted {
        summarized: usize,
        summary_tokens: usize,
    },
    Skipped(CompactionSkip),
    /// The summarization call failed or returned nothing.
    Failed(String),
}

/// Choose the compaction boundary.
pub fn plan_compaction(
    messages: &[Message],
    config: &CompactionConfig,
) -> Result<CompactionPlan, CompactionSkip> {
    let protected = config.protected.min(messages.len());
    let protected_tokens = estimate_transcript(&messages[..protected]);
    let total = protected_tokens + estimate_transcript(&messages[protected..]);
    if total <= config.target_tokens {
        return Err(CompactionSkip::UnderTarget);
    }

    let max_kept = config
        .target_tokens
        .saturating_sub(protected_tokens)
        .saturating_sub(config.summary_token_estimate);

    let assistants: Vec<usize> = messages
        .iter()
        .enumerate()
        .skip(protected)
        .filter(|(_, m)| m.role == MessageRole::Assistant)
        .map(|(i, _)| i)
        .collect();
    if assistants.len() < 2 {
        return Err(CompactionSkip::TooFewAssistants);
    }

    // Earliest boundary first: summarize as little as possible.
    let candidates = &assistants[..assistants.len() - 1];
    let fitting = candidates
        .iter()
        .copied()
        .find(|&start| estimate_transcript(&messages[start..]) <= max_kept);
    let (start, fallback) = match fitting {
        Some(start) => (start, false),
        None => (assistants[assistants.len() - 2], true),
    };

    if start <= protected {
        return Err(CompactionSkip::EmptyRange);
    }
    Ok(CompactionPlan {
        protected,
        start,
        fallback,
    })
}

/// Summarize the oldest compactable block and splice the summary in.
///
/// Returns the new transcript and what happened. On any failure the input is
/// returned unchanged.
pub async fn compact(
    transport: &dyn LlmTransport,
    messages: Vec<Message>,
    config: &CompactionConfig,
) -> (Vec<Message>, CompactionStatus) {
    let plan = match plan_compaction(&messages, config) {
        Ok(plan) => plan,
        Err(skip) => {
            debug!("Compaction skipped: {skip:?}");
            return (messages, CompactionStatus::Skipped(skip));
        }
    };

    let range = plan.compaction_range();
    info!(
        "Compacting messages {}..{} ({} tokens), keeping {} message(s) ({} tokens){}",
        range.start,
        range.end,
        estimate_transcript(&messages[range.clone()]),
        messages.len() - plan.start,
        estimate_transcript(&messages[plan.start..]),
        if plan.fallback { " [fallback boundary]" } else { "" },
    );

    let mut request = repair_orphans(messages[range.clone()].to_vec());
    request.push(Message::user(COMPACTION_PROMPT));

    let options = ChatOptions::new(config.summary_max_tokens);
    let summary = match transport.chat(&request, None, options).await {
        Ok(response) => response.text,
        Err(e) => {
            warn!("Compaction failed: {e}");
            return (messages, CompactionStatus::Failed(e.to_string()));
        }
    };
    if summary.trim().is_empty() {
        warn!("Compaction failed: empty summary");
        return (messages, CompactionStatus::Failed("empty summary".into()));
    }

    let summary_tokens = estimate_text(&summary);
    let summarized = range.len();
    let mut compacted = Vec::with_capacity(plan.protected + 1 + messages.len() - plan.start);
    let mut iter = messages.into_iter();
    compacted.extend(iter.by_ref().take(plan.protected));
    compacted.push(Message::user(format!("{SUMMARY_PREFIX}{summary}")));
    compacted.extend(iter.skip(summarized));
    let compacted = repair_orphans(compacted);

    info!(
        "Compaction complete: {summary_tokens} token summary, transcript now {} tokens (target {})",
        estimate_transcript(&compacted),
        config.target_tokens
    );
    (
        compacted,
        CompactionStatus::Compacted {
            summarized,
            summary_tokens,
        },
    )
}
