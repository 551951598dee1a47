//! Tier-1 eviction: blank out old tool outputs.
//!
//! Tool results are the bulk of any long transcript and are rarely needed
//! verbatim once the model has acted on them. The pruner walks the transcript
//! newest-first, leaves the most recent user turns alone, keeps a window of
//! recent tool output intact, and replaces everything older with
//! [`PRUNE_MARKER`]. Message count, roles and tool-call ids never change, so
//! the tool-call protocol stays valid.

use crate::context::budget::PruneConfig;
use crate::context::estimate::estimate_content;
use crate::{Message, MessageContent, MessageRole};
use tracing::debug;

/// Replacement content for a pruned tool result.
///
/// The scan stops at the first message already carrying this marker: all
/// older outputs were handled by an earlier pass.
pub const PRUNE_MARKER: &str = "[Old tool result content cleared]";

/// Which tool messages to blank, and what that would recover.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneDecision {
    /// Indices into the transcript, newest first.
    pub indices: Vec<usize>,
    /// Estimated tokens freed if applied.
    pub recoverable: usize,
    /// Estimated tool-output tokens scanned outside the protected turns.
    pub scanned: usize,
}

impl PruneDecision {
    /// Whether the decision frees enough to be worth applying.
    pub fn worth_applying(&self, config: &PruneConfig) -> bool {
        !self.indices.is_empty() && self.recoverable > config.prune_minimum
    }
}

pub(crate) fn is_pruned(message: &Message) -> bool {
    message.text() == Some(PRUNE_MARKER)
}

/// Decide which tool outputs to blank, without modifying anything.
pub fn plan_prune(messages: &[Message], config: &PruneConfig) -> PruneDecision {
    let mut decision = PruneDecision::default();
    let mut turns = 0usize;

    for (idx, msg) in messages.iter().enumerate().rev() {
        if msg.role == MessageRole::User {
            turns += 1;
        }
        if turns < config.protect_last_turns {
            continue;
        }
        if msg.role != MessageRole::Tool {
            continue;
        }
        if is_pruned(msg) {
            break;
        }
        let tokens = estimate_content(msg);
        decision.scanned += tokens;
        if decision.scanned > config.prune_protect {
            decision.recoverable += tokens;
            decision.indices.push(idx);
        }
    }

    decision
}

/// Blank old tool outputs when doing so recovers more than
/// `config.prune_minimum` tokens. Otherwise return the transcript unchanged.
pub fn prune_tool_outputs(mut messages: Vec<Message>, config: &PruneConfig) -> Vec<Message> {
    let decision = plan_prune(&messages, config);
    if !decision.worth_applying(config) {
        debug!(
            "Prune skipped: {} recoverable tokens across {} output(s)",
            decision.recoverable,
            decision.indices.len()
        );
        return messages;
    }

    for &idx in &decision.indices {
        messages[idx].content = Some(MessageContent::Text(PRUNE_MARKER.to_string()));
    }
    debug!(
        "Pruned {} tool output(s), ~{} tokens recovered",
        decision.indices.len(),
        decision.recoverable
    );
    messages
}
