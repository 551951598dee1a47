//! Prompt-cache breakpoints.
//!
//! Providers that support prompt caching accept at most four explicit
//! breakpoints. Two go on the stable prefix (the leading system messages) and
//! two on the newest non-system messages, so both the long-lived prefix and
//! the previous turn's transcript are reused on the next request.

use crate::{CacheControl, ContentPart, Message, MessageContent, MessageRole};

/// Leading system messages that receive a breakpoint.
pub const SYSTEM_ANCHORS: usize = 2;

/// Trailing non-system messages that receive a breakpoint.
pub const RECENT_ANCHORS: usize = 2;

/// Indices that should carry a breakpoint (at most four, ascending).
pub fn select_anchors(messages: &[Message]) -> Vec<usize> {
    let system = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == MessageRole::System)
        .map(|(i, _)| i)
        .take(SYSTEM_ANCHORS);
    let mut recent: Vec<usize> = messages
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, m)| m.role != MessageRole::System)
        .map(|(i, _)| i)
        .take(RECENT_ANCHORS)
        .collect();
    recent.reverse();

    let mut anchors: Vec<usize> = system.collect();
    anchors.extend(recent);
    anchors
}

/// Annotate one message. Returns `true` if it now carries a breakpoint.
fn annotate(message: &mut Message) -> bool {
    match &mut message.content {
        Some(MessageContent::Text(text)) => {
            if text.is_empty() {
                return false;
            }
            let part = ContentPart::Text {
                text: std::mem::take(text),
                cache_control: Some(CacheControl::ephemeral()),
            };
            message.content = Some(MessageContent::Parts(vec![part]));
            true
        }
        Some(MessageContent::Parts(parts)) => {
            if parts.iter().any(ContentPart::has_cache_control) {
                return true;
            }
            let last_text = parts.iter_mut().rev().find(|p| {
                p.as_text().is_some_and(|t| !t.is_empty())
            });
            match last_text {
                Some(ContentPart::Text { cache_control, .. }) => {
                    *cache_control = Some(CacheControl::ephemeral());
                    true
                }
                _ => false,
            }
        }
        None => false,
    }
}

/// Place breakpoints on a transcript about to be sent. Idempotent.
pub fn apply_cache_control(messages: &mut [Message]) {
    for idx in select_anchors(messages) {
        annotate(&mut messages[idx]);
    }
}

/// Number of messages carrying a breakpoint.
pub fn count_anchors(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter(|m| match &m.content {
            Some(MessageContent::Parts(parts)) => parts.iter().any(ContentPart::has_cache_control),
            _ => false,
        })
        .count()
}
