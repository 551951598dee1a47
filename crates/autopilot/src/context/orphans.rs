//! Tool-call protocol repair.
//!
//! Providers reject a transcript in which a tool result answers a call id no
//! assistant message issued. Compaction can produce exactly that when it
//! summarizes the assistant turn but keeps the result. Repair turns such
//! orphans into plain user messages (or drops them when they carry nothing
//! useful).

use crate::context::prune::is_pruned;
use crate::{Message, MessageRole};
use std::collections::HashSet;

/// Prefix for an orphaned tool result converted to a user message.
pub const ORPHAN_PREFIX: &str = "[Previous tool output]";

fn issued_call_ids(messages: &[Message]) -> HashSet<&str> {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .flat_map(|m| m.calls().iter().map(|c| c.id.as_str()))
        .collect()
}

fn is_orphan(message: &Message, issued: &HashSet<&str>) -> bool {
    message.role == MessageRole::Tool
        && !message
            .tool_call_id
            .as_deref()
            .is_some_and(|id| issued.contains(id))
}

/// Whether every tool message answers an issued call id.
pub fn is_consistent(messages: &[Message]) -> bool {
    let issued = issued_call_ids(messages);
    !messages.iter().any(|m| is_orphan(m, &issued))
}

/// Convert or drop orphaned tool results. Idempotent.
pub fn repair_orphans(messages: Vec<Message>) -> Vec<Message> {
    let orphaned: Vec<bool> = {
        let issued = issued_call_ids(&messages);
        messages.iter().map(|m| is_orphan(m, &issued)).collect()
    };
    if !orphaned.contains(&true) {
        return messages;
    }

    messages
        .into_iter()
        .zip(orphaned)
        .filter_map(|(msg, orphan)| {
            if !orphan {
                return Some(msg);
            }
            let content = msg.text_content();
            if content.is_empty() || is_pruned(&msg) {
                None
            } else {
                Some(Message::user(format!("{ORPHAN_PREFIX}\n{content}")))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use crate::context::prune::PRUNE_MARKER;

    fn call(id: &str) -> Message {
        Message::assistant_tool_calls("", vec![ToolCall::new(id, "ls", "{}")])
    }

    #[test]
    fn consistent_transcript_untouched() {
        let msgs = vec![
            Message::system("s"),
            call("c1"),
            Message::tool_result("c1", "out"),
        ];
        assert!(is_consistent(&msgs));
        assert_eq!(repair_orphans(msgs.clone()), msgs);
    }

    #[test]
    fn orphan_with_content_becomes_user_message() {
        let msgs = vec![
            Message::system("s"),
            Message::tool_result("gone", "file list"),
            Message::user("next"),
        ];
        let out = repair_orphans(msgs);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].role, MessageRole::User);
        assert_eq!(out[1].text(), Some("[Previous tool output]\nfile list"));
        assert!(is_consistent(&out));
    }

    #[test]
    fn empty_or_pruned_orphans_dropped() {
        let msgs = vec![
            Message::tool_result("a", ""),
            Message::tool_result("b", PRUNE_MARKER),
            Message::user("keep"),
        ];
        let out = repair_orphans(msgs);
        assert_eq!(out, vec![Message::user("keep")]);
    }

    #[test]
    fn repair_is_idempotent() {
        let msgs = vec![call("c1"), Message::tool_result("x", "data")];
        let once = repair_orphans(msgs);
        assert_eq!(repair_orphans(once.clone()), once);
    }
}
