//! Cheap, deterministic token estimation.
//!
//! No tokenizer is involved: one token is taken to be four characters, and an
//! image counts as a flat [`IMAGE_TOKEN_COST`]. The estimate only has to be
//! monotonic and stable across calls so that budget decisions are
//! reproducible.

use crate::{ContentPart, Message, MessageContent};

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Flat charge per image part.
pub const IMAGE_TOKEN_COST: usize = 1000;

/// Per-message framing overhead (role, separators).
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimated tokens for a piece of text: `floor(chars / 4)`.
pub fn estimate_text(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

fn estimate_part(part: &ContentPart) -> usize {
    match part {
        ContentPart::Text { text, .. } => estimate_text(text),
        ContentPart::ImageUrl { .. } => IMAGE_TOKEN_COST,
    }
}

/// Estimated tokens for a message's content alone.
pub fn estimate_content(message: &Message) -> usize {
    match &message.content {
        Some(MessageContent::Text(text)) => estimate_text(text),
        Some(MessageContent::Parts(parts)) => parts.iter().map(estimate_part).sum(),
        None => 0,
    }
}

/// Estimated tokens for one message, including tool calls and overhead.
pub fn estimate_message(message: &Message) -> usize {
    let content = estimate_content(message);
    let calls: usize = message
        .calls()
        .iter()
        .map(|c| estimate_text(&c.function.name) + estimate_text(&c.function.arguments))
        .sum();
    content + calls + MESSAGE_OVERHEAD
}

/// Estimated tokens for a whole transcript (or any slice of it).
pub fn estimate_transcript(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    #[test]
    fn text_is_chars_over_four() {
        assert_eq!(estimate_text(""), 0);
        assert_eq!(estimate_text("abc"), 0);
        assert_eq!(estimate_text("abcd"), 1);
        assert_eq!(estimate_text(&"x".repeat(4000)), 1000);
    }

    #[test]
    fn counts_chars_not_bytes() {
        // Four multi-byte characters are one token.
        assert_eq!(estimate_text("ééééé"), 1);
    }

    #[test]
    fn message_adds_overhead() {
        assert_eq!(estimate_message(&Message::user("")), 4);
        assert_eq!(estimate_message(&Message::user("x".repeat(400))), 104);
        assert_eq!(estimate_content(&Message::user("x".repeat(400))), 100);
    }

    #[test]
    fn images_cost_a_flat_thousand() {
        let msg = Message::user_parts(vec![
            ContentPart::text("abcdefgh"),
            ContentPart::image("data:image/png;base64,AAAA"),
            ContentPart::image("https://example.com/a.png"),
        ]);
        assert_eq!(estimate_message(&msg), 2 + 2000 + 4);
    }

    #[test]
    fn tool_calls_count_name_and_arguments() {
        let msg = Message::assistant_tool_calls(
            "",
            vec![ToolCall::new("c1", "read_file", r#"{"file_path":"a.txt"}"#)],
        );
        // "read_file" = 9 chars -> 2; arguments 21 chars -> 5; plus overhead.
        assert_eq!(estimate_message(&msg), 2 + 5 + 4);
    }

    #[test]
    fn transcript_is_sum_and_monotonic() {
        let mut msgs = vec![Message::system("s".repeat(40)), Message::user("u".repeat(80))];
        let before = estimate_transcript(&msgs);
        assert_eq!(before, 14 + 24);
        msgs.push(Message::assistant_text("ok"));
        assert!(estimate_transcript(&msgs) >= before);
    }
}
