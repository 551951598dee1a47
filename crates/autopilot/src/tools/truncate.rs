//! Middle-out truncation of tool output.
//!
//! The start of a command's output usually says what ran and the end says how
//! it finished, so both are kept and the middle is cut. Sizes use the same
//! four-bytes-per-token rule as the context estimator.

use crate::context::estimate::CHARS_PER_TOKEN;

/// Keep at most `max_tokens × 4` bytes of `text`, split evenly between head
/// and tail, with a marker noting how much was removed.
pub fn truncate_middle(text: &str, max_tokens: usize) -> String {
    let max_bytes = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let half = max_bytes / 2;
    let head_end = floor_char_boundary(text, half);
    let tail_start = ceil_char_boundary(text, text.len() - half);
    let removed = text.len().saturating_sub(head_end + (text.len() - tail_start));
    let removed_tokens = removed.div_ceil(CHARS_PER_TOKEN);

    let head = text.get(..head_end).unwrap_or_default();
    let tail = text.get(tail_start..).unwrap_or_default();
    format!("{head}\n\n[... {removed_tokens} tokens truncated ...]\n\n{tail}")
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
