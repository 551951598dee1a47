//! Image-count budget enforcement.
//!
//! Providers cap the number of images per request, and every screenshot also
//! costs a flat chunk of tokens. The evictor trims the transcript down to a
//! soft target by replacing image parts with a short placeholder. Images the
//! model has already responded to ("analyzed") go first; images it has not
//! yet seen are only touched when the hard ceiling would otherwise be
//! exceeded.

use crate::context::budget::ImageConfig;
use crate::{ContentPart, Message, MessageContent, MessageRole};
use tracing::debug;

/// Replacement text for an evicted image part.
pub const IMAGE_PLACEHOLDER: &str = "[Old image content cleared]";

/// Total image parts across the transcript.
pub fn count_images(messages: &[Message]) -> usize {
    messages.iter().map(Message::image_count).sum()
}

/// Image-bearing message indices, split by whether an assistant message
/// follows them.
fn classify(messages: &[Message]) -> (Vec<usize>, Vec<usize>) {
    let last_assistant = messages
        .iter()
        .rposition(|m| m.role == MessageRole::Assistant);
    let mut analyzed = Vec::new();
    let mut unanalyzed = Vec::new();
    for (idx, msg) in messages.iter().enumerate() {
        if msg.image_count() == 0 {
            continue;
        }
        if last_assistant.is_some_and(|a| a > idx) {
            analyzed.push(idx);
        } else {
            unanalyzed.push(idx);
        }
    }
    (analyzed, unanalyzed)
}

/// Pick whole messages, oldest first, until at least `to_remove` images are
/// covered.
fn select_for_eviction(messages: &[Message], config: &ImageConfig) -> Vec<usize> {
    let total = count_images(messages);
    if total <= config.soft_target {
        return Vec::new();
    }

    let over_ceiling = total > config.hard_ceiling;
    let mut to_remove = total - config.soft_target;
    if over_ceiling {
        let floor = config.hard_ceiling.saturating_sub(config.buffer);
        to_remove = to_remove.max(total.saturating_sub(floor));
    }

    let (analyzed, unanalyzed) = classify(messages);
    let mut selected = Vec::new();
    let mut removed = 0usize;

    for idx in analyzed {
        if removed >= to_remove {
            break;
        }
        removed += messages[idx].image_count();
        selected.push(idx);
    }

    if over_ceiling && removed < to_remove {
        for idx in unanalyzed {
            if removed >= to_remove {
                break;
            }
            removed += messages[idx].image_count();
            selected.push(idx);
        }
    }

    selected
}

fn strip_images(message: &mut Message) {
    if let Some(MessageContent::Parts(parts)) = &mut message.content {
        for part in parts.iter_mut().filter(|p| p.is_image()) {
            *part = ContentPart::text(IMAGE_PLACEHOLDER);
        }
    }
}

/// Replace images in the oldest messages until the transcript is back under
/// the soft target (or as close as the analyzed/unanalyzed rules allow).
pub fn evict_images(mut messages: Vec<Message>, config: &ImageConfig) -> Vec<Message> {
    let selected = select_for_eviction(&messages, config);
    if selected.is_empty() {
        return messages;
    }

    let before = count_images(&messages);
    for &idx in &selected {
        strip_images(&mut messages[idx]);
    }
    debug!(
        "Image eviction: {} -> {} image(s) across {} message(s)",
        before,
        count_images(&messages),
        selected.len()
    );
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_msg(n: usize) -> Message {
        Message::user_parts(
            (0..n)
                .flat_map(|i| {
                    [
                        ContentPart::text(format!("Image {i}:")),
                        ContentPart::image(format!("data:image/png;base64,{i}")),
                    ]
                })
                .collect(),
        )
    }

    /// `n` single-image messages, each answered by the assistant.
    fn analyzed_transcript(n: usize) -> Vec<Message> {
        let mut msgs = vec![Message::system("sys"), Message::user("task")];
        for _ in 0..n {
            msgs.push(image_msg(1));
            msgs.push(Message::assistant_text("seen"));
        }
        msgs
    }

    #[test]
    fn under_soft_target_untouched() {
        let msgs = analyzed_transcript(10);
        assert_eq!(evict_images(msgs.clone(), &ImageConfig::default()), msgs);
    }

    #[test]
    fn evicts_oldest_analyzed_to_soft_target() {
        let msgs = analyzed_transcript(15);
        let out = evict_images(msgs.clone(), &ImageConfig::default());
        assert_eq!(count_images(&out), 10);
        assert_eq!(out.len(), msgs.len());
        // Oldest image message lost its image but kept its text part.
        assert_eq!(out[2].image_count(), 0);
        assert_eq!(out[2].text_content(), format!("Image 0:\n{IMAGE_PLACEHOLDER}"));
        // Newest still intact.
        assert_eq!(out[out.len() - 2].image_count(), 1);
    }

    #[test]
    fn unanalyzed_kept_below_hard_ceiling() {
        // 20 images the model has not responded to yet.
        let msgs = vec![Message::system("sys"), image_msg(20)];
        let out = evict_images(msgs.clone(), &ImageConfig::default());
        assert_eq!(out, msgs);
    }

    #[test]
    fn unanalyzed_evicted_over_hard_ceiling() {
        let mut msgs = vec![Message::system("sys")];
        for _ in 0..105 {
            msgs.push(image_msg(1));
        }
        let out = evict_images(msgs, &ImageConfig::default());
        let remaining = count_images(&out);
        assert!(remaining <= 95, "remaining = {remaining}");
        assert_eq!(remaining, 10);
    }

    /// `analyzed` answered single-image messages, then `fresh` unanswered ones.
    fn mixed_transcript(analyzed: usize, fresh: usize) -> Vec<Message> {
        let mut msgs = analyzed_transcript(analyzed);
        msgs.extend((0..fresh).map(|_| image_msg(1)));
        msgs
    }

    #[test]
    fn mixed_over_ceiling_takes_analyzed_first() {
        // 145 analyzed + 5 unanalyzed = 150 images.
        let msgs = mixed_transcript(145, 5);
        assert_eq!(count_images(&msgs), 150);
        let out = evict_images(msgs, &ImageConfig::default());
        assert!(count_images(&out) <= 95);
        assert_eq!(count_images(&out), 10);

        let unanalyzed_start = 2 + 145 * 2;
        assert!(out[unanalyzed_start..].iter().all(|m| m.image_count() == 1));
        let analyzed_left: usize = out[..unanalyzed_start]
            .iter()
            .map(Message::image_count)
            .sum();
        assert_eq!(analyzed_left, 5);
        // The survivors are the newest analyzed images.
        assert!(out[unanalyzed_start - 10..unanalyzed_start]
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .all(|m| m.image_count() == 1));
    }

    #[test]
    fn mixed_over_ceiling_dips_into_oldest_unanalyzed() {
        // 60 analyzed + 90 unanalyzed = 150 images.
        let msgs = mixed_transcript(60, 90);
        let out = evict_images(msgs, &ImageConfig::default());
        assert!(count_images(&out) <= 95);

        let unanalyzed_start = 2 + 60 * 2;
        assert!(out[..unanalyzed_start].iter().all(|m| m.image_count() == 0));
        let fresh: Vec<usize> = out[unanalyzed_start..]
            .iter()
            .map(Message::image_count)
            .collect();
        // Oldest unanalyzed go first; the newest 10 survive.
        assert!(fresh[..80].iter().all(|&n| n == 0));
        assert!(fresh[80..].iter().all(|&n| n == 1));
    }

    #[test]
    fn whole_message_selected_at_a_time() {
        // One analyzed message holding 8 images, then 5 more analyzed.
        let mut msgs = vec![Message::system("sys"), image_msg(8), Message::assistant_text("ok")];
        for _ in 0..5 {
            msgs.push(image_msg(1));
            msgs.push(Message::assistant_text("ok"));
        }
        // total 13, to_remove 3: the first message alone covers it.
        let out = evict_images(msgs, &ImageConfig::default());
        assert_eq!(count_images(&out), 5);
    }

    #[test]
    fn analyzed_only_when_followed_by_assistant() {
        let msgs = vec![
            image_msg(1),
            Message::assistant_text("ok"),
            image_msg(1),
        ];
        let (analyzed, unanalyzed) = classify(&msgs);
        assert_eq!(analyzed, vec![0]);
        assert_eq!(unanalyzed, vec![2]);
    }
}
