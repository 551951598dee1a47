//! Per-iteration mechanics: the retrying model call and tool dispatch.
//!
//! Called by [`super::harness::Harness::run()`]. Neither function decides
//! whether the run continues; they report what happened and the harness
//! branches on it.

use super::config::LoopConfig;
use super::events::{EventHandler, Item, LifecycleEvent};
use super::prompts;
use super::session::SessionState;
use crate::agent::context::AgentContext;
use crate::api::error::{ErrorCode, LlmError};
use crate::api::transport::{ChatOptions, LlmResponse, LlmTransport};
use crate::context::cache::apply_cache_control;
use crate::tools::{ToolRegistry, truncate_middle};
use crate::{ContentPart, Message, ToolCall, ToolDef};
use tracing::{debug, info, warn};

// ── Model call ─────────────────────────────────────────────────────

/// Result of [`call_with_retry`].
#[derive(Debug)]
pub(crate) enum CallOutcome {
    Success(LlmResponse),
    /// Cost limit or authentication failure. The run must end.
    Fatal(LlmError),
    /// Attempts ran out, or the error cannot be retried.
    Exhausted(LlmError),
}

/// Send the transcript, retrying transient failures with linear backoff.
///
/// A bad request restores `messages` from `snapshot`, the last transcript
/// the provider accepted, before the next attempt.
pub(crate) async fn call_with_retry(
    transport: &dyn LlmTransport,
    config: &LoopConfig,
    messages: &mut Vec<Message>,
    snapshot: &[Message],
    tools: &[ToolDef],
) -> CallOutcome {
    let mut options = ChatOptions::new(config.max_tokens);
    if let Some(effort) = config.reasoning {
        options = options.with_reasoning(effort);
    }
    let tools = (!tools.is_empty()).then_some(tools);
    let attempts = config.retry.attempts();

    let mut attempt = 0;
    loop {
        attempt += 1;
        let request = if config.cache_enabled {
            let mut copy = messages.clone();
            apply_cache_control(&mut copy);
            copy
        } else {
            messages.clone()
        };

        let err = match transport.chat(&request, tools, options).await {
            Ok(response) => return CallOutcome::Success(response),
            Err(e) if e.code().is_fatal() => return CallOutcome::Fatal(e),
            Err(e) => e,
        };

        if err.code() == ErrorCode::BadRequest {
            warn!(
                "Bad request, restoring last accepted transcript ({} -> {} messages)",
                messages.len(),
                snapshot.len()
            );
            *messages = snapshot.to_vec();
        }
        if !err.code().is_retryable() || attempt >= attempts {
            warn!("Model call failed after {attempt} attempt(s): {err}");
            return CallOutcome::Exhausted(err);
        }
        let delay = config.retry.delay_for_attempt(attempt);
        warn!("Model call failed (attempt {attempt}/{attempts}): {err}. Retrying in {delay:?}...");
        tokio::time::sleep(delay).await;
    }
}

/// `turn.failed` text for a fatal error.
pub(crate) fn fatal_message(err: &LlmError) -> String {
    match err {
        LlmError::Api {
            code: ErrorCode::CostLimitExceeded,
            message,
        } => format!("Cost limit exceeded: {message}"),
        other => other.to_string(),
    }
}

// ── Tool dispatch ──────────────────────────────────────────────────

/// What one batch of tool calls adds to the transcript.
#[derive(Debug, Default)]
pub(crate) struct ToolBatch {
    /// Tool results in call order, then one follow-up per rejected call.
    pub messages: Vec<Message>,
    /// Images tools asked to show the model, with the tool name.
    pub images: Vec<(String, ContentPart)>,
}

/// Run a batch of calls through the registry, emitting an item per call.
pub(crate) async fn run_tool_calls(
    registry: &dyn ToolRegistry,
    ctx: &dyn AgentContext,
    calls: &[ToolCall],
    config: &LoopConfig,
    session: &mut SessionState,
    handler: &dyn EventHandler,
    consecutive_failures: &mut u32,
) -> ToolBatch {
    let mut started = Vec::with_capacity(calls.len());
    for call in calls {
        let id = session.next_item_id();
        let command = format!("{}({})", call.function.name, call.function.arguments);
        info!("Tool: {command}");
        handler.on_event(&LifecycleEvent::ItemStarted {
            item: Item::command_started(&id, &command),
        });
        started.push((id, command));
    }

    let outcomes = registry.execute_batch(ctx, calls).await;

    let mut batch = ToolBatch::default();
    let mut followups = Vec::new();
    for ((call, (id, command)), outcome) in calls.iter().zip(started).zip(outcomes) {
        let name = &call.function.name;
        let mut raw = outcome.to_message();
        if outcome.invalid_params {
            let error = outcome
                .error
                .as_deref()
                .unwrap_or("Invalid parameters provided");
            raw.push_str(&prompts::invalid_params_guidance(name, error));
            followups.push(Message::user(prompts::invalid_params_followup(name)));
        } else if !outcome.success {
            *consecutive_failures += 1;
            debug!("{consecutive_failures} consecutive tool failures");
            raw.push_str(&prompts::failure_guidance(name));
        } else {
            *consecutive_failures = 0;
        }

        let text = if raw.is_empty() { "no output" } else { raw.as_str() };
        let output = truncate_middle(text, config.max_output_tokens);

        handler.on_event(&LifecycleEvent::ItemCompleted {
            item: Item::command_finished(id, command, &output, outcome.success),
        });
        batch.messages.push(Message::tool_result(&call.id, output));
        if let Some(image) = outcome.inject_content {
            batch.images.push((name.clone(), image));
        }
    }
    batch.messages.extend(followups);
    batch
}

/// One user message carrying up to `limit` images, each labelled with the
/// tool that produced it. `None` when there are no images.
pub(crate) fn image_message(images: Vec<(String, ContentPart)>, limit: usize) -> Option<Message> {
    if images.is_empty() || limit == 0 {
        return None;
    }
    if images.len() > limit {
        warn!("Dropping {} images beyond the per-turn limit of {limit}", images.len() - limit);
    }
    let parts = images
        .into_iter()
        .take(limit)
        .flat_map(|(tool, image)| [ContentPart::text(format!("Image from {tool}:")), image])
        .collect();
    Some(Message::user_parts(parts))
}
