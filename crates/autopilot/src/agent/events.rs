//! Lifecycle events emitted by the [`Harness`](super::harness::Harness).
//!
//! Every event serializes to one JSON object with a dotted `type` tag, the
//! shape written line-by-line to stdout by [`JsonlHandler`]. Callers
//! implement [`EventHandler`] to observe a run.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Fire-and-forget runs |
//! | [`JsonlHandler`] | Machine-readable output on stdout |
//! | [`LoggingHandler`] | Human-readable lines via `tracing` |
//! | [`CollectingHandler`] | Inspecting a run after the fact, tests |
//! | [`CompositeEventHandler`] | Several handlers in order |

use crate::api::transport::TokenUsage;
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;
use tracing::{info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Token totals reported when a run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
}

impl From<TokenUsage> for UsageSummary {
    fn from(u: TokenUsage) -> Self {
        Self {
            input_tokens: u.input,
            cached_input_tokens: u.cached,
            output_tokens: u.output,
        }
    }
}

/// Error payload of [`LifecycleEvent::TurnFailed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub message: String,
}

/// Status of a command item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    InProgress,
    Completed,
    Failed,
}

/// Kind-specific fields of an [`Item`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemDetails {
    AgentMessage {
        text: String,
    },
    CommandExecution {
        command: String,
        aggregated_output: String,
        exit_code: Option<i32>,
        status: CommandStatus,
    },
}

/// A unit of agent output: a message or a tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: String,
    #[serde(flatten)]
    pub details: ItemDetails,
}

impl Item {
    pub fn agent_message(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            details: ItemDetails::AgentMessage { text: text.into() },
        }
    }

    /// A tool call that has started but not finished.
    pub fn command_started(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            details: ItemDetails::CommandExecution {
                command: command.into(),
                aggregated_output: String::new(),
                exit_code: None,
                status: CommandStatus::InProgress,
            },
        }
    }

    /// A finished tool call; exit code 0 on success, 1 otherwise.
    pub fn command_finished(
        id: impl Into<String>,
        command: impl Into<String>,
        output: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            id: id.into(),
            details: ItemDetails::CommandExecution {
                command: command.into(),
                aggregated_output: output.into(),
                exit_code: Some(if success { 0 } else { 1 }),
                status: if success {
                    CommandStatus::Completed
                } else {
                    CommandStatus::Failed
                },
            },
        }
    }
}

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },
    #[serde(rename = "turn.started")]
    TurnStarted,
    #[serde(rename = "item.started")]
    ItemStarted { item: Item },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: Item },
    #[serde(rename = "turn.completed")]
    TurnCompleted { usage: UsageSummary },
    #[serde(rename = "turn.failed")]
    TurnFailed { error: ErrorInfo },
    #[serde(rename = "error")]
    Error { message: String },
}

impl LifecycleEvent {
    pub fn turn_failed(message: impl Into<String>) -> Self {
        Self::TurnFailed {
            error: ErrorInfo {
                message: message.into(),
            },
        }
    }

    /// The serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ThreadStarted { .. } => "thread.started",
            Self::TurnStarted => "turn.started",
            Self::ItemStarted { .. } => "item.started",
            Self::ItemCompleted { .. } => "item.completed",
            Self::TurnCompleted { .. } => "turn.completed",
            Self::TurnFailed { .. } => "turn.failed",
            Self::Error { .. } => "error",
        }
    }

    /// One JSON line, without the trailing newline.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"event serialization failed: {e}"}}"#)
        })
    }
}

// ── Handlers ───────────────────────────────────────────────────────

/// Observer for lifecycle events.
///
/// # Example
///
/// ```ignore
/// struct CountFailures(AtomicUsize);
///
/// impl EventHandler for CountFailures {
///     fn on_event(&self, event: &LifecycleEvent) {
///         if let LifecycleEvent::TurnFailed { .. } = event {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// Writes each event as a JSON line to stdout and flushes.
pub struct JsonlHandler;

impl EventHandler for JsonlHandler {
    fn on_event(&self, event: &LifecycleEvent) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{}", event.to_json_line()).and_then(|_| out.flush()) {
            warn!("Failed to write event to stdout: {e}");
        }
    }
}

/// Logs events through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::ThreadStarted { thread_id } => info!("Session {thread_id} started"),
            LifecycleEvent::ItemStarted { item } => {
                if let ItemDetails::CommandExecution { command, .. } = &item.details {
                    info!("[{}] running {command}", item.id);
                }
            }
            LifecycleEvent::ItemCompleted { item } => match &item.details {
                ItemDetails::AgentMessage { text } => {
                    let preview: String = text.chars().take(200).collect();
                    info!("[{}] agent: {preview}", item.id);
                }
                ItemDetails::CommandExecution {
                    command, status, ..
                } => info!("[{}] {command} {status:?}", item.id),
            },
            LifecycleEvent::TurnCompleted { usage } => info!(
                "Turn completed: {} input, {} cached, {} output tokens",
                usage.input_tokens, usage.cached_input_tokens, usage.output_tokens
            ),
            LifecycleEvent::TurnFailed { error } => warn!("Turn failed: {}", error.message),
            LifecycleEvent::Error { message } => warn!("Error: {message}"),
            LifecycleEvent::TurnStarted => {}
        }
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct CollectingHandler {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// The `type` tags in emission order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(LifecycleEvent::kind).collect()
    }
}

impl EventHandler for CollectingHandler {
    fn on_event(&self, event: &LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

/// Dispatches each event to several handlers in order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(JsonlHandler)
///     .with_if(verbose, LoggingHandler);
/// ```
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &LifecycleEvent) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

impl<T: EventHandler + ?Sized> EventHandler for std::sync::Arc<T> {
    fn on_event(&self, event: &LifecycleEvent) {
        (**self).on_event(event);
    }
}
