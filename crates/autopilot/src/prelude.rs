//! Convenience re-exports for common `autopilot` types.
//!
//! Meant to be glob-imported when embedding the agent:
//!
//! ```ignore
//! use autopilot::prelude::*;
//! ```
//!
//! Context-management internals (pruning, compaction, cache anchors) are
//! left out; import those from [`crate::context`] directly when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ClientOptions, ContentPart, Message, OpenRouterClient, ReasoningEffort, ToolCall, ToolDef,
    json_schema_for,
};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AgentContext, CollectingHandler, CompositeEventHandler, EventHandler, Harness, JsonlHandler,
    LifecycleEvent, LocalContext, LoggingHandler, LoopConfig, NoopHandler, RunSummary,
    SessionState,
};

// ── Transport ───────────────────────────────────────────────────────
pub use crate::api::{ErrorCode, LlmError, LlmTransport, OpenRouterTransport, RetryConfig};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{ContextConfig, ContextManager};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{ExecutorConfig, Tool, ToolFuture, ToolOutcome, ToolRegistry, ToolSet, parse_tool_args};
