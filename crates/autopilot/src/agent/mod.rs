//! Agent runtime: the [`Harness`] turn loop and its supporting modules.
//!
//! - [`harness::Harness`]: the turn-control loop. Start here.
//! - [`config::LoopConfig`]: model, limits, and nested context/tool configs.
//! - [`events`]: [`LifecycleEvent`] JSONL events and the [`EventHandler`]
//!   trait, with [`JsonlHandler`], [`LoggingHandler`], [`CollectingHandler`]
//!   and [`CompositeEventHandler`].
//! - [`context`]: the [`AgentContext`] environment trait and [`LocalContext`].
//! - [`verification`]: the finish handshake as a transition function.
//! - [`prompts`]: every text the loop injects into the transcript.
//! - [`session`]: per-run ids and totals.

pub mod config;
pub mod context;
pub mod events;
pub(crate) mod execution;
pub mod harness;
pub mod prompts;
pub mod session;
pub mod verification;

// Re-export commonly used items at the module level.
pub use config::LoopConfig;
pub use context::{AgentContext, LocalContext, ShellOutput};
pub use events::{
    CollectingHandler, CompositeEventHandler, EventHandler, JsonlHandler, LifecycleEvent,
    LoggingHandler, NoopHandler,
};
pub use harness::{Harness, RunSummary};
pub use prompts::SystemPromptBuilder;
pub use session::SessionState;
pub use verification::{VerificationPhase, VerificationStep};
