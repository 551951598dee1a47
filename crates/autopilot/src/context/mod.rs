//! Context window management: estimation, budgets, eviction, compaction, and
//! cache breakpoints.
//!
//! The context window is the scarcest resource in a long agent run. This
//! module keeps the transcript inside it without breaking the tool-call
//! protocol:
//!
//! 1. **[`estimate`]**: four-characters-per-token estimation, flat cost per
//!    image. Cheap and monotonic.
//!
//! 2. **[`budget`]**: [`ContextConfig`] and the derived [`TokenBudget`]
//!    (usable window, overflow threshold, compaction target).
//!
//! 3. **[`prune`]**: tier-1 eviction. Replaces old tool outputs with a short
//!    marker. No model call.
//!
//! 4. **[`images`]**: keeps the image count under the provider ceiling,
//!    analyzed images first.
//!
//! 5. **[`compaction`]**: tier-2 eviction. Summarizes an older block with a
//!    nested model call and splices the summary in.
//!
//! 6. **[`orphans`]**: converts tool results whose call was summarized away.
//!
//! 7. **[`cache`]**: places up to four prompt-cache breakpoints on the
//!    outgoing copy of the transcript.
//!
//! [`manager::ContextManager`] composes 1–6 into the single per-turn call the
//! [`Harness`](crate::agent::harness::Harness) makes.

pub mod budget;
pub mod cache;
pub mod compaction;
pub mod estimate;
pub mod images;
pub mod manager;
pub mod orphans;
pub mod prune;

// Re-export commonly used items at the module level.
pub use budget::{ContextConfig, ImageConfig, PruneConfig, TokenBudget};
pub use manager::{ContextManager, ContextReport, ContextStage};
