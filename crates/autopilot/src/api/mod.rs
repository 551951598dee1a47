//! API interaction layer: transport seam, typed errors, retry policy, and cost
//! tracking.
//!
//! These modules handle everything between the
//! [`Harness`](crate::agent::harness::Harness) loop and the model provider:
//!
//! - [`transport`]: the [`LlmTransport`] trait and its OpenRouter
//!   implementation.
//! - [`error`]: [`LlmError`] with an [`ErrorCode`] discriminator, plus
//!   classification of raw HTTP failures.
//! - [`retry`]: attempt count and linear backoff for transport calls.
//! - [`tracing`]: per-model pricing tables and cumulative [`CostTracker`].

pub mod error;
pub mod retry;
pub mod tracing;
pub mod transport;

pub use error::{ErrorCode, LlmError};
pub use retry::RetryConfig;
pub use tracing::{CostTracker, pricing_for_model};
pub use transport::{ChatOptions, LlmResponse, LlmTransport, OpenRouterTransport, TokenUsage};
