//! Tool abstractions for the agent loop.
//!
//! Every capability the model can invoke (running commands, reading and
//! writing files, looking at images) is a [`Tool`] implementor. Tools are
//! collected into a [`ToolSet`], the [`ToolRegistry`] the
//! [`Harness`](crate::agent::harness::Harness) dispatches through.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] and [`ToolRegistry`] traits, [`ToolOutcome`],
//!   [`ToolSet`] with validation, timeouts, caching and statistics.
//! - [`common`]: built-in tools `shell_command`, `read_file`, `write_file`,
//!   `list_dir`, `grep_files`, `view_image`.
//! - [`patch`]: `apply_patch` and its envelope parser.
//! - [`plan`]: `update_plan`.
//! - [`process`]: `spawn_process`, `kill_process`, `wait_for_port`,
//!   `wait_for_file`, `run_until_file`.
//!
//! Register every built-in at once with [`ToolSet::with_builtin_tools()`].
//! - [`cache`]: TTL result cache keyed by tool name and canonical arguments.
//! - [`truncate`]: middle-out truncation of long outputs.

pub mod cache;
pub mod common;
pub mod core;
pub mod patch;
pub mod plan;
pub mod process;
pub mod truncate;

// Re-export commonly used items at the module level.
pub use core::{
    ExecutorConfig, ExecutorStats, Tool, ToolFuture, ToolOutcome, ToolRegistry, ToolSet,
    parse_tool_args, validate_tool_arguments,
};
pub use truncate::truncate_middle;
