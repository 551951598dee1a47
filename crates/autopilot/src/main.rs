//! Run an autonomous agent on a task in a working directory.
//!
//! Lifecycle events are written to stdout as JSON lines; logs go to stderr.
//! Reads the API key from `OPENROUTER_API_KEY` (or `OPENROUTER_KEY`).
//!
//! # Examples
//!
//! ```sh
//! autopilot --instruction "Make the failing test in tests/parse.rs pass"
//!
//! autopilot --instruction "Add a --verbose flag" \
//!   --cwd ./project --model openai/gpt-4.1 --cost-limit 5 --reasoning-effort medium
//!
//! RUST_LOG=autopilot=debug autopilot --instruction "..." 2>agent.log
//! ```

use autopilot::agent::events::{
    CompositeEventHandler, EventHandler, JsonlHandler, LifecycleEvent, LoggingHandler,
};
use autopilot::agent::{Harness, LocalContext, LoopConfig, SessionState};
use autopilot::api::{OpenRouterTransport, RetryConfig};
use autopilot::tools::ToolSet;
use autopilot::{ClientOptions, OpenRouterClient, ReasoningEffort};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run an autonomous agent on a task in a working directory.
#[derive(Parser)]
#[command(name = "autopilot")]
struct Cli {
    /// The task to complete.
    #[arg(long)]
    instruction: String,

    /// Model to use for completions.
    #[arg(long, default_value = autopilot::DEFAULT_MODEL)]
    model: String,

    /// Maximum model calls.
    #[arg(long, default_value_t = 400)]
    max_iterations: u32,

    /// Spend ceiling in USD.
    #[arg(long, default_value_t = 100.0)]
    cost_limit: f64,

    /// Maximum tokens per model response.
    #[arg(long, default_value_t = 16_384)]
    max_tokens: u32,

    /// Tool output is truncated to this many estimated tokens.
    #[arg(long, default_value_t = 2_500)]
    max_output_tokens: usize,

    /// Disable prompt-cache breakpoints.
    #[arg(long)]
    no_cache: bool,

    /// Reasoning effort: xhigh, high, medium, low, minimal or none.
    #[arg(long, default_value = "high")]
    reasoning_effort: ReasoningEffort,

    /// Working directory (default: current directory).
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Attempts per model call before the iteration counts as failed.
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// HTTP timeout per model call, in seconds.
    #[arg(long, default_value_t = 180)]
    llm_timeout: u64,
}

fn api_key() -> Result<String, String> {
    std::env::var("OPENROUTER_API_KEY")
        .or_else(|_| std::env::var("OPENROUTER_KEY"))
        .map_err(|_| "OPENROUTER_API_KEY is not set".to_string())
}

fn working_directory(cli: &Cli) -> Result<PathBuf, String> {
    let dir = match &cli.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|e| format!("cannot determine current directory: {e}"))?,
    };
    dir.canonicalize()
        .map_err(|e| format!("invalid working directory '{}': {e}", dir.display()))
}

async fn run(cli: Cli) -> Result<(), String> {
    let cwd = working_directory(&cli)?;
    let options = ClientOptions {
        timeout: Duration::from_secs(cli.llm_timeout),
        cost_limit: cli.cost_limit,
        ..Default::default()
    };
    let client = OpenRouterClient::with_options(api_key()?, options).map_err(|e| e.to_string())?;

    let config = LoopConfig::new(&cli.model)
        .with_max_iterations(cli.max_iterations)
        .with_cost_limit(cli.cost_limit)
        .with_max_tokens(cli.max_tokens)
        .with_max_output_tokens(cli.max_output_tokens)
        .with_cache(!cli.no_cache)
        .with_reasoning(cli.reasoning_effort)
        .with_retry(RetryConfig::with_attempts(cli.max_retries));

    let transport =
        OpenRouterTransport::new(client, &config.model).with_temperature(config.temperature);
    let tools = ToolSet::new()
        .with_config(config.tools.clone())
        .with_builtin_tools();
    let ctx = LocalContext::new(&cwd, &cli.instruction);
    let handler = CompositeEventHandler::new()
        .with(JsonlHandler)
        .with(LoggingHandler);

    info!("Working directory: {}", cwd.display());
    let mut session = SessionState::new();
    let summary = Harness::new(&transport, &tools, &ctx, config)
        .with_event_handler(&handler)
        .run(&mut session)
        .await;

    let stats = tools.stats();
    info!(
        "Finished={} after {} iterations; {}; tools: {} calls, {:.0}% ok, {} cache hits",
        summary.finished,
        summary.iterations,
        transport.client().stats().summary(),
        stats.total_executions,
        stats.success_rate() * 100.0,
        stats.cache_hits
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        JsonlHandler.on_event(&LifecycleEvent::Error { message: e.clone() });
        eprintln!("error: {e}");
        process::exit(1);
    }
}
