//! Tool abstraction for the agent loop.
//!
//! The [`Tool`] trait defines the interface every tool implements: a static
//! API definition (name, description, JSON schema) and an async `execute`
//! method that runs against an [`AgentContext`]. Tools are collected into a
//! [`ToolSet`], which implements [`ToolRegistry`] and handles dispatch,
//! argument validation, timeouts, result caching and execution statistics.

use crate::agent::context::AgentContext;
use crate::tools::cache::ToolResultCache;
use crate::{ContentPart, ToolCall, ToolDef};
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Boxed future returned by [`Tool::execute`] and [`ToolRegistry::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = ToolOutcome> + Send + 'a>>;

/// Boxed future returned by [`ToolRegistry::execute_batch`].
pub type BatchFuture<'a> = Pin<Box<dyn Future<Output = Vec<ToolOutcome>> + Send + 'a>>;

// ── ToolOutcome ────────────────────────────────────────────────────

/// Result of one tool call.
///
/// Tools never return `Err`. A failure is an outcome the model reads and
/// reacts to, like any other output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
    /// The call was rejected before running because its arguments were
    /// missing or malformed.
    pub invalid_params: bool,
    pub error: Option<String>,
    /// Extra content (an image) to show the model in a follow-up message.
    pub inject_content: Option<ContentPart>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// The arguments did not match the tool's parameters.
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            invalid_params: true,
            ..Self::failure(error)
        }
    }

    pub fn with_image(mut self, part: ContentPart) -> Self {
        self.inject_content = Some(part);
        self
    }

    /// Text for the tool-result message: the output, then the error if any.
    pub fn to_message(&self) -> String {
        match &self.error {
            Some(e) if self.output.is_empty() => format!("Error: {e}"),
            Some(e) => format!("{}\nError: {e}", self.output),
            None => self.output.clone(),
        }
    }
}

// ── ExecutorConfig ─────────────────────────────────────────────────

/// Execution settings for a [`ToolSet`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Calls from one model turn run at most this many at a time.
    pub max_concurrent: usize,
    /// Per-call limit unless the tool sets its own.
    pub default_timeout: Duration,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Default timeout for `shell_command` when the model gives none.
    pub shell_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            default_timeout: Duration::from_secs(120),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            shell_timeout: Duration::from_secs(60),
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }
}

// ── Stats ──────────────────────────────────────────────────────────

/// Per-tool execution counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_ms: u64,
}

impl ToolStats {
    pub fn success_rate(&self) -> f64 {
        ratio(self.successes, self.executions)
    }

    pub fn avg_ms(&self) -> f64 {
        ratio(self.total_ms, self.executions)
    }
}

/// Aggregate counters across every tool in a [`ToolSet`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutorStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cache_hits: u64,
    pub total_duration_ms: u64,
    pub by_tool: HashMap<String, ToolStats>,
}

impl ExecutorStats {
    pub fn success_rate(&self) -> f64 {
        ratio(self.successful_executions, self.total_executions)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.total_executions)
    }

    pub fn avg_duration_ms(&self) -> f64 {
        ratio(self.total_duration_ms, self.total_executions)
    }

    fn record(&mut self, name: &str, elapsed: Duration, success: bool, cached: bool) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.total_executions += 1;
        self.total_duration_ms += ms;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        if cached {
            self.cache_hits += 1;
        }
        let tool = self.by_tool.entry(name.to_string()).or_default();
        tool.executions += 1;
        tool.total_ms += ms;
        if success {
            tool.successes += 1;
        } else {
            tool.failures += 1;
        }
    }
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 { 0.0 } else { n as f64 / d as f64 }
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool that the model can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct Pwd;
///
/// impl Tool for Pwd {
///     fn definition(&self) -> ToolDef { /* ... */ }
///
///     fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, _args: &'a str) -> ToolFuture<'a> {
///         Box::pin(async move {
///             ToolOutcome::ok(ctx.current_working_directory().display().to_string())
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the model.
    fn definition(&self) -> ToolDef;

    /// Run the tool with the raw JSON arguments string.
    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a>;

    fn name(&self) -> String {
        self.definition().function.name
    }

    /// Successful results may be reused for identical arguments.
    fn cacheable(&self) -> bool {
        false
    }

    /// Running this tool may change what cacheable tools would return.
    fn is_mutation(&self) -> bool {
        false
    }

    /// The tool only observes the workspace, so it may run alongside other
    /// read-only calls from the same batch.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Overrides [`ExecutorConfig::default_timeout`] for this tool.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

// ── ToolRegistry trait ─────────────────────────────────────────────

/// What the turn loop needs from its tools.
pub trait ToolRegistry: Send + Sync {
    fn definitions(&self) -> Vec<ToolDef>;

    fn execute<'a>(
        &'a self,
        ctx: &'a dyn AgentContext,
        name: &'a str,
        arguments: &'a str,
    ) -> ToolFuture<'a>;

    /// Calls from one batch that may run at once.
    fn max_concurrent(&self) -> usize {
        1
    }

    /// Whether `name` may run concurrently with neighbouring read-only calls.
    fn is_read_only(&self, name: &str) -> bool {
        let _ = name;
        false
    }

    /// Run every call in order. Consecutive read-only calls run together, at
    /// most [`max_concurrent`](Self::max_concurrent) at a time; any other
    /// call finishes before the next one starts. Outcomes come back in call
    /// order.
    fn execute_batch<'a>(
        &'a self,
        ctx: &'a dyn AgentContext,
        calls: &'a [ToolCall],
    ) -> BatchFuture<'a> {
        Box::pin(async move {
            let limit = self.max_concurrent().max(1);
            let mut outcomes = Vec::with_capacity(calls.len());
            let mut rest = calls;
            while let Some(first) = rest.first() {
                let run = if self.is_read_only(&first.function.name) {
                    rest.iter()
                        .take_while(|c| self.is_read_only(&c.function.name))
                        .count()
                } else {
                    1
                };
                let (group, tail) = rest.split_at(run);
                rest = tail;

                if let [call] = group {
                    outcomes.push(
                        self.execute(ctx, &call.function.name, &call.function.arguments)
                            .await,
                    );
                    continue;
                }
                let futures: Vec<ToolFuture<'a>> = group
                    .iter()
                    .map(|call| self.execute(ctx, &call.function.name, &call.function.arguments))
                    .collect();
                let done: Vec<ToolOutcome> = futures::stream::iter(futures)
                    .buffered(limit)
                    .collect()
                    .await;
                outcomes.extend(done);
            }
            outcomes
        })
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatched by name.
///
/// # Example
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_config(ExecutorConfig::default().with_max_concurrent(2))
///     .with_builtin_tools()
///     .with_if(allow_images, ViewImage);
///
/// let defs = tools.definitions();
/// let outcome = tools.execute(&ctx, "read_file", r#"{"file_path":"README.md"}"#).await;
/// ```
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
    /// Registration order, so definitions are sent in a stable order.
    order: Vec<String>,
    config: ExecutorConfig,
    /// Whether to validate tool arguments against JSON Schema before execution.
    validate_args: bool,
    cache: Mutex<ToolResultCache>,
    stats: Mutex<ExecutorStats>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.order)
            .field("config", &self.config)
            .finish()
    }
}

impl ToolSet {
    /// Create an empty tool set with default execution settings.
    pub fn new() -> Self {
        let config = ExecutorConfig::default();
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            cache: Mutex::new(ToolResultCache::new(config.cache_ttl, 256)),
            config,
            validate_args: true,
            stats: Mutex::new(ExecutorStats::default()),
        }
    }

    /// Replace the execution settings. Clears the result cache.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.cache = Mutex::new(ToolResultCache::new(config.cache_ttl, 256));
        self.config = config;
        self
    }

    /// Enable JSON Schema argument validation before tool execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Register a tool only when `condition` holds.
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Register the built-in workspace tools: file and shell tools from
    /// [`common`](crate::tools::common), `apply_patch`, `update_plan` and the
    /// background-process tools, which share one
    /// [`ProcessTable`](crate::tools::process::ProcessTable).
    pub fn with_builtin_tools(self) -> Self {
        use crate::tools::common::{
            GrepFiles, ListDir, ReadFile, ShellCommand, ViewImage, WriteFile,
        };
        use crate::tools::patch::ApplyPatch;
        use crate::tools::plan::UpdatePlan;
        use crate::tools::process::{
            KillProcess, ProcessTable, RunUntilFile, SpawnProcess, WaitForFile, WaitForPort,
        };
        let shell = ShellCommand::new(self.config.shell_timeout);
        let processes = std::sync::Arc::new(ProcessTable::from_env());
        self.with(shell)
            .with(ReadFile)
            .with(WriteFile)
            .with(ListDir)
            .with(GrepFiles)
            .with(ApplyPatch)
            .with(ViewImage)
            .with(UpdatePlan::new())
            .with(SpawnProcess::new(processes.clone()))
            .with(KillProcess::new(processes.clone()))
            .with(WaitForPort)
            .with(WaitForFile)
            .with(RunUntilFile::new(processes))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Snapshot of the execution counters.
    pub fn stats(&self) -> ExecutorStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn record(&self, name: &str, start: Instant, success: bool, cached: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.record(name, start.elapsed(), success, cached);
    }

    /// Execute a tool call by name, with validation, caching and timeout.
    pub async fn run(&self, ctx: &dyn AgentContext, name: &str, arguments: &str) -> ToolOutcome {
        let start = Instant::now();
        let Some(tool) = self.tools.get(name) else {
            self.record(name, start, false, false);
            return ToolOutcome::failure(format!("Unknown tool: {name}"));
        };

        if self.validate_args
            && let Some(error) = validate_tool_arguments(tool.as_ref(), arguments)
        {
            debug!("Tool {name} rejected arguments");
            self.record(name, start, false, false);
            return ToolOutcome::invalid(error);
        }

        let cacheable = self.config.cache_enabled && tool.cacheable();
        if cacheable {
            let hit = self
                .cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(name, arguments);
            if let Some(outcome) = hit {
                debug!("Tool {name} served from cache");
                self.record(name, start, true, true);
                return outcome;
            }
        }

        log_tool_call(name, arguments);
        let limit = tool.timeout().unwrap_or(self.config.default_timeout);
        let outcome = match tokio::time::timeout(limit, tool.execute(ctx, arguments)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                info!(
                    "Tool {name} timed out after {:.1}s (limit: {:.0}s)",
                    start.elapsed().as_secs_f64(),
                    limit.as_secs_f64(),
                );
                ToolOutcome::failure(format!(
                    "Tool '{name}' timed out after {:.0} seconds. \
                     Consider breaking the task into smaller steps or using \
                     different arguments.",
                    limit.as_secs_f64(),
                ))
            }
        };

        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if tool.is_mutation() {
                cache.invalidate_all();
            } else if cacheable {
                cache.put(name, arguments, &outcome);
            }
        }

        debug!(
            "Tool {name} completed in {:.0}ms ({} bytes, success={})",
            start.elapsed().as_secs_f64() * 1000.0,
            outcome.output.len(),
            outcome.success
        );
        trace!(
            "Tool {name} result preview: {}",
            outcome.output.chars().take(300).collect::<String>()
        );
        self.record(name, start, outcome.success, false);
        outcome
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry for ToolSet {
    fn definitions(&self) -> Vec<ToolDef> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition())
            .collect()
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a dyn AgentContext,
        name: &'a str,
        arguments: &'a str,
    ) -> ToolFuture<'a> {
        Box::pin(self.run(ctx, name, arguments))
    }

    fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    fn is_read_only(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.is_read_only())
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate tool arguments against the tool's declared JSON Schema.
///
/// Returns `None` if valid, or `Some(error_string)` if validation fails.
/// The error string is formatted for the model to understand and self-correct.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &str) -> Option<String> {
    let args_value: serde_json::Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(e) => {
            return Some(format!(
                "Invalid JSON arguments for tool '{}': {e}. \
                 Please provide valid JSON matching the tool's parameter schema.",
                tool.name()
            ));
        }
    };

    let schema = tool.definition().function.parameters;
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(_) => return None,
    };

    let errors: Vec<String> = validator
        .iter_errors(&args_value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Argument validation failed for tool '{}':\n{}",
            tool.name(),
            errors.join("\n")
        ))
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {arguments}");
}

/// Parse raw JSON arguments into a typed struct, or an invalid-parameters
/// outcome ready to return from [`Tool::execute`].
///
/// ```ignore
/// let args: MyArgs = match parse_tool_args(arguments) {
///     Ok(a) => a,
///     Err(outcome) => return outcome,
/// };
/// ```
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T, ToolOutcome> {
    serde_json::from_str(arguments).map_err(|e| {
        ToolOutcome::invalid(format!(
            "Invalid tool arguments: {e}. \
             Please provide valid JSON matching the tool's parameter schema."
        ))
    })
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::context::fake::StaticContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool;

    impl Tool for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new(
                "echo",
                "Echo the input",
                serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            )
        }

        fn execute<'a>(&'a self, _ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
            Box::pin(async move {
                #[derive(serde::Deserialize)]
                struct Args {
                    text: String,
                }
                match parse_tool_args::<Args>(arguments) {
                    Ok(a) => ToolOutcome::ok(a.text),
                    Err(o) => o,
                }
            })
        }
    }

    /// Cacheable tool counting real executions.
    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
    }

    impl Tool for &'static Counter {
        fn definition(&self) -> ToolDef {
            ToolDef::new("count", "Count", serde_json::json!({"type": "object"}))
        }

        fn execute<'a>(&'a self, _ctx: &'a dyn AgentContext, _args: &'a str) -> ToolFuture<'a> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { ToolOutcome::ok(n.to_string()) })
        }

        fn cacheable(&self) -> bool {
            true
        }
    }

    struct Touch;

    impl Tool for Touch {
        fn definition(&self) -> ToolDef {
            ToolDef::new("touch", "Mutate", serde_json::json!({"type": "object"}))
        }

        fn execute<'a>(&'a self, _ctx: &'a dyn AgentContext, _args: &'a str) -> ToolFuture<'a> {
            Box::pin(async { ToolOutcome::ok("touched") })
        }

        fn is_mutation(&self) -> bool {
            true
        }
    }

    /// Sleeps for `ms` then echoes it.
    struct Sleepy;

    impl Tool for Sleepy {
        fn definition(&self) -> ToolDef {
            ToolDef::new(
                "sleepy",
                "Sleep",
                serde_json::json!({
                    "type": "object",
                    "properties": { "ms": { "type": "integer" } },
                    "required": ["ms"]
                }),
            )
        }

        fn execute<'a>(&'a self, _ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
            Box::pin(async move {
                let v: serde_json::Value = serde_json::from_str(arguments).unwrap_or_default();
                let ms = v["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ToolOutcome::ok(ms.to_string())
            })
        }

        fn is_read_only(&self) -> bool {
            true
        }
    }

    fn leaked_counter() -> &'static Counter {
        Box::leak(Box::new(Counter::default()))
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(ToolOutcome::ok("fine").to_message(), "fine");
        assert_eq!(ToolOutcome::failure("boom").to_message(), "Error: boom");
        let mut partial = ToolOutcome::failure("boom");
        partial.output = "half".into();
        assert_eq!(partial.to_message(), "half\nError: boom");
        let invalid = ToolOutcome::invalid("missing x");
        assert!(invalid.invalid_params);
        assert!(!invalid.success);
    }

    #[test]
    fn definitions_keep_registration_order() {
        let set = ToolSet::new().with(Sleepy).with(EchoTool).with(Touch);
        let names: Vec<String> = set
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(names, ["sleepy", "echo", "touch"]);
    }

    #[test]
    fn with_if_respects_condition() {
        assert_eq!(ToolSet::new().with_if(true, EchoTool).len(), 1);
        assert!(ToolSet::new().with_if(false, EchoTool).is_empty());
    }

    #[test]
    fn builtin_tools_registered() {
        let set = ToolSet::new().with_builtin_tools();
        let names: Vec<String> = set
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(
            names,
            [
                "shell_command",
                "read_file",
                "write_file",
                "list_dir",
                "grep_files",
                "apply_patch",
                "view_image",
                "update_plan",
                "spawn_process",
                "kill_process",
                "wait_for_port",
                "wait_for_file",
                "run_until_file",
            ]
        );
    }

    #[tokio::test]
    async fn executes_known_tool() {
        let ctx = StaticContext::new("t");
        let set = ToolSet::new().with(EchoTool);
        let out = set.execute(&ctx, "echo", r#"{"text": "hello"}"#).await;
        assert_eq!(out, ToolOutcome::ok("hello"));
    }

    #[tokio::test]
    async fn unknown_tool_fails() {
        let ctx = StaticContext::new("t");
        let set = ToolSet::new().with(EchoTool);
        let out = set.execute(&ctx, "nonexistent", "{}").await;
        assert!(!out.success);
        assert!(!out.invalid_params);
        assert_eq!(out.error.as_deref(), Some("Unknown tool: nonexistent"));
    }

    #[tokio::test]
    async fn schema_violation_is_invalid() {
        let ctx = StaticContext::new("t");
        let set = ToolSet::new().with(EchoTool);
        let out = set.execute(&ctx, "echo", "{}").await;
        assert!(out.invalid_params);
        assert!(out.error.unwrap().contains("validation failed"));

        let out = set.execute(&ctx, "echo", "not json").await;
        assert!(out.invalid_params);
    }

    #[tokio::test]
    async fn cacheable_results_reused_until_mutation() {
        let ctx = StaticContext::new("t");
        let counter = leaked_counter();
        let set = ToolSet::new().with(counter).with(Touch);

        assert_eq!(set.execute(&ctx, "count", "{}").await.output, "1");
        assert_eq!(set.execute(&ctx, "count", "{}").await.output, "1");
        set.execute(&ctx, "touch", "{}").await;
        assert_eq!(set.execute(&ctx, "count", "{}").await.output, "2");

        let stats = set.stats();
        assert_eq!(stats.total_executions, 4);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.by_tool["count"].executions, 3);
    }

    #[tokio::test]
    async fn cache_can_be_disabled() {
        let ctx = StaticContext::new("t");
        let set = ToolSet::new()
            .with_config(ExecutorConfig::default().with_cache(false))
            .with(leaked_counter());
        set.execute(&ctx, "count", "{}").await;
        assert_eq!(set.execute(&ctx, "count", "{}").await.output, "2");
    }

    #[tokio::test]
    async fn timeout_becomes_failure() {
        let ctx = StaticContext::new("t");
        let set = ToolSet::new()
            .with_config(ExecutorConfig::default().with_default_timeout(Duration::from_millis(20)))
            .with(Sleepy);
        let out = set.execute(&ctx, "sleepy", r#"{"ms": 2000}"#).await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("timed out"));
        assert_eq!(set.stats().failed_executions, 1);
    }

    #[tokio::test]
    async fn batch_preserves_call_order() {
        let ctx = StaticContext::new("t");
        let set = ToolSet::new().with(Sleepy).with(EchoTool);
        let calls = vec![
            ToolCall::new("a", "sleepy", r#"{"ms": 60}"#),
            ToolCall::new("b", "echo", r#"{"text": "fast"}"#),
            ToolCall::new("c", "sleepy", r#"{"ms": 5}"#),
            ToolCall::new("d", "missing", "{}"),
        ];
        let outs = set.execute_batch(&ctx, &calls).await;
        let outputs: Vec<String> = outs.iter().map(|o| o.to_message()).collect();
        assert_eq!(outputs, ["60", "fast", "5", "Error: Unknown tool: missing"]);
    }

    #[tokio::test]
    async fn batch_runs_concurrently() {
        let ctx = StaticContext::new("t");
        let set = ToolSet::new().with(Sleepy);
        let calls: Vec<ToolCall> = (0..4)
            .map(|i| ToolCall::new(format!("c{i}"), "sleepy", r#"{"ms": 200}"#))
            .collect();
        let start = Instant::now();
        set.execute_batch(&ctx, &calls).await;
        assert!(start.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test]
    async fn mutation_splits_concurrent_reads() {
        let ctx = StaticContext::new("t");
        let set = ToolSet::new().with(Sleepy).with(Touch);
        let calls = vec![
            ToolCall::new("a", "sleepy", r#"{"ms": 150}"#),
            ToolCall::new("b", "sleepy", r#"{"ms": 150}"#),
            ToolCall::new("c", "touch", "{}"),
            ToolCall::new("d", "sleepy", r#"{"ms": 150}"#),
        ];
        let start = Instant::now();
        let outs = set.execute_batch(&ctx, &calls).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(450), "{elapsed:?}");
        let outputs: Vec<String> = outs.iter().map(|o| o.to_message()).collect();
        assert_eq!(outputs, ["150", "150", "touched", "150"]);
    }

    #[tokio::test]
    async fn read_sees_earlier_shell_write() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = crate::agent::context::LocalContext::new(dir.path(), "t");
        let set = ToolSet::new().with_builtin_tools();
        let calls = vec![
            ToolCall::new(
                "w",
                "shell_command",
                r#"{"command": "sleep 0.3; echo hi > f.txt"}"#,
            ),
            ToolCall::new("r", "read_file", r#"{"file_path": "f.txt"}"#),
        ];
        let outs = set.execute_batch(&ctx, &calls).await;
        assert!(outs[0].success);
        assert!(outs[1].success, "{:?}", outs[1].error);
        assert_eq!(outs[1].output, "L1: hi");
    }

    #[test]
    fn read_only_lookup() {
        let set = ToolSet::new().with_builtin_tools();
        assert!(set.is_read_only("read_file"));
        assert!(set.is_read_only("grep_files"));
        assert!(!set.is_read_only("shell_command"));
        assert!(!set.is_read_only("apply_patch"));
        assert!(!set.is_read_only("missing"));
    }

    #[test]
    fn stats_rates() {
        let mut stats = ExecutorStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        stats.record("a", Duration::from_millis(10), true, false);
        stats.record("a", Duration::from_millis(30), false, false);
        assert!((stats.success_rate() - 0.5).abs() < f64::EPSILON);
        assert!((stats.avg_duration_ms() - 20.0).abs() < f64::EPSILON);
        assert_eq!(stats.by_tool["a"].failures, 1);
    }
}
