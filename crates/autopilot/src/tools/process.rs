//! Background processes: start servers, wait for them, stop them.
//!
//! | Tool | Name | Purpose |
//! |------|------|---------|
//! | [`SpawnProcess`] | `spawn_process` | Start a command in the background, output to log files |
//! | [`KillProcess`] | `kill_process` | Send TERM or KILL to a process (group) |
//! | [`WaitForPort`] | `wait_for_port` | Poll until a TCP port accepts connections |
//! | [`WaitForFile`] | `wait_for_file` | Poll until a file exists |
//! | [`RunUntilFile`] | `run_until_file` | Run a command until it produces a file, then stop it |
//!
//! Spawned commands lead their own process group so that stopping one also
//! stops the children it started. `spawn_process` and `kill_process` share a
//! [`ProcessTable`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::agent::context::AgentContext;
use crate::tools::common::resolve_path;
use crate::tools::core::{Tool, ToolFuture, ToolOutcome, parse_tool_args};
use crate::{ToolDef, json_schema_for};

/// Overrides the directory spawned processes log to.
pub const LOG_DIR_ENV: &str = "AUTOPILOT_TOOL_LOG_DIR";

/// Longest any wait in this module may last.
pub const MAX_WAIT: Duration = Duration::from_secs(170);

const PORT_POLL: Duration = Duration::from_millis(200);
const FILE_POLL: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

fn wait_limit(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0))
        .unwrap_or(MAX_WAIT)
        .min(MAX_WAIT)
}

// ── Process table ───────────────────────────────────────────────────

/// Processes started by `spawn_process`, keyed by pid.
#[derive(Debug)]
pub struct ProcessTable {
    children: Mutex<HashMap<u32, Child>>,
    log_dir: PathBuf,
    seq: AtomicU64,
}

impl ProcessTable {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            log_dir: log_dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Logs go to `$AUTOPILOT_TOOL_LOG_DIR`, else a directory under the
    /// system temp dir.
    pub fn from_env() -> Self {
        let dir = std::env::var_os(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("autopilot-tool-logs"));
        Self::new(dir)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Pids still tracked, ascending.
    pub fn tracked(&self) -> Vec<u32> {
        let children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        let mut pids: Vec<u32> = children.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Fresh stdout/stderr log paths for a process started by `tool`.
    fn log_paths(&self, tool: &str) -> (PathBuf, PathBuf) {
        let stamp = chrono::Utc::now().timestamp_millis();
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        (
            self.log_dir.join(format!("{tool}_{stamp}_{n}.out.log")),
            self.log_dir.join(format!("{tool}_{stamp}_{n}.err.log")),
        )
    }

    fn insert(&self, pid: u32, child: Child) {
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid, child);
    }

    fn contains(&self, pid: u32) -> bool {
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&pid)
    }

    fn remove(&self, pid: u32) -> Option<Child> {
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&pid)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Start `sh -lc <command>` as a process-group leader with output appended
/// to the given files.
fn spawn_logged(dir: &Path, command: &str, stdout: &Path, stderr: &Path) -> std::io::Result<Child> {
    for path in [stdout, stderr] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let open = |p: &Path| std::fs::OpenOptions::new().create(true).append(true).open(p);
    let out = open(stdout)?;
    let err = open(stderr)?;
    Command::new("sh")
        .arg("-lc")
        .arg(command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .process_group(0)
        .spawn()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    #[default]
    Term,
    Kill,
}

impl Signal {
    fn name(self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Sent,
    NoSuchProcess,
}

/// Signal a pid, or the whole group it leads, through the shell's `kill`.
async fn send_signal(pid: u32, signal: Signal, group: bool) -> Result<Delivery, String> {
    let target = if group {
        format!("-- -{pid}")
    } else {
        pid.to_string()
    };
    let script = format!("kill -s {} {target}", signal.name());
    let output = Command::new("sh")
        .arg("-c")
        .arg(&script)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("Failed to kill pid {pid}: {e}"))?;
    if output.status.success() {
        return Ok(Delivery::Sent);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.to_lowercase().contains("no such process") {
        Ok(Delivery::NoSuchProcess)
    } else {
        Err(format!("Failed to kill pid {pid}: {}", stderr.trim()))
    }
}

// ── spawn_process ───────────────────────────────────────────────────

/// Typed arguments for `spawn_process`.
#[derive(Deserialize, JsonSchema)]
pub struct SpawnProcessArgs {
    /// Command to run (via sh -lc).
    pub command: String,
    /// Working directory, relative to the workspace (default: workspace).
    #[serde(default)]
    pub cwd: Option<String>,
    /// File for stdout (default: a new log file).
    #[serde(default)]
    pub stdout_path: Option<String>,
    /// File for stderr (default: a new log file).
    #[serde(default)]
    pub stderr_path: Option<String>,
}

pub struct SpawnProcess {
    table: Arc<ProcessTable>,
}

impl SpawnProcess {
    pub fn new(table: Arc<ProcessTable>) -> Self {
        Self { table }
    }
}

impl Tool for SpawnProcess {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "spawn_process",
            "Start a long-running process (a server, a watcher) in the background. \
             Returns its pid and log file paths. Use wait_for_port to confirm a \
             server is up and kill_process to stop it.",
            json_schema_for::<SpawnProcessArgs>(),
        )
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: SpawnProcessArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            if args.command.trim().is_empty() {
                return ToolOutcome::invalid(
                    "Missing required parameter 'command'. Usage: spawn_process(command: str, ...)",
                );
            }
            let cwd = ctx.current_working_directory();
            let dir = match args.cwd.as_deref().filter(|d| !d.is_empty()) {
                Some(d) => resolve_path(cwd, d),
                None => cwd.to_path_buf(),
            };
            let (default_out, default_err) = self.table.log_paths("spawn");
            let stdout = args
                .stdout_path
                .map(|p| resolve_path(cwd, &p))
                .unwrap_or(default_out);
            let stderr = args
                .stderr_path
                .map(|p| resolve_path(cwd, &p))
                .unwrap_or(default_err);

            let child = match spawn_logged(&dir, &args.command, &stdout, &stderr) {
                Ok(child) => child,
                Err(e) => return ToolOutcome::failure(format!("spawn failed: {e}")),
            };
            let Some(pid) = child.id() else {
                return ToolOutcome::failure("spawn failed: process exited immediately");
            };
            info!("Spawned pid {pid}: {}", args.command);
            self.table.insert(pid, child);
            ToolOutcome::ok(format!(
                "pid: {pid}\ncommand: {}\ncwd: {}\nstdout_path: {}\nstderr_path: {}",
                args.command,
                dir.display(),
                stdout.display(),
                stderr.display()
            ))
        })
    }
}

// ── kill_process ────────────────────────────────────────────────────

/// Typed arguments for `kill_process`.
#[derive(Deserialize, JsonSchema)]
pub struct KillProcessArgs {
    /// Process id to stop.
    pub pid: u32,
    /// Signal to send (default TERM).
    #[serde(default)]
    pub signal: Signal,
}

pub struct KillProcess {
    table: Arc<ProcessTable>,
}

impl KillProcess {
    pub fn new(table: Arc<ProcessTable>) -> Self {
        Self { table }
    }
}

impl Tool for KillProcess {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "kill_process",
            "Stop a process by pid. Processes started with spawn_process are \
             stopped together with their children. Send TERM first, KILL if it \
             does not exit.",
            json_schema_for::<KillProcessArgs>(),
        )
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, _ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: KillProcessArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            let pid = args.pid;
            let tracked = self.table.contains(pid);
            match send_signal(pid, args.signal, tracked).await {
                Ok(Delivery::Sent) => {
                    if let Some(mut child) = self.table.remove(pid) {
                        // Reap it if it is already gone.
                        let _ = child.try_wait();
                    }
                    ToolOutcome::ok(format!("pid {pid}: sent {}", args.signal.name()))
                }
                Ok(Delivery::NoSuchProcess) => {
                    self.table.remove(pid);
                    ToolOutcome::ok(format!("pid {pid}: already dead"))
                }
                Err(e) => ToolOutcome::failure(e),
            }
        })
    }
}

// ── wait_for_port ───────────────────────────────────────────────────

/// Typed arguments for `wait_for_port`.
#[derive(Deserialize, JsonSchema)]
pub struct WaitForPortArgs {
    /// Hostname or IP (default 127.0.0.1).
    #[serde(default)]
    pub host: Option<String>,
    /// TCP port to check.
    pub port: u16,
    /// Timeout in seconds (default 15).
    #[serde(default)]
    pub timeout_sec: Option<f64>,
}

pub struct WaitForPort;

impl Tool for WaitForPort {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "wait_for_port",
            "Wait until a TCP host:port accepts connections, or time out. Use \
             after spawn_process to make sure a server is up.",
            json_schema_for::<WaitForPortArgs>(),
        )
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        Some(MAX_WAIT + Duration::from_secs(10))
    }

    fn execute<'a>(&'a self, _ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: WaitForPortArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            let host = args.host.unwrap_or_else(|| "127.0.0.1".to_string());
            let deadline = Instant::now() + wait_limit(args.timeout_sec.unwrap_or(15.0));
            let mut last_err = None;
            loop {
                let connect = TcpStream::connect((host.as_str(), args.port));
                match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
                    Ok(Ok(_)) => {
                        return ToolOutcome::ok(format!(
                            "host={host} port={} ready=true",
                            args.port
                        ));
                    }
                    Ok(Err(e)) => last_err = Some(e.to_string()),
                    Err(_) => last_err = Some("connect timed out".to_string()),
                }
                if Instant::now() + PORT_POLL > deadline {
                    break;
                }
                tokio::time::sleep(PORT_POLL).await;
            }
            debug!("{host}:{} not ready: {last_err:?}", args.port);
            ToolOutcome::failure(format!(
                "timeout: {}",
                last_err.unwrap_or_else(|| "no connection".to_string())
            ))
        })
    }
}

// ── wait_for_file ───────────────────────────────────────────────────

/// Typed arguments for `wait_for_file`.
#[derive(Deserialize, JsonSchema)]
pub struct WaitForFileArgs {
    /// Path to wait for.
    pub path: String,
    /// Timeout in seconds (default 15).
    #[serde(default)]
    pub timeout_sec: Option<f64>,
    /// Require at least this many bytes (default 0).
    #[serde(default)]
    pub min_size_bytes: Option<u64>,
}

/// Size of `path` once it is a file of at least `min_size` bytes.
async fn ready_size(path: &Path, min_size: u64) -> Option<u64> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    (meta.is_file() && meta.len() >= min_size).then_some(meta.len())
}

pub struct WaitForFile;

impl Tool for WaitForFile {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "wait_for_file",
            "Wait until a file exists (optionally with a minimum size), or time \
             out. Useful when a program writes an output file asynchronously.",
            json_schema_for::<WaitForFileArgs>(),
        )
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        Some(MAX_WAIT + Duration::from_secs(10))
    }

    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: WaitForFileArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            if args.path.is_empty() {
                return ToolOutcome::invalid(
                    "Missing required parameter 'path'. Usage: wait_for_file(path: str, ...)",
                );
            }
            let path = resolve_path(ctx.current_working_directory(), &args.path);
            let min_size = args.min_size_bytes.unwrap_or(0);
            let deadline = Instant::now() + wait_limit(args.timeout_sec.unwrap_or(15.0));
            loop {
                if let Some(size) = ready_size(&path, min_size).await {
                    return ToolOutcome::ok(format!(
                        "path={} exists=true size_bytes={size}",
                        path.display()
                    ));
                }
                if Instant::now() >= deadline {
                    return ToolOutcome::failure(format!("timeout waiting for {}", path.display()));
                }
                tokio::time::sleep(FILE_POLL).await;
            }
        })
    }
}

// ── run_until_file ──────────────────────────────────────────────────

/// Typed arguments for `run_until_file`.
#[derive(Deserialize, JsonSchema)]
pub struct RunUntilFileArgs {
    /// Command to run (via sh -lc).
    pub command: String,
    /// File whose appearance means the command has done its job.
    pub file_path: String,
    /// Working directory, relative to the workspace (default: workspace).
    #[serde(default)]
    pub cwd: Option<String>,
    /// Timeout in seconds (default 30).
    #[serde(default)]
    pub timeout_sec: Option<f64>,
    /// Require at least this many bytes (default 1).
    #[serde(default)]
    pub min_size_bytes: Option<u64>,
}

pub struct RunUntilFile {
    table: Arc<ProcessTable>,
}

impl RunUntilFile {
    pub fn new(table: Arc<ProcessTable>) -> Self {
        Self { table }
    }
}

/// TERM the group, then KILL it if the leader outlives the grace period.
async fn terminate(child: &mut Child, pid: u32) {
    let _ = send_signal(pid, Signal::Term, true).await;
    if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
        let _ = send_signal(pid, Signal::Kill, true).await;
        let _ = child.wait().await;
    }
}

impl Tool for RunUntilFile {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "run_until_file",
            "Run a command until it writes a target file (or times out), then \
             stop it. Useful for interactive programs that render a frame or \
             file once they are ready.",
            json_schema_for::<RunUntilFileArgs>(),
        )
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        Some(MAX_WAIT + TERMINATE_GRACE + Duration::from_secs(10))
    }

    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: RunUntilFileArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            if args.command.trim().is_empty() || args.file_path.is_empty() {
                return ToolOutcome::invalid(
                    "Missing required parameters 'command' and 'file_path'. \
                     Usage: run_until_file(command: str, file_path: str, ...)",
                );
            }
            let cwd = ctx.current_working_directory();
            let dir = match args.cwd.as_deref().filter(|d| !d.is_empty()) {
                Some(d) => resolve_path(cwd, d),
                None => cwd.to_path_buf(),
            };
            let target = resolve_path(cwd, &args.file_path);
            let min_size = args.min_size_bytes.unwrap_or(1);
            let (stdout, stderr) = self.table.log_paths("run_until");

            let started = Instant::now();
            let mut child = match spawn_logged(&dir, &args.command, &stdout, &stderr) {
                Ok(child) => child,
                Err(e) => return ToolOutcome::failure(format!("run_until_file failed: {e}")),
            };
            let pid = child.id().unwrap_or(0);
            let deadline = started + wait_limit(args.timeout_sec.unwrap_or(30.0));

            let mut found = false;
            let mut status = None;
            while Instant::now() < deadline {
                if ready_size(&target, min_size).await.is_some() {
                    found = true;
                    break;
                }
                if let Ok(Some(exit)) = child.try_wait() {
                    status = Some(exit);
                    break;
                }
                tokio::time::sleep(FILE_POLL).await;
            }
            if status.is_none() {
                match child.try_wait() {
                    Ok(Some(exit)) => status = Some(exit),
                    _ if pid != 0 => terminate(&mut child, pid).await,
                    _ => {}
                }
            }
            let exit_code = match status {
                Some(s) => s.code().map_or("none".to_string(), |c| c.to_string()),
                None => child
                    .try_wait()
                    .ok()
                    .flatten()
                    .and_then(|s| s.code())
                    .map_or("none".to_string(), |c| c.to_string()),
            };
            ToolOutcome::ok(
                [
                    format!("ok={found}"),
                    format!("pid={pid}"),
                    format!("file_path={}", target.display()),
                    format!("found={found}"),
                    format!("duration_sec={:.2}", started.elapsed().as_secs_f64()),
                    format!("exit_code={exit_code}"),
                    format!("stdout_path={}", stdout.display()),
                    format!("stderr_path={}", stderr.display()),
                ]
                .join("\n"),
            )
        })
    }
}
