//! The environment an agent acts in.
//!
//! The [`Harness`](super::harness::Harness) never constructs its environment:
//! it receives a `&dyn AgentContext` that can run shell commands, knows the
//! working directory and the task instruction, and can be told the run is
//! over. [`LocalContext`] runs commands on the host with `sh -c`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

/// Default timeout for [`AgentContext::run_shell_command`].
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(120);

/// Steps kept in [`LocalContext`]'s history.
const HISTORY_LIMIT: usize = 200;

/// Boxed future returned by [`AgentContext::run_shell_command`].
pub type ShellFuture<'a> = Pin<Box<dyn Future<Output = ShellOutput> + Send + 'a>>;

/// Combined output and exit status of a shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    /// stdout followed by stderr.
    pub output: String,
    /// Process exit code, `-1` on timeout or spawn failure.
    pub exit_code: i32,
}

impl ShellOutput {
    pub fn new(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capabilities the turn loop and tools need from their environment.
pub trait AgentContext: Send + Sync {
    fn run_shell_command<'a>(&'a self, command: &'a str, timeout: Duration) -> ShellFuture<'a>;

    fn current_working_directory(&self) -> &Path;

    /// The task the agent was given.
    fn instruction(&self) -> &str;

    /// Signal that the run has ended (successfully or not).
    fn mark_complete(&self);

    fn is_complete(&self) -> bool;
}

/// One command run through a [`LocalContext`].
#[derive(Debug, Clone)]
pub struct ShellStep {
    pub command: String,
    pub exit_code: i32,
    pub duration: Duration,
}

/// [`AgentContext`] backed by the local machine.
#[derive(Debug)]
pub struct LocalContext {
    cwd: PathBuf,
    instruction: String,
    complete: AtomicBool,
    history: Mutex<Vec<ShellStep>>,
}

impl LocalContext {
    pub fn new(cwd: impl Into<PathBuf>, instruction: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            instruction: instruction.into(),
            complete: AtomicBool::new(false),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Commands run so far (oldest first, bounded).
    pub fn history(&self) -> Vec<ShellStep> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn record(&self, step: ShellStep) {
        if let Ok(mut history) = self.history.lock() {
            if history.len() >= HISTORY_LIMIT {
                history.remove(0);
            }
            history.push(step);
        }
    }
}

/// Run `sh -c command` in `cwd`, killing it when `timeout` elapses.
pub async fn run_local_shell(cwd: &Path, command: &str, timeout: Duration) -> ShellOutput {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(c) => c,
        Err(e) => return ShellOutput::new(format!("Error running command: {e}"), -1),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            ShellOutput::new(text, output.status.code().unwrap_or(-1))
        }
        Ok(Err(e)) => ShellOutput::new(format!("Error running command: {e}"), -1),
        Err(_) => ShellOutput::new(
            format!("[TIMEOUT] Command timed out after {}s", timeout.as_secs()),
            -1,
        ),
    }
}

impl AgentContext for LocalContext {
    fn run_shell_command<'a>(&'a self, command: &'a str, timeout: Duration) -> ShellFuture<'a> {
        Box::pin(async move {
            debug!("[shell] {command}");
            let start = Instant::now();
            let result = run_local_shell(&self.cwd, command, timeout).await;
            self.record(ShellStep {
                command: command.to_string(),
                exit_code: result.exit_code,
                duration: start.elapsed(),
            });
            result
        })
    }

    fn current_working_directory(&self) -> &Path {
        &self.cwd
    }

    fn instruction(&self) -> &str {
        &self.instruction
    }

    fn mark_complete(&self) {
        if !self.complete.swap(true, Ordering::SeqCst) {
            info!("Agent marked complete after {} shell step(s)", self.history().len());
        }
    }

    fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Context with canned shell output, for loop tests.

    use super::*;

    pub struct StaticContext {
        pub cwd: PathBuf,
        pub instruction: String,
        pub listing: String,
        pub complete: AtomicBool,
        pub commands: Mutex<Vec<String>>,
    }

    impl StaticContext {
        pub fn new(instruction: &str) -> Self {
            Self {
                cwd: PathBuf::from("/work"),
                instruction: instruction.to_string(),
                listing: "/work\ntotal 0".to_string(),
                complete: AtomicBool::new(false),
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    impl AgentContext for StaticContext {
        fn run_shell_command<'a>(&'a self, command: &'a str, _timeout: Duration) -> ShellFuture<'a> {
            self.commands.lock().unwrap().push(command.to_string());
            let out = ShellOutput::new(self.listing.clone(), 0);
            Box::pin(async move { out })
        }

        fn current_working_directory(&self) -> &Path {
            &self.cwd
        }

        fn instruction(&self) -> &str {
            &self.instruction
        }

        fn mark_complete(&self) {
            self.complete.store(true, Ordering::SeqCst);
        }

        fn is_complete(&self) -> bool {
            self.complete.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let ctx = LocalContext::new(dir.path(), "task");
        let out = ctx.run_shell_command("ls", DEFAULT_SHELL_TIMEOUT).await;
        assert!(out.success());
        assert!(out.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn captures_stderr_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "task");
        let out = ctx
            .run_shell_command("echo out; echo err >&2; exit 3", DEFAULT_SHELL_TIMEOUT)
            .await;
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.output, "out\nerr\n");
    }

    #[tokio::test]
    async fn timeout_reports_minus_one() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "task");
        let out = ctx
            .run_shell_command("sleep 5", Duration::from_millis(100))
            .await;
        assert_eq!(out.exit_code, -1);
        assert!(out.output.starts_with("[TIMEOUT]"));
    }

    #[tokio::test]
    async fn history_and_completion() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "do it");
        ctx.run_shell_command("true", DEFAULT_SHELL_TIMEOUT).await;
        assert_eq!(ctx.history().len(), 1);
        assert_eq!(ctx.history()[0].command, "true");
        assert_eq!(ctx.instruction(), "do it");
        assert!(!ctx.is_complete());
        ctx.mark_complete();
        assert!(ctx.is_complete());
    }
}
