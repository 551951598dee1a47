//! Built-in workspace tools.
//!
//! Every tool resolves relative paths against the
//! [`AgentContext`]'s working directory at call time, so one [`ToolSet`]
//! can serve any context.
//!
//! # Available tools
//!
//! | Tool | Name | Purpose |
//! |------|------|---------|
//! | [`ShellCommand`] | `shell_command` | Run a shell command |
//! | [`ReadFile`] | `read_file` | Read a file with line numbers |
//! | [`WriteFile`] | `write_file` | Create or overwrite a file |
//! | [`ListDir`] | `list_dir` | List a directory tree |
//! | [`GrepFiles`] | `grep_files` | Find files whose contents match a regex |
//! | [`ViewImage`] | `view_image` | Show an image file to the model |
//!
//! Patching, planning and background processes live in
//! [`patch`](super::patch), [`plan`](super::plan) and
//! [`process`](super::process).
//!
//! [`ToolSet`]: crate::tools::core::ToolSet

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::agent::context::AgentContext;
use crate::tools::core::{Tool, ToolFuture, ToolOutcome, parse_tool_args};
use crate::{ContentPart, ToolDef, json_schema_for};
use base64::Engine;
use schemars::JsonSchema;
use serde::Deserialize;

// ── Defaults ────────────────────────────────────────────────────────

/// Upper bound on a single `shell_command` run.
pub const MAX_SHELL_TIMEOUT: Duration = Duration::from_secs(180);

pub const DEFAULT_READ_LIMIT: usize = 2000;
pub const DEFAULT_LIST_DEPTH: usize = 2;
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const DEFAULT_GREP_LIMIT: usize = 100;
const GREP_TIMEOUT: Duration = Duration::from_secs(30);

// ── Typed argument structs ──────────────────────────────────────────

/// Typed arguments for `shell_command`.
#[derive(Deserialize, JsonSchema)]
pub struct ShellCommandArgs {
    /// Shell command to run (e.g. 'cargo test', 'git status').
    pub command: String,
    /// Directory to run in, relative to the working directory.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Timeout in milliseconds (default 60000, max 180000).
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Typed arguments for `read_file`.
#[derive(Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// Path of the file to read.
    pub file_path: String,
    /// First line to return, 1-based (default 1).
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum number of lines to return (default 2000).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Typed arguments for `write_file`.
#[derive(Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// Path of the file to write. Parent directories are created.
    pub file_path: String,
    /// Full content of the file.
    pub content: String,
}

/// Typed arguments for `list_dir`.
#[derive(Deserialize, JsonSchema)]
pub struct ListDirArgs {
    /// Directory to list (default '.').
    #[serde(default)]
    pub dir_path: Option<String>,
    /// How many levels of subdirectories to descend into (default 2).
    #[serde(default)]
    pub depth: Option<usize>,
    /// Maximum number of entries (default 50).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Typed arguments for `grep_files`.
#[derive(Deserialize, JsonSchema)]
pub struct GrepFilesArgs {
    /// Regular expression to search for.
    pub pattern: String,
    /// Glob restricting which files are searched (e.g. '*.rs', '*.{ts,tsx}').
    #[serde(default)]
    pub include: Option<String>,
    /// Directory or file to search (default: the working directory).
    #[serde(default)]
    pub path: Option<String>,
    /// Maximum number of paths to return (default 100).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Typed arguments for `view_image`.
#[derive(Deserialize, JsonSchema)]
pub struct ViewImageArgs {
    /// Path of a PNG, JPEG, GIF or WebP file.
    pub path: String,
}

/// Join `path` onto `cwd` unless it is already absolute.
pub fn resolve_path(cwd: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

// ── ShellCommand ────────────────────────────────────────────────────

/// Run `sh -lc <command>` with `TERM=dumb`.
///
/// A non-zero exit code is reported in the output but is not a tool failure:
/// the command ran, and its exit status is information for the model.
pub struct ShellCommand {
    default_timeout: Duration,
}

impl ShellCommand {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Effective timeout: whole seconds, at least 1, at most 180.
    fn effective_timeout(&self, timeout_ms: Option<u64>) -> Duration {
        let ms = timeout_ms.unwrap_or(self.default_timeout.as_millis() as u64);
        let secs = (ms / 1000).clamp(1, MAX_SHELL_TIMEOUT.as_secs());
        Duration::from_secs(secs)
    }
}

impl Default for ShellCommand {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl Tool for ShellCommand {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "shell_command",
            "Run a shell command in the working directory and return its \
             combined output. Non-zero exit codes are reported at the end of \
             the output. Use non-interactive flags; commands cannot read stdin.",
            json_schema_for::<ShellCommandArgs>(),
        )
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        Some(MAX_SHELL_TIMEOUT + Duration::from_secs(10))
    }

    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ShellCommandArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            if args.command.trim().is_empty() {
                return ToolOutcome::invalid(
                    "Missing required parameter 'command'. \
                     Usage: shell_command(command: str, workdir?: str, timeout_ms?: int)",
                );
            }
            let cwd = ctx.current_working_directory();
            let dir = match &args.workdir {
                Some(w) if !w.is_empty() => resolve_path(cwd, w),
                _ => cwd.to_path_buf(),
            };
            let timeout = self.effective_timeout(args.timeout_ms);
            run_login_shell(&dir, &args.command, timeout).await
        })
    }
}

/// Spawn the command and collect output, keeping what was read if the
/// timeout fires.
async fn run_login_shell(dir: &Path, command: &str, timeout: Duration) -> ToolOutcome {
    let mut child = match Command::new("sh")
        .arg("-lc")
        .arg(command)
        .current_dir(dir)
        .env("TERM", "dumb")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return ToolOutcome::failure(format!("Permission denied executing: {command}"));
        }
        Err(e) => return ToolOutcome::failure(format!("Command failed: {e}")),
    };
    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return ToolOutcome::failure("Command failed: output pipes unavailable");
    };

    let mut out = Vec::new();
    let mut err = Vec::new();
    let finished = tokio::time::timeout(timeout, async {
        let (_, _, status) = tokio::join!(
            stdout.read_to_end(&mut out),
            stderr.read_to_end(&mut err),
            child.wait()
        );
        status
    })
    .await;

    match finished {
        Ok(Ok(status)) => {
            let mut text = combine_streams(&out, &err);
            let code = status.code().unwrap_or(-1);
            if code != 0 {
                text = if text.is_empty() {
                    format!("Exit code: {code}")
                } else {
                    format!("{text}\n\nExit code: {code}")
                };
            }
            if text.is_empty() {
                text = "(no output)".to_string();
            }
            ToolOutcome::ok(text)
        }
        Ok(Err(e)) => ToolOutcome::failure(format!("Command failed: {e}")),
        Err(_) => {
            let _ = child.start_kill();
            let mut partial = combine_streams(&out, &err);
            if partial.is_empty() {
                partial = "(no output before timeout)".to_string();
            }
            ToolOutcome::ok(shell_timeout_message(timeout.as_secs(), &partial))
        }
    }
}

/// stdout, then stderr under a `stderr:` heading when both are present.
fn combine_streams(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    let joined = match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.into_owned(),
        (true, false) => stderr.into_owned(),
        (false, false) => format!("{stdout}\nstderr:\n{stderr}"),
    };
    joined.trim().to_string()
}

/// Guidance returned when a command outlives its timeout.
pub fn shell_timeout_message(secs: u64, partial_output: &str) -> String {
    format!(
        "Command timed out after {secs}s.\n\n\
         It may still be running in the background. Options:\n\
         1. See whether the process is alive: `ps aux | grep <name>`\n\
         2. Raise timeout_ms if the work legitimately takes longer\n\
         3. Make sure the command is not waiting for input (use -y flags, heredocs, etc.)\n\
         4. Split the work into smaller commands\n\n\
         Partial output before timeout:\n{partial_output}\n"
    )
}

// ── ReadFile ────────────────────────────────────────────────────────

/// Read a text file, prefixing each line with `L{n}: `.
pub struct ReadFile;

impl Tool for ReadFile {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "read_file",
            "Read a text file. Each line is prefixed with its number as 'L12: '. \
             Use offset and limit to page through large files.",
            json_schema_for::<ReadFileArgs>(),
        )
    }

    fn cacheable(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ReadFileArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            if args.file_path.is_empty() {
                return ToolOutcome::invalid(
                    "Missing required parameter 'file_path'. \
                     Usage: read_file(file_path: str, offset?: int, limit?: int)",
                );
            }
            let path = resolve_path(ctx.current_working_directory(), &args.file_path);
            match fs::metadata(&path).await {
                Err(_) => return ToolOutcome::failure(format!("File not found: {}", path.display())),
                Ok(meta) if !meta.is_file() => {
                    return ToolOutcome::failure(format!("Not a file: {}", path.display()));
                }
                Ok(_) => {}
            }
            match fs::read(&path).await {
                Ok(bytes) => ToolOutcome::ok(number_lines(
                    &String::from_utf8_lossy(&bytes),
                    args.offset.unwrap_or(1),
                    args.limit.unwrap_or(DEFAULT_READ_LIMIT),
                )),
                Err(e) => ToolOutcome::failure(format!("Failed to read file: {e}")),
            }
        })
    }
}

/// Lines `offset..offset+limit` (1-based), numbered, with a note for the rest.
fn number_lines(content: &str, offset: usize, limit: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = offset.saturating_sub(1);
    let end = start.saturating_add(limit);
    let mut out = lines
        .iter()
        .enumerate()
        .skip(start)
        .take(limit)
        .map(|(i, line)| format!("L{}: {}", i + 1, line.trim_end()))
        .collect::<Vec<_>>()
        .join("\n");
    if lines.len() > end {
        out.push_str(&format!("\n\n[... {} more lines ...]", lines.len() - end));
    }
    out
}

// ── WriteFile ───────────────────────────────────────────────────────

/// Create or overwrite a file, creating parent directories.
pub struct WriteFile;

impl Tool for WriteFile {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "write_file",
            "Write the full content of a file, replacing it if it exists. \
             Parent directories are created as needed.",
            json_schema_for::<WriteFileArgs>(),
        )
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: WriteFileArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            if args.file_path.is_empty() {
                return ToolOutcome::invalid(
                    "Missing required parameter 'file_path'. \
                     Usage: write_file(file_path: str, content: str)",
                );
            }
            let path = resolve_path(ctx.current_working_directory(), &args.file_path);
            if let Some(parent) = path.parent()
                && let Err(e) = fs::create_dir_all(parent).await
            {
                return ToolOutcome::failure(format!("Failed to write file: {e}"));
            }
            match fs::write(&path, args.content.as_bytes()).await {
                Ok(()) => ToolOutcome::ok(format!(
                    "Wrote {} bytes to {}",
                    args.content.len(),
                    path.display()
                )),
                Err(e) => ToolOutcome::failure(format!("Failed to write file: {e}")),
            }
        })
    }
}

// ── ListDir ─────────────────────────────────────────────────────────

/// List a directory tree, directories first, with `/` and `@` suffixes for
/// directories and symlinks.
pub struct ListDir;

impl Tool for ListDir {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "list_dir",
            "List a directory recursively. Directories end in '/', symlinks in '@'.",
            json_schema_for::<ListDirArgs>(),
        )
    }

    fn cacheable(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ListDirArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            let dir_path = args.dir_path.unwrap_or_else(|| ".".to_string());
            let path = resolve_path(ctx.current_working_directory(), &dir_path);
            match fs::metadata(&path).await {
                Err(_) => {
                    return ToolOutcome::failure(format!("Directory not found: {}", path.display()));
                }
                Ok(meta) if !meta.is_dir() => {
                    return ToolOutcome::failure(format!("Not a directory: {}", path.display()));
                }
                Ok(_) => {}
            }

            let depth = args.depth.unwrap_or(DEFAULT_LIST_DEPTH);
            let limit = args.limit.unwrap_or(DEFAULT_LIST_LIMIT);
            let listing = tokio::task::spawn_blocking(move || {
                let mut entries = Vec::new();
                // One past the limit, to know whether anything was cut.
                list_recursive(&path, &path, &mut entries, depth, limit + 1, 0);
                entries
            })
            .await;

            match listing {
                Ok(entries) if entries.is_empty() => ToolOutcome::ok("(empty directory)"),
                Ok(mut entries) => {
                    let truncated = entries.len() > limit;
                    entries.truncate(limit);
                    let mut out = entries.join("\n");
                    if truncated {
                        out.push_str(&format!("\n\n[... listing truncated at {limit} entries ...]"));
                    }
                    ToolOutcome::ok(out)
                }
                Err(e) => ToolOutcome::failure(format!("Failed to list directory: {e}")),
            }
        })
    }
}

fn list_recursive(
    base: &Path,
    current: &Path,
    entries: &mut Vec<String>,
    max_depth: usize,
    max_entries: usize,
    depth: usize,
) {
    if depth > max_depth || entries.len() >= max_entries {
        return;
    }
    let Ok(read) = std::fs::read_dir(current) else {
        return;
    };
    let mut items: Vec<(bool, String, PathBuf)> = read
        .filter_map(Result::ok)
        .map(|e| {
            let path = e.path();
            (!path.is_dir(), e.file_name().to_string_lossy().to_lowercase(), path)
        })
        .collect();
    items.sort();

    for (is_file, _, path) in items {
        if entries.len() >= max_entries {
            break;
        }
        let rel = path.strip_prefix(base).unwrap_or(&path).display().to_string();
        if !is_file {
            entries.push(format!("{rel}/"));
            list_recursive(base, &path, entries, max_depth, max_entries, depth + 1);
        } else if path.is_symlink() {
            entries.push(format!("{rel}@"));
        } else {
            entries.push(rel);
        }
    }
}

// ── GrepFiles ───────────────────────────────────────────────────────

/// List files whose contents match a regex, most recently modified first.
///
/// Runs `rg -l`, or `grep -rlE` when ripgrep is not installed.
pub struct GrepFiles;

impl Tool for GrepFiles {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "grep_files",
            "Find files whose contents match a regular expression. Returns \
             matching file paths, most recently modified first. Use read_file \
             to look at the matches.",
            json_schema_for::<GrepFilesArgs>(),
        )
    }

    fn cacheable(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: GrepFilesArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            if args.pattern.is_empty() {
                return ToolOutcome::invalid(
                    "Missing required parameter 'pattern'. \
                     Usage: grep_files(pattern: str, include?: str, path?: str, limit?: int)",
                );
            }
            let cwd = ctx.current_working_directory();
            let target = args.path.as_deref().filter(|p| !p.is_empty()).unwrap_or(".");
            let include = args.include.as_deref().filter(|g| !g.is_empty());
            let mut files = match matching_files(cwd, &args.pattern, include, target).await {
                Ok(files) => files,
                Err(e) => return ToolOutcome::failure(e),
            };
            if files.is_empty() {
                return ToolOutcome::ok("No matches found");
            }
            sort_by_mtime(cwd, &mut files).await;

            let limit = args.limit.unwrap_or(DEFAULT_GREP_LIMIT).max(1);
            let extra = files.len().saturating_sub(limit);
            files.truncate(limit);
            let mut out = files.join("\n");
            if extra > 0 {
                out.push_str(&format!("\n\n[... {extra} more files ...]"));
            }
            ToolOutcome::ok(out)
        })
    }
}

/// Paths of files under `target` containing `pattern`.
async fn matching_files(
    cwd: &Path,
    pattern: &str,
    include: Option<&str>,
    target: &str,
) -> Result<Vec<String>, String> {
    let mut rg = Command::new("rg");
    rg.args(["-l", "--color=never"]);
    if let Some(glob) = include {
        rg.args(["-g", glob]);
    }
    rg.args(["--", pattern, target]);

    let output = match run_search(rg, cwd).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut grep = Command::new("grep");
            grep.arg("-rlE");
            if let Some(glob) = include {
                grep.arg(format!("--include={glob}"));
            }
            grep.args(["--", pattern, target]);
            run_search(grep, cwd).await
        }
        other => other,
    };
    let output = match output {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            return Err("Search timed out".to_string());
        }
        Err(e) => return Err(format!("Search failed: {e}")),
    };

    // Exit code 1 means no matches for both rg and grep.
    match output.status.code() {
        Some(0) | Some(1) => Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()),
        _ => Err(format!(
            "Search failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )),
    }
}

async fn run_search(mut cmd: Command, cwd: &Path) -> std::io::Result<std::process::Output> {
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    match tokio::time::timeout(GREP_TIMEOUT, cmd.output()).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::from(std::io::ErrorKind::TimedOut)),
    }
}

/// Newest first; files whose metadata cannot be read go last.
async fn sort_by_mtime(cwd: &Path, files: &mut [String]) {
    let mut stamped = Vec::with_capacity(files.len());
    for f in files.iter() {
        let modified = fs::metadata(resolve_path(cwd, f))
            .await
            .and_then(|m| m.modified())
            .ok();
        stamped.push((std::cmp::Reverse(modified), f.clone()));
    }
    stamped.sort();
    for (slot, (_, f)) in files.iter_mut().zip(stamped) {
        *slot = f;
    }
}

// ── ViewImage ───────────────────────────────────────────────────────

/// Load an image file and attach it for the model to look at.
pub struct ViewImage;

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

impl Tool for ViewImage {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "view_image",
            "Attach a local image (PNG, JPEG, GIF or WebP) so you can see it. \
             The image appears in the next message.",
            json_schema_for::<ViewImageArgs>(),
        )
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ViewImageArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            let path = resolve_path(ctx.current_working_directory(), &args.path);
            let Some(mime) = image_mime(&path) else {
                return ToolOutcome::failure(format!(
                    "Unsupported image format: {} (expected png, jpeg, gif or webp)",
                    path.display()
                ));
            };
            match fs::read(&path).await {
                Ok(bytes) => {
                    let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
                    ToolOutcome::ok(format!(
                        "Loaded image {} ({} bytes)",
                        path.display(),
                        bytes.len()
                    ))
                    .with_image(ContentPart::image(format!("data:{mime};base64,{data}")))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    ToolOutcome::failure(format!("File not found: {}", path.display()))
                }
                Err(e) => ToolOutcome::failure(format!("Failed to read image: {e}")),
            }
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
