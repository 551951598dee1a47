//! `apply_patch`: create, update, move and delete files from one envelope.
//!
//! ```text
//! *** Begin Patch
//! *** Add File: src/new.rs
//! +fn main() {}
//! *** Update File: src/lib.rs
//! *** Move to: src/core.rs
//! @@ fn parse
//!  let x = 1;
//! -let y = 2;
//! +let y = 3;
//! *** Delete File: old.txt
//! *** End Patch
//! ```
//!
//! Every hunk is checked against the current file contents before anything
//! is written, so a patch that fails to apply leaves the workspace untouched.

use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use crate::agent::context::AgentContext;
use crate::tools::common::resolve_path;
use crate::tools::core::{Tool, ToolFuture, ToolOutcome, parse_tool_args};
use crate::{ToolDef, json_schema_for};

const BEGIN: &str = "*** Begin Patch";
const END: &str = "*** End Patch";
const ADD: &str = "*** Add File: ";
const DELETE: &str = "*** Delete File: ";
const UPDATE: &str = "*** Update File: ";
const MOVE: &str = "*** Move to: ";
const END_OF_FILE: &str = "*** End of File";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch must start with '*** Begin Patch'")]
    MissingBegin,
    #[error("patch must end with '*** End Patch'")]
    MissingEnd,
    #[error("line {line}: expected a file header, found '{text}'")]
    UnexpectedLine { line: usize, text: String },
    #[error("line {line}: '{text}' must start with '+' in an added file")]
    BadAddLine { line: usize, text: String },
    #[error("update of {0} has no hunks")]
    EmptyUpdate(String),
    #[error("file paths must be relative: {0}")]
    AbsolutePath(String),
    #[error("patch contains no file operations")]
    Empty,
    #[error("{path}: {reason}")]
    Apply { path: String, reason: String },
}

/// One `@@` section of an update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hunk {
    /// Text after `@@`, used to locate the hunk.
    pub anchor: Option<String>,
    pub old_lines: Vec<String>,
    pub new_lines: Vec<String>,
    /// The hunk must match at the end of the file.
    pub at_eof: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOp {
    Add {
        path: String,
        content: String,
    },
    Delete {
        path: String,
    },
    Update {
        path: String,
        move_to: Option<String>,
        hunks: Vec<Hunk>,
    },
}

/// Parse a patch envelope into file operations.
pub fn parse_patch(patch: &str) -> Result<Vec<FileOp>, PatchError> {
    let lines: Vec<&str> = patch.trim().lines().collect();
    if lines.first().map(|l| l.trim()) != Some(BEGIN) {
        return Err(PatchError::MissingBegin);
    }
    if lines.len() < 2 || lines.last().map(|l| l.trim()) != Some(END) {
        return Err(PatchError::MissingEnd);
    }
    let body = &lines[1..lines.len() - 1];

    let mut ops = Vec::new();
    let mut i = 0;
    while i < body.len() {
        let line = body[i];
        let line_no = i + 2;
        if let Some(path) = line.strip_prefix(ADD) {
            let path = relative(path)?;
            let mut content = String::new();
            i += 1;
            while i < body.len() && !body[i].starts_with("*** ") {
                let Some(text) = body[i].strip_prefix('+') else {
                    return Err(PatchError::BadAddLine {
                        line: i + 2,
                        text: body[i].to_string(),
                    });
                };
                content.push_str(text);
                content.push('\n');
                i += 1;
            }
            ops.push(FileOp::Add { path, content });
        } else if let Some(path) = line.strip_prefix(DELETE) {
            ops.push(FileOp::Delete {
                path: relative(path)?,
            });
            i += 1;
        } else if let Some(path) = line.strip_prefix(UPDATE) {
            let path = relative(path)?;
            i += 1;
            let mut move_to = None;
            if let Some(dest) = body.get(i).and_then(|l| l.strip_prefix(MOVE)) {
                move_to = Some(relative(dest)?);
                i += 1;
            }
            let (hunks, next) = parse_hunks(body, i);
            i = next;
            if hunks.is_empty() {
                return Err(PatchError::EmptyUpdate(path));
            }
            ops.push(FileOp::Update {
                path,
                move_to,
                hunks,
            });
        } else if line.trim().is_empty() {
            i += 1;
        } else {
            return Err(PatchError::UnexpectedLine {
                line: line_no,
                text: line.to_string(),
            });
        }
    }
    if ops.is_empty() {
        return Err(PatchError::Empty);
    }
    Ok(ops)
}

fn relative(path: &str) -> Result<String, PatchError> {
    let path = path.trim();
    if Path::new(path).is_absolute() {
        return Err(PatchError::AbsolutePath(path.to_string()));
    }
    Ok(path.to_string())
}

/// Hunks from `start` up to the next file header. Returns the index after.
fn parse_hunks(body: &[&str], start: usize) -> (Vec<Hunk>, usize) {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;
    let mut i = start;
    while i < body.len() {
        let line = body[i];
        if line.starts_with(ADD) || line.starts_with(DELETE) || line.starts_with(UPDATE) {
            break;
        }
        if let Some(anchor) = line.strip_prefix("@@") {
            hunks.extend(current.take().filter(has_changes));
            let anchor = anchor.trim();
            current = Some(Hunk {
                anchor: (!anchor.is_empty()).then(|| anchor.to_string()),
                ..Hunk::default()
            });
        } else if line.trim() == END_OF_FILE {
            if let Some(h) = current.as_mut() {
                h.at_eof = true;
            }
        } else {
            let hunk = current.get_or_insert_with(Hunk::default);
            if let Some(added) = line.strip_prefix('+') {
                hunk.new_lines.push(added.to_string());
            } else if let Some(removed) = line.strip_prefix('-') {
                hunk.old_lines.push(removed.to_string());
            } else {
                // Unprefixed lines (usually blank) count as context.
                let context = line.strip_prefix(' ').unwrap_or(line);
                hunk.old_lines.push(context.to_string());
                hunk.new_lines.push(context.to_string());
            }
        }
        i += 1;
    }
    hunks.extend(current.filter(has_changes));
    (hunks, i)
}

fn has_changes(h: &Hunk) -> bool {
    h.old_lines != h.new_lines
}

/// Apply `hunks` to `content`, returning the new contents.
pub fn apply_hunks(content: &str, hunks: &[Hunk]) -> Result<String, String> {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut cursor = 0;
    for (n, hunk) in hunks.iter().enumerate() {
        let mut search_from = cursor;
        if let Some(anchor) = &hunk.anchor {
            match find_line(&lines, anchor, cursor) {
                // The anchor line may also open the hunk's context.
                Some(idx) => {
                    search_from = idx;
                    cursor = idx + 1;
                }
                None if hunk.old_lines.first().map(|l| l.trim()) == Some(anchor.trim()) => {}
                None => return Err(format!("hunk {}: context '{anchor}' not found", n + 1)),
            }
        }
        if hunk.old_lines.is_empty() {
            let at = if hunk.anchor.is_some() { cursor } else { lines.len() };
            lines.splice(at..at, hunk.new_lines.iter().cloned());
            cursor = at + hunk.new_lines.len();
            continue;
        }
        let found = find_block(&lines, &hunk.old_lines, cursor, hunk.at_eof)
            .or_else(|| find_block(&lines, &hunk.old_lines, search_from, hunk.at_eof));
        let Some(start) = found else {
            return Err(format!(
                "hunk {}: expected lines not found:\n{}",
                n + 1,
                hunk.old_lines.join("\n")
            ));
        };
        let end = start + hunk.old_lines.len();
        lines.splice(start..end, hunk.new_lines.iter().cloned());
        cursor = start + hunk.new_lines.len();
    }
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

fn find_line(lines: &[String], needle: &str, from: usize) -> Option<usize> {
    let needle = needle.trim();
    (from..lines.len()).find(|&i| lines[i].trim() == needle)
}

/// First match at or after `from`: exact, then ignoring trailing
/// whitespace, then ignoring surrounding whitespace.
fn find_block(lines: &[String], block: &[String], from: usize, at_eof: bool) -> Option<usize> {
    if block.len() > lines.len() {
        return None;
    }
    let last = lines.len() - block.len();
    let starts: Vec<usize> = if at_eof {
        vec![last]
    } else {
        (from.min(last + 1)..=last).collect()
    };
    let strategies: [fn(&str, &str) -> bool; 3] = [
        |a, b| a == b,
        |a, b| a.trim_end() == b.trim_end(),
        |a, b| a.trim() == b.trim(),
    ];
    strategies.iter().find_map(|eq| {
        starts.iter().copied().find(|&s| {
            block
                .iter()
                .enumerate()
                .all(|(k, want)| eq(&lines[s + k], want))
        })
    })
}

/// A file change ready to write.
enum Planned {
    Write { path: PathBuf, content: String },
    Remove { path: PathBuf },
}

/// Check every operation against the workspace, then write. Returns one
/// summary line per file (`A`, `M` or `D` and the path).
pub async fn apply_patch(cwd: &Path, patch: &str) -> Result<Vec<String>, PatchError> {
    let ops = parse_patch(patch)?;
    let mut planned = Vec::new();
    let mut summary = Vec::new();
    for op in ops {
        match op {
            FileOp::Add { path, content } => {
                planned.push(Planned::Write {
                    path: resolve_path(cwd, &path),
                    content,
                });
                summary.push(format!("A {path}"));
            }
            FileOp::Delete { path } => {
                let full = resolve_path(cwd, &path);
                if !fs::metadata(&full).await.is_ok_and(|m| m.is_file()) {
                    return Err(PatchError::Apply {
                        path,
                        reason: "file to delete does not exist".into(),
                    });
                }
                planned.push(Planned::Remove { path: full });
                summary.push(format!("D {path}"));
            }
            FileOp::Update {
                path,
                move_to,
                hunks,
            } => {
                let full = resolve_path(cwd, &path);
                let original = fs::read_to_string(&full)
                    .await
                    .map_err(|e| PatchError::Apply {
                        path: path.clone(),
                        reason: format!("cannot read file: {e}"),
                    })?;
                let content = apply_hunks(&original, &hunks).map_err(|reason| PatchError::Apply {
                    path: path.clone(),
                    reason,
                })?;
                match move_to {
                    Some(dest) => {
                        planned.push(Planned::Write {
                            path: resolve_path(cwd, &dest),
                            content,
                        });
                        planned.push(Planned::Remove { path: full });
                        summary.push(format!("M {dest}"));
                    }
                    None => {
                        planned.push(Planned::Write {
                            path: full,
                            content,
                        });
                        summary.push(format!("M {path}"));
                    }
                }
            }
        }
    }

    for change in planned {
        let result = match &change {
            Planned::Write { path, content } => write_with_parents(path, content).await,
            Planned::Remove { path } => fs::remove_file(path).await,
        };
        if let Err(e) = result {
            let path = match change {
                Planned::Write { path, .. } | Planned::Remove { path } => path,
            };
            return Err(PatchError::Apply {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    }
    Ok(summary)
}

async fn write_with_parents(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, content).await
}

// ── Tool ────────────────────────────────────────────────────────────

/// Typed arguments for `apply_patch`.
#[derive(Deserialize, JsonSchema)]
pub struct ApplyPatchArgs {
    /// The full patch, from '*** Begin Patch' to '*** End Patch'.
    pub patch: String,
}

pub struct ApplyPatch;

impl Tool for ApplyPatch {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "apply_patch",
            "Create, update or delete files with a patch.\n\n\
             *** Begin Patch\n\
             *** Add File: <path>\n\
             +line to add\n\
             *** Update File: <path>\n\
             @@ line near the change\n \
             context line\n\
             -old line\n\
             +new line\n\
             *** Delete File: <path>\n\
             *** End Patch\n\n\
             Prefix added lines with '+', removed lines with '-' and context \
             lines with a space. Give about 3 lines of context around each \
             change. Paths must be relative.",
            json_schema_for::<ApplyPatchArgs>(),
        )
    }

    fn is_mutation(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ApplyPatchArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(outcome) => return outcome,
            };
            if args.patch.trim().is_empty() {
                return ToolOutcome::invalid(
                    "Missing required parameter 'patch'. Usage: apply_patch(patch: str)",
                );
            }
            match apply_patch(ctx.current_working_directory(), &args.patch).await {
                Ok(files) => ToolOutcome::ok(format!(
                    "Success. Updated the following files:\n{}",
                    files.join("\n")
                )),
                Err(e @ PatchError::Apply { .. }) => {
                    ToolOutcome::failure(format!("Patch not applied: {e}"))
                }
                Err(e) => ToolOutcome::invalid(format!("Invalid patch: {e}")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::context::LocalContext;

    fn envelope(body: &str) -> String {
        format!("{BEGIN}\n{body}\n{END}")
    }

    #[test]
    fn parses_every_operation() {
        let patch = envelope(
            "*** Add File: a.txt\n+one\n+two\n\
             *** Update File: b.txt\n*** Move to: c.txt\n@@ fn main\n keep\n-old\n+new\n\
             *** Delete File: d.txt",
        );
        let ops = parse_patch(&patch).unwrap();
        assert_eq!(
            ops[0],
            FileOp::Add {
                path: "a.txt".into(),
                content: "one\ntwo\n".into()
            }
        );
        let FileOp::Update {
            path,
            move_to,
            hunks,
        } = &ops[1]
        else {
            panic!("expected update, got {:?}", ops[1]);
        };
        assert_eq!(path, "b.txt");
        assert_eq!(move_to.as_deref(), Some("c.txt"));
        assert_eq!(hunks[0].anchor.as_deref(), Some("fn main"));
        assert_eq!(hunks[0].old_lines, ["keep", "old"]);
        assert_eq!(hunks[0].new_lines, ["keep", "new"]);
        assert_eq!(ops[2], FileOp::Delete { path: "d.txt".into() });
    }

    #[test]
    fn rejects_malformed_envelopes() {
        assert_eq!(parse_patch("*** Add File: a\n+x"), Err(PatchError::MissingBegin));
        assert_eq!(
            parse_patch(&format!("{BEGIN}\n*** Add File: a\n+x")),
            Err(PatchError::MissingEnd)
        );
        assert_eq!(parse_patch(&envelope("")), Err(PatchError::Empty));
        assert!(matches!(
            parse_patch(&envelope("*** Add File: /etc/passwd\n+x")),
            Err(PatchError::AbsolutePath(_))
        ));
        assert!(matches!(
            parse_patch(&envelope("*** Add File: a\nno plus")),
            Err(PatchError::BadAddLine { line: 3, .. })
        ));
        assert!(matches!(
            parse_patch(&envelope("random text")),
            Err(PatchError::UnexpectedLine { line: 2, .. })
        ));
    }

    #[test]
    fn hunks_apply_in_order_with_anchor() {
        let src = "fn a() {\n    1\n}\nfn b() {\n    1\n}\n";
        let hunk = Hunk {
            anchor: Some("fn b() {".into()),
            old_lines: vec!["    1".into()],
            new_lines: vec!["    2".into()],
            at_eof: false,
        };
        let out = apply_hunks(src, &[hunk]).unwrap();
        assert_eq!(out, "fn a() {\n    1\n}\nfn b() {\n    2\n}\n");
    }

    #[test]
    fn hunk_matching_tolerates_whitespace() {
        let src = "alpha  \n  beta\n";
        let hunk = Hunk {
            old_lines: vec!["alpha".into(), "beta".into()],
            new_lines: vec!["gamma".into()],
            ..Hunk::default()
        };
        assert_eq!(apply_hunks(src, &[hunk]).unwrap(), "gamma\n");
    }

    #[test]
    fn missing_context_is_error() {
        let hunk = Hunk {
            old_lines: vec!["nope".into()],
            new_lines: vec!["yes".into()],
            ..Hunk::default()
        };
        let err = apply_hunks("one\ntwo\n", &[hunk]).unwrap_err();
        assert!(err.contains("expected lines not found"));
    }

    #[tokio::test]
    async fn tool_applies_add_update_delete() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "t");
        std::fs::write(dir.path().join("main.rs"), "fn main() {\n    old();\n}\n").unwrap();
        std::fs::write(dir.path().join("gone.txt"), "bye\n").unwrap();

        let patch = envelope(
            "*** Add File: src/new.rs\n+pub fn new() {}\n\
             *** Update File: main.rs\n@@ fn main() {\n-    old();\n+    new();\n\
             *** Delete File: gone.txt",
        );
        let args = serde_json::json!({ "patch": patch }).to_string();
        let out = ApplyPatch.execute(&ctx, &args).await;
        assert!(out.success, "{:?}", out.error);
        assert_eq!(
            out.output,
            "Success. Updated the following files:\nA src/new.rs\nM main.rs\nD gone.txt"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/new.rs")).unwrap(),
            "pub fn new() {}\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.rs")).unwrap(),
            "fn main() {\n    new();\n}\n"
        );
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn failed_hunk_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "t");
        std::fs::write(dir.path().join("f.txt"), "one\n").unwrap();
        let patch = envelope(
            "*** Add File: created.txt\n+x\n\
             *** Update File: f.txt\n@@\n-missing\n+two",
        );
        let args = serde_json::json!({ "patch": patch }).to_string();
        let out = ApplyPatch.execute(&ctx, &args).await;
        assert!(!out.success);
        assert!(!out.invalid_params);
        assert!(out.error.unwrap().starts_with("Patch not applied: f.txt"));
        assert!(!dir.path().join("created.txt").exists());
    }

    #[tokio::test]
    async fn update_can_move_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "t");
        std::fs::write(dir.path().join("a.txt"), "x\ny\n").unwrap();
        let patch = envelope("*** Update File: a.txt\n*** Move to: b/a.txt\n@@\n x\n-y\n+z");
        let args = serde_json::json!({ "patch": patch }).to_string();
        let out = ApplyPatch.execute(&ctx, &args).await;
        assert!(out.success, "{:?}", out.error);
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b/a.txt")).unwrap(),
            "x\nz\n"
        );
    }

    #[tokio::test]
    async fn malformed_patch_is_invalid_params() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "t");
        let out = ApplyPatch
            .execute(&ctx, r#"{"patch": "diff --git a/x b/x"}"#)
            .await;
        assert!(out.invalid_params);
    }
}
