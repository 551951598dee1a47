//! Prompt text the turn loop injects.
//!
//! Only the protocol role of each text matters to the loop: the system
//! prompt opens the transcript, the verification and confirmation requests
//! drive the self-check handshake, and the guidance blocks are appended to
//! tool output the model must react to.

use crate::agent::verification::INCOMPLETE_PHRASE;
use std::path::Path;

/// Builder for multi-section system prompts.
///
/// Sections are joined with blank lines. Empty sections are skipped.
///
/// ```
/// use autopilot::agent::prompts::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You are an agent.")
///     .section("Environment", "- Shell: /bin/sh")
///     .section_if(false, "Hidden", || "never".into())
///     .build();
///
/// assert!(prompt.contains("## Environment"));
/// assert!(!prompt.contains("Hidden"));
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    /// Start with a preamble that gets no heading.
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a `## heading` section. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// Append a section only when `condition` holds.
    pub fn section_if(
        self,
        condition: bool,
        heading: &str,
        content_fn: impl FnOnce() -> String,
    ) -> Self {
        if condition {
            self.section(heading, content_fn())
        } else {
            self
        }
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

const PREAMBLE: &str = "\
You are an autonomous software engineering agent working in a terminal. \
You complete the task you are given from start to finish without asking \
questions: nobody will answer them. When something is ambiguous, make the \
most reasonable choice and keep going.";

const WORKING_RULES: &str = "\
- Explore before changing anything: list directories, read the relevant files.
- Prefer small, verifiable steps. Run the code or tests you touch.
- Edit existing files with apply_patch; use write_file for new files or full rewrites.
- Start servers with spawn_process, check them with wait_for_port, stop them with kill_process.
- Use non-interactive flags (-y, --yes, heredocs); commands cannot read stdin.
- When a tool call fails, read the error, fix the cause, and retry differently.
- Keep only files the task needs; remove scratch files you created.
- When the work is done and verified, reply without calling any tool.";

/// The system message that opens every transcript.
pub fn system_prompt(cwd: &Path) -> String {
    SystemPromptBuilder::new(PREAMBLE)
        .section("Working rules", WORKING_RULES)
        .section(
            "Environment",
            format!(
                "- Working directory: {}\n- Platform: {}\n- Shell: /bin/sh",
                cwd.display(),
                std::env::consts::OS
            ),
        )
        .build()
}

/// Third opening message: the workspace as it looked at start.
pub fn initial_state_message(listing: &str) -> String {
    format!("Current directory and files:\n```\n{listing}\n```")
}

/// Sent the first time the model answers without tools.
pub fn verification_request(instruction: &str) -> String {
    format!(
        "<system-reminder>\n\
         # Verify Before Finishing\n\n\
         You answered without calling a tool, which suggests you believe the task \
         is complete. Check that before stopping.\n\n\
         ## The task, verbatim:\n{instruction}\n\n\
         ## Checklist\n\
         1. Pull out every explicit constraint: exact paths, names, formats, counts, \
         commands that must work, expected outputs.\n\
         2. Treat sample output shown in the task as a format illustration, not as \
         values to reproduce.\n\
         3. For each constraint, run a command that proves it holds. Do not assume.\n\
         4. Exercise every component you wrote or changed; fix and re-run anything \
         that fails.\n\
         5. Remove build artifacts and scratch files you created. Never delete files \
         that existed before you started.\n\n\
         If everything checks out, summarize what you verified. If anything is \
         wrong or missing, fix it now with tools.\n\
         </system-reminder>"
    )
}

/// Sent after the verification answer, quoting it back.
pub fn confirmation_request(instruction: &str, previous_result: &str) -> String {
    format!(
        "<system-reminder>\n\
         # Confirm Your Verification\n\n\
         ## The task:\n{instruction}\n\n\
         ## Your verification result:\n```\n{previous_result}\n```\n\n\
         Decide whether that verification covered every requirement.\n\
         - If it did, confirm the task is complete and reply without tools.\n\
         - If checks were missing, run only those checks; do not redo the rest.\n\
         - If the task is not finished, your reply must contain the exact phrase \
         \"{INCOMPLETE_PHRASE}\".\n\
         </system-reminder>"
    )
}

/// Sent when the confirmation reported the task as incomplete.
pub const CONTINUE_REQUEST: &str = "\
The task is not finished. Use the tools to resolve the unmet requirements, \
missing checks or open issues you found, and keep working until it is done.";

/// Appended to the output of a call rejected for bad parameters.
pub fn invalid_params_guidance(tool_name: &str, error: &str) -> String {
    format!(
        "\n---\n[INVALID TOOL PARAMETERS] '{tool_name}' was called with missing or \
         invalid parameters.\n\n{error}\n\n\
         Send the call again with every required parameter set correctly."
    )
}

/// Appended to the output of a call that ran and failed.
pub fn failure_guidance(tool_name: &str) -> String {
    format!(
        "\n---\n[TOOL CALL FAILED] '{tool_name}' did not succeed.\n\n\
         Before retrying:\n\
         1. Read the error above and work out what it means.\n\
         2. Check the parameters you passed.\n\
         3. For path errors, confirm the path exists.\n\
         4. For command errors, confirm the syntax.\n\n\
         Then retry with a corrected call or take a different approach."
    )
}

/// User message appended after the tool results of a turn, once per
/// rejected call.
pub fn invalid_params_followup(tool_name: &str) -> String {
    format!(
        "The call to '{tool_name}' had invalid parameters. Read the error above \
         and send a corrected call with all required parameters."
    )
}
