//! Two-step self-verification before a run may finish.
//!
//! When the model answers without calling a tool it is not trusted on its
//! first word. It is asked to verify its work, then asked to confirm that
//! verification. Only a confirmation that does not report the task as
//! incomplete ends the run. [`advance`] is the whole state machine.

use std::fmt;

/// Phrase a confirmation must contain to send the agent back to work.
pub const INCOMPLETE_PHRASE: &str = "task incomplete";

/// Where the run is in the verification handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationPhase {
    /// No verification requested since the last tool-using turn.
    #[default]
    None,
    /// A verification request is outstanding.
    AwaitingFirst,
    /// A confirmation request is outstanding.
    AwaitingConfirmation,
}

impl fmt::Display for VerificationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::AwaitingFirst => "awaiting_first",
            Self::AwaitingConfirmation => "awaiting_confirmation",
        };
        f.write_str(s)
    }
}

/// What the loop should do with a tool-free response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationStep {
    /// Append the response and a verification request.
    RequestVerification,
    /// Store the response as the verification result, append it and a
    /// confirmation request.
    RequestConfirmation,
    /// Append the response and ask the agent to keep working.
    Continue,
    /// The run is finished.
    Done,
}

/// Case-insensitive check for [`INCOMPLETE_PHRASE`].
pub fn is_incomplete(text: &str) -> bool {
    text.to_lowercase().contains(INCOMPLETE_PHRASE)
}

/// Transition for a response that carried no tool calls.
pub fn advance(phase: VerificationPhase, text: &str) -> (VerificationPhase, VerificationStep) {
    match phase {
        VerificationPhase::None => (
            VerificationPhase::AwaitingFirst,
            VerificationStep::RequestVerification,
        ),
        VerificationPhase::AwaitingFirst => (
            VerificationPhase::AwaitingConfirmation,
            VerificationStep::RequestConfirmation,
        ),
        VerificationPhase::AwaitingConfirmation if is_incomplete(text) => {
            (VerificationPhase::None, VerificationStep::Continue)
        }
        VerificationPhase::AwaitingConfirmation => {
            (VerificationPhase::AwaitingConfirmation, VerificationStep::Done)
        }
    }
}
