//! Operator confirmation seam
//!
//! Destructive steps (terminating a foreign process holding a declared port)
//! require an explicit affirmative answer. The controller asks through this
//! trait and must not proceed past a negative or unavailable answer. The
//! terminal implementation lives in the CLI layer; non-interactive runs
//! satisfy the same contract with a pre-supplied flag.

/// A synchronous yes/no decision from the operator.
pub trait OperatorConfirmation: Send + Sync {
    /// Returns `true` only on an explicit affirmative answer.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Pre-supplied affirmative answer (`--yes`).
pub struct AssumeYes;

impl OperatorConfirmation for AssumeYes {
    fn confirm(&self, prompt: &str) -> bool {
        tracing::info!(prompt, "confirmation pre-supplied with --yes");
        true
    }
}

/// Denies everything; used when no terminal is attached and `--yes` was not
/// given, so destructive steps abort instead of hanging on input.
pub struct NonInteractiveDeny;

impl OperatorConfirmation for NonInteractiveDeny {
    fn confirm(&self, prompt: &str) -> bool {
        tracing::warn!(
            prompt,
            "confirmation required but no terminal attached; pass --yes to proceed"
        );
        false
    }
}
