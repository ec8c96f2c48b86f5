//! Shared deterministic types for engine core logic.
//!
//! These types define stable contracts between the executor, the escalation
//! state machine and the workflow loop.

use std::fmt;

use serde::Serialize;

/// Terminal outcome of one execution pass over a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PassOutcome {
    /// Every action settled with success.
    Completed,
    /// Nothing is left to run and at least one action failed validation.
    Failed { failed: Vec<String> },
    /// Unsettled actions remain but none can ever become ready.
    Blocked { pending: Vec<String>, reason: String },
    /// A dispatch fault aborted the pass. The faulting action stays unsettled.
    Error { action_id: String, message: String },
    /// Every action succeeded but the configured verify command did not.
    Unverified { message: String },
}

impl PassOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PassOutcome::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PassOutcome::Completed => "completed",
            PassOutcome::Failed { .. } => "failed",
            PassOutcome::Blocked { .. } => "blocked",
            PassOutcome::Error { .. } => "error",
            PassOutcome::Unverified { .. } => "unverified",
        }
    }

    /// Text handed to the error classifier when the pass did not complete.
    pub fn diagnostic(&self) -> String {
        match self {
            PassOutcome::Completed => String::new(),
            PassOutcome::Failed { failed } => {
                format!("validation failed for actions: {}", failed.join(", "))
            }
            PassOutcome::Blocked { pending, reason } => {
                format!("blocked on {}: {}", pending.join(", "), reason)
            }
            PassOutcome::Error { action_id, message } => {
                format!("error in action {action_id}: {message}")
            }
            PassOutcome::Unverified { message } => format!("verification failed: {message}"),
        }
    }
}

impl fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassOutcome::Completed => f.write_str("completed"),
            other => write!(f, "{}: {}", other.label(), other.diagnostic()),
        }
    }
}
