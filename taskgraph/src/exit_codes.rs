//! Stable exit codes for taskgraph CLI commands.

/// Command succeeded or the plan completed.
pub const OK: i32 = 0;
/// Invalid input (config, plan file, proposal) or an internal error.
pub const INVALID: i32 = 1;
/// Unsettled actions remain but none can become ready.
pub const BLOCKED: i32 = 2;
/// Validation failure, dispatch fault, failed verification, or retries exhausted.
pub const FAILED: i32 = 3;
