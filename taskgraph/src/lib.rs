//! Task-graph execution engine.
//!
//! An objective is turned into a plan of typed actions (by a planning oracle or
//! a plan file). Actions run one at a time in dependency order; each result is
//! validated against declared criteria and successful actions feed derived
//! facts into a shared context. Passes that do not complete are classified and
//! either re-planned or stopped by a bounded escalation state machine.
//!
//! - **[`core`]**: Pure, deterministic logic (selection, invariants, context,
//!   classification, escalation). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, processes, config,
//!   oracle). Isolated behind traits so tests can script them.
//!
//! Orchestration modules ([`executor`], [`planner`], [`workflow`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod core;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
pub mod planner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
