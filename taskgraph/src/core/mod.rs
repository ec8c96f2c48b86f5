//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! plans and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod context;
pub mod escalation;
pub mod escape;
pub mod invariants;
pub mod params;
pub mod resolver;
pub mod types;
