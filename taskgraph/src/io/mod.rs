//! Side-effecting adapters: processes, config, plan files, handlers, the oracle
//! and post-execution verification.

pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod init;
pub mod oracle;
pub mod plan_store;
pub mod process;
pub mod prompt;
pub mod validator;
pub mod verify;
