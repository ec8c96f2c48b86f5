//! Planning oracle abstraction.
//!
//! The [`Oracle`] trait decouples planning from the model backend. The engine
//! only ever sends a prompt and reads back free text; everything it needs is
//! pulled out of that text and validated before use. Tests use scripted
//! oracles that return canned responses without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::config::EngineConfig;
use crate::io::plan_store::validate_proposal_value;
use crate::io::process::run_command_with_timeout;
use crate::plan::PlanProposal;

/// Abstraction over text-completion backends.
pub trait Oracle {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Oracle that runs a configured command, writing the prompt to stdin and
/// reading the answer from stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(
        command: Vec<String>,
        workdir: PathBuf,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("oracle command must be a non-empty array"));
        }
        Ok(Self {
            command,
            workdir,
            timeout,
            output_limit_bytes,
        })
    }

    /// Build from config, or `None` when no oracle command is configured.
    pub fn from_config(config: &EngineConfig, workdir: PathBuf) -> Result<Option<Self>> {
        if !config.oracle_configured() {
            return Ok(None);
        }
        Self::new(
            config.oracle.command.clone(),
            workdir,
            Duration::from_secs(config.oracle.timeout_secs),
            config.output_limit_bytes,
        )
        .map(Some)
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(program = %self.command[0], timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        info!(prompt_bytes = prompt.len(), "querying oracle");
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]).current_dir(&self.workdir);

        let output = run_command_with_timeout(
            cmd,
            "oracle command",
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run oracle command")?;

        if !output.success() {
            warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "oracle failed");
            return Err(anyhow!(output.failure_summary("oracle command")));
        }
        if output.stdout_truncated > 0 {
            warn!(
                stdout_truncated = output.stdout_truncated,
                "oracle response truncated"
            );
        }
        debug!(response_bytes = output.stdout.len(), "oracle answered");
        Ok(output.stdout_text())
    }
}

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

/// Pull the outermost `{...}` object out of free text.
///
/// `<think>` sections are dropped first. Everything before the first `{` and
/// after the last `}` is ignored, which also strips markdown code fences.
pub fn extract_json_object(text: &str) -> Result<Value> {
    let cleaned = THINK_BLOCK.replace_all(text, "");
    let start = cleaned
        .find('{')
        .ok_or_else(|| anyhow!("oracle response contains no JSON object"))?;
    let end = cleaned
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| anyhow!("oracle response contains no JSON object"))?;
    serde_json::from_str(&cleaned[start..=end]).context("parse oracle JSON")
}

/// Extract, schema-check and deserialize a plan proposal from oracle text.
pub fn parse_proposal(text: &str) -> Result<PlanProposal> {
    let value = extract_json_object(text)?;
    validate_proposal_value(&value)?;
    serde_json::from_value(value).context("deserialize plan proposal")
}
