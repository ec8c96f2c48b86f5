//! Post-execution check that the built project actually runs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::context::SharedContext;
use crate::core::params::render_template;
use crate::io::config::EngineConfig;
use crate::io::handlers::HostEnv;
use crate::io::process::{run_checked, shell_command};

const LABEL: &str = "verify command";

/// Runs the configured `verify` script once a pass has settled every action
/// with success.
#[derive(Debug, Clone)]
pub struct Verifier {
    script: String,
    shell: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Verifier {
    pub fn new(script: impl Into<String>, env: &HostEnv, timeout: Duration) -> Self {
        Self {
            script: script.into(),
            shell: env.shell.clone(),
            workdir: env.workdir.clone(),
            timeout,
            output_limit_bytes: env.output_limit_bytes,
        }
    }

    /// `None` when the config sets no `verify` script.
    pub fn from_config(config: &EngineConfig, env: &HostEnv) -> Option<Self> {
        config
            .verify
            .as_deref()
            .map(|script| Self::new(script, env, config.action_timeout()))
    }

    /// Render the script against `context` and run it.
    ///
    /// Returns the captured stdout. A non-zero exit, a timeout or an unknown
    /// template key is an error whose text carries the stderr tail.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn verify(&self, context: &SharedContext) -> Result<String> {
        let script = render_template(&self.script, context).context("render verify command")?;
        let cmd = shell_command(&self.shell, &script, Some(&self.workdir))?;
        let output = run_checked(cmd, LABEL, self.timeout, self.output_limit_bytes)?;
        info!(script = %script, "verification passed");
        Ok(output.stdout_text())
    }
}
