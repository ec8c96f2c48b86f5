//! Engine configuration stored under `.taskgraph/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// Edited by humans; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory relative action paths resolve against. Defaults to the
    /// process working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,

    /// Wall-clock budget per dispatched action (handler + validation).
    pub action_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Pause after file writes before validation looks at them.
    pub settle_delay_ms: u64,

    /// Retry ceiling for the escalation cycle.
    pub max_retries: u32,

    /// Whether `command_output` validations may spawn processes.
    pub allow_command_validation: bool,

    /// Shell prefix for `run_command` and `command_output` (e.g. `["sh","-c"]`).
    pub shell: Vec<String>,

    /// Interpreter used for virtual environments and `-m pip`.
    pub python: String,

    /// Shell script run in `workdir` after every action of a pass succeeded,
    /// e.g. `{{ last_venv_path }}/bin/python app.py`. Rendered against the
    /// shared context. A failure is classified like any other pass error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<String>,

    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Command that reads a prompt on stdin and answers on stdout.
    /// Empty means no oracle is configured.
    pub command: Vec<String>,

    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 5 * 60,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workdir: None,
            action_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            settle_delay_ms: 100,
            max_retries: 3,
            allow_command_validation: true,
            shell: vec!["sh".to_string(), "-c".to_string()],
            python: "python3".to_string(),
            verify: None,
            oracle: OracleConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.action_timeout_secs == 0 {
            return Err(anyhow!("action_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.shell.is_empty() || self.shell[0].trim().is_empty() {
            return Err(anyhow!("shell must be a non-empty array"));
        }
        if self.python.trim().is_empty() {
            return Err(anyhow!("python must not be empty"));
        }
        if self.verify.as_deref().is_some_and(|script| script.trim().is_empty()) {
            return Err(anyhow!("verify must not be empty when set"));
        }
        if !self.oracle.command.is_empty() && self.oracle.command[0].trim().is_empty() {
            return Err(anyhow!("oracle.command must start with a program"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn oracle_configured(&self) -> bool {
        !self.oracle.command.is_empty()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` to a sibling temp file, then rename over `path`.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
