//! Built-in action handlers, one per action type.
//!
//! Each handler owns exactly one kind of side effect. Handlers that shell out
//! go through [`run_checked`], so a non-zero exit or timeout surfaces as an
//! `Err` (a dispatch fault) rather than a quiet failure. Successful handlers
//! report the derived facts the executor may fold into the shared context.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::context::{ContextKey, Fact, SharedContext};
use crate::core::escape::unescape;
use crate::core::params::Params;
use crate::io::config::EngineConfig;
use crate::io::oracle::Oracle;
use crate::io::process::{run_checked, shell_command};
use crate::io::prompt::PromptEngine;

/// Host settings shared by handlers and the validator.
///
/// Both sides resolve relative paths through [`HostEnv::resolve_path`] so a
/// path a handler creates is the path the validator checks.
#[derive(Debug, Clone)]
pub struct HostEnv {
    pub workdir: PathBuf,
    pub shell: Vec<String>,
    pub python: String,
    pub output_limit_bytes: usize,
    pub settle_delay: Duration,
}

impl HostEnv {
    /// `fallback_workdir` is used when the config leaves `workdir` unset.
    pub fn from_config(config: &EngineConfig, fallback_workdir: &Path) -> Self {
        let workdir = match &config.workdir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => fallback_workdir.join(dir),
            None => fallback_workdir.to_path_buf(),
        };
        Self {
            workdir,
            shell: config.shell.clone(),
            python: config.python.clone(),
            output_limit_bytes: config.output_limit_bytes,
            settle_delay: config.settle_delay(),
        }
    }

    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

/// Everything a handler sees for one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct HandlerRequest<'a> {
    pub action_id: &'a str,
    pub description: &'a str,
    /// Params after context templating.
    pub params: &'a Params,
    pub context: &'a SharedContext,
    /// Remaining budget for this action.
    pub timeout: Duration,
}

/// Raw result of a clean handler return, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutput {
    pub output: Option<String>,
    pub error: Option<String>,
    pub facts: Vec<Fact>,
}

impl DispatchOutput {
    pub fn with_output(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn fact(mut self, key: ContextKey, value: impl Into<Value>) -> Self {
        self.facts.push(Fact::new(key, value));
        self
    }
}

/// One category of side effect.
pub trait ActionHandler {
    fn handle(&self, request: &HandlerRequest<'_>) -> Result<DispatchOutput>;
}

pub struct CreateDirectoryHandler {
    env: HostEnv,
}

impl CreateDirectoryHandler {
    pub fn new(env: HostEnv) -> Self {
        Self { env }
    }
}

impl ActionHandler for CreateDirectoryHandler {
    fn handle(&self, request: &HandlerRequest<'_>) -> Result<DispatchOutput> {
        let path = request.params.require_str("path")?;
        let resolved = self.env.resolve_path(path);
        fs::create_dir_all(&resolved)
            .with_context(|| format!("create directory {}", resolved.display()))?;
        debug!(path = %resolved.display(), "created directory");
        Ok(
            DispatchOutput::with_output(format!("created directory {}", resolved.display()))
                .fact(ContextKey::LastCreatedDir, path),
        )
    }
}

pub struct CreateFileHandler {
    env: HostEnv,
}

impl CreateFileHandler {
    pub fn new(env: HostEnv) -> Self {
        Self { env }
    }

    /// `path`, or `name` placed inside the last created directory.
    fn target(request: &HandlerRequest<'_>) -> Result<String> {
        if request.params.raw().contains_key("path") {
            return Ok(request.params.require_str("path")?.to_string());
        }
        let name = request
            .params
            .require_str("name")
            .context("create_file needs 'path' or 'name'")?;
        let dir = request
            .context
            .get_str(ContextKey::LastCreatedDir)
            .ok_or_else(|| anyhow!("param 'name' needs {} in context", ContextKey::LastCreatedDir))?;
        Ok(Path::new(dir).join(name).to_string_lossy().into_owned())
    }
}

impl ActionHandler for CreateFileHandler {
    fn handle(&self, request: &HandlerRequest<'_>) -> Result<DispatchOutput> {
        let target = Self::target(request)?;
        let content = match request.params.raw().get("content") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(raw)) => unescape(raw),
            Some(_) => return Err(anyhow!("param 'content' must be a string")),
        };

        let resolved = self.env.resolve_path(&target);
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&resolved, &content)
            .with_context(|| format!("write file {}", resolved.display()))?;
        if !self.env.settle_delay.is_zero() {
            thread::sleep(self.env.settle_delay);
        }
        debug!(path = %resolved.display(), bytes = content.len(), "wrote file");

        Ok(DispatchOutput::with_output(format!(
            "wrote {} bytes to {}",
            content.len(),
            resolved.display()
        ))
        .fact(ContextKey::LastCreatedFile, target))
    }
}

pub struct CreateVirtualEnvironmentHandler {
    env: HostEnv,
}

impl CreateVirtualEnvironmentHandler {
    pub fn new(env: HostEnv) -> Self {
        Self { env }
    }
}

impl ActionHandler for CreateVirtualEnvironmentHandler {
    fn handle(&self, request: &HandlerRequest<'_>) -> Result<DispatchOutput> {
        let path = match request.params.str("path") {
            Some(path) => path.to_string(),
            None => {
                let dir = request
                    .context
                    .get_str(ContextKey::LastCreatedDir)
                    .ok_or_else(|| {
                        anyhow!(
                            "missing param 'path' and no {} in context",
                            ContextKey::LastCreatedDir
                        )
                    })?;
                Path::new(dir).join("venv").to_string_lossy().into_owned()
            }
        };
        let resolved = self.env.resolve_path(&path);

        let mut cmd = Command::new(&self.env.python);
        cmd.args(["-m", "venv"])
            .arg(&resolved)
            .current_dir(&self.env.workdir);
        info!(path = %resolved.display(), "creating virtual environment");
        run_checked(
            cmd,
            "virtual environment creation",
            request.timeout,
            self.env.output_limit_bytes,
        )?;

        Ok(DispatchOutput::with_output(format!(
            "created virtual environment {}",
            resolved.display()
        ))
        .fact(ContextKey::LastVenvPath, path))
    }
}

pub struct InstallDependenciesHandler {
    env: HostEnv,
}

impl InstallDependenciesHandler {
    pub fn new(env: HostEnv) -> Self {
        Self { env }
    }

    fn pip_command(&self, venv: Option<&str>) -> Command {
        match venv {
            Some(venv) => {
                let bin = if cfg!(windows) { "Scripts" } else { "bin" };
                let mut cmd = Command::new(self.env.resolve_path(venv).join(bin).join("pip"));
                cmd.arg("install");
                cmd
            }
            None => {
                let mut cmd = Command::new(&self.env.python);
                cmd.args(["-m", "pip", "install"]);
                cmd
            }
        }
    }
}

impl ActionHandler for InstallDependenciesHandler {
    fn handle(&self, request: &HandlerRequest<'_>) -> Result<DispatchOutput> {
        let packages = request.params.string_list("packages")?;
        if packages.is_empty() {
            return Err(anyhow!("param 'packages' lists no packages"));
        }
        let venv = request
            .params
            .str("venv")
            .or_else(|| request.context.get_str(ContextKey::LastVenvPath));

        let mut cmd = self.pip_command(venv);
        cmd.args(&packages).current_dir(&self.env.workdir);
        info!(packages = %packages.join(" "), venv = ?venv, "installing dependencies");
        let output = run_checked(
            cmd,
            "dependency installation",
            request.timeout,
            self.env.output_limit_bytes,
        )?;

        Ok(DispatchOutput {
            output: Some(output.stdout_text()),
            error: None,
            facts: Vec::new(),
        }
        .fact(ContextKey::LastInstalledPackages, packages))
    }
}

pub struct RunCommandHandler {
    env: HostEnv,
}

impl RunCommandHandler {
    pub fn new(env: HostEnv) -> Self {
        Self { env }
    }
}

impl ActionHandler for RunCommandHandler {
    fn handle(&self, request: &HandlerRequest<'_>) -> Result<DispatchOutput> {
        let command = request.params.require_str("command")?;
        let cwd = match request.params.str("cwd") {
            Some(cwd) => self.env.resolve_path(cwd),
            None => self.env.workdir.clone(),
        };
        let cmd = shell_command(&self.env.shell, command, Some(&cwd))?;
        info!(command, cwd = %cwd.display(), "running command");
        let output = run_checked(
            cmd,
            &format!("command `{command}`"),
            request.timeout,
            self.env.output_limit_bytes,
        )?;

        let mut text = output.stdout_text();
        text.push_str(&output.stdout_truncated_notice("command"));
        Ok(DispatchOutput::with_output(text).fact(ContextKey::LastCommand, command))
    }
}

/// Free-form step. Without an oracle the description is echoed back; with
/// one, the oracle's guidance becomes the output. Never yields actions.
pub struct CustomActionHandler {
    oracle: Option<Box<dyn Oracle>>,
    prompts: PromptEngine,
}

impl CustomActionHandler {
    pub fn new(oracle: Option<Box<dyn Oracle>>) -> Self {
        Self {
            oracle,
            prompts: PromptEngine::new(),
        }
    }
}

impl ActionHandler for CustomActionHandler {
    fn handle(&self, request: &HandlerRequest<'_>) -> Result<DispatchOutput> {
        let Some(oracle) = &self.oracle else {
            return Ok(DispatchOutput::with_output(format!(
                "custom action noted: {}",
                request.description.trim()
            )));
        };
        let prompt = self.prompts.render_custom_action(
            request.description,
            request.params.raw(),
            request.context,
        )?;
        let guidance = oracle
            .complete(&prompt)
            .with_context(|| format!("custom action guidance for {}", request.action_id))?;
        Ok(DispatchOutput::with_output(guidance.trim()))
    }
}
