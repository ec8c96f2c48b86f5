//! Initialization helpers for `.taskgraph/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{EngineConfig, write_config};
use super::plan_store::PROPOSAL_SCHEMA;

/// Canonical paths within `.taskgraph/` for a project root.
#[derive(Debug, Clone)]
pub struct TaskgraphPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub schema_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub runs_dir: PathBuf,
}

impl TaskgraphPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".taskgraph");
        Self {
            root: root.clone(),
            state_dir: state_dir.clone(),
            config_path: state_dir.join("config.toml"),
            schema_path: state_dir.join("plan_proposal.schema.json"),
            gitignore_path: state_dir.join(".gitignore"),
            runs_dir: state_dir.join("runs"),
        }
    }
}

/// Options for `init_taskgraph`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing files.
    pub force: bool,
}

/// Create `.taskgraph/` with a default config and the proposal schema.
///
/// Fails if `.taskgraph/` already exists unless `options.force` is set.
pub fn init_taskgraph(root: &Path, options: &InitOptions) -> Result<TaskgraphPaths> {
    let paths = TaskgraphPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "taskgraph init: .taskgraph exists but is not a directory"
        ));
    }
    if paths.state_dir.exists() && !options.force {
        return Err(anyhow!(
            "taskgraph init: .taskgraph already exists (use --force to overwrite)"
        ));
    }

    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("create directory {}", paths.state_dir.display()))?;
    write_config(&paths.config_path, &EngineConfig::default())?;
    write_file(&paths.schema_path, PROPOSAL_SCHEMA)?;
    write_file(&paths.gitignore_path, GITIGNORE)?;

    Ok(paths)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const GITIGNORE: &str = "runs/\n";
