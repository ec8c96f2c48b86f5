//! Task-graph execution engine CLI.
//!
//! Loads plans (or asks the configured oracle for one), executes them in
//! dependency order and reports outcomes with stable exit codes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use taskgraph::core::classifier::{ErrorClassifier, HeuristicClassifier};
use taskgraph::core::invariants::validate_invariants;
use taskgraph::core::types::PassOutcome;
use taskgraph::executor::PlanExecutor;
use taskgraph::exit_codes;
use taskgraph::io::config::{EngineConfig, load_config};
use taskgraph::io::dispatcher::{Dispatcher, HandlerRegistry};
use taskgraph::io::handlers::HostEnv;
use taskgraph::io::init::{InitOptions, TaskgraphPaths, init_taskgraph};
use taskgraph::io::oracle::{CommandOracle, Oracle};
use taskgraph::io::plan_store::{load_plan, write_plan};
use taskgraph::io::validator::{CommandPolicy, Validator};
use taskgraph::io::verify::Verifier;
use taskgraph::logging;
use taskgraph::plan::PlanStatus;
use taskgraph::planner::{OraclePlanner, PlanFilePlanner, Planner, RemediationReplanner, Replanner};
use taskgraph::workflow::{WorkflowStop, run_workflow};

#[derive(Parser)]
#[command(
    name = "taskgraph",
    version,
    about = "Dependency-ordered action plan executor"
)]
struct Cli {
    /// Project root; relative action paths resolve here unless the config sets `workdir`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Config file. Defaults to `<root>/.taskgraph/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.taskgraph/` with a default config and the proposal schema.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Load a plan or proposal and report structural problems.
    Check { plan: PathBuf },
    /// Run one execution pass over a plan and print the pass report.
    Execute {
        plan: PathBuf,
        /// Write the plan, with results and context, to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Plan, execute, monitor and retry until done or out of retries.
    Run {
        objective: String,
        /// Override `max_retries` from the config.
        #[arg(long)]
        max_retries: Option<u32>,
        /// Start from this plan file instead of asking the oracle.
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Seed context entry, `KEY=VALUE`. Repeatable.
        #[arg(long = "context", value_parser = parse_key_value)]
        context: Vec<(String, String)>,
    },
    /// Print the remediation recommendation for an error text.
    Classify {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let paths = TaskgraphPaths::new(&cli.root);
    let config_path = cli.config.unwrap_or_else(|| paths.config_path.clone());
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Check { plan } => cmd_check(&plan),
        Command::Execute { plan, out } => {
            let config = load_config(&config_path)?;
            cmd_execute(&config, &cli.root, &plan, out.as_deref())
        }
        Command::Run {
            objective,
            max_retries,
            plan,
            context,
        } => {
            let config = load_config(&config_path)?;
            let seed = context
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect::<Map<_, _>>();
            let max_retries = max_retries.unwrap_or(config.max_retries);
            cmd_run(
                &config,
                &paths,
                &objective,
                &seed,
                max_retries,
                plan.as_deref(),
            )
        }
        Command::Classify { text } => {
            println!("{}", HeuristicClassifier.classify(&text.join(" ")));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_taskgraph(root, &InitOptions { force })?;
    println!("initialized {}", paths.state_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_check(path: &Path) -> Result<i32> {
    let (plan, source) = load_plan(path)?;
    let errors = validate_invariants(&plan);
    if !errors.is_empty() {
        eprintln!("invariant violations:\n- {}", errors.join("\n- "));
        return Ok(exit_codes::INVALID);
    }
    println!(
        "ok: {} actions ({:?}, status {})",
        plan.actions.len(),
        source,
        plan.status.as_str()
    );
    Ok(exit_codes::OK)
}

fn cmd_execute(config: &EngineConfig, root: &Path, path: &Path, out: Option<&Path>) -> Result<i32> {
    let (mut plan, _) = load_plan(path)?;
    let executor = build_executor(config, root)?;
    let report = executor.execute(&mut plan)?;

    let payload = serde_json::to_string_pretty(&report).context("serialize pass report")?;
    println!("{payload}");
    if let Some(out) = out {
        write_plan(out, &plan)?;
    }
    Ok(outcome_code(&report.outcome))
}

fn cmd_run(
    config: &EngineConfig,
    paths: &TaskgraphPaths,
    objective: &str,
    seed: &Map<String, Value>,
    max_retries: u32,
    plan_file: Option<&Path>,
) -> Result<i32> {
    let oracle = CommandOracle::from_config(config, paths.root.clone())?;
    let planner: Box<dyn Planner> = match (plan_file, &oracle) {
        (Some(path), _) => Box::new(PlanFilePlanner::new(path)),
        (None, Some(oracle)) => Box::new(OraclePlanner::new(oracle.clone())),
        (None, None) => {
            return Err(anyhow!(
                "no oracle configured: set oracle.command in the config or pass --plan"
            ));
        }
    };
    let replanner: Box<dyn Replanner> = match &oracle {
        Some(oracle) => Box::new(OraclePlanner::new(oracle.clone())),
        None => Box::new(RemediationReplanner),
    };
    let executor = build_executor(config, &paths.root)?;

    let mut last_outcome = None;
    let outcome = run_workflow(
        objective,
        seed,
        planner.as_ref(),
        replanner.as_ref(),
        &executor,
        &HeuristicClassifier,
        max_retries,
        |report, _| {
            println!("pass: {}", report.outcome);
            last_outcome = Some(report.outcome.clone());
        },
    )?;

    fs::create_dir_all(&paths.runs_dir)
        .with_context(|| format!("create directory {}", paths.runs_dir.display()))?;
    let plan_path = paths
        .runs_dir
        .join(format!("{}.json", uuid::Uuid::new_v4()));
    write_plan(&plan_path, &outcome.plan)?;
    println!(
        "plan written to {} (status {})",
        plan_path.display(),
        outcome.plan.status.as_str()
    );

    let code = match &outcome.stop {
        WorkflowStop::Completed if outcome.plan.status != PlanStatus::Completed => {
            println!(
                "cycle completed after {} pass(es) with nothing to remediate; plan status {}",
                outcome.passes,
                outcome.plan.status.as_str()
            );
            exit_codes::OK
        }
        WorkflowStop::Completed => {
            println!("completed after {} pass(es)", outcome.passes);
            exit_codes::OK
        }
        WorkflowStop::Failed { reason } => {
            println!("failed: {reason}");
            match last_outcome {
                Some(PassOutcome::Blocked { .. }) => exit_codes::BLOCKED,
                _ => exit_codes::FAILED,
            }
        }
        WorkflowStop::RetriesExhausted { attempts, last } => {
            println!("retries exhausted after {attempts} retries (last recommendation {last})");
            exit_codes::FAILED
        }
    };
    Ok(code)
}

/// Wire handlers, validator, verifier and oracle from config.
fn build_executor(config: &EngineConfig, root: &Path) -> Result<PlanExecutor> {
    let env = HostEnv::from_config(config, root);
    let oracle = CommandOracle::from_config(config, env.workdir.clone())?
        .map(|oracle| Box::new(oracle) as Box<dyn Oracle>);
    let registry = HandlerRegistry::builtin(&env, oracle);
    let verifier = Verifier::from_config(config, &env);
    let validator = Validator::new(
        env,
        CommandPolicy::from_allowed(config.allow_command_validation),
    );
    Ok(
        PlanExecutor::new(Dispatcher::new(registry), validator, config.action_timeout())
            .with_verifier(verifier),
    )
}

fn outcome_code(outcome: &PassOutcome) -> i32 {
    match outcome {
        PassOutcome::Completed => exit_codes::OK,
        PassOutcome::Blocked { .. } => exit_codes::BLOCKED,
        PassOutcome::Failed { .. } | PassOutcome::Error { .. } | PassOutcome::Unverified { .. } => {
            exit_codes::FAILED
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err(anyhow!("empty key in '{raw}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}
