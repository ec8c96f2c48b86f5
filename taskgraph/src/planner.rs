//! Planning and re-planning strategies.
//!
//! A [`Planner`] turns an objective into a fresh plan; a [`Replanner`] turns a
//! plan that did not complete, plus the monitor's recommendation, into the
//! plan for the next attempt.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};

use crate::core::classifier::Recommendation;
use crate::core::context::SharedContext;
use crate::io::oracle::{Oracle, parse_proposal};
use crate::io::plan_store::load_plan;
use crate::io::prompt::PromptEngine;
use crate::plan::{Action, ActionType, Plan, PlanStatus, enhance};

pub trait Planner {
    fn plan(&self, objective: &str, seed: &Map<String, Value>) -> Result<Plan>;
}

pub trait Replanner {
    fn replan(
        &self,
        previous: &Plan,
        recommendation: &Recommendation,
        errors: &[String],
    ) -> Result<Plan>;
}

/// Plans by asking an [`Oracle`] and validating its proposal.
pub struct OraclePlanner<O: Oracle> {
    oracle: O,
    prompts: PromptEngine,
}

impl<O: Oracle> OraclePlanner<O> {
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            prompts: PromptEngine::new(),
        }
    }

    fn ask(&self, prompt: &str, objective: &str, seed: &Map<String, Value>) -> Result<Plan> {
        let response = self.oracle.complete(prompt).context("query planning oracle")?;
        let proposal = parse_proposal(&response).context("parse planning oracle response")?;
        let plan = enhance(proposal, objective, seed)?;
        info!(actions = plan.actions.len(), "plan proposed");
        Ok(plan)
    }
}

impl<O: Oracle> Planner for OraclePlanner<O> {
    #[instrument(skip_all)]
    fn plan(&self, objective: &str, seed: &Map<String, Value>) -> Result<Plan> {
        let prompt = self.prompts.render_plan(objective, seed)?;
        self.ask(&prompt, objective, seed)
    }
}

impl<O: Oracle> Replanner for OraclePlanner<O> {
    /// The new plan starts from the previous plan's context entries. Every
    /// settled action of the previous plan is carried into `superseded`.
    #[instrument(skip_all, fields(recommendation = %recommendation))]
    fn replan(
        &self,
        previous: &Plan,
        recommendation: &Recommendation,
        errors: &[String],
    ) -> Result<Plan> {
        let prompt = self
            .prompts
            .render_replan(previous, recommendation, errors)?;
        let mut plan = self.ask(&prompt, &previous.objective, previous.context.entries())?;
        plan.superseded = previous.superseded.clone();
        plan.superseded
            .extend(previous.actions.iter().filter(|action| action.is_settled()).cloned());
        Ok(plan)
    }
}

/// Deterministic re-planning without an oracle.
///
/// Successful actions are kept as they are. Failed actions move to
/// `superseded` with their results intact and are replaced by unsettled
/// copies under fresh ids; dependencies on the old ids follow the copies.
/// Actions that never settled are kept and run again. For
/// `install_module:<name>` an `install_dependencies` action is inserted ahead
/// of the first action to re-run, and every re-run action depends on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemediationReplanner;

impl Replanner for RemediationReplanner {
    #[instrument(skip_all, fields(recommendation = %recommendation))]
    fn replan(
        &self,
        previous: &Plan,
        recommendation: &Recommendation,
        _errors: &[String],
    ) -> Result<Plan> {
        let mut plan = previous.clone();
        let mut renamed: HashMap<String, String> = HashMap::new();
        let mut rerun = Vec::new();
        for (index, action) in plan.actions.iter_mut().enumerate() {
            if action.succeeded() {
                continue;
            }
            if action.is_settled() {
                let fresh = uuid::Uuid::new_v4().to_string();
                let settled = std::mem::replace(&mut action.id, fresh.clone());
                renamed.insert(settled.clone(), fresh);
                let mut retired = action.clone();
                retired.id = settled;
                plan.superseded.push(retired);
                action.result = None;
            }
            rerun.push(index);
        }
        for action in &mut plan.actions {
            for dep in &mut action.dependencies {
                if let Some(fresh) = renamed.get(dep.as_str()) {
                    *dep = fresh.clone();
                }
            }
        }

        if let Recommendation::InstallModule(module) = recommendation {
            let install = install_action(module);
            for &index in &rerun {
                plan.actions[index].dependencies.push(install.id.clone());
            }
            let at = rerun.first().copied().unwrap_or(plan.actions.len());
            debug!(module = %module, at, "inserting install step");
            plan.actions.insert(at, install);
        }

        plan.status = PlanStatus::Planning;
        plan.current_step = None;
        info!(
            rerun = rerun.len(),
            superseded = renamed.len(),
            actions = plan.actions.len(),
            "plan remediated"
        );
        Ok(plan)
    }
}

fn install_action(module: &str) -> Action {
    let mut params = Map::new();
    params.insert("packages".to_string(), json!([module]));
    Action {
        id: uuid::Uuid::new_v4().to_string(),
        action_type: ActionType::InstallDependencies,
        params,
        description: format!("install missing module {module}"),
        dependencies: Vec::new(),
        validation: None,
        result: None,
    }
}

/// Plans by reading a plan or proposal file.
#[derive(Debug, Clone)]
pub struct PlanFilePlanner {
    path: PathBuf,
}

impl PlanFilePlanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Planner for PlanFilePlanner {
    /// Objective and seed fill in only what the file leaves empty.
    fn plan(&self, objective: &str, seed: &Map<String, Value>) -> Result<Plan> {
        let (mut plan, source) = load_plan(&self.path)?;
        debug!(source = ?source, path = %self.path.display(), "plan loaded from file");
        if plan.objective.trim().is_empty() {
            plan.objective = objective.to_string();
        }
        let mut entries = seed.clone();
        entries.extend(plan.context.entries().clone());
        if entries != *plan.context.entries() {
            plan.context = SharedContext::seeded(entries);
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedOracle, action, failed, plan_of, succeeded};

    const PROPOSAL: &str = r#"Sure, here is the plan:
```json
{
  "objective": "",
  "actions": [
    {"key": "dir", "type": "create_directory", "params": {"path": "app"}, "description": "make app"},
    {"type": "run_command", "params": {"command": "ls"}, "description": "list", "dependencies": ["dir"]}
  ],
  "context": {"framework": "flask"}
}
```"#;

    fn seed() -> Map<String, Value> {
        let mut seed = Map::new();
        seed.insert("user".to_string(), json!("ana"));
        seed
    }

    #[test]
    fn oracle_planner_enhances_the_proposal() {
        let oracle = ScriptedOracle::new(vec![PROPOSAL.to_string()]);
        let prompts = oracle.prompts();
        let planner = OraclePlanner::new(oracle);

        let plan = planner.plan("build an app", &seed()).expect("plan");

        assert_eq!(plan.objective, "build an app");
        assert_eq!(plan.status, PlanStatus::Planning);
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[1].dependencies, vec![plan.actions[0].id.clone()]);
        assert_eq!(plan.context.get("user"), Some(&json!("ana")));
        assert_eq!(plan.context.get("framework"), Some(&json!("flask")));
        assert!(prompts.borrow()[0].contains("build an app"));
    }

    #[test]
    fn oracle_planner_rejects_unknown_types() {
        let oracle = ScriptedOracle::new(vec![
            r#"{"actions": [{"type": "launch_rocket", "params": {}}]}"#.to_string(),
        ]);
        let err = OraclePlanner::new(oracle)
            .plan("x", &Map::new())
            .unwrap_err();
        assert!(
            err.chain()
                .any(|cause| cause.downcast_ref::<crate::plan::UnknownActionTypeError>().is_some()),
            "{err:#}"
        );
    }

    #[test]
    fn oracle_planner_surfaces_unparseable_responses() {
        let oracle = ScriptedOracle::new(vec!["I cannot help with that.".to_string()]);
        let err = OraclePlanner::new(oracle).plan("x", &Map::new()).unwrap_err();
        assert!(format!("{err:#}").contains("no JSON object"), "{err:#}");
    }

    #[test]
    fn oracle_replan_carries_context_and_diagnosis() {
        let oracle = ScriptedOracle::new(vec![PROPOSAL.to_string()]);
        let prompts = oracle.prompts();
        let planner = OraclePlanner::new(oracle);
        let mut settled = action("a", &[]);
        settled.result = Some(failed("No module named 'flask'"));
        let mut previous = plan_of(vec![settled.clone(), action("b", &["a"])]);
        previous.objective = "ship it".to_string();
        previous.context = SharedContext::seeded(seed());

        let plan = planner
            .replan(
                &previous,
                &Recommendation::InstallModule("flask".to_string()),
                &["action a: No module named 'flask'".to_string()],
            )
            .expect("replan");

        assert_eq!(plan.objective, "ship it");
        assert_eq!(plan.context.get("user"), Some(&json!("ana")));
        assert_eq!(plan.superseded, vec![settled]);
        assert!(plan.actions.iter().all(|action| action.id != "a"));
        let prompt = &prompts.borrow()[0];
        assert!(prompt.contains("install_module:flask"));
        assert!(prompt.contains("No module named 'flask'"));
    }

    #[test]
    fn remediation_keeps_successes_and_inserts_install_step() {
        let mut done = action("done", &[]);
        done.result = Some(succeeded());
        let mut broken = action("broken", &["done"]);
        broken.result = Some(failed("ModuleNotFoundError"));
        let pending = action("pending", &["broken"]);
        let mut previous = plan_of(vec![done.clone(), broken.clone(), pending]);
        previous.status = PlanStatus::Failed;
        previous.current_step = Some("broken".to_string());

        let plan = RemediationReplanner
            .replan(
                &previous,
                &Recommendation::InstallModule("flask".to_string()),
                &[],
            )
            .expect("replan");

        assert_eq!(plan.actions.len(), 4);
        assert_eq!(plan.actions[0], done);
        let install = &plan.actions[1];
        assert_eq!(install.action_type, ActionType::InstallDependencies);
        assert_eq!(install.params.get("packages"), Some(&json!(["flask"])));
        let retry = &plan.actions[2];
        assert_ne!(retry.id, "broken");
        assert_eq!(retry.description, "broken step");
        assert!(retry.result.is_none());
        assert_eq!(retry.dependencies, vec!["done".to_string(), install.id.clone()]);
        let pending = plan.find("pending").expect("pending");
        assert_eq!(pending.dependencies, vec![retry.id.clone(), install.id.clone()]);
        assert_eq!(plan.superseded, vec![broken]);
        assert_eq!(plan.status, PlanStatus::Planning);
        assert_eq!(plan.current_step, None);
        assert!(crate::core::invariants::validate_invariants(&plan).is_empty());
    }

    #[test]
    fn remediation_never_reopens_a_settled_id() {
        let mut done = action("done", &[]);
        done.result = Some(succeeded());
        let mut broken = action("broken", &["done"]);
        broken.result = Some(failed("NameError: name 'x' is not defined"));
        let untouched = action("untouched", &["broken"]);
        let previous = plan_of(vec![done, broken.clone(), untouched]);

        let plan = RemediationReplanner
            .replan(
                &previous,
                &Recommendation::FixCode("undefined_variable".to_string()),
                &[],
            )
            .expect("replan");

        for action in &plan.actions {
            if let Some(before) = previous.find(&action.id)
                && before.is_settled()
            {
                assert_eq!(action, before, "settled action '{}' changed", action.id);
            }
        }
        assert!(plan.find("broken").is_none());
        assert_eq!(plan.superseded, vec![broken]);
        assert_eq!(plan.actions.len(), 3);
        assert!(plan.find("untouched").expect("untouched").result.is_none());
    }

    #[test]
    fn remediation_appends_install_when_nothing_needs_rerunning() {
        let mut done = action("done", &[]);
        done.result = Some(succeeded());
        let previous = plan_of(vec![done.clone()]);

        let plan = RemediationReplanner
            .replan(
                &previous,
                &Recommendation::InstallModule("flask".to_string()),
                &[],
            )
            .expect("replan");

        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0], done);
        assert_eq!(plan.actions[1].action_type, ActionType::InstallDependencies);
        assert!(plan.superseded.is_empty());
    }

    #[test]
    fn plan_file_planner_fills_objective_and_seed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{"actions": [{"type": "run_command", "params": {"command": "true"}}], "context": {"user": "bo"}}"#,
        )
        .expect("write");

        let plan = PlanFilePlanner::new(path.clone())
            .plan("from file", &seed())
            .expect("plan");

        assert_eq!(plan.objective, "from file");
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.context.get("user"), Some(&json!("bo")));
    }
}
