//! Prompt rendering for the planning oracle.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde_json::{Map, Value};

use crate::core::classifier::Recommendation;
use crate::core::context::{ContextKey, SharedContext};
use crate::plan::{ActionType, Plan};

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const REPLAN_TEMPLATE: &str = include_str!("prompts/replan.md");
const CUSTOM_ACTION_TEMPLATE: &str = include_str!("prompts/custom_action.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("replan", REPLAN_TEMPLATE)
            .expect("replan template should be valid");
        env.add_template("custom_action", CUSTOM_ACTION_TEMPLATE)
            .expect("custom_action template should be valid");
        Self { env }
    }

    pub fn render_plan(&self, objective: &str, seed: &Map<String, Value>) -> Result<String> {
        let template = self.env.get_template("plan")?;
        let rendered = template.render(context! {
            objective => objective.trim(),
            context => pretty(seed)?,
            action_types => action_type_names(),
            context_keys => ContextKey::ALL.iter().map(|key| key.as_str()).collect::<Vec<_>>(),
        })?;
        Ok(rendered)
    }

    pub fn render_replan(
        &self,
        plan: &Plan,
        recommendation: &Recommendation,
        errors: &[String],
    ) -> Result<String> {
        let template = self.env.get_template("replan")?;
        let errors: Vec<&str> = errors
            .iter()
            .map(|err| err.trim())
            .filter(|err| !err.is_empty())
            .collect();
        let rendered = template.render(context! {
            objective => plan.objective.trim(),
            summary => plan.summary(),
            recommendation => recommendation.to_string(),
            errors => errors,
            context => pretty(plan.context.entries())?,
            action_types => action_type_names(),
        })?;
        Ok(rendered)
    }

    pub fn render_custom_action(
        &self,
        description: &str,
        params: &Map<String, Value>,
        shared: &SharedContext,
    ) -> Result<String> {
        let template = self.env.get_template("custom_action")?;
        let rendered = template.render(context! {
            description => description.trim(),
            params => pretty(params)?,
            context => pretty(shared.entries())?,
        })?;
        Ok(rendered)
    }
}

fn action_type_names() -> Vec<&'static str> {
    ActionType::ALL.iter().map(|ty| ty.as_str()).collect()
}

fn pretty(map: &Map<String, Value>) -> Result<Option<String>> {
    if map.is_empty() {
        return Ok(None);
    }
    serde_json::to_string_pretty(map)
        .map(Some)
        .context("serialize prompt context")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{action, failed, plan_of, succeeded};
    use serde_json::json;

    #[test]
    fn plan_prompt_lists_types_and_context() {
        let mut seed = Map::new();
        seed.insert("project".to_string(), json!("demo"));
        let prompt = PromptEngine::new()
            .render_plan("  build a flask app ", &seed)
            .expect("render");

        assert!(prompt.contains("build a flask app\n"));
        for ty in ActionType::ALL {
            assert!(prompt.contains(&format!("- `{}`", ty.as_str())), "{ty}");
        }
        assert!(prompt.contains("\"project\": \"demo\""));
        assert!(prompt.contains("{{ last_created_dir }}/app.py"));
        assert!(prompt.contains("`last_venv_path`"));
    }

    #[test]
    fn plan_prompt_omits_empty_context() {
        let prompt = PromptEngine::new()
            .render_plan("x", &Map::new())
            .expect("render");
        assert!(!prompt.contains("## Known context"));
    }

    #[test]
    fn replan_prompt_includes_summary_and_errors() {
        let mut plan = plan_of(vec![action("a", &[]), action("b", &["a"])]);
        plan.objective = "ship it".to_string();
        plan.actions[0].result = Some(succeeded());
        plan.actions[1].result = Some(failed("ModuleNotFoundError: No module named 'flask'"));

        let prompt = PromptEngine::new()
            .render_replan(
                &plan,
                &Recommendation::InstallModule("flask".to_string()),
                &["ModuleNotFoundError: No module named 'flask'".to_string(), "  ".to_string()],
            )
            .expect("render");

        assert!(prompt.contains("ship it"));
        assert!(prompt.contains("[ok] run_command a"));
        assert!(prompt.contains("[failed] run_command b"));
        assert!(prompt.contains("`install_module:flask`"));
        assert!(prompt.contains("- ModuleNotFoundError: No module named 'flask'"));
    }

    #[test]
    fn custom_action_prompt_includes_description() {
        let mut params = Map::new();
        params.insert("target".to_string(), json!("staging"));
        let prompt = PromptEngine::new()
            .render_custom_action("deploy manually", &params, &SharedContext::default())
            .expect("render");
        assert!(prompt.contains("deploy manually"));
        assert!(prompt.contains("\"target\": \"staging\""));
        assert!(!prompt.contains("## Known context"));
    }
}
