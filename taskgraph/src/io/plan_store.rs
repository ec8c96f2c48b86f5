//! Plan file load/save helpers with schema validation.
//!
//! A plan file is either a proposal (the oracle's untrusted shape, validated
//! against the embedded schema and then enhanced) or a plan previously written
//! by the engine, recognized by its `status` field.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::{Map, Value};
use tracing::debug;

use crate::io::config::write_atomic;
use crate::plan::{Plan, PlanProposal, enhance};

pub const PROPOSAL_SCHEMA: &str = include_str!("../../schemas/plan_proposal.schema.json");

/// How a plan file was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Proposal,
    Engine,
}

/// Load a plan file, enhancing it when it is a proposal.
pub fn load_plan(path: &Path) -> Result<(Plan, PlanSource)> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", path.display()))?;

    if value.get("status").is_some() {
        let plan: Plan = serde_json::from_value(value)
            .with_context(|| format!("deserialize plan {}", path.display()))?;
        debug!(actions = plan.actions.len(), "loaded engine plan");
        return Ok((plan, PlanSource::Engine));
    }

    validate_proposal_value(&value).with_context(|| format!("validate {}", path.display()))?;
    let proposal: PlanProposal = serde_json::from_value(value)
        .with_context(|| format!("deserialize proposal {}", path.display()))?;
    let plan = enhance(proposal, "", &Map::new())
        .with_context(|| format!("enhance proposal {}", path.display()))?;
    debug!(actions = plan.actions.len(), "loaded and enhanced proposal");
    Ok((plan, PlanSource::Proposal))
}

/// Atomically write a plan as pretty JSON.
pub fn write_plan(path: &Path, plan: &Plan) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(plan).context("serialize plan")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Check a proposal value against the embedded schema.
pub fn validate_proposal_value(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PROPOSAL_SCHEMA).context("parse proposal schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "proposal schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ActionType, PlanStatus, UnknownActionTypeError};
    use serde_json::json;

    fn write_json(path: &Path, value: &Value) {
        fs::write(path, serde_json::to_string_pretty(value).expect("json")).expect("write");
    }

    /// Verifies a proposal file is schema-checked, enhanced, and survives a write/load cycle
    /// as an engine plan with the same ids.
    #[test]
    fn proposal_then_engine_plan_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let proposal_path = temp.path().join("proposal.json");
        write_json(
            &proposal_path,
            &json!({
                "objective": "scaffold",
                "actions": [
                    {"key": "dir", "type": "create_directory", "params": {"path": "app"}},
                    {"type": "create_file", "params": {"path": "app/a.py", "content": ""},
                     "dependencies": ["dir"]}
                ]
            }),
        );

        let (plan, source) = load_plan(&proposal_path).expect("load proposal");
        assert_eq!(source, PlanSource::Proposal);
        assert_eq!(plan.status, PlanStatus::Planning);
        assert_eq!(plan.actions[1].dependencies, vec![plan.actions[0].id.clone()]);

        let plan_path = temp.path().join("out").join("plan.json");
        write_plan(&plan_path, &plan).expect("write plan");
        let (reloaded, source) = load_plan(&plan_path).expect("load plan");
        assert_eq!(source, PlanSource::Engine);
        assert_eq!(reloaded, plan);
        assert_eq!(reloaded.actions[0].action_type, ActionType::CreateDirectory);
    }

    #[test]
    fn schema_violation_names_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.json");
        write_json(&path, &json!({"actions": [{"params": {}}]}));
        let err = load_plan(&path).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("bad.json"), "{msg}");
        assert!(msg.contains("proposal schema validation failed"), "{msg}");
    }

    #[test]
    fn unknown_action_type_is_downcastable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plan.json");
        write_json(&path, &json!({"actions": [{"type": "launch_rocket"}]}));
        let err = load_plan(&path).unwrap_err();
        let unknown = err
            .downcast_ref::<UnknownActionTypeError>()
            .expect("typed error");
        assert_eq!(unknown.value, "launch_rocket");
    }

    #[test]
    fn embedded_schema_compiles() {
        let schema: Value = serde_json::from_str(PROPOSAL_SCHEMA).expect("schema json");
        assert!(validator_for(&schema).is_ok());
    }
}
