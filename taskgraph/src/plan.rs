//! Action and plan data model.
//!
//! A [`Plan`] is produced by an external planning oracle as an untrusted
//! [`PlanProposal`] and turned into an executable plan by [`enhance`], which
//! assigns ids, fills default validations and clears results. The executor then
//! owns the plan for one pass, writing `actions[*].result` and `context` in place.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::context::SharedContext;

/// Closed set of action kinds understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreateDirectory,
    CreateFile,
    CreateVirtualEnvironment,
    InstallDependencies,
    RunCommand,
    CustomAction,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        ActionType::CreateDirectory,
        ActionType::CreateFile,
        ActionType::CreateVirtualEnvironment,
        ActionType::InstallDependencies,
        ActionType::RunCommand,
        ActionType::CustomAction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::CreateDirectory => "create_directory",
            ActionType::CreateFile => "create_file",
            ActionType::CreateVirtualEnvironment => "create_virtual_environment",
            ActionType::InstallDependencies => "install_dependencies",
            ActionType::RunCommand => "run_command",
            ActionType::CustomAction => "custom_action",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = UnknownActionTypeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| UnknownActionTypeError {
                value: s.to_string(),
            })
    }
}

/// Raised when a proposal names an action type outside [`ActionType::ALL`].
///
/// This is a configuration error: it fails the whole pass, not one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownActionTypeError {
    pub value: String,
}

impl fmt::Display for UnknownActionTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown action type '{}'", self.value)
    }
}

impl std::error::Error for UnknownActionTypeError {}

/// Validation strategy. Unrecognized strings are kept so they can fail closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValidationKind {
    FileExists,
    CommandOutput,
    Custom,
    Other(String),
}

impl From<String> for ValidationKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "file_exists" => ValidationKind::FileExists,
            "command_output" => ValidationKind::CommandOutput,
            "custom" => ValidationKind::Custom,
            _ => ValidationKind::Other(value),
        }
    }
}

impl From<ValidationKind> for String {
    fn from(kind: ValidationKind) -> Self {
        match kind {
            ValidationKind::FileExists => "file_exists".to_string(),
            ValidationKind::CommandOutput => "command_output".to_string(),
            ValidationKind::Custom => "custom".to_string(),
            ValidationKind::Other(value) => value,
        }
    }
}

/// One criterion or a list of criteria; every entry must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Criteria {
    One(String),
    Many(Vec<String>),
}

impl Criteria {
    pub fn items(&self) -> Vec<&str> {
        match self {
            Criteria::One(item) => vec![item.as_str()],
            Criteria::Many(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

/// Declared success criterion for an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    #[serde(rename = "type")]
    pub kind: ValidationKind,
    pub criteria: Criteria,
    #[serde(default)]
    pub expected_result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Validation {
    pub fn file_exists(path: &str) -> Self {
        Self {
            kind: ValidationKind::FileExists,
            criteria: Criteria::One(path.to_string()),
            expected_result: Value::Bool(true),
            message: None,
        }
    }

    pub fn command_output(command: &str) -> Self {
        Self {
            kind: ValidationKind::CommandOutput,
            criteria: Criteria::One(command.to_string()),
            expected_result: Value::Bool(true),
            message: None,
        }
    }
}

/// Verdict of the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    /// Criteria as rendered for this verdict. Re-validation checks these
    /// rather than rendering again against a context that has since moved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checked: Vec<String>,
}

impl ValidationOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            checked: Vec::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            checked: Vec::new(),
        }
    }

    pub fn with_checked(mut self, checked: Vec<String>) -> Self {
        self.checked = checked;
        self
    }
}

/// Settled outcome of an action. Written exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub validation: ValidationOutcome,
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub validation: Option<Validation>,
    #[serde(default)]
    pub result: Option<ActionResult>,
}

impl Action {
    pub fn is_settled(&self) -> bool {
        self.result.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.result.as_ref().is_some_and(|result| result.success)
    }

    pub fn failed(&self) -> bool {
        self.result.as_ref().is_some_and(|result| !result.success)
    }

    /// Record the outcome. Refuses to overwrite an existing result.
    pub fn settle(&mut self, result: ActionResult) -> Result<()> {
        if self.result.is_some() {
            return Err(anyhow!("action '{}' is already settled", self.id));
        }
        self.result = Some(result);
        Ok(())
    }
}

/// Plan-level progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Planning,
    Executing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Planning => "planning",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        }
    }
}

/// The aggregate unit of execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub objective: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub context: SharedContext,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub estimated_time: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub status: PlanStatus,
    #[serde(default)]
    pub current_step: Option<String>,
    /// Settled actions from earlier attempts that a re-plan replaced. Kept
    /// verbatim; never selected, and their ids are not reused.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<Action>,
}

impl Plan {
    pub fn find(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|action| action.id == id)
    }

    pub fn unsettled_ids(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter(|action| !action.is_settled())
            .map(|action| action.id.clone())
            .collect()
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter(|action| action.failed())
            .map(|action| action.id.clone())
            .collect()
    }

    /// One line per action, in declaration order.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("objective: {}", self.objective)];
        for (index, action) in self.actions.iter().enumerate() {
            let state = match &action.result {
                None => "pending",
                Some(result) if result.success => "ok",
                Some(_) => "failed",
            };
            lines.push(format!(
                "{}. [{}] {} {} ({})",
                index + 1,
                state,
                action.action_type,
                action.id,
                action.description
            ));
        }
        lines.join("\n")
    }
}

/// Untrusted action shape returned by the planning oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    /// Optional proposal-local name other proposals may list as a dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
}

/// Untrusted plan shape returned by the planning oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanProposal {
    #[serde(default)]
    pub objective: String,
    pub actions: Vec<ActionProposal>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub estimated_time: String,
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// Turn an oracle proposal into an executable plan.
///
/// Every action gets a fresh id, a default validation when none was declared,
/// and a null result. Dependencies written as a proposal index (`"0"`) or a
/// proposal `key` are rewritten to the assigned ids; anything else is kept
/// verbatim and will never become ready. `objective` is used when the proposal
/// leaves its own objective empty. Proposal context wins over `seed`.
pub fn enhance(proposal: PlanProposal, objective: &str, seed: &Map<String, Value>) -> Result<Plan> {
    let mut types = Vec::with_capacity(proposal.actions.len());
    for (index, action) in proposal.actions.iter().enumerate() {
        let ty = action
            .action_type
            .parse::<ActionType>()
            .map_err(|err| anyhow::Error::new(err).context(format!("proposal action {index}")))?;
        types.push(ty);
    }

    let ids: Vec<String> = proposal
        .actions
        .iter()
        .map(|_| uuid::Uuid::new_v4().to_string())
        .collect();

    let mut references: HashMap<String, String> = HashMap::new();
    for (index, action) in proposal.actions.iter().enumerate() {
        references.insert(index.to_string(), ids[index].clone());
        if let Some(key) = &action.key {
            references.insert(key.clone(), ids[index].clone());
        }
    }

    let actions = proposal
        .actions
        .into_iter()
        .zip(types)
        .zip(ids)
        .map(|((action, action_type), id)| {
            let dependencies = action
                .dependencies
                .iter()
                .map(|dep| references.get(dep).cloned().unwrap_or_else(|| dep.clone()))
                .collect();
            let validation = action
                .validation
                .or_else(|| default_validation(action_type, &action.params));
            Action {
                id,
                action_type,
                params: action.params,
                description: action.description,
                dependencies,
                validation,
                result: None,
            }
        })
        .collect();

    let mut context = seed.clone();
    context.extend(proposal.context);

    let objective = if proposal.objective.trim().is_empty() {
        objective.to_string()
    } else {
        proposal.objective
    };

    Ok(Plan {
        objective,
        actions,
        context: SharedContext::seeded(context),
        dependencies: proposal.dependencies,
        estimated_time: proposal.estimated_time,
        requirements: proposal.requirements,
        status: PlanStatus::Planning,
        current_step: None,
        superseded: Vec::new(),
    })
}

/// Default criterion for actions whose effect is a filesystem path.
pub fn default_validation(action_type: ActionType, params: &Map<String, Value>) -> Option<Validation> {
    match action_type {
        ActionType::CreateDirectory
        | ActionType::CreateFile
        | ActionType::CreateVirtualEnvironment => params
            .get("path")
            .and_then(Value::as_str)
            .map(Validation::file_exists),
        ActionType::InstallDependencies | ActionType::RunCommand | ActionType::CustomAction => None,
    }
}
