//! Test-only builders and scripted doubles for plans, handlers and oracles.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

use crate::core::context::SharedContext;
use crate::io::handlers::{ActionHandler, DispatchOutput, HandlerRequest, HostEnv};
use crate::io::oracle::Oracle;
use crate::plan::{Action, ActionResult, ActionType, Plan, PlanStatus, ValidationOutcome};
use crate::planner::Planner;

/// A `run_command` action with empty params and no validation.
pub fn action(id: &str, dependencies: &[&str]) -> Action {
    Action {
        id: id.to_string(),
        action_type: ActionType::RunCommand,
        params: Map::new(),
        description: format!("{id} step"),
        dependencies: dependencies.iter().map(|dep| dep.to_string()).collect(),
        validation: None,
        result: None,
    }
}

pub fn plan_of(actions: Vec<Action>) -> Plan {
    Plan {
        objective: "test objective".to_string(),
        actions,
        context: SharedContext::default(),
        dependencies: Vec::new(),
        estimated_time: String::new(),
        requirements: Vec::new(),
        status: PlanStatus::Planning,
        current_step: None,
        superseded: Vec::new(),
    }
}

pub fn succeeded() -> ActionResult {
    ActionResult {
        success: true,
        output: None,
        error: None,
        validation: ValidationOutcome::pass("ok"),
    }
}

pub fn failed(message: &str) -> ActionResult {
    ActionResult {
        success: false,
        output: None,
        error: Some(message.to_string()),
        validation: ValidationOutcome::fail(message),
    }
}

/// Host settings rooted at `root`, with no settle delay.
pub fn host_env(root: &Path) -> HostEnv {
    HostEnv {
        workdir: root.to_path_buf(),
        shell: vec!["sh".to_string(), "-c".to_string()],
        python: "python3".to_string(),
        output_limit_bytes: 100_000,
        settle_delay: Duration::ZERO,
    }
}

/// Handler returning canned results and recording the ids it was called with.
pub struct ScriptedHandler {
    responses: RefCell<VecDeque<Result<DispatchOutput, String>>>,
    fallback: Option<DispatchOutput>,
    calls: Rc<RefCell<Vec<String>>>,
}

impl ScriptedHandler {
    /// Returns `output` for every call.
    pub fn always(output: DispatchOutput) -> Self {
        Self {
            responses: RefCell::new(VecDeque::new()),
            fallback: Some(output),
            calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Returns the scripted results in order; `Err` strings become faults.
    pub fn scripted(responses: Vec<Result<DispatchOutput, String>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            fallback: None,
            calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.calls)
    }
}

impl ActionHandler for ScriptedHandler {
    fn handle(&self, request: &HandlerRequest<'_>) -> Result<DispatchOutput> {
        self.calls.borrow_mut().push(request.action_id.to_string());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow!(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("scripted handler has no response left")),
        }
    }
}

/// Oracle returning canned responses in order and recording every prompt.
pub struct ScriptedOracle {
    responses: RefCell<VecDeque<String>>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedOracle {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn prompts(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.prompts)
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted oracle has no response left"))
    }
}

/// Planner that hands out a fixed plan, or a fixed error.
pub struct ScriptedPlanner {
    plan: Result<Plan, String>,
}

impl ScriptedPlanner {
    pub fn new(plan: Plan) -> Self {
        Self { plan: Ok(plan) }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            plan: Err(message.to_string()),
        }
    }
}

impl Planner for ScriptedPlanner {
    fn plan(&self, objective: &str, _seed: &Map<String, Value>) -> Result<Plan> {
        let mut plan = self.plan.clone().map_err(|message| anyhow!(message))?;
        if plan.objective.is_empty() {
            plan.objective = objective.to_string();
        }
        Ok(plan)
    }
}
