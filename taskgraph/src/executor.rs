//! One execution pass over a plan.
//!
//! Each iteration selects the first ready action, dispatches it, validates
//! the effect, settles the result exactly once and, on success, folds the
//! handler's derived facts into the shared context. A dispatch fault ends the
//! pass immediately and leaves the faulting action unsettled. When every
//! action succeeded, the optional [`Verifier`] gets the last word.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::core::resolver::{Selection, select};
use crate::core::types::PassOutcome;
use crate::io::dispatcher::Dispatcher;
use crate::io::validator::Validator;
use crate::io::verify::Verifier;
use crate::plan::{ActionResult, Plan, PlanStatus, ValidationOutcome};

/// Summary of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    #[serde(flatten)]
    pub outcome: PassOutcome,
    /// Ids settled during this pass, in settlement order.
    pub settled: Vec<String>,
    /// Pass-level error log (dispatch faults).
    pub errors: Vec<String>,
}

impl PassReport {
    /// Most recent error text worth classifying.
    ///
    /// Prefers the last dispatch fault, then the error of the most recently
    /// failed action, then the outcome's own diagnostic.
    pub fn latest_error(&self, plan: &Plan) -> String {
        if let Some(err) = self.errors.last() {
            return err.clone();
        }
        let settled_here = self.settled.iter().rev().filter_map(|id| plan.find(id));
        let earlier = plan.actions.iter().rev();
        for action in settled_here.chain(earlier) {
            if let Some(result) = &action.result
                && !result.success
                && let Some(error) = &result.error
            {
                return error.clone();
            }
        }
        self.outcome.diagnostic()
    }
}

pub struct PlanExecutor {
    dispatcher: Dispatcher,
    validator: Validator,
    verifier: Option<Verifier>,
    action_timeout: Duration,
}

impl PlanExecutor {
    pub fn new(dispatcher: Dispatcher, validator: Validator, action_timeout: Duration) -> Self {
        Self {
            dispatcher,
            validator,
            verifier: None,
            action_timeout,
        }
    }

    pub fn with_verifier(mut self, verifier: Option<Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn action_timeout(&self) -> Duration {
        self.action_timeout
    }

    /// Run one pass. Mutates `actions[*].result`, `context`, `status` and
    /// `current_step` in place.
    #[instrument(skip_all, fields(actions = plan.actions.len()))]
    pub fn execute(&self, plan: &mut Plan) -> Result<PassReport> {
        plan.status = PlanStatus::Executing;
        let mut settled = Vec::new();
        let mut errors = Vec::new();
        let bound = plan.actions.len() + 1;

        for _ in 0..bound {
            let index = match select(plan) {
                Selection::Ready(index) => index,
                Selection::Complete => {
                    let failed = plan.failed_ids();
                    let outcome = if failed.is_empty() {
                        self.verify(plan)
                    } else {
                        PassOutcome::Failed { failed }
                    };
                    return Ok(finish(plan, outcome, settled, errors));
                }
                Selection::Blocked { pending, reason } => {
                    warn!(pending = pending.len(), reason = %reason, "plan blocked");
                    let outcome = PassOutcome::Blocked { pending, reason };
                    return Ok(finish(plan, outcome, settled, errors));
                }
            };

            let action_id = plan.actions[index].id.clone();
            let action_type = plan.actions[index].action_type;
            plan.current_step = Some(action_id.clone());
            debug!(action_id = %action_id, action_type = %action_type, "selected action");

            let deadline = Instant::now() + self.action_timeout;
            let action = &plan.actions[index];
            let raw = match self.dispatcher.dispatch(action, &plan.context, deadline) {
                Ok(raw) => raw,
                Err(err) => {
                    let message = format!("{err:#}");
                    errors.push(format!("action {action_id}: {message}"));
                    let outcome = PassOutcome::Error {
                        action_id,
                        message,
                    };
                    return Ok(finish(plan, outcome, settled, errors));
                }
            };

            let validation = match remaining_budget(deadline) {
                Ok(timeout) => self.validator.validate(action, &plan.context, timeout),
                Err(err) => ValidationOutcome::fail(format!("validation skipped: {err}")),
            };
            let success = validation.success;
            let error = raw
                .error
                .clone()
                .or_else(|| (!success).then(|| validation.message.clone()));
            plan.actions[index].settle(ActionResult {
                success,
                output: raw.output.clone(),
                error,
                validation,
            })?;
            settled.push(action_id.clone());

            if success {
                let written = plan.context.absorb(action_type, &raw.facts);
                debug!(
                    action_id = %action_id,
                    keys = ?written.iter().map(|key| key.as_str()).collect::<Vec<_>>(),
                    version = plan.context.version(),
                    "context updated"
                );
            }
            info!(action_id = %action_id, action_type = %action_type, success, "action settled");
        }

        Err(anyhow!(
            "execution pass did not terminate within {} iterations",
            bound
        ))
    }

    fn verify(&self, plan: &Plan) -> PassOutcome {
        let Some(verifier) = &self.verifier else {
            return PassOutcome::Completed;
        };
        match verifier.verify(&plan.context) {
            Ok(_) => PassOutcome::Completed,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(message = %message, "verification failed");
                PassOutcome::Unverified { message }
            }
        }
    }
}

fn finish(
    plan: &mut Plan,
    outcome: PassOutcome,
    settled: Vec<String>,
    errors: Vec<String>,
) -> PassReport {
    plan.status = if outcome.is_completed() {
        PlanStatus::Completed
    } else {
        PlanStatus::Failed
    };
    info!(outcome = outcome.label(), settled = settled.len(), "pass finished");
    PassReport {
        outcome,
        settled,
        errors,
    }
}
