//! Plan → execute → monitor → retry cycle for `taskgraph run`.

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::classifier::{ErrorClassifier, Recommendation};
use crate::core::escalation::{CycleState, Escalation, Transition};
use crate::executor::{PassReport, PlanExecutor};
use crate::plan::Plan;
use crate::planner::{Planner, Replanner};

/// Reason why `run_workflow` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStop {
    /// A pass completed, or the monitor found nothing to remediate after a
    /// dispatch fault.
    Completed,
    /// The monitor had no actionable advice for a failed or blocked pass.
    Failed { reason: String },
    /// A retry was recommended but the retry ceiling was reached.
    RetriesExhausted { attempts: u32, last: Recommendation },
}

impl WorkflowStop {
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkflowStop::Completed)
    }
}

/// Summary of a workflow invocation.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    /// Plan as it stood after the last pass.
    pub plan: Plan,
    pub passes: u32,
    pub stop: WorkflowStop,
    /// One entry per monitored pass, in order.
    pub recommendations: Vec<Recommendation>,
}

/// Plan once, then execute and re-plan until a pass completes, the monitor
/// gives up, or `max_retries` re-plans have been spent.
///
/// Planner, replanner and executor errors abort the cycle immediately.
#[instrument(skip_all, fields(max_retries = max_retries))]
#[allow(clippy::too_many_arguments)]
pub fn run_workflow<P, R, C, F>(
    objective: &str,
    seed: &Map<String, Value>,
    planner: &P,
    replanner: &R,
    executor: &PlanExecutor,
    classifier: &C,
    max_retries: u32,
    mut on_pass: F,
) -> Result<WorkflowOutcome>
where
    P: Planner + ?Sized,
    R: Replanner + ?Sized,
    C: ErrorClassifier + ?Sized,
    F: FnMut(&PassReport, &Plan),
{
    let mut plan = planner.plan(objective, seed)?;
    let mut escalation = Escalation::new(max_retries);
    let mut passes = 0u32;
    let mut recommendations = Vec::new();

    loop {
        let report = executor.execute(&mut plan)?;
        passes += 1;
        on_pass(&report, &plan);

        if escalation.record_pass(&report.outcome)? == CycleState::Completed {
            info!(passes, "workflow completed");
            return Ok(WorkflowOutcome {
                plan,
                passes,
                stop: WorkflowStop::Completed,
                recommendations,
            });
        }

        escalation.begin_monitoring()?;
        let latest = report.latest_error(&plan);
        let recommendation = classifier.classify(&latest);
        info!(
            pass = passes,
            outcome = report.outcome.label(),
            recommendation = %recommendation,
            "pass monitored"
        );
        recommendations.push(recommendation.clone());

        let stop = match escalation.resolve(&report.outcome, &recommendation)? {
            Transition::Retry { attempt } => {
                info!(attempt, max_retries, "re-planning");
                let mut errors = report.errors.clone();
                if errors.is_empty() {
                    errors.push(latest);
                }
                plan = replanner.replan(&plan, &recommendation, &errors)?;
                continue;
            }
            Transition::Completed => WorkflowStop::Completed,
            Transition::Failed { reason } => {
                warn!(reason = %reason, "workflow failed");
                WorkflowStop::Failed { reason }
            }
            Transition::Exhausted { attempts } => {
                warn!(attempts, recommendation = %recommendation, "retries exhausted");
                WorkflowStop::RetriesExhausted {
                    attempts,
                    last: recommendation,
                }
            }
        };
        return Ok(WorkflowOutcome {
            plan,
            passes,
            stop,
            recommendations,
        });
    }
}
