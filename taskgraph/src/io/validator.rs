//! Post-dispatch validation of declared success criteria.
//!
//! Validation never raises: every problem (missing path, failing command,
//! spawn error, unsupported kind) becomes a failed [`ValidationOutcome`].

use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::context::SharedContext;
use crate::core::params::render_template;
use crate::io::handlers::HostEnv;
use crate::io::process::{run_command_with_timeout, shell_command};
use crate::plan::{Action, Validation, ValidationKind, ValidationOutcome};

/// Whether `command_output` criteria may spawn processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPolicy {
    Allow,
    /// Fail closed without spawning. For plans from untrusted sources.
    Deny,
}

impl CommandPolicy {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            CommandPolicy::Allow
        } else {
            CommandPolicy::Deny
        }
    }
}

pub struct Validator {
    env: HostEnv,
    policy: CommandPolicy,
}

impl Validator {
    pub fn new(env: HostEnv, policy: CommandPolicy) -> Self {
        Self { env, policy }
    }

    /// Check the action's declared criterion against the current host state.
    ///
    /// Criteria are rendered against `context` the same way handler params
    /// are, so templated paths resolve identically on both sides. The rendered
    /// criteria are kept on the outcome.
    #[instrument(skip_all, fields(action_id = %action.id))]
    pub fn validate(
        &self,
        action: &Action,
        context: &SharedContext,
        timeout: Duration,
    ) -> ValidationOutcome {
        let Some(validation) = &action.validation else {
            return ValidationOutcome::pass("no validation declared");
        };
        let criteria = match render_criteria(validation, context) {
            Ok(criteria) => criteria,
            Err(outcome) => return annotate(validation, outcome),
        };
        let outcome = self.check(&validation.kind, &criteria, timeout);
        debug!(success = outcome.success, message = %outcome.message, "validated");
        annotate(validation, outcome.with_checked(criteria))
    }

    /// Re-run validation for an already settled action. Never touches `result`.
    ///
    /// Checks the criteria recorded with the original verdict, so a context
    /// that moved on since does not change what is checked. Results written
    /// without recorded criteria are rendered against `context` instead.
    #[instrument(skip_all, fields(action_id = %action.id))]
    pub fn revalidate(
        &self,
        action: &Action,
        context: &SharedContext,
        timeout: Duration,
    ) -> Result<ValidationOutcome> {
        let Some(result) = &action.result else {
            return Err(anyhow!("action '{}' has not been settled", action.id));
        };
        let recorded = &result.validation.checked;
        let Some(validation) = action.validation.as_ref().filter(|_| !recorded.is_empty()) else {
            return Ok(self.validate(action, context, timeout));
        };
        let outcome = self.check(&validation.kind, recorded, timeout);
        debug!(success = outcome.success, recorded = recorded.len(), "revalidated");
        Ok(annotate(validation, outcome.with_checked(recorded.clone())))
    }

    fn check(&self, kind: &ValidationKind, criteria: &[String], timeout: Duration) -> ValidationOutcome {
        match kind {
            ValidationKind::FileExists => self.check_paths(criteria),
            ValidationKind::CommandOutput => self.check_commands(criteria, timeout),
            ValidationKind::Custom => {
                ValidationOutcome::fail("custom validation cannot be checked automatically")
            }
            ValidationKind::Other(kind) => {
                ValidationOutcome::fail(format!("unsupported validation type '{kind}'"))
            }
        }
    }

    fn check_paths(&self, paths: &[String]) -> ValidationOutcome {
        for path in paths {
            let resolved = self.env.resolve_path(path);
            if !resolved.exists() {
                return ValidationOutcome::fail(format!("path does not exist: {path}"));
            }
        }
        ValidationOutcome::pass(format!("path exists: {}", paths.join(", ")))
    }

    fn check_commands(&self, commands: &[String], timeout: Duration) -> ValidationOutcome {
        if self.policy == CommandPolicy::Deny {
            warn!(commands = commands.len(), "command validation denied by policy");
            return ValidationOutcome::fail(format!(
                "command validation disabled: {}",
                commands.join("; ")
            ));
        }
        for command in commands {
            let label = format!("validation command `{command}`");
            let output = shell_command(&self.env.shell, command, Some(&self.env.workdir))
                .and_then(|cmd| {
                    run_command_with_timeout(cmd, &label, None, timeout, self.env.output_limit_bytes)
                });
            match output {
                Ok(output) if output.success() => {}
                Ok(output) => return ValidationOutcome::fail(output.failure_summary(&label)),
                Err(err) => return ValidationOutcome::fail(format!("{err:#}")),
            }
        }
        ValidationOutcome::pass(format!("commands succeeded: {}", commands.join("; ")))
    }
}

fn render_criteria(
    validation: &Validation,
    context: &SharedContext,
) -> std::result::Result<Vec<String>, ValidationOutcome> {
    let mut criteria = Vec::new();
    for raw in validation.criteria.items() {
        let rendered =
            render_template(raw, context).map_err(|err| ValidationOutcome::fail(format!("{err:#}")))?;
        criteria.push(rendered);
    }
    if criteria.is_empty() {
        return Err(ValidationOutcome::fail("validation declares no criteria"));
    }
    Ok(criteria)
}

/// Prefix a failure with the declared message, if any.
fn annotate(validation: &Validation, outcome: ValidationOutcome) -> ValidationOutcome {
    match (&validation.message, outcome.success) {
        (Some(declared), false) => ValidationOutcome {
            message: format!("{}: {}", declared, outcome.message),
            ..outcome
        },
        _ => outcome,
    }
}
