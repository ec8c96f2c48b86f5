//! Bounded escalation state machine around execution passes.
//!
//! `Executing -> {Completed, Error}`, `Error -> Monitoring`,
//! `Monitoring -> {Executing (retry), Completed, Failed}`. Retries are capped
//! by `max_retries`; hitting the cap ends in `Failed`.

use std::fmt;

use anyhow::{Result, anyhow};

use crate::core::classifier::Recommendation;
use crate::core::types::PassOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Executing,
    Error,
    Monitoring,
    Completed,
    Failed,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Completed | CycleState::Failed)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CycleState::Executing => "executing",
            CycleState::Error => "error",
            CycleState::Monitoring => "monitoring",
            CycleState::Completed => "completed",
            CycleState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Decision taken when leaving `Monitoring`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Re-plan and run another pass. `attempt` counts from 1.
    Retry { attempt: u32 },
    Completed,
    Failed { reason: String },
    /// A retry was recommended but the ceiling is reached.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct Escalation {
    state: CycleState,
    attempts: u32,
    max_retries: u32,
}

impl Escalation {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: CycleState::Executing,
            attempts: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Retries taken so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Leave `Executing` with the outcome of one pass.
    pub fn record_pass(&mut self, outcome: &PassOutcome) -> Result<CycleState> {
        self.expect_state(CycleState::Executing, "record pass")?;
        self.state = if outcome.is_completed() {
            CycleState::Completed
        } else {
            CycleState::Error
        };
        Ok(self.state)
    }

    pub fn begin_monitoring(&mut self) -> Result<()> {
        self.expect_state(CycleState::Error, "begin monitoring")?;
        self.state = CycleState::Monitoring;
        Ok(())
    }

    /// Leave `Monitoring` based on the classifier's advice.
    ///
    /// `no_error` completes the cycle after a dispatch fault. After a blocked,
    /// failed or unverified pass it fails the cycle instead, since nothing is left to
    /// remediate and re-running the same plan would stall again.
    pub fn resolve(
        &mut self,
        outcome: &PassOutcome,
        recommendation: &Recommendation,
    ) -> Result<Transition> {
        self.expect_state(CycleState::Monitoring, "resolve recommendation")?;

        if recommendation.is_no_error() {
            return Ok(match outcome {
                PassOutcome::Completed | PassOutcome::Error { .. } => {
                    self.state = CycleState::Completed;
                    Transition::Completed
                }
                PassOutcome::Failed { .. }
                | PassOutcome::Blocked { .. }
                | PassOutcome::Unverified { .. } => {
                    self.state = CycleState::Failed;
                    Transition::Failed {
                        reason: format!("pass {} with no actionable error: {}", outcome.label(), outcome.diagnostic()),
                    }
                }
            });
        }

        if self.attempts >= self.max_retries {
            self.state = CycleState::Failed;
            return Ok(Transition::Exhausted {
                attempts: self.attempts,
            });
        }

        self.attempts += 1;
        self.state = CycleState::Executing;
        Ok(Transition::Retry {
            attempt: self.attempts,
        })
    }

    fn expect_state(&self, expected: CycleState, op: &str) -> Result<()> {
        if self.state != expected {
            return Err(anyhow!(
                "cannot {} in state {} (expected {})",
                op,
                self.state,
                expected
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch_error() -> PassOutcome {
        PassOutcome::Error {
            action_id: "a".to_string(),
            message: "boom".to_string(),
        }
    }

    fn install(name: &str) -> Recommendation {
        Recommendation::InstallModule(name.to_string())
    }

    #[test]
    fn completed_pass_is_terminal() {
        let mut escalation = Escalation::new(3);
        assert_eq!(
            escalation.record_pass(&PassOutcome::Completed).expect("record"),
            CycleState::Completed
        );
        assert!(escalation.state().is_terminal());
        assert!(escalation.begin_monitoring().is_err());
    }

    #[test]
    fn no_error_after_dispatch_fault_completes() {
        let mut escalation = Escalation::new(3);
        escalation.record_pass(&dispatch_error()).expect("record");
        escalation.begin_monitoring().expect("monitor");
        let transition = escalation
            .resolve(&dispatch_error(), &Recommendation::NoError)
            .expect("resolve");
        assert_eq!(transition, Transition::Completed);
        assert_eq!(escalation.state(), CycleState::Completed);
    }

    #[test]
    fn no_error_after_blocked_pass_fails() {
        let outcome = PassOutcome::Blocked {
            pending: vec!["b".to_string()],
            reason: "action 'b' depends on missing action 'x'".to_string(),
        };
        let mut escalation = Escalation::new(3);
        escalation.record_pass(&outcome).expect("record");
        escalation.begin_monitoring().expect("monitor");
        match escalation.resolve(&outcome, &Recommendation::NoError).expect("resolve") {
            Transition::Failed { reason } => assert!(reason.contains("missing action 'x'")),
            other => panic!("expected failed, got {other:?}"),
        }
    }

    #[test]
    fn no_error_after_failed_verification_fails() {
        let outcome = PassOutcome::Unverified {
            message: "verify command exited with status 2".to_string(),
        };
        let mut escalation = Escalation::new(3);
        escalation.record_pass(&outcome).expect("record");
        escalation.begin_monitoring().expect("monitor");
        match escalation.resolve(&outcome, &Recommendation::NoError).expect("resolve") {
            Transition::Failed { reason } => assert!(reason.starts_with("pass unverified"), "{reason}"),
            other => panic!("expected failed, got {other:?}"),
        }
        assert_eq!(escalation.state(), CycleState::Failed);
    }

    #[test]
    fn retries_until_ceiling_then_exhausts() {
        let mut escalation = Escalation::new(2);
        for expected in 1..=2 {
            escalation.record_pass(&dispatch_error()).expect("record");
            escalation.begin_monitoring().expect("monitor");
            assert_eq!(
                escalation.resolve(&dispatch_error(), &install("foo")).expect("resolve"),
                Transition::Retry { attempt: expected }
            );
            assert_eq!(escalation.state(), CycleState::Executing);
        }
        escalation.record_pass(&dispatch_error()).expect("record");
        escalation.begin_monitoring().expect("monitor");
        assert_eq!(
            escalation.resolve(&dispatch_error(), &install("foo")).expect("resolve"),
            Transition::Exhausted { attempts: 2 }
        );
        assert_eq!(escalation.state(), CycleState::Failed);
    }

    #[test]
    fn zero_retries_exhausts_immediately() {
        let mut escalation = Escalation::new(0);
        escalation.record_pass(&dispatch_error()).expect("record");
        escalation.begin_monitoring().expect("monitor");
        assert_eq!(
            escalation.resolve(&dispatch_error(), &install("foo")).expect("resolve"),
            Transition::Exhausted { attempts: 0 }
        );
    }

    #[test]
    fn out_of_order_transitions_are_rejected() {
        let mut escalation = Escalation::new(1);
        let err = escalation
            .resolve(&dispatch_error(), &Recommendation::NoError)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot resolve recommendation in state executing (expected monitoring)"
        );
    }
}
