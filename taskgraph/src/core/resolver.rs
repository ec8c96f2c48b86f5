//! Deterministic selection of the next runnable action.

use std::collections::HashMap;

use crate::core::invariants::blocked_reasons;
use crate::plan::{Action, Plan};

/// Result of one selection step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Index into `plan.actions` of the first ready action.
    Ready(usize),
    /// No unsettled actions remain.
    Complete,
    /// Unsettled actions remain but none is ready.
    Blocked { pending: Vec<String>, reason: String },
}

/// Success flag per id. The first action with a given id wins.
fn success_index(plan: &Plan) -> HashMap<&str, bool> {
    let mut index = HashMap::with_capacity(plan.actions.len());
    for action in &plan.actions {
        index
            .entry(action.id.as_str())
            .or_insert_with(|| action.succeeded());
    }
    index
}

fn ready(action: &Action, successes: &HashMap<&str, bool>) -> bool {
    !action.is_settled()
        && action
            .dependencies
            .iter()
            .all(|dep| successes.get(dep.as_str()).copied().unwrap_or(false))
}

/// First unsettled action, in declaration order, whose dependencies all succeeded.
pub fn next_ready_action(plan: &Plan) -> Option<usize> {
    let successes = success_index(plan);
    plan.actions
        .iter()
        .position(|action| ready(action, &successes))
}

/// Select the next action or explain why there is none.
pub fn select(plan: &Plan) -> Selection {
    if let Some(index) = next_ready_action(plan) {
        return Selection::Ready(index);
    }
    let pending = plan.unsettled_ids();
    if pending.is_empty() {
        return Selection::Complete;
    }
    let reason = blocked_reasons(plan).join("; ");
    Selection::Blocked { pending, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{action, failed, plan_of, succeeded};

    #[test]
    fn picks_first_ready_in_declaration_order() {
        let plan = plan_of(vec![
            action("b", &["a"]),
            action("a", &[]),
            action("c", &[]),
        ]);
        assert_eq!(select(&plan), Selection::Ready(1));
    }

    #[test]
    fn dependency_on_success_unlocks_action() {
        let mut plan = plan_of(vec![action("a", &[]), action("b", &["a"])]);
        plan.actions[0].result = Some(succeeded());
        assert_eq!(select(&plan), Selection::Ready(1));
        assert_eq!(next_ready_action(&plan), Some(1));
    }

    #[test]
    fn failed_dependency_blocks() {
        let mut plan = plan_of(vec![action("a", &[]), action("b", &["a"])]);
        plan.actions[0].result = Some(failed("nope"));
        match select(&plan) {
            Selection::Blocked { pending, reason } => {
                assert_eq!(pending, vec!["b".to_string()]);
                assert!(reason.contains("failed action 'a'"), "{reason}");
            }
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn missing_dependency_blocks() {
        let plan = plan_of(vec![action("a", &["ghost"])]);
        match select(&plan) {
            Selection::Blocked { pending, reason } => {
                assert_eq!(pending, vec!["a".to_string()]);
                assert!(reason.contains("missing action 'ghost'"), "{reason}");
            }
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn cycle_blocks() {
        let plan = plan_of(vec![action("a", &["b"]), action("b", &["a"])]);
        match select(&plan) {
            Selection::Blocked { pending, reason } => {
                assert_eq!(pending.len(), 2);
                assert!(reason.contains("cycle"), "{reason}");
            }
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn all_settled_is_complete_even_with_failures() {
        let mut plan = plan_of(vec![action("a", &[]), action("b", &[])]);
        plan.actions[0].result = Some(succeeded());
        plan.actions[1].result = Some(failed("bad"));
        assert_eq!(select(&plan), Selection::Complete);
    }

    #[test]
    fn empty_plan_is_complete() {
        assert_eq!(select(&plan_of(Vec::new())), Selection::Complete);
    }
}
