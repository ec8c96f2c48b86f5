//! Semantic plan invariants not expressible via JSON Schema.

use std::collections::{HashMap, HashSet};

use crate::plan::Plan;

/// Check structural invariants of a plan:
/// - Every id is non-empty and unique
/// - No action depends on itself
/// - Every dependency names an action in the plan
/// - The dependency graph is acyclic
/// - No id of a superseded action is reused
///
/// Violations do not stop execution (affected actions simply never become
/// ready) but `check` reports them up front.
pub fn validate_invariants(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let ids: HashSet<&str> = plan.actions.iter().map(|a| a.id.as_str()).collect();
    let retired: HashSet<&str> = plan.superseded.iter().map(|a| a.id.as_str()).collect();

    for (index, action) in plan.actions.iter().enumerate() {
        if action.id.trim().is_empty() {
            errors.push(format!("action {index}: id must not be empty"));
        } else if !seen.insert(action.id.as_str()) {
            errors.push(format!("duplicate id '{}' at action {index}", action.id));
        }
        if retired.contains(action.id.as_str()) {
            errors.push(format!("action '{}' reuses a superseded id", action.id));
        }

        for dep in &action.dependencies {
            if dep == &action.id {
                errors.push(format!("action '{}' depends on itself", action.id));
            } else if !ids.contains(dep.as_str()) {
                errors.push(format!(
                    "action '{}' depends on missing action '{}'",
                    action.id, dep
                ));
            }
        }
    }

    let cyclic = cycle_members(plan);
    if !cyclic.is_empty() {
        let members: Vec<&str> = plan
            .actions
            .iter()
            .map(|a| a.id.as_str())
            .filter(|id| cyclic.contains(id))
            .collect();
        errors.push(format!("dependency cycle through: {}", members.join(", ")));
    }

    errors
}

/// Explain, per unsettled action, why it cannot run.
pub fn blocked_reasons(plan: &Plan) -> Vec<String> {
    let mut by_id = HashMap::new();
    for action in &plan.actions {
        by_id.entry(action.id.as_str()).or_insert(action);
    }
    let cyclic = cycle_members(plan);
    let mut reasons = Vec::new();

    for action in plan.actions.iter().filter(|a| !a.is_settled()) {
        if cyclic.contains(action.id.as_str()) {
            reasons.push(format!(
                "action '{}' is part of a dependency cycle",
                action.id
            ));
            continue;
        }
        for dep in &action.dependencies {
            match by_id.get(dep.as_str()) {
                None => reasons.push(format!(
                    "action '{}' depends on missing action '{}'",
                    action.id, dep
                )),
                Some(found) if found.failed() => reasons.push(format!(
                    "action '{}' depends on failed action '{}'",
                    action.id, dep
                )),
                Some(found) if !found.is_settled() => reasons.push(format!(
                    "action '{}' waits on blocked action '{}'",
                    action.id, dep
                )),
                Some(_) => {}
            }
        }
    }

    reasons
}

/// Ids of actions that can reach themselves through dependency edges.
fn cycle_members(plan: &Plan) -> HashSet<&str> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for action in &plan.actions {
        edges
            .entry(action.id.as_str())
            .or_default()
            .extend(action.dependencies.iter().map(String::as_str));
    }

    let mut members = HashSet::new();
    for start in edges.keys() {
        let mut stack: Vec<&str> = edges[start].clone();
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == *start {
                members.insert(*start);
                break;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(next) = edges.get(node) {
                stack.extend(next.iter().copied());
            }
        }
    }
    members
}
