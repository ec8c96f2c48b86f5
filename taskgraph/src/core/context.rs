//! Shared context threaded through a plan.
//!
//! The context is seeded once by the planner and then only grows through
//! derived facts recorded after an action succeeds. Each write bumps the
//! version so later actions can tell which state they observed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::plan::ActionType;

/// Closed set of keys the engine derives from successful actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    LastCreatedDir,
    LastCreatedFile,
    LastVenvPath,
    LastInstalledPackages,
    LastCommand,
}

impl ContextKey {
    pub const ALL: [ContextKey; 5] = [
        ContextKey::LastCreatedDir,
        ContextKey::LastCreatedFile,
        ContextKey::LastVenvPath,
        ContextKey::LastInstalledPackages,
        ContextKey::LastCommand,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContextKey::LastCreatedDir => "last_created_dir",
            ContextKey::LastCreatedFile => "last_created_file",
            ContextKey::LastVenvPath => "last_venv_path",
            ContextKey::LastInstalledPackages => "last_installed_packages",
            ContextKey::LastCommand => "last_command",
        }
    }

    /// Keys an action of the given type is allowed to write.
    pub fn produced_by(action_type: ActionType) -> &'static [ContextKey] {
        match action_type {
            ActionType::CreateDirectory => &[ContextKey::LastCreatedDir],
            ActionType::CreateFile => &[ContextKey::LastCreatedFile],
            ActionType::CreateVirtualEnvironment => &[ContextKey::LastVenvPath],
            ActionType::InstallDependencies => &[ContextKey::LastInstalledPackages],
            ActionType::RunCommand => &[ContextKey::LastCommand],
            ActionType::CustomAction => &[],
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One derived fact reported by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub key: ContextKey,
    pub value: Value,
}

impl Fact {
    pub fn new(key: ContextKey, value: impl Into<Value>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    #[serde(default)]
    version: u64,
    #[serde(default)]
    entries: Map<String, Value>,
}

impl SharedContext {
    pub fn seeded(entries: Map<String, Value>) -> Self {
        Self {
            version: 0,
            entries,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_str(&self, key: ContextKey) -> Option<&str> {
        self.entries.get(key.as_str()).and_then(Value::as_str)
    }

    /// Record facts produced by a successful action of `action_type`.
    ///
    /// Facts for keys the type does not produce are dropped. Returns the keys
    /// that were written; the version moves only when something was written.
    pub fn absorb(&mut self, action_type: ActionType, facts: &[Fact]) -> Vec<ContextKey> {
        let allowed = ContextKey::produced_by(action_type);
        let mut written = Vec::new();
        for fact in facts {
            if !allowed.contains(&fact.key) {
                continue;
            }
            self.entries
                .insert(fact.key.as_str().to_string(), fact.value.clone());
            written.push(fact.key);
        }
        if !written.is_empty() {
            self.version += 1;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absorb_writes_allowed_keys_and_bumps_version() {
        let mut context = SharedContext::default();
        let written = context.absorb(
            ActionType::CreateDirectory,
            &[Fact::new(ContextKey::LastCreatedDir, "/tmp/x")],
        );
        assert_eq!(written, vec![ContextKey::LastCreatedDir]);
        assert_eq!(context.get_str(ContextKey::LastCreatedDir), Some("/tmp/x"));
        assert_eq!(context.version(), 1);
    }

    #[test]
    fn absorb_drops_keys_foreign_to_the_action_type() {
        let mut context = SharedContext::default();
        let written = context.absorb(
            ActionType::RunCommand,
            &[Fact::new(ContextKey::LastCreatedFile, "/etc/passwd")],
        );
        assert!(written.is_empty());
        assert_eq!(context.get("last_created_file"), None);
        assert_eq!(context.version(), 0);
    }

    #[test]
    fn seeded_entries_are_visible_and_overwritable() {
        let mut entries = Map::new();
        entries.insert("last_created_dir".to_string(), json!("seed"));
        entries.insert("project".to_string(), json!("demo"));
        let mut context = SharedContext::seeded(entries);

        context.absorb(
            ActionType::CreateDirectory,
            &[Fact::new(ContextKey::LastCreatedDir, "app")],
        );
        assert_eq!(context.get_str(ContextKey::LastCreatedDir), Some("app"));
        assert_eq!(context.get("project"), Some(&json!("demo")));
    }

    #[test]
    fn custom_action_produces_no_keys() {
        assert!(ContextKey::produced_by(ActionType::CustomAction).is_empty());
        for key in ContextKey::ALL {
            let producers = ActionType::ALL
                .into_iter()
                .filter(|ty| ContextKey::produced_by(*ty).contains(&key))
                .count();
            assert_eq!(producers, 1, "{key} must have exactly one producer");
        }
    }
}
