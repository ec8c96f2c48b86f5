//! Action parameter access and context templating.
//!
//! Path-like parameters may reference context entries with `{{ key }}`. They
//! are rendered right before dispatch (and again by the validator for its
//! criteria) so both sides resolve the same concrete path. File content is
//! never templated.

use anyhow::{Result, anyhow};
use minijinja::{Environment, UndefinedBehavior};
use serde_json::{Map, Value};

use crate::core::context::SharedContext;

/// Parameters rendered against the shared context before dispatch.
pub const TEMPLATED_KEYS: [&str; 5] = ["path", "name", "command", "cwd", "venv"];

/// Render `source` against the context entries. Unknown names are an error.
pub fn render_template(source: &str, context: &SharedContext) -> Result<String> {
    if !source.contains("{{") && !source.contains("{%") {
        return Ok(source.to_string());
    }
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.render_str(source, context.entries())
        .map_err(|err| anyhow!("render '{}': {}", source, err))
}

/// Typed view over an action's `params` object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new(raw: Map<String, Value>) -> Self {
        Self(raw)
    }

    /// Copy `raw` and render every templated string parameter.
    pub fn resolve(raw: &Map<String, Value>, context: &SharedContext) -> Result<Self> {
        let mut resolved = raw.clone();
        for key in TEMPLATED_KEYS {
            if let Some(Value::String(source)) = raw.get(key) {
                let rendered = render_template(source, context)
                    .map_err(|err| err.context(format!("param '{key}'")))?;
                resolved.insert(key.to_string(), Value::String(rendered));
            }
        }
        Ok(Self(resolved))
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            Some(Value::String(value)) if !value.trim().is_empty() => Ok(value),
            Some(Value::String(_)) => Err(anyhow!("param '{key}' is empty")),
            Some(_) => Err(anyhow!("param '{key}' must be a string")),
            None => Err(anyhow!("missing param '{key}'")),
        }
    }

    /// Accepts a JSON array of strings or one whitespace-separated string.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| anyhow!("param '{key}' must contain only strings"))
                })
                .collect(),
            Some(Value::String(value)) => Ok(value.split_whitespace().map(str::to_string).collect()),
            Some(_) => Err(anyhow!("param '{key}' must be a list of strings")),
            None => Err(anyhow!("missing param '{key}'")),
        }
    }
}
