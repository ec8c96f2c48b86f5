//! Deterministic classification of failure text into remediation advice.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;

/// Remediation advice derived from failure text.
///
/// The wire form is `<category>` or `<category>:<detail>`, e.g.
/// `install_module:flask`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recommendation {
    NoError,
    InstallModule(String),
    CheckFilePath(String),
    FixCode(String),
}

impl Recommendation {
    pub fn is_no_error(&self) -> bool {
        matches!(self, Recommendation::NoError)
    }

    pub fn category(&self) -> &'static str {
        match self {
            Recommendation::NoError => "no_error",
            Recommendation::InstallModule(_) => "install_module",
            Recommendation::CheckFilePath(_) => "check_file_path",
            Recommendation::FixCode(_) => "fix_code",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::NoError => f.write_str("no_error"),
            Recommendation::InstallModule(detail)
            | Recommendation::CheckFilePath(detail)
            | Recommendation::FixCode(detail) => write!(f, "{}:{}", self.category(), detail),
        }
    }
}

impl FromStr for Recommendation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (category, detail) = match s.split_once(':') {
            Some((category, detail)) => (category, Some(detail)),
            None => (s, None),
        };
        match (category, detail) {
            ("no_error", None) => Ok(Recommendation::NoError),
            ("install_module", Some(detail)) if !detail.is_empty() => {
                Ok(Recommendation::InstallModule(detail.to_string()))
            }
            ("check_file_path", Some(detail)) if !detail.is_empty() => {
                Ok(Recommendation::CheckFilePath(detail.to_string()))
            }
            ("fix_code", Some(detail)) if !detail.is_empty() => {
                Ok(Recommendation::FixCode(detail.to_string()))
            }
            _ => Err(anyhow!("invalid recommendation '{}'", s)),
        }
    }
}

/// Maps failure text to a recommendation. Must be total.
pub trait ErrorClassifier {
    fn classify(&self, text: &str) -> Recommendation;
}

static MISSING_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"No module named ['"]([^'"]+)['"]"#).unwrap());
static MISSING_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"No such file or directory: ['"]([^'"]+)['"]"#).unwrap());

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Keyword heuristics over Python-style tracebacks.
///
/// Text without `error` or `exception` (case-insensitive) is `no_error`. A
/// missing-module or missing-file signal whose name cannot be extracted falls
/// back to `fix_code:general_error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl ErrorClassifier for HeuristicClassifier {
    fn classify(&self, text: &str) -> Recommendation {
        let lower = text.to_lowercase();
        if !lower.contains("error") && !lower.contains("exception") {
            return Recommendation::NoError;
        }

        if lower.contains("modulenotfounderror")
            && let Some(module) = capture(&MISSING_MODULE, text)
        {
            return Recommendation::InstallModule(module);
        }
        if lower.contains("filenotfounderror")
            && let Some(path) = capture(&MISSING_PATH, text)
        {
            return Recommendation::CheckFilePath(path);
        }
        if lower.contains("nameerror") {
            return Recommendation::FixCode("undefined_variable".to_string());
        }
        Recommendation::FixCode("general_error".to_string())
    }
}
