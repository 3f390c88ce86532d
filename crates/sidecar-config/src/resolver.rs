//! Environment variable resolver
//!
//! Substitutes `${VAR}` and `${VAR:-default}` in raw configuration text
//! before it is parsed.

use crate::{ConfigError, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env var pattern")
});

/// Variables available for substitution
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// Environment variables (can be overridden)
    pub env_vars: HashMap<String, String>,
    /// Fail on unset variables without a default instead of leaving them as-is
    pub strict: bool,
}

impl ResolutionContext {
    /// Create a context from the process environment
    pub fn from_env() -> Self {
        Self {
            env_vars: std::env::vars().collect(),
            strict: false,
        }
    }

    /// Fail on unset variables
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Add or update a variable
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env_vars.insert(key.into(), value.into());
    }
}

/// Resolve all variables in a string
///
/// Unset variables with a default take the default. Without one they are an
/// error in strict mode and left verbatim otherwise.
pub fn resolve_string(input: &str, context: &ResolutionContext) -> Result<String> {
    let mut missing = Vec::new();

    let resolved = ENV_VAR.replace_all(input, |cap: &Captures<'_>| {
        let name = &cap[1];
        match (context.env_vars.get(name), cap.get(2)) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                cap[0].to_string()
            }
        }
    });

    if context.strict && !missing.is_empty() {
        return Err(ConfigError::EnvVarNotFound(missing.join(", ")));
    }
    Ok(resolved.into_owned())
}

/// Names of all variables referenced in a string
pub fn find_references(input: &str) -> Vec<String> {
    let mut names: Vec<String> = ENV_VAR
        .captures_iter(input)
        .map(|cap| cap[1].to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}
