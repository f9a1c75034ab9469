//! Variable expansion
//!
//! Expands `${...}` tokens in configuration strings. Supported forms:
//!
//! - `${localEnv:NAME}` / `${localEnv:NAME:default}`: host environment,
//!   falling back to the default, falling back to empty
//! - `${containerEnv:NAME}`: the container environment map, falling back to
//!   the host environment
//! - `${NAME}`: the predefined variables map (`localWorkspaceFolder`,
//!   `containerWorkspaceFolder`, `devcontainerId`, ...), then the container
//!   environment map, then a non-empty host variable; anything else is an
//!   error
//!
//! Env-map merging walks base then overlay, expanding each value against the
//! accumulated result so later entries can reference earlier keys.

use crate::errors::{GodevError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("variable pattern is valid"))
}

/// Expand every `${...}` token in `input`.
pub fn expand_variables(
    input: &str,
    vars: &HashMap<String, String>,
    container_env: Option<&HashMap<String, String>>,
) -> Result<String> {
    let pattern = variable_pattern();
    if !pattern.is_match(input) {
        return Ok(input.to_string());
    }
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for capture in pattern.captures_iter(input) {
        let whole = capture.get(0).ok_or_else(|| {
            GodevError::Internal("variable pattern produced no match".to_string())
        })?;
        let token = capture
            .get(1)
            .ok_or_else(|| GodevError::Internal("variable pattern has no group".to_string()))?
            .as_str();
        out.push_str(&input[last..whole.start()]);
        out.push_str(&resolve_variable(token, vars, container_env)?);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

fn resolve_variable(
    token: &str,
    vars: &HashMap<String, String>,
    container_env: Option<&HashMap<String, String>>,
) -> Result<String> {
    if let Some(rest) = token.strip_prefix("localEnv:") {
        return Ok(resolve_env_variable(rest));
    }
    if let Some(key) = token.strip_prefix("containerEnv:") {
        if let Some(value) = container_env.and_then(|env| env.get(key)) {
            return Ok(value.clone());
        }
        return Ok(resolve_env_variable(key));
    }
    if let Some(value) = vars.get(token) {
        return Ok(value.clone());
    }
    if let Some(value) = container_env.and_then(|env| env.get(token)) {
        return Ok(value.clone());
    }
    if let Ok(value) = std::env::var(token) {
        if !value.is_empty() {
            return Ok(value);
        }
    }
    Err(GodevError::Variable(format!(
        "unsupported variable: {}",
        token
    )))
}

/// Look up a host environment variable, honoring a `NAME:default` suffix.
fn resolve_env_variable(token: &str) -> String {
    let (name, default) = match token.split_once(':') {
        Some((name, default)) => (name, Some(default)),
        None => (token, None),
    };
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.unwrap_or("").to_string(),
    }
}

/// Merge two env maps, expanding each value against the running accumulation.
///
/// Keys are visited in sorted order within each map so the result is
/// deterministic; overlay keys overwrite base keys.
pub fn merge_env_maps(
    base: &HashMap<String, String>,
    overlay: &HashMap<String, String>,
    vars: &HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    let mut merged = HashMap::with_capacity(base.len() + overlay.len());
    for source in [base, overlay] {
        let mut keys: Vec<&String> = source.keys().collect();
        keys.sort();
        for key in keys {
            let expanded = expand_variables(&source[key], vars, Some(&merged))?;
            merged.insert(key.clone(), expanded);
        }
    }
    Ok(merged)
}

/// Serialize an env map to sorted `KEY=VALUE` pairs.
pub fn env_map_to_vec(env: &HashMap<String, String>) -> Vec<String> {
    let mut keys: Vec<&String> = env.keys().collect();
    keys.sort();
    keys.iter()
        .map(|key| format!("{}={}", key, env[*key]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<String, String> {
        HashMap::from([
            ("localWorkspaceFolder".to_string(), "/w".to_string()),
            ("containerWorkspaceFolder".to_string(), "/c".to_string()),
        ])
    }

    #[test]
    fn test_expand_predefined_variables() {
        let out = expand_variables(
            "source=${localWorkspaceFolder},target=${containerWorkspaceFolder}",
            &vars(),
            None,
        )
        .unwrap();
        assert_eq!(out, "source=/w,target=/c");
    }

    #[test]
    fn test_expand_local_env_with_default() {
        std::env::set_var("GODEV_TEST_ENV", "value");
        let out = expand_variables("env=${localEnv:GODEV_TEST_ENV}", &vars(), None).unwrap();
        assert_eq!(out, "env=value");

        let out = expand_variables(
            "env=${localEnv:GODEV_TEST_MISSING_VAR:fallback}",
            &vars(),
            None,
        )
        .unwrap();
        assert_eq!(out, "env=fallback");

        let out =
            expand_variables("env=${localEnv:GODEV_TEST_MISSING_VAR}", &vars(), None).unwrap();
        assert_eq!(out, "env=");
    }

    #[test]
    fn test_container_env_precedence() {
        let container_env = HashMap::from([("PATH_IN_CONTAINER".to_string(), "/usr/bin".into())]);
        let out = expand_variables(
            "${containerEnv:PATH_IN_CONTAINER}",
            &vars(),
            Some(&container_env),
        )
        .unwrap();
        assert_eq!(out, "/usr/bin");
    }

    #[test]
    fn test_unknown_bare_variable_errors() {
        let err = expand_variables("${definitelyNotAVariable}", &vars(), None).unwrap_err();
        assert!(format!("{}", err).contains("unsupported variable"));
    }

    #[test]
    fn test_no_tokens_passthrough() {
        assert_eq!(
            expand_variables("plain text", &vars(), None).unwrap(),
            "plain text"
        );
    }

    #[test]
    fn test_merge_env_maps_accumulates() {
        let base = HashMap::from([("A".to_string(), "1".to_string())]);
        let overlay = HashMap::from([("B".to_string(), "${containerEnv:A}2".to_string())]);
        let merged = merge_env_maps(&base, &overlay, &vars()).unwrap();
        assert_eq!(merged["A"], "1");
        assert_eq!(merged["B"], "12");
    }

    #[test]
    fn test_env_map_to_vec_sorted() {
        let env = HashMap::from([
            ("ZED".to_string(), "3".to_string()),
            ("ALPHA".to_string(), "1".to_string()),
            ("MID".to_string(), "2".to_string()),
        ]);
        assert_eq!(env_map_to_vec(&env), vec!["ALPHA=1", "MID=2", "ZED=3"]);
    }
}
