//! Configuration model and JSONC loader
//!
//! Decodes `devcontainer.json` into [`DevcontainerConfig`]. The file is JSONC:
//! comments are stripped with a character-level pass before `serde_json`
//! decoding. Several fields are polymorphic (string-or-array, number-or-
//! string, string-or-object); each gets a dedicated decoder that branches on
//! the JSON value shape.

use crate::errors::{ConfigError, GodevError, Result};
use crate::features::{de_feature_set, FeatureSet};
use crate::lifecycle::LifecycleCommands;
use crate::mount::MountSpec;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The decoded devcontainer.json configuration.
///
/// Exactly one of `image`, `build`, or (`docker_compose_file` + `service`)
/// must be present; [`validate_config`] enforces this.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DevcontainerConfig {
    pub name: Option<String>,
    pub image: Option<String>,
    pub build: Option<DevcontainerBuild>,
    #[serde(deserialize_with = "de_string_slice")]
    pub docker_compose_file: Vec<String>,
    pub service: Option<String>,
    pub run_services: Vec<String>,
    pub shutdown_action: Option<String>,
    #[serde(deserialize_with = "de_port_list")]
    pub forward_ports: Vec<String>,
    #[serde(deserialize_with = "de_port_list")]
    pub app_port: Vec<String>,
    pub container_env: HashMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub workspace_mount: Option<String>,
    pub workspace_folder: Option<String>,
    pub run_args: Vec<String>,
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub init: Option<bool>,
    pub container_user: Option<String>,
    pub remote_user: Option<String>,
    pub remote_env: HashMap<String, String>,
    #[serde(deserialize_with = "de_feature_set")]
    pub features: FeatureSet,
    pub override_feature_install_order: Vec<String>,
    pub override_command: Option<bool>,
    pub initialize_command: Option<LifecycleCommands>,
    pub on_create_command: Option<LifecycleCommands>,
    pub update_content_command: Option<LifecycleCommands>,
    pub post_create_command: Option<LifecycleCommands>,
    pub post_start_command: Option<LifecycleCommands>,
    pub post_attach_command: Option<LifecycleCommands>,
}

/// Docker build settings from devcontainer.json.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DevcontainerBuild {
    pub dockerfile: Option<String>,
    pub context: Option<String>,
    pub args: HashMap<String, String>,
    pub target: Option<String>,
    #[serde(deserialize_with = "de_string_slice")]
    pub cache_from: Vec<String>,
    pub options: Vec<String>,
}

/// Decode a string-or-array field into a list. `null` means unset.
fn de_string_slice<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::String(s)) => Ok(vec![s]),
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Ok(s),
                other => Err(de::Error::custom(format!("invalid string list: {}", other))),
            })
            .collect(),
        Some(other) => Err(de::Error::custom(format!("invalid string list: {}", other))),
    }
}

/// Decode a port field: a number, a string, or an array of either. Numbers
/// are normalized to their decimal string form.
fn de_port_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => {
            items.into_iter().map(|item| port_value::<D>(item)).collect()
        }
        Some(single) => Ok(vec![port_value::<D>(single)?]),
    }
}

fn port_value<'de, D>(value: serde_json::Value) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.to_string())
            } else {
                Err(de::Error::custom(format!("invalid port value: {}", n)))
            }
        }
        serde_json::Value::String(s) => Ok(s),
        other => Err(de::Error::custom(format!("invalid port value: {}", other))),
    }
}

/// Strip JSONC comments from `input`.
///
/// A character-level pass with three states: inside a string (honoring
/// backslash escapes), inside a `//` line comment (terminated by a preserved
/// newline), and inside a `/* */` block comment. An unterminated block
/// comment is an error.
pub fn strip_json_comments(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i];
        if in_line_comment {
            if ch == b'\n' {
                in_line_comment = false;
                out.push(ch);
            }
            i += 1;
            continue;
        }
        if in_block_comment {
            if ch == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
                in_block_comment = false;
                i += 1;
            }
            i += 1;
            continue;
        }
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == b'\\' {
                escaped = true;
            } else if ch == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if ch == b'"' {
            in_string = true;
            out.push(ch);
            i += 1;
            continue;
        }
        if ch == b'/' && i + 1 < bytes.len() {
            if bytes[i + 1] == b'/' {
                in_line_comment = true;
                i += 2;
                continue;
            }
            if bytes[i + 1] == b'*' {
                in_block_comment = true;
                i += 2;
                continue;
            }
        }
        out.push(ch);
        i += 1;
    }

    if in_block_comment {
        return Err(GodevError::Config(ConfigError::Parsing {
            message: "unterminated block comment".to_string(),
        }));
    }
    String::from_utf8(out).map_err(|e| {
        GodevError::Config(ConfigError::Parsing {
            message: format!("invalid UTF-8 after comment stripping: {}", e),
        })
    })
}

/// Read devcontainer.json, strip comments, and decode it.
pub fn load_config(path: &Path) -> Result<DevcontainerConfig> {
    debug!("loading configuration from {}", path.display());
    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Decode configuration content (JSONC accepted).
pub fn parse_config(content: &str) -> Result<DevcontainerConfig> {
    let clean = strip_json_comments(content)?;
    serde_json::from_str(&clean).map_err(|e| {
        GodevError::Config(ConfigError::Parsing {
            message: e.to_string(),
        })
    })
}

/// Search `base_dir` for a devcontainer.json and return the first match:
/// `.devcontainer/devcontainer.json`, then `devcontainer.json`.
pub fn find_config_path(base_dir: &Path) -> Result<PathBuf> {
    let candidates = [
        base_dir.join(".devcontainer").join("devcontainer.json"),
        base_dir.join("devcontainer.json"),
    ];
    for candidate in candidates {
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(GodevError::Config(ConfigError::NotFound {
        path: base_dir.display().to_string(),
    }))
}

/// Whether the configuration targets a compose project.
pub fn is_compose_config(cfg: &DevcontainerConfig) -> bool {
    !cfg.docker_compose_file.is_empty() || cfg.service.as_deref().is_some_and(|s| !s.is_empty())
}

/// Enforce the exactly-one-of rule between `image`, `build`, and compose
/// mode, and that compose mode names both its files and the primary service.
pub fn validate_config(cfg: &DevcontainerConfig) -> Result<()> {
    let has_image = cfg.image.as_deref().is_some_and(|s| !s.is_empty());
    if is_compose_config(cfg) {
        if cfg.docker_compose_file.is_empty() {
            return Err(validation("dockerComposeFile is required when using docker compose"));
        }
        if !cfg.service.as_deref().is_some_and(|s| !s.is_empty()) {
            return Err(validation("service is required when using docker compose"));
        }
        if has_image || cfg.build.is_some() {
            return Err(validation(
                "dockerComposeFile cannot be combined with image or build",
            ));
        }
        return Ok(());
    }
    if !has_image && cfg.build.is_none() {
        return Err(validation("devcontainer.json must specify image or build"));
    }
    if has_image && cfg.build.is_some() {
        return Err(validation("both image and build are set in devcontainer.json"));
    }
    Ok(())
}

fn validation(message: &str) -> GodevError {
    GodevError::Config(ConfigError::Validation {
        message: message.to_string(),
    })
}
