//! Feature model and option resolution
//!
//! Everything a feature carries: the option values requested in
//! devcontainer.json, the `devcontainer-feature.json` metadata, the resolved
//! per-feature plan node, and the aggregate plan. Identity is key-based:
//! every resolved feature gets a `dependencyKey` of
//! `source:digest:hash(options)` which dedupes requests and drives ordering.

use crate::errors::{FeatureError, GodevError, Result};
use crate::feature_ref::{normalize_feature_id, FeatureReference};
use crate::lifecycle::LifecycleCommands;
use crate::mount::MountSpec;
use crate::variable::expand_variables;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// In-image base directory for installed features.
pub const FEATURE_IMAGE_BASE_DIR: &str = "/usr/local/share/devcontainer/features";

/// A feature option value: exactly a string or a bool. `null` and numbers are
/// rejected at decode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureOptionValue {
    String(String),
    Bool(bool),
}

impl FeatureOptionValue {
    /// The string form used in env files and option hashes; bools become
    /// `"true"`/`"false"`.
    pub fn string_value(&self) -> String {
        match self {
            FeatureOptionValue::String(s) => s.clone(),
            FeatureOptionValue::Bool(true) => "true".to_string(),
            FeatureOptionValue::Bool(false) => "false".to_string(),
        }
    }

    fn matches_type(&self, expected: &str) -> bool {
        match expected {
            "string" => matches!(self, FeatureOptionValue::String(_)),
            "boolean" => matches!(self, FeatureOptionValue::Bool(_)),
            _ => false,
        }
    }
}

impl<'de> Deserialize<'de> for FeatureOptionValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => Ok(FeatureOptionValue::String(s)),
            serde_json::Value::Bool(b) => Ok(FeatureOptionValue::Bool(b)),
            serde_json::Value::Null => Err(de::Error::custom("feature option value cannot be null")),
            other => Err(de::Error::custom(format!(
                "unsupported feature option value: {}",
                other
            ))),
        }
    }
}

/// User-supplied option values for one feature.
pub type FeatureOptions = BTreeMap<String, FeatureOptionValue>;

/// The `features` map of a configuration: feature id to options.
pub type FeatureSet = BTreeMap<String, FeatureOptions>;

/// Decode a `features` map. A bare version string is expanded to
/// `{"version": "<s>"}`; empty ids and `null` entries are rejected.
pub fn de_feature_set<'de, D>(deserializer: D) -> std::result::Result<FeatureSet, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(FeatureSet::new());
    };
    let mut parsed = FeatureSet::new();
    for (key, value) in raw {
        if key.trim().is_empty() {
            return Err(de::Error::custom("feature id cannot be empty"));
        }
        match value {
            serde_json::Value::Null => {
                return Err(de::Error::custom(format!(
                    "feature {} options cannot be null",
                    key
                )));
            }
            serde_json::Value::String(version) => {
                let mut options = FeatureOptions::new();
                options.insert("version".to_string(), FeatureOptionValue::String(version));
                parsed.insert(key, options);
            }
            serde_json::Value::Object(map) => {
                let mut options = FeatureOptions::new();
                for (opt_key, opt_value) in map {
                    if opt_key.trim().is_empty() {
                        return Err(de::Error::custom("feature option key cannot be empty"));
                    }
                    let parsed_value: FeatureOptionValue =
                        serde_json::from_value(opt_value).map_err(|e| {
                            de::Error::custom(format!("feature {} option {}: {}", key, opt_key, e))
                        })?;
                    options.insert(opt_key, parsed_value);
                }
                parsed.insert(key, options);
            }
            _ => {
                return Err(de::Error::custom(format!(
                    "feature {} options must be string or object",
                    key
                )));
            }
        }
    }
    Ok(parsed)
}

/// An option declared in feature metadata.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeatureOptionDefinition {
    /// `string` or `boolean`
    #[serde(rename = "type", default)]
    pub option_type: String,
    #[serde(default)]
    pub default: Option<FeatureOptionValue>,
    #[serde(rename = "enum", default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub proposals: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A mount contributed by feature metadata.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FeatureMount {
    #[serde(rename = "type")]
    pub mount_type: String,
    #[serde(default)]
    pub source: Option<String>,
    pub target: String,
}

/// The `devcontainer-feature.json` payload.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "documentationURL", default)]
    pub documentation_url: Option<String>,
    #[serde(rename = "licenseURL", default)]
    pub license_url: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, FeatureOptionDefinition>,
    #[serde(default)]
    pub container_env: HashMap<String, String>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub init: Option<bool>,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub security_opt: Vec<String>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub customizations: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "de_feature_set")]
    pub depends_on: FeatureSet,
    #[serde(default)]
    pub installs_after: Vec<String>,
    #[serde(default)]
    pub legacy_ids: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub mounts: Vec<FeatureMount>,
    #[serde(default)]
    pub on_create_command: Option<LifecycleCommands>,
    #[serde(default)]
    pub update_content_command: Option<LifecycleCommands>,
    #[serde(default)]
    pub post_create_command: Option<LifecycleCommands>,
    #[serde(default)]
    pub post_start_command: Option<LifecycleCommands>,
    #[serde(default)]
    pub post_attach_command: Option<LifecycleCommands>,
}

/// Read and decode `devcontainer-feature.json` from a feature directory.
pub fn read_feature_metadata(feature_dir: &Path) -> Result<FeatureMetadata> {
    let path = feature_dir.join("devcontainer-feature.json");
    let content = std::fs::read_to_string(&path).map_err(FeatureError::Io)?;
    serde_json::from_str(&content).map_err(|e| {
        GodevError::Feature(FeatureError::Parsing {
            message: format!("{}: {}", path.display(), e),
        })
    })
}

/// `id`, `version`, and `name` are required.
pub fn validate_feature_metadata(metadata: &FeatureMetadata) -> Result<()> {
    if metadata.id.is_empty() || metadata.version.is_empty() || metadata.name.is_empty() {
        return Err(GodevError::Feature(FeatureError::Validation {
            message: "devcontainer-feature.json requires id, version, and name".to_string(),
        }));
    }
    Ok(())
}

/// A local feature's directory basename must match its declared id after
/// normalization.
pub fn validate_feature_dir_name(id: &str, feature_dir: &Path) -> Result<()> {
    let actual = feature_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if normalize_feature_id(id) != normalize_feature_id(&actual) {
        return Err(GodevError::Feature(FeatureError::Validation {
            message: format!("feature directory name {} does not match id {}", actual, id),
        }));
    }
    Ok(())
}

/// Resolved option values for a feature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFeatureOptions {
    /// Declared defaults overridden by user values
    pub values: BTreeMap<String, String>,
    /// Only the values the user explicitly provided
    pub user_values: BTreeMap<String, String>,
}

/// A node of the ordered installation plan.
#[derive(Debug, Clone)]
pub struct ResolvedFeature {
    pub reference: FeatureReference,
    pub metadata: FeatureMetadata,
    /// Extracted (or local) directory holding install.sh and metadata
    pub feature_dir: PathBuf,
    /// In-image directory, assigned by the image builder
    pub image_dir: String,
    pub options: ResolvedFeatureOptions,
    /// `source:digest:hash(options.values)`, the content identity
    pub dependency_key: String,
    pub depends_on_keys: Vec<String>,
    pub installs_after_ids: Vec<String>,
    pub installs_after_keys: Vec<String>,
    /// Normalized identifier for installsAfter matching and override priority
    pub base_name: String,
    /// OCI tag, empty otherwise
    pub tag: String,
    /// Human-readable id with digest
    pub canonical_name: String,
}

/// The aggregate plan: features in installation order plus their merged
/// runtime contributions.
#[derive(Debug, Default)]
pub struct ResolvedFeatures {
    pub order: Vec<ResolvedFeature>,
    pub container_env: HashMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub privileged: bool,
    pub init: Option<bool>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    /// Extraction directories backing `feature_dir` paths; dropped with the plan
    pub(crate) temp_dirs: Vec<tempfile::TempDir>,
}

/// Resolve user option values against the declared definitions.
///
/// Every declared option must have a typed default; user values must match
/// the declared type; unknown user keys are an error (including any user
/// value against a feature that declares no options).
pub fn resolve_feature_options(
    defs: &BTreeMap<String, FeatureOptionDefinition>,
    user: &FeatureOptions,
) -> Result<ResolvedFeatureOptions> {
    if !user.is_empty() && defs.is_empty() {
        return Err(option_error("feature does not declare any options".to_string()));
    }
    for key in user.keys() {
        if !defs.contains_key(key) {
            return Err(option_error(format!("unsupported feature option: {}", key)));
        }
    }
    let mut resolved = ResolvedFeatureOptions::default();
    for (name, def) in defs {
        if def.option_type.is_empty() {
            return Err(option_error(format!("feature option {} missing type", name)));
        }
        let default_ok = def
            .default
            .as_ref()
            .map(|d| d.matches_type(&def.option_type))
            .unwrap_or(false);
        if !default_ok {
            return Err(option_error(format!(
                "feature option {} default does not match type {}",
                name, def.option_type
            )));
        }
        if let Some(value) = user.get(name) {
            if !value.matches_type(&def.option_type) {
                return Err(option_error(format!(
                    "feature option {} expects {}",
                    name, def.option_type
                )));
            }
            let string_value = value.string_value();
            resolved.values.insert(name.clone(), string_value.clone());
            resolved.user_values.insert(name.clone(), string_value);
        } else if let Some(default) = &def.default {
            resolved.values.insert(name.clone(), default.string_value());
        }
    }
    Ok(resolved)
}

/// Normalize an option name into its env-file variable name: non-word
/// characters become `_`, a leading digit/underscore run collapses to one
/// `_`, and the result is uppercased.
pub fn normalize_option_env_name(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let trimmed_len = mapped
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '_')
        .count();
    let clean = if trimmed_len > 0 {
        format!("_{}", &mapped[trimmed_len..])
    } else {
        mapped
    };
    clean.to_uppercase()
}

/// Content identity for deduplication and ordering.
pub fn feature_equality_key(source: &str, digest: &str, values: &BTreeMap<String, String>) -> String {
    format!("{}:{}:{}", source, digest, hash_feature_options(values))
}

/// Request identity for cycle detection and the resolver cache.
pub fn feature_request_key(reference: &FeatureReference, options: &FeatureOptions) -> String {
    let values: BTreeMap<String, String> = options
        .iter()
        .map(|(key, value)| (key.clone(), value.string_value()))
        .collect();
    format!(
        "{}:{}:{}",
        reference.source(),
        normalize_feature_id(reference.id()),
        hash_feature_options(&values)
    )
}

/// Hash sorted `key\0value\0` pairs; `"none"` for an empty map.
pub fn hash_feature_options(options: &BTreeMap<String, String>) -> String {
    if options.is_empty() {
        return "none".to_string();
    }
    let mut hasher = Sha256::new();
    for (key, value) in options {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Digest for a local feature: the hash of its absolute path.
pub fn local_feature_digest(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.display().to_string().as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// Render the `devcontainer-features.env` content: one line per resolved
/// option (normalized name), then the framework variables, all quoted.
pub fn render_feature_env_file(
    options: &BTreeMap<String, String>,
    extra: &BTreeMap<String, String>,
) -> String {
    let mut lines = Vec::with_capacity(options.len() + extra.len());
    for (key, value) in options {
        lines.push(format!(
            "{}={}",
            normalize_option_env_name(key),
            quote_env_value(value)
        ));
    }
    for (key, value) in extra {
        lines.push(format!("{}={}", key, quote_env_value(value)));
    }
    format!("{}\n", lines.join("\n"))
}

/// Quote a value for the env file: wrap in double quotes, escaping `\`, `"`,
/// and `$`.
pub fn quote_env_value(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$");
    format!("\"{}\"", escaped)
}

/// Runtime configuration contributed by the ordered features.
#[derive(Debug, Default)]
pub struct FeatureContributions {
    pub container_env: HashMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub privileged: bool,
    pub init: Option<bool>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
}

/// Merge each feature's contributions in installation order: later env wins,
/// mounts append, capabilities and security options dedupe preserving
/// first-seen order, privileged ORs, and any feature asking for init wins.
pub fn aggregate_feature_config(features: &[ResolvedFeature]) -> FeatureContributions {
    let mut contributions = FeatureContributions::default();
    for feature in features {
        for (key, value) in &feature.metadata.container_env {
            contributions
                .container_env
                .insert(key.clone(), value.clone());
        }
        for mount in &feature.metadata.mounts {
            contributions.mounts.push(MountSpec::Parsed {
                mount_type: mount.mount_type.clone(),
                source: mount.source.clone(),
                target: mount.target.clone(),
            });
        }
        if feature.metadata.privileged {
            contributions.privileged = true;
        }
        if feature.metadata.init == Some(true) {
            contributions.init = Some(true);
        }
        append_unique(&mut contributions.cap_add, &feature.metadata.cap_add);
        append_unique(&mut contributions.security_opt, &feature.metadata.security_opt);
    }
    contributions
}

/// Append values not already present, skipping empty strings.
pub fn append_unique(items: &mut Vec<String>, values: &[String]) {
    for value in values {
        if value.is_empty() || items.contains(value) {
            continue;
        }
        items.push(value.clone());
    }
}

/// Resolve a feature's entrypoint path, expanding variables and rooting
/// relative paths at the feature's image directory.
pub fn feature_entrypoint_path(
    feature: &ResolvedFeature,
    vars: &HashMap<String, String>,
) -> Result<Option<String>> {
    let Some(entrypoint) = &feature.metadata.entrypoint else {
        return Ok(None);
    };
    if entrypoint.is_empty() {
        return Ok(None);
    }
    let mut entrypoint = entrypoint.clone();
    if entrypoint.contains("${") {
        entrypoint = expand_variables(&entrypoint, vars, None)?;
    }
    if !entrypoint.starts_with('/') {
        entrypoint = format!("{}/{}", feature.image_dir.trim_end_matches('/'), entrypoint);
    }
    Ok(Some(entrypoint))
}

fn option_error(message: String) -> GodevError {
    GodevError::Feature(FeatureError::Option { message })
}
