//! Mount specifications
//!
//! Two mount shapes exist in a devcontainer configuration: the raw
//! `key=value` string form (`"source=/tmp,target=/work,type=bind"`) and the
//! object form (`{"type": "bind", "source": "/tmp", "target": "/work"}`).
//! [`MountSpec`] captures both as decoded from JSON; [`Mount`] is the fully
//! parsed shape handed to the container engine.

use crate::errors::{ConfigError, GodevError, Result};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt;

/// A mount entry as it appears in devcontainer.json.
///
/// String-form mounts keep their raw text; variable expansion and parsing
/// happen later, once the substitution context exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSpec {
    /// Original string-form mount value
    Raw(String),
    /// Object-form mount; `type` and `target` are required
    Parsed {
        mount_type: String,
        source: Option<String>,
        target: String,
    },
}

impl<'de> Deserialize<'de> for MountSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ObjectForm {
            #[serde(rename = "type")]
            mount_type: Option<String>,
            source: Option<String>,
            target: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Raw(String),
            Object(ObjectForm),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Raw(raw) => Ok(MountSpec::Raw(raw)),
            Repr::Object(obj) => {
                let mount_type = obj
                    .mount_type
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| de::Error::custom("mount requires type and target"))?;
                let target = obj
                    .target
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| de::Error::custom("mount requires type and target"))?;
                Ok(MountSpec::Parsed {
                    mount_type,
                    source: obj.source,
                    target,
                })
            }
        }
    }
}

/// A fully parsed mount, ready for the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mount {
    pub mount_type: String,
    pub source: String,
    pub target: String,
    pub read_only: bool,
    pub consistency: String,
}

impl fmt::Display for Mount {
    /// Renders the `--mount` argument form understood by the engine.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type={}", self.mount_type)?;
        if !self.source.is_empty() {
            write!(f, ",source={}", self.source)?;
        }
        write!(f, ",target={}", self.target)?;
        if self.read_only {
            write!(f, ",readonly")?;
        }
        if !self.consistency.is_empty() {
            write!(f, ",consistency={}", self.consistency)?;
        }
        Ok(())
    }
}

/// Parse a comma-separated `key=value` mount string.
///
/// Recognized keys: `type`, `source`/`src`, `target`/`dst`/`destination`,
/// `consistency`, plus the bare tokens `readonly`/`ro`. Unknown keys are an
/// error. `target` is required; `type` defaults to `volume`.
pub fn parse_mount_string(spec: &str) -> Result<Mount> {
    let mut result = Mount::default();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part == "readonly" || part == "ro" {
            result.read_only = true;
            continue;
        }
        let Some((key, value)) = part.split_once('=') else {
            return Err(invalid(format!("invalid mount option: {}", part)));
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        match key.as_str() {
            "type" => result.mount_type = value.to_string(),
            "source" | "src" => result.source = value.to_string(),
            "target" | "dst" | "destination" => result.target = value.to_string(),
            "consistency" => result.consistency = value.to_string(),
            _ => return Err(invalid(format!("unsupported mount option: {}", key))),
        }
    }
    if result.mount_type.is_empty() {
        result.mount_type = "volume".to_string();
    }
    if result.target.is_empty() {
        return Err(invalid("mount target is required".to_string()));
    }
    Ok(result)
}

/// Convert an object-form [`MountSpec`] into a [`Mount`]. Raw specs must be
/// expanded and parsed with [`parse_mount_string`] instead.
pub fn mount_from_spec(spec: &MountSpec) -> Result<Mount> {
    match spec {
        MountSpec::Raw(raw) => parse_mount_string(raw),
        MountSpec::Parsed {
            mount_type,
            source,
            target,
        } => Ok(Mount {
            mount_type: mount_type.clone(),
            source: source.clone().unwrap_or_default(),
            target: target.clone(),
            ..Mount::default()
        }),
    }
}

fn invalid(message: String) -> GodevError {
    GodevError::Config(ConfigError::Validation { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mount_string_full() {
        let mount =
            parse_mount_string("type=bind,source=/tmp,target=/work,readonly,consistency=cached")
                .unwrap();
        assert_eq!(mount.mount_type, "bind");
        assert_eq!(mount.source, "/tmp");
        assert_eq!(mount.target, "/work");
        assert!(mount.read_only);
        assert_eq!(mount.consistency, "cached");
    }

    #[test]
    fn test_parse_mount_string_defaults_to_volume() {
        let mount = parse_mount_string("target=/data").unwrap();
        assert_eq!(mount.mount_type, "volume");
        assert_eq!(mount.target, "/data");
        assert!(!mount.read_only);
    }

    #[test]
    fn test_parse_mount_string_aliases() {
        let mount = parse_mount_string("type=bind,src=/a,dst=/b").unwrap();
        assert_eq!(mount.source, "/a");
        assert_eq!(mount.target, "/b");
    }

    #[test]
    fn test_parse_mount_string_rejects_unknown_key() {
        assert!(parse_mount_string("type=bind,target=/x,flavor=sweet").is_err());
    }

    #[test]
    fn test_parse_mount_string_requires_target() {
        assert!(parse_mount_string("type=bind,source=/tmp").is_err());
    }

    #[test]
    fn test_mount_spec_decode_string() {
        let spec: MountSpec = serde_json::from_str(r#""source=/s,target=/t,type=bind""#).unwrap();
        assert_eq!(spec, MountSpec::Raw("source=/s,target=/t,type=bind".into()));
    }

    #[test]
    fn test_mount_spec_decode_object() {
        let spec: MountSpec =
            serde_json::from_str(r#"{"type":"volume","target":"/data"}"#).unwrap();
        assert_eq!(
            spec,
            MountSpec::Parsed {
                mount_type: "volume".into(),
                source: None,
                target: "/data".into(),
            }
        );
    }

    #[test]
    fn test_mount_spec_object_requires_type_and_target() {
        assert!(serde_json::from_str::<MountSpec>(r#"{"source":"/tmp"}"#).is_err());
        assert!(serde_json::from_str::<MountSpec>(r#"{"type":"bind"}"#).is_err());
    }

    #[test]
    fn test_mount_display_round_trip() {
        let mount = parse_mount_string("type=bind,source=/s,target=/t,ro").unwrap();
        assert_eq!(mount.to_string(), "type=bind,source=/s,target=/t,readonly");
    }
}
