//! Registry credentials from the host's Docker config
//!
//! Reads `$DOCKER_CONFIG/config.json` (or `~/.docker/config.json`) once per
//! registry. Both the base64 `auth` form and `identitytoken` entries are
//! understood. Lookup failures of any kind mean anonymous access; they are
//! never fatal.

use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Credentials for one registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegistryCredential {
    /// Anonymous access
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    /// Identity/access token from a prior `docker login`
    Token {
        token: String,
    },
}

impl RegistryCredential {
    /// The `Authorization` header value, if any.
    pub fn authorization_header(&self) -> Option<String> {
        match self {
            RegistryCredential::None => None,
            RegistryCredential::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                Some(format!("Basic {}", encoded))
            }
            RegistryCredential::Token { token } => Some(format!("Bearer {}", token)),
        }
    }
}

#[derive(Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    identitytoken: Option<String>,
}

/// Load credentials for `registry` from the Docker config file.
pub fn load_registry_auth(registry: &str) -> RegistryCredential {
    let Some(path) = docker_config_path() else {
        return RegistryCredential::None;
    };
    let Ok(content) = std::fs::read_to_string(&path) else {
        return RegistryCredential::None;
    };
    let Ok(config) = serde_json::from_str::<DockerConfig>(&content) else {
        debug!("ignoring unparsable docker config at {}", path.display());
        return RegistryCredential::None;
    };
    let candidates = [
        registry.to_string(),
        format!("https://{}", registry),
        format!("http://{}", registry),
    ];
    for key in candidates {
        if let Some(entry) = config.auths.get(&key) {
            if let Some(token) = &entry.identitytoken {
                if !token.is_empty() {
                    return RegistryCredential::Token {
                        token: token.clone(),
                    };
                }
            }
            if let Some(auth) = &entry.auth {
                if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(auth) {
                    if let Ok(decoded) = String::from_utf8(decoded) {
                        if let Some((username, password)) = decoded.split_once(':') {
                            return RegistryCredential::Basic {
                                username: username.to_string(),
                                password: password.to_string(),
                            };
                        }
                    }
                }
            }
            return RegistryCredential::None;
        }
    }
    RegistryCredential::None
}

fn docker_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir).join("config.json"));
        }
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".docker").join("config.json"))
}
