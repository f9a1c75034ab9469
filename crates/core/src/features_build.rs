//! Feature image building
//!
//! Layers the ordered features over a base image: each feature directory is
//! copied into a build context under `features/NN-<id>/`, gets a
//! `devcontainer-features.env` with its resolved options and the framework
//! user variables, and contributes one `RUN` line to the emitted Dockerfile.

use crate::config::DevcontainerConfig;
use crate::engine::{BuildRequest, ContainerEngine};
use crate::errors::{FeatureError, FetchError, GodevError, Result};
use crate::features::{
    feature_entrypoint_path, render_feature_env_file, ResolvedFeature, FEATURE_IMAGE_BASE_DIR,
};
use crate::workspace::sanitize_name;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, instrument};

/// Build the derived features image and return its tag. With no features the
/// base image is returned untouched.
#[instrument(skip_all, fields(base_image = %base_image))]
pub async fn build_features_image(
    engine: &dyn ContainerEngine,
    base_image: &str,
    base_user: &str,
    workspace_root: &Path,
    devcontainer_id: &str,
    cfg: &DevcontainerConfig,
    features: &mut [ResolvedFeature],
    vars: &HashMap<String, String>,
) -> Result<String> {
    if features.is_empty() {
        return Ok(base_image.to_string());
    }
    let context = tempfile::Builder::new()
        .prefix("godev-features-build-")
        .tempdir()
        .map_err(FetchError::Io)?;
    let features_dir = context.path().join("features");
    std::fs::create_dir_all(&features_dir).map_err(FetchError::Io)?;

    let extra_env = feature_user_env(cfg, base_user);
    for (index, feature) in features.iter_mut().enumerate() {
        let dir_name = format!("{:02}-{}", index + 1, sanitize_name(&feature.metadata.id));
        let dest = features_dir.join(&dir_name);
        copy_dir(&feature.feature_dir, &dest)?;
        feature.image_dir = format!("{}/{}", FEATURE_IMAGE_BASE_DIR, dir_name);

        if let Some(entrypoint) = feature_entrypoint_path(feature, vars)? {
            if !entrypoint.starts_with(&feature.image_dir) {
                return Err(GodevError::Feature(FeatureError::Validation {
                    message: format!("feature entrypoint must be under {}", feature.image_dir),
                }));
            }
        }

        let env_file = render_feature_env_file(&feature.options.values, &extra_env);
        std::fs::write(dest.join("devcontainer-features.env"), env_file)
            .map_err(FetchError::Io)?;
    }

    let dockerfile = features_dockerfile(base_image, base_user, features, vars)?;
    std::fs::write(context.path().join("Dockerfile"), dockerfile).map_err(FetchError::Io)?;

    let tag = features_image_tag(workspace_root, devcontainer_id, features);
    info!("building features image {}", tag);
    engine
        .build_image(&BuildRequest {
            context_dir: context.path().to_path_buf(),
            dockerfile: "Dockerfile".to_string(),
            tags: vec![tag.clone()],
            ..BuildRequest::default()
        })
        .await?;
    Ok(tag)
}

/// Emit the derived Dockerfile: install scripts run as root in resolution
/// order, then the base image's user is restored.
fn features_dockerfile(
    base_image: &str,
    base_user: &str,
    features: &[ResolvedFeature],
    vars: &HashMap<String, String>,
) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("FROM {}\n", base_image));
    out.push_str("USER root\n");
    out.push_str("WORKDIR /\n");
    out.push_str(&format!("COPY features/ {}/\n", FEATURE_IMAGE_BASE_DIR));
    for feature in features {
        out.push_str(&format!("RUN {}\n", feature_install_command(feature, vars)?));
    }
    if !base_user.is_empty() && base_user != "root" {
        out.push_str(&format!("USER {}\n", base_user));
    }
    Ok(out)
}

fn feature_install_command(
    feature: &ResolvedFeature,
    vars: &HashMap<String, String>,
) -> Result<String> {
    let entrypoint_command = match feature_entrypoint_path(feature, vars)? {
        Some(entrypoint) => format!("chmod +x {} && ", entrypoint),
        None => String::new(),
    };
    Ok(format!(
        "set -e; cd {}; chmod +x install.sh; set -a; . ./devcontainer-features.env; set +a; {}./install.sh",
        feature.image_dir, entrypoint_command
    ))
}

/// The derived image tag: `godev-<base>-<devcontainerId>-features-<hex8>`
/// where the suffix hashes the ordered dependency keys.
pub fn features_image_tag(
    workspace_root: &Path,
    devcontainer_id: &str,
    features: &[ResolvedFeature],
) -> String {
    let mut base = sanitize_name(
        &workspace_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    );
    if base.is_empty() {
        base = "devcontainer".to_string();
    }
    let seed = features
        .iter()
        .map(|f| f.dependency_key.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let hex8: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("godev-{}-{}-features-{}", base, devcontainer_id, hex8)
}

/// The framework env vars appended to every feature env file.
pub fn feature_user_env(cfg: &DevcontainerConfig, base_user: &str) -> BTreeMap<String, String> {
    let mut container_user = cfg.container_user.clone().unwrap_or_default();
    if container_user.is_empty() {
        container_user = base_user.to_string();
    }
    if container_user.is_empty() {
        container_user = "root".to_string();
    }
    let mut remote_user = cfg.remote_user.clone().unwrap_or_default();
    if remote_user.is_empty() {
        remote_user = container_user.clone();
    }
    BTreeMap::from([
        ("_CONTAINER_USER".to_string(), container_user.clone()),
        ("_REMOTE_USER".to_string(), remote_user.clone()),
        (
            "_CONTAINER_USER_HOME".to_string(),
            resolve_user_home(&container_user),
        ),
        (
            "_REMOTE_USER_HOME".to_string(),
            resolve_user_home(&remote_user),
        ),
    ])
}

/// `/root` for root-ish users, `/home/<user>` otherwise (group suffix
/// stripped).
fn resolve_user_home(user: &str) -> String {
    let user = user.trim();
    if user.is_empty() || user == "root" || user == "0" {
        return "/root".to_string();
    }
    let user = user.split_once(':').map(|(u, _)| u).unwrap_or(user);
    format!("/home/{}", user)
}

fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(FetchError::Io)?;
    let entries = std::fs::read_dir(source).map_err(FetchError::Io)?;
    for entry in entries {
        let entry = entry.map_err(FetchError::Io)?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(FetchError::Io)?;
        if file_type.is_dir() {
            copy_dir(&path, &target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(&path).map_err(FetchError::Io)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target).map_err(FetchError::Io)?;
            #[cfg(not(unix))]
            std::fs::copy(&path, &target).map(|_| ()).map_err(FetchError::Io)?;
        } else {
            std::fs::copy(&path, &target).map_err(FetchError::Io)?;
        }
    }
    Ok(())
}
