//! Workspace path resolution
//!
//! Computes the host workspace root, the in-container workspace folder, the
//! workspace mount, and the predefined variable map for one start invocation.
//! The workspace root is the parent of `.devcontainer` when the config lives
//! there, otherwise the config's own directory.

use crate::config::DevcontainerConfig;
use crate::errors::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Resolved workspace identity for a single-container start.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    /// Host directory containing the project
    pub workspace_root: PathBuf,
    /// In-container workspace path
    pub workspace_folder: String,
    /// Workspace mount spec (raw, pre-expansion)
    pub workspace_mount: String,
    /// Predefined variables for `${...}` expansion
    pub vars: HashMap<String, String>,
}

/// Resolve workspace paths and predefined variables for container mode.
///
/// Defaults: `workspaceFolder = /workspaces/<basename(workspaceRoot)>` and
/// `workspaceMount = source=<root>,target=<folder>,type=bind`.
pub fn resolve_workspace_paths(
    config_path: &Path,
    cfg: &DevcontainerConfig,
) -> Result<WorkspacePaths> {
    let abs_config = absolutize(config_path)?;
    let workspace_root = workspace_root_for(&abs_config);

    let workspace_folder = match &cfg.workspace_folder {
        Some(folder) if !folder.is_empty() => folder.clone(),
        _ => format!("/workspaces/{}", base_name(&workspace_root)),
    };

    let workspace_mount = match &cfg.workspace_mount {
        Some(mount) if !mount.is_empty() => mount.clone(),
        _ => format!(
            "source={},target={},type=bind",
            workspace_root.display(),
            workspace_folder
        ),
    };

    let vars = predefined_vars(&workspace_root, &workspace_folder, &abs_config);
    Ok(WorkspacePaths {
        workspace_root,
        workspace_folder,
        workspace_mount,
        vars,
    })
}

/// Resolve workspace paths for compose mode. The workspace folder defaults to
/// `/` since the compose file decides the mounts; no workspace mount is
/// synthesized.
pub fn resolve_compose_workspace_paths(
    config_path: &Path,
    cfg: &DevcontainerConfig,
) -> Result<(PathBuf, String, HashMap<String, String>)> {
    let abs_config = absolutize(config_path)?;
    let workspace_root = workspace_root_for(&abs_config);
    let workspace_folder = match &cfg.workspace_folder {
        Some(folder) if !folder.is_empty() => folder.clone(),
        _ => "/".to_string(),
    };
    let vars = predefined_vars(&workspace_root, &workspace_folder, &abs_config);
    Ok((workspace_root, workspace_folder, vars))
}

fn predefined_vars(
    workspace_root: &Path,
    workspace_folder: &str,
    abs_config: &Path,
) -> HashMap<String, String> {
    HashMap::from([
        (
            "localWorkspaceFolder".to_string(),
            workspace_root.display().to_string(),
        ),
        (
            "localWorkspaceFolderBasename".to_string(),
            base_name(workspace_root),
        ),
        (
            "containerWorkspaceFolder".to_string(),
            workspace_folder.to_string(),
        ),
        (
            "containerWorkspaceFolderBasename".to_string(),
            unix_base_name(workspace_folder),
        ),
        (
            "devcontainerId".to_string(),
            devcontainer_id(workspace_root, abs_config),
        ),
    ])
}

/// Derive the deterministic devcontainer id: the first 8 bytes (16 hex
/// characters) of `sha256(workspaceRoot + "::" + absConfigPath)`.
pub fn devcontainer_id(workspace_root: &Path, config_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workspace_root.display().to_string().as_bytes());
    hasher.update(b"::");
    hasher.update(config_path.display().to_string().as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

fn workspace_root_for(abs_config: &Path) -> PathBuf {
    let config_dir = abs_config.parent().unwrap_or(Path::new("/"));
    if config_dir.file_name().map(|n| n == ".devcontainer") == Some(true) {
        config_dir.parent().unwrap_or(Path::new("/")).to_path_buf()
    } else {
        config_dir.to_path_buf()
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(crate::errors::ConfigError::Io)?;
    Ok(cwd.join(path))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn unix_base_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("/")
        .to_string()
}

/// Replace characters the engine rejects in names/tags with `-` and trim
/// leading/trailing dashes.
pub fn sanitize_name(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '-',
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// Container name: the sanitized config `name` when present, otherwise
/// `godev-<workspaceBase>-<devcontainerId>`.
pub fn resolve_container_name(
    config_name: Option<&str>,
    workspace_root: &Path,
    devcontainer_id: &str,
) -> String {
    if let Some(name) = config_name {
        if !name.is_empty() {
            return sanitize_name(name);
        }
    }
    let mut base = sanitize_name(&base_name(workspace_root));
    if base.is_empty() {
        base = "devcontainer".to_string();
    }
    format!("godev-{}-{}", base, devcontainer_id)
}
