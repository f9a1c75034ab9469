//! Docker Compose integration
//!
//! Compose-mode devcontainers delegate container management to the
//! `docker compose` CLI. The orchestrator contributes a temporary override
//! document (environment, labels, command, optional features image) layered
//! on top of the user's compose files, and identifies the primary service's
//! container via `compose ps -q`.

use crate::config::DevcontainerConfig;
use crate::errors::{ComposeError, GodevError, Result};
use crate::features::{append_unique, ResolvedFeatures};
use crate::mount::{mount_from_spec, Mount, MountSpec};
use crate::workspace::sanitize_name;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

/// A compose project identity: directory, name, files, and interpolation
/// environment.
#[derive(Debug, Clone)]
pub struct ComposeProject {
    pub project_dir: PathBuf,
    pub name: String,
    pub files: Vec<PathBuf>,
    /// Environment for compose variable interpolation (OS env wins over `.env`)
    pub env: HashMap<String, String>,
    docker_path: String,
}

/// The merged configuration of one compose service, as reported by
/// `docker compose config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComposeServiceInfo {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub security_opt: Vec<String>,
}

impl ComposeProject {
    pub fn new(
        project_dir: PathBuf,
        name: String,
        files: Vec<PathBuf>,
    ) -> Result<Self> {
        let env = load_compose_environment(&project_dir)?;
        let docker_path =
            std::env::var("GODEV_DOCKER").unwrap_or_else(|_| "docker".to_string());
        Ok(Self {
            project_dir,
            name,
            files,
            env,
            docker_path,
        })
    }

    fn base_args(&self, override_file: Option<&Path>) -> Vec<String> {
        let mut args = vec!["compose".to_string()];
        for file in &self.files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        if let Some(file) = override_file {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        args.push("--project-directory".to_string());
        args.push(self.project_dir.display().to_string());
        args.push("-p".to_string());
        args.push(self.name.clone());
        args
    }

    /// Run a `docker compose` subcommand, returning stdout. Stderr becomes
    /// the error message on failure.
    async fn run(&self, args: Vec<String>) -> Result<String> {
        debug!("docker {}", args.join(" "));
        let output = Command::new(&self.docker_path)
            .args(&args)
            .envs(&self.env)
            .current_dir(&self.project_dir)
            .output()
            .await
            .map_err(|e| compose_command_error(&args, &e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            let message = if message.is_empty() {
                format!("exit status {:?}", output.status.code())
            } else {
                message.to_string()
            };
            return Err(compose_command_error(&args, &message));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn up(
        &self,
        override_file: Option<&Path>,
        services: &[String],
    ) -> Result<()> {
        let mut args = self.base_args(override_file);
        args.push("up".to_string());
        args.push("-d".to_string());
        args.extend(services.iter().cloned());
        self.run(args).await?;
        Ok(())
    }

    pub async fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        let mut args = self.base_args(None);
        args.push("stop".to_string());
        if let Some(timeout) = timeout {
            args.push("--timeout".to_string());
            args.push(timeout.as_secs().to_string());
        }
        self.run(args).await?;
        Ok(())
    }

    pub async fn down(&self) -> Result<()> {
        let mut args = self.base_args(None);
        args.push("down".to_string());
        args.push("--volumes".to_string());
        args.push("--remove-orphans".to_string());
        self.run(args).await?;
        Ok(())
    }

    /// The primary service's container id (`compose ps -q <service>`).
    pub async fn primary_container_id(
        &self,
        override_file: Option<&Path>,
        service: &str,
    ) -> Result<String> {
        let mut args = self.base_args(override_file);
        args.push("ps".to_string());
        args.push("-q".to_string());
        args.push(service.to_string());
        let output = self.run(args).await?;
        let id = output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
            .to_string();
        if id.is_empty() {
            return Err(GodevError::Compose(ComposeError::ServiceNotFound {
                service: service.to_string(),
            }));
        }
        Ok(id)
    }

    /// The merged configuration of `service` via `compose config`.
    pub async fn service_config(&self, service: &str) -> Result<ComposeServiceInfo> {
        let mut args = self.base_args(None);
        args.push("config".to_string());
        args.push("--format".to_string());
        args.push("json".to_string());
        let output = self.run(args).await?;

        #[derive(Deserialize)]
        struct ComposeConfig {
            #[serde(default)]
            services: HashMap<String, ComposeServiceInfo>,
        }
        let parsed: ComposeConfig = serde_json::from_str(&output).map_err(|e| {
            GodevError::Compose(ComposeError::Files {
                message: format!("failed to parse compose config: {}", e),
            })
        })?;
        parsed.services.get(service).cloned().ok_or_else(|| {
            GodevError::Compose(ComposeError::Files {
                message: format!("service {} not found in compose project", service),
            })
        })
    }
}

fn compose_command_error(args: &[String], message: &str) -> GodevError {
    GodevError::Compose(ComposeError::Command {
        command: args.join(" "),
        message: message.to_string(),
    })
}

/// Project name: sanitized config `name`, else
/// `godev-<base>-<devcontainerId>`.
pub fn resolve_compose_project_name(
    cfg: &DevcontainerConfig,
    workspace_root: &Path,
    devcontainer_id: &str,
) -> String {
    if let Some(name) = &cfg.name {
        if !name.is_empty() {
            return sanitize_name(name);
        }
    }
    let mut base = sanitize_name(
        &workspace_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    );
    if base.is_empty() {
        base = "devcontainer".to_string();
    }
    format!("godev-{}-{}", base, devcontainer_id)
}

/// Resolve the compose files relative to the config directory. Every entry
/// must name an existing file.
pub fn resolve_compose_files(
    config_path: &Path,
    cfg: &DevcontainerConfig,
) -> Result<Vec<PathBuf>> {
    if cfg.docker_compose_file.is_empty() {
        return Err(files_error(
            "dockerComposeFile is required when using docker compose".to_string(),
        ));
    }
    let config_dir = config_path.parent().unwrap_or(Path::new("/"));
    let mut files = Vec::with_capacity(cfg.docker_compose_file.len());
    for entry in &cfg.docker_compose_file {
        if entry.is_empty() {
            return Err(files_error("dockerComposeFile entry cannot be empty".to_string()));
        }
        let path = config_dir.join(entry);
        let metadata = std::fs::metadata(&path)
            .map_err(|_| files_error(format!("docker compose file not found: {}", entry)))?;
        if metadata.is_dir() {
            return Err(files_error(format!("docker compose file is a directory: {}", entry)));
        }
        files.push(path);
    }
    Ok(files)
}

/// The interpolation environment for compose: the process env overlaid on
/// the workspace's `.env` file (process wins; a missing file is fine).
pub fn load_compose_environment(working_dir: &Path) -> Result<HashMap<String, String>> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    match parse_dot_env_file(&working_dir.join(".env")) {
        Ok(file_env) => {
            for (key, value) in file_env {
                env.entry(key).or_insert(value);
            }
        }
        Err(GodevError::Compose(ComposeError::Files { .. })) => {}
        Err(err) => return Err(err),
    }
    Ok(env)
}

/// Parse a dotenv file: blank lines and `#` comments skipped, optional
/// `export ` prefix, single or double quotes stripped from values.
pub fn parse_dot_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|_| {
        GodevError::Compose(ComposeError::Files {
            message: format!(".env not found at {}", path.display()),
        })
    })?;
    let mut env = HashMap::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").map(str::trim).unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(GodevError::Compose(ComposeError::Files {
                message: format!("invalid .env line: {}", raw),
            }));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(GodevError::Compose(ComposeError::Files {
                message: format!("invalid .env line: {}", raw),
            }));
        }
        let mut value = value.trim().trim_end_matches('\r');
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
            {
                value = &value[1..value.len() - 1];
            }
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

/// Build the override document for the primary service. Returns `None` when
/// there is nothing to override.
#[instrument(skip_all)]
pub fn build_compose_override(
    cfg: &DevcontainerConfig,
    env_map: &HashMap<String, String>,
    labels: &BTreeMap<String, String>,
    workspace_folder: &str,
    service_info: &ComposeServiceInfo,
    features: Option<&ResolvedFeatures>,
    feature_image: Option<&str>,
) -> Result<Option<String>> {
    let service = cfg.service.as_deref().unwrap_or_default();
    let mut body = String::new();

    if !env_map.is_empty() {
        body.push_str("    environment:\n");
        let mut keys: Vec<&String> = env_map.keys().collect();
        keys.sort();
        for key in keys {
            body.push_str(&format!("      {}: {}\n", key, yaml_quote(&env_map[key])));
        }
    }
    if !labels.is_empty() {
        body.push_str("    labels:\n");
        for (key, value) in labels {
            body.push_str(&format!("      {}: {}\n", key, yaml_quote(value)));
        }
    }
    if let Some(user) = cfg.container_user.as_deref().filter(|u| !u.is_empty()) {
        body.push_str(&format!("    user: {}\n", yaml_quote(user)));
    }
    // compose keeps the service's own command unless explicitly overridden
    if cfg.override_command == Some(true) {
        body.push_str("    command: [\"/bin/sh\", \"-c\", \"while sleep 1000; do :; done\"]\n");
    }
    if !workspace_folder.is_empty() && service_info.working_dir.is_none() {
        body.push_str(&format!("    working_dir: {}\n", yaml_quote(workspace_folder)));
    }
    if let Some(image) = feature_image {
        body.push_str(&format!("    image: {}\n", yaml_quote(image)));
    }
    if let Some(features) = features {
        if features.privileged {
            body.push_str("    privileged: true\n");
        }
        if let Some(init) = features.init {
            body.push_str(&format!("    init: {}\n", init));
        }
        if !features.cap_add.is_empty() {
            let mut merged = Vec::new();
            append_unique(&mut merged, &service_info.cap_add);
            append_unique(&mut merged, &features.cap_add);
            body.push_str("    cap_add:\n");
            for cap in merged {
                body.push_str(&format!("      - {}\n", yaml_quote(&cap)));
            }
        }
        if !features.security_opt.is_empty() {
            let mut merged = Vec::new();
            append_unique(&mut merged, &service_info.security_opt);
            append_unique(&mut merged, &features.security_opt);
            body.push_str("    security_opt:\n");
            for opt in merged {
                body.push_str(&format!("      - {}\n", yaml_quote(&opt)));
            }
        }
        if !features.mounts.is_empty() {
            let volumes = compose_volume_specs(&features.mounts)?;
            if !volumes.is_empty() {
                body.push_str("    volumes:\n");
                for volume in volumes {
                    body.push_str(&format!("      - {}\n", yaml_quote(&volume)));
                }
            }
        }
    }

    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!("services:\n  {}:\n{}", service, body)))
}

/// Write the override document to a temp file. The returned handle owns the
/// file; dropping it removes the file.
pub fn write_compose_override(content: &str) -> Result<tempfile::NamedTempFile> {
    use std::io::Write;
    let mut file = tempfile::Builder::new()
        .prefix("godev-compose-override-")
        .suffix(".yml")
        .tempfile()
        .map_err(|e| {
            GodevError::Compose(ComposeError::Files {
                message: format!("failed to create override file: {}", e),
            })
        })?;
    file.write_all(content.as_bytes()).map_err(|e| {
        GodevError::Compose(ComposeError::Files {
            message: format!("failed to write override file: {}", e),
        })
    })?;
    Ok(file)
}

fn compose_volume_specs(mounts: &[MountSpec]) -> Result<Vec<String>> {
    let mut specs = Vec::with_capacity(mounts.len());
    for spec in mounts {
        let parsed = mount_from_spec(spec)?;
        specs.push(compose_volume_spec(&parsed)?);
    }
    Ok(specs)
}

/// Short volume syntax: `source:target[:ro]`, or bare `target` for an
/// anonymous volume. Only bind and volume mounts can be expressed.
fn compose_volume_spec(mount: &Mount) -> Result<String> {
    if mount.target.is_empty() {
        return Err(GodevError::Compose(ComposeError::Files {
            message: "mount target is required".to_string(),
        }));
    }
    let mount_type = if mount.mount_type.is_empty() {
        "volume"
    } else {
        mount.mount_type.as_str()
    };
    if mount_type != "volume" && mount_type != "bind" {
        return Err(GodevError::Compose(ComposeError::Files {
            message: format!("unsupported mount type for compose: {}", mount_type),
        }));
    }
    let mut spec = if mount.source.is_empty() {
        mount.target.clone()
    } else {
        format!("{}:{}", mount.source, mount.target)
    };
    if mount.read_only {
        spec.push_str(":ro");
    }
    Ok(spec)
}

fn yaml_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn files_error(message: String) -> GodevError {
    GodevError::Compose(ComposeError::Files { message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_resolve_compose_project_name() {
        let cfg = parse_config(r#"{"dockerComposeFile":"c.yml","service":"app","name":"My App"}"#)
            .unwrap();
        assert_eq!(
            resolve_compose_project_name(&cfg, Path::new("/x/proj"), "cafe"),
            "My-App"
        );

        let cfg = parse_config(r#"{"dockerComposeFile":"c.yml","service":"app"}"#).unwrap();
        assert_eq!(
            resolve_compose_project_name(&cfg, Path::new("/x/proj"), "cafe"),
            "godev-proj-cafe"
        );
    }

    #[test]
    fn test_resolve_compose_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").unwrap();
        let config_path = dir.path().join("devcontainer.json");

        let cfg = parse_config(r#"{"dockerComposeFile":"docker-compose.yml","service":"app"}"#)
            .unwrap();
        let files = resolve_compose_files(&config_path, &cfg).unwrap();
        assert_eq!(files, vec![dir.path().join("docker-compose.yml")]);

        let cfg = parse_config(r#"{"dockerComposeFile":"missing.yml","service":"app"}"#).unwrap();
        assert!(resolve_compose_files(&config_path, &cfg).is_err());

        let cfg = parse_config(r#"{"dockerComposeFile":[""],"service":"app"}"#).unwrap();
        assert!(resolve_compose_files(&config_path, &cfg).is_err());
    }

    #[test]
    fn test_parse_dot_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# comment\n\nPLAIN=value\nexport EXPORTED=1\nQUOTED=\"a b\"\nSINGLE='c'\n",
        )
        .unwrap();
        let env = parse_dot_env_file(&path).unwrap();
        assert_eq!(env["PLAIN"], "value");
        assert_eq!(env["EXPORTED"], "1");
        assert_eq!(env["QUOTED"], "a b");
        assert_eq!(env["SINGLE"], "c");

        std::fs::write(&path, "NOEQUALS\n").unwrap();
        assert!(parse_dot_env_file(&path).is_err());
    }

    #[test]
    fn test_load_compose_environment_missing_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env = load_compose_environment(dir.path()).unwrap();
        // process environment is present, nothing failed
        assert!(!env.is_empty() || std::env::vars().count() == 0);
    }

    #[test]
    fn test_load_compose_environment_os_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("GODEV_COMPOSE_TEST", "from-os");
        std::fs::write(
            dir.path().join(".env"),
            "GODEV_COMPOSE_TEST=from-file\nONLY_FILE=here\n",
        )
        .unwrap();
        let env = load_compose_environment(dir.path()).unwrap();
        assert_eq!(env["GODEV_COMPOSE_TEST"], "from-os");
        assert_eq!(env["ONLY_FILE"], "here");
        std::env::remove_var("GODEV_COMPOSE_TEST");
    }

    #[test]
    fn test_build_compose_override_minimal() {
        let cfg = parse_config(r#"{"dockerComposeFile":"c.yml","service":"app"}"#).unwrap();
        let override_doc = build_compose_override(
            &cfg,
            &HashMap::new(),
            &BTreeMap::new(),
            "",
            &ComposeServiceInfo {
                working_dir: Some("/srv".to_string()),
                ..ComposeServiceInfo::default()
            },
            None,
            None,
        )
        .unwrap();
        assert!(override_doc.is_none());
    }

    #[test]
    fn test_build_compose_override_contents() {
        let cfg = parse_config(
            r#"{"dockerComposeFile":"c.yml","service":"app","containerUser":"dev","overrideCommand":true}"#,
        )
        .unwrap();
        let env = HashMap::from([("B".to_string(), "2".to_string()), ("A".to_string(), "1".to_string())]);
        let labels = BTreeMap::from([(
            "devcontainer.config_path".to_string(),
            "/p/devcontainer.json".to_string(),
        )]);
        let doc = build_compose_override(
            &cfg,
            &env,
            &labels,
            "/workspaces/proj",
            &ComposeServiceInfo::default(),
            None,
            Some("godev-proj-cafe-features-aa"),
        )
        .unwrap()
        .unwrap();

        assert!(doc.starts_with("services:\n  app:\n"));
        // env keys sorted
        let a_pos = doc.find("A: \"1\"").unwrap();
        let b_pos = doc.find("B: \"2\"").unwrap();
        assert!(a_pos < b_pos);
        assert!(doc.contains("labels:\n      devcontainer.config_path: \"/p/devcontainer.json\""));
        assert!(doc.contains("user: \"dev\""));
        assert!(doc.contains("command: [\"/bin/sh\", \"-c\", \"while sleep 1000; do :; done\"]"));
        assert!(doc.contains("working_dir: \"/workspaces/proj\""));
        assert!(doc.contains("image: \"godev-proj-cafe-features-aa\""));
    }

    #[test]
    fn test_override_respects_service_working_dir() {
        let cfg = parse_config(r#"{"dockerComposeFile":"c.yml","service":"app"}"#).unwrap();
        let doc = build_compose_override(
            &cfg,
            &HashMap::from([("A".to_string(), "1".to_string())]),
            &BTreeMap::new(),
            "/workspaces/proj",
            &ComposeServiceInfo {
                working_dir: Some("/srv".to_string()),
                ..ComposeServiceInfo::default()
            },
            None,
            None,
        )
        .unwrap()
        .unwrap();
        assert!(!doc.contains("working_dir"));
    }

    #[test]
    fn test_override_feature_contributions() {
        let cfg = parse_config(r#"{"dockerComposeFile":"c.yml","service":"app"}"#).unwrap();
        let features = ResolvedFeatures {
            privileged: true,
            init: Some(true),
            cap_add: vec!["NET_ADMIN".to_string()],
            security_opt: vec!["seccomp=unconfined".to_string()],
            mounts: vec![MountSpec::Parsed {
                mount_type: "volume".to_string(),
                source: Some("cache".to_string()),
                target: "/cache".to_string(),
            }],
            ..ResolvedFeatures::default()
        };
        let doc = build_compose_override(
            &cfg,
            &HashMap::new(),
            &BTreeMap::new(),
            "",
            &ComposeServiceInfo {
                cap_add: vec!["SYS_PTRACE".to_string()],
                working_dir: Some("/srv".to_string()),
                ..ComposeServiceInfo::default()
            },
            Some(&features),
            None,
        )
        .unwrap()
        .unwrap();
        assert!(doc.contains("privileged: true"));
        assert!(doc.contains("init: true"));
        // service capabilities retained ahead of feature additions
        let sys = doc.find("- \"SYS_PTRACE\"").unwrap();
        let net = doc.find("- \"NET_ADMIN\"").unwrap();
        assert!(sys < net);
        assert!(doc.contains("- \"cache:/cache\""));
    }

    #[test]
    fn test_compose_volume_spec_forms() {
        let mount = Mount {
            mount_type: "volume".to_string(),
            source: "data".to_string(),
            target: "/data".to_string(),
            ..Mount::default()
        };
        assert_eq!(compose_volume_spec(&mount).unwrap(), "data:/data");

        let mount = Mount {
            mount_type: "bind".to_string(),
            source: "/src".to_string(),
            target: "/dst".to_string(),
            read_only: true,
            ..Mount::default()
        };
        assert_eq!(compose_volume_spec(&mount).unwrap(), "/src:/dst:ro");

        let mount = Mount {
            mount_type: "volume".to_string(),
            target: "/anon".to_string(),
            ..Mount::default()
        };
        assert_eq!(compose_volume_spec(&mount).unwrap(), "/anon");

        let mount = Mount {
            mount_type: "tmpfs".to_string(),
            target: "/tmp".to_string(),
            ..Mount::default()
        };
        assert!(compose_volume_spec(&mount).is_err());
    }

    #[test]
    fn test_write_compose_override_cleans_up() {
        let path;
        {
            let file = write_compose_override("services:\n  app: {}\n").unwrap();
            path = file.path().to_path_buf();
            assert!(path.is_file());
        }
        assert!(!path.exists());
    }
}
