//! Start orchestration
//!
//! Drives a full `up`: load and validate the configuration, resolve features
//! into an ordered plan, run `initializeCommand` on the host, ensure the
//! image (pull or build, then the derived features image), create and start
//! the container, then run feature entrypoints and the interleaved lifecycle
//! hooks. Compose-mode configurations branch into the compose flow, which
//! delegates container management to `docker compose` with a temporary
//! override document.

use crate::compose::{
    build_compose_override, resolve_compose_files, resolve_compose_project_name,
    write_compose_override, ComposeProject,
};
use crate::config::{
    is_compose_config, load_config, validate_config, DevcontainerConfig,
};
use crate::engine::{BuildRequest, ContainerEngine, ContainerSpec};
use crate::errors::{
    ComposeError, ConfigError, EngineError, GodevError, Result, StartError,
};
use crate::features::{append_unique, ResolvedFeatures};
use crate::features_build::build_features_image;
use crate::lifecycle::{
    build_lifecycle_env, run_feature_entrypoints, run_lifecycle_commands,
    run_lifecycle_with_features, ContainerRunner, HostRunner, UserHooks, INITIALIZE_COMMAND,
};
use crate::mount::{mount_from_spec, parse_mount_string, Mount, MountSpec};
use crate::oci::FeatureFetcher;
use crate::ports::collect_port_specs;
use crate::resolver::resolve_features;
use crate::run_args::parse_run_args;
use crate::variable::{env_map_to_vec, expand_variables, merge_env_maps};
use crate::workspace::{
    resolve_compose_workspace_paths, resolve_container_name, resolve_workspace_paths,
    sanitize_name,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// Label carrying the absolute config path on every created container; used
/// by stop/remove to rediscover compose projects.
pub const CONFIG_PATH_LABEL: &str = "devcontainer.config_path";

/// Result type for operations that may have created a container before
/// failing.
pub type StartResult<T> = std::result::Result<T, StartError>;

/// Resource limits applied at container creation.
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    pub cpu_quota: Option<i64>,
    pub memory: Option<String>,
}

impl ResourceLimits {
    fn is_set(&self) -> bool {
        self.cpu_quota.is_some() || self.memory.is_some()
    }
}

/// Runtime options for one start invocation.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub config_path: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub extra_publish: Vec<String>,
    pub extra_mounts: Vec<Mount>,
    pub run_args: Vec<String>,
    pub remove_on_stop: bool,
    pub detach: bool,
    pub tty: bool,
    pub labels: BTreeMap<String, String>,
    pub resources: ResourceLimits,
    pub network: Option<String>,
    pub timeout: Option<Duration>,
    pub workdir: Option<String>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            env: HashMap::new(),
            extra_publish: Vec::new(),
            extra_mounts: Vec::new(),
            run_args: Vec::new(),
            remove_on_stop: false,
            detach: true,
            tty: true,
            labels: BTreeMap::new(),
            resources: ResourceLimits::default(),
            network: None,
            timeout: None,
            workdir: None,
        }
    }
}

impl StartOptions {
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_publish(mut self, mapping: impl Into<String>) -> Self {
        self.extra_publish.push(mapping.into());
        self
    }

    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.extra_mounts.push(mount);
        self
    }

    pub fn with_run_arg(mut self, arg: impl Into<String>) -> Self {
        self.run_args.push(arg.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_detach(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Start a devcontainer and return its container id.
#[instrument(skip_all)]
pub async fn start_devcontainer(
    engine: &dyn ContainerEngine,
    fetcher: &FeatureFetcher,
    options: StartOptions,
) -> StartResult<String> {
    match options.timeout {
        Some(timeout) => tokio::time::timeout(
            timeout,
            start_devcontainer_inner(engine, fetcher, options.clone()),
        )
        .await
        .map_err(|_| {
            StartError::from(GodevError::Internal("start deadline exceeded".to_string()))
        })?,
        None => start_devcontainer_inner(engine, fetcher, options).await,
    }
}

async fn start_devcontainer_inner(
    engine: &dyn ContainerEngine,
    fetcher: &FeatureFetcher,
    options: StartOptions,
) -> StartResult<String> {
    let config_path = resolve_config_path(options.config_path.as_deref())?;
    let mut cfg = load_config(&config_path)?;
    validate_config(&cfg)?;
    if is_compose_config(&cfg) {
        return start_compose_devcontainer(engine, fetcher, &config_path, &cfg, options).await;
    }

    let paths = resolve_workspace_paths(&config_path, &cfg)?;
    let devcontainer_id = paths.vars["devcontainerId"].clone();
    let mut features =
        resolve_features(fetcher, &config_path, &paths.workspace_root, &cfg).await?;
    if let Some(features) = &features {
        apply_feature_contributions(&mut cfg, features);
    }

    let env_map = assemble_container_env(&cfg, features.as_ref(), &options.env, &paths.vars)?;

    if let Some(commands) = &cfg.initialize_command {
        let host_runner = HostRunner {
            workdir: paths.workspace_root.clone(),
            vars: paths.vars.clone(),
            container_env: env_map.clone(),
        };
        run_lifecycle_commands(INITIALIZE_COMMAND, commands, &host_runner).await?;
    }

    let mut image_ref =
        ensure_image(engine, &cfg, &config_path, &paths.workspace_root, &devcontainer_id).await?;
    if let Some(features) = features.as_mut() {
        let base_user = engine.image_user(&image_ref).await?;
        image_ref = build_features_image(
            engine,
            &image_ref,
            &base_user,
            &paths.workspace_root,
            &devcontainer_id,
            &cfg,
            &mut features.order,
            &paths.vars,
        )
        .await?;
    }

    let mut run_args = cfg.run_args.clone();
    run_args.extend(options.run_args.iter().cloned());
    let run_arg_options = parse_run_args(&run_args)?;

    let ports = collect_port_specs(&cfg.forward_ports, &cfg.app_port, &options.extra_publish)?;
    let mounts = build_mounts(
        &paths.workspace_mount,
        &cfg.mounts,
        &options.extra_mounts,
        &paths.vars,
    )?;

    let mut labels = options.labels.clone();
    labels.extend(run_arg_options.labels.clone());
    labels.insert(
        CONFIG_PATH_LABEL.to_string(),
        config_path.display().to_string(),
    );

    let mut cap_add = cfg.cap_add.clone();
    cap_add.extend(run_arg_options.cap_add.iter().cloned());
    let mut security_opt = cfg.security_opt.clone();
    security_opt.extend(run_arg_options.security_opt.iter().cloned());

    let user = run_arg_options
        .user
        .clone()
        .or_else(|| cfg.container_user.clone())
        .unwrap_or_default();

    // the idle command keeps the container alive for execs
    let override_command = cfg.override_command.unwrap_or(true);
    let command = override_command.then(|| {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "while sleep 1000; do :; done".to_string(),
        ]
    });

    let init = if run_arg_options.init {
        Some(true)
    } else {
        cfg.init
    };

    let spec = ContainerSpec {
        image: image_ref,
        name: resolve_container_name(
            cfg.name.as_deref(),
            &paths.workspace_root,
            &devcontainer_id,
        ),
        env: env_map_to_vec(&env_map),
        working_dir: options
            .workdir
            .clone()
            .unwrap_or_else(|| paths.workspace_folder.clone()),
        user,
        labels,
        ports,
        mounts,
        command,
        tty: options.tty,
        auto_remove: options.remove_on_stop,
        privileged: cfg.privileged || run_arg_options.privileged,
        cap_add,
        security_opt,
        init,
        network: options.network.clone().or(run_arg_options.network),
        cpu_quota: options.resources.cpu_quota,
        memory: options.resources.memory.clone(),
    };

    let container_id = engine.create_container(&spec).await?;
    info!("created container {}", container_id);
    with_container(&container_id, engine.start_container(&container_id).await)?;

    let lifecycle_env = with_container(
        &container_id,
        build_lifecycle_env(&env_map, &cfg.remote_env, &paths.vars),
    )?;
    let remote_user = cfg
        .remote_user
        .clone()
        .filter(|u| !u.is_empty())
        .or(run_arg_options.user)
        .or_else(|| cfg.container_user.clone())
        .unwrap_or_default();

    let runner = ContainerRunner {
        engine,
        container_id: container_id.clone(),
        workdir: paths.workspace_folder.clone(),
        user: remote_user,
        vars: paths.vars.clone(),
        container_env: env_map.clone(),
        env: env_map_to_vec(&lifecycle_env),
    };
    if let Some(features) = &features {
        let root_runner = ContainerRunner {
            engine,
            container_id: container_id.clone(),
            workdir: paths.workspace_folder.clone(),
            user: "root".to_string(),
            vars: paths.vars.clone(),
            container_env: env_map.clone(),
            env: env_map_to_vec(&lifecycle_env),
        };
        with_container(
            &container_id,
            run_feature_entrypoints(&features.order, &paths.vars, &root_runner).await,
        )?;
    }

    let hooks = user_hooks(&cfg);
    with_container(
        &container_id,
        run_lifecycle_with_features(features.as_ref(), &hooks, &runner).await,
    )?;

    if !options.detach {
        let status = with_container(&container_id, engine.wait_container(&container_id).await)?;
        if status != 0 {
            return Err(StartError::new(
                Some(container_id),
                GodevError::Engine(EngineError::Command {
                    message: format!("container exited with status {}", status),
                }),
            ));
        }
    }

    Ok(container_id)
}

async fn start_compose_devcontainer(
    engine: &dyn ContainerEngine,
    fetcher: &FeatureFetcher,
    config_path: &Path,
    cfg: &DevcontainerConfig,
    options: StartOptions,
) -> StartResult<String> {
    validate_compose_options(&options)?;
    let service = cfg.service.clone().unwrap_or_default();

    let (workspace_root, workspace_folder, vars) =
        resolve_compose_workspace_paths(config_path, cfg)?;
    let mut features = resolve_features(fetcher, config_path, &workspace_root, cfg).await?;

    let env_map = assemble_container_env(cfg, features.as_ref(), &options.env, &vars)?;
    if let Some(commands) = &cfg.initialize_command {
        let host_runner = HostRunner {
            workdir: workspace_root.clone(),
            vars: vars.clone(),
            container_env: env_map.clone(),
        };
        run_lifecycle_commands(INITIALIZE_COMMAND, commands, &host_runner).await?;
    }

    let files = resolve_compose_files(config_path, cfg)?;
    let project_name = resolve_compose_project_name(cfg, &workspace_root, &vars["devcontainerId"]);
    let project = ComposeProject::new(workspace_root.clone(), project_name, files)?;

    let mut labels = options.labels.clone();
    labels.insert(
        CONFIG_PATH_LABEL.to_string(),
        config_path.display().to_string(),
    );

    let service_info = project.service_config(&service).await?;
    let mut feature_image = None;
    if let Some(features) = features.as_mut() {
        let base_image = service_info
            .image
            .clone()
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| {
                GodevError::Compose(ComposeError::Files {
                    message: "docker compose features require service.image".to_string(),
                })
            })?;
        engine.pull_image(&base_image).await?;
        let base_user = engine.image_user(&base_image).await?;
        let tag = build_features_image(
            engine,
            &base_image,
            &base_user,
            &workspace_root,
            &vars["devcontainerId"],
            cfg,
            &mut features.order,
            &vars,
        )
        .await?;
        feature_image = Some(tag);
    }

    let override_doc = build_compose_override(
        cfg,
        &env_map,
        &labels,
        &workspace_folder,
        &service_info,
        features.as_ref(),
        feature_image.as_deref(),
    )?;
    // the handle keeps the temp override alive until compose is done with it
    let override_file = match &override_doc {
        Some(content) => Some(write_compose_override(content)?),
        None => None,
    };
    let override_path = override_file.as_ref().map(|f| f.path());

    project.up(override_path, &cfg.run_services).await?;
    let container_id = project.primary_container_id(override_path, &service).await?;
    info!("compose primary container {}", container_id);

    let lifecycle_env = with_container(
        &container_id,
        build_lifecycle_env(&env_map, &cfg.remote_env, &vars),
    )?;
    let remote_user = cfg
        .remote_user
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| cfg.container_user.clone())
        .unwrap_or_default();

    let runner = ContainerRunner {
        engine,
        container_id: container_id.clone(),
        workdir: workspace_folder.clone(),
        user: remote_user,
        vars: vars.clone(),
        container_env: env_map.clone(),
        env: env_map_to_vec(&lifecycle_env),
    };
    if let Some(features) = &features {
        let root_runner = ContainerRunner {
            engine,
            container_id: container_id.clone(),
            workdir: workspace_folder.clone(),
            user: "root".to_string(),
            vars: vars.clone(),
            container_env: env_map.clone(),
            env: env_map_to_vec(&lifecycle_env),
        };
        with_container(
            &container_id,
            run_feature_entrypoints(&features.order, &vars, &root_runner).await,
        )?;
    }

    let hooks = user_hooks(cfg);
    with_container(
        &container_id,
        run_lifecycle_with_features(features.as_ref(), &hooks, &runner).await,
    )?;

    if !options.detach {
        let status = with_container(&container_id, engine.wait_container(&container_id).await)?;
        if status != 0 {
            return Err(StartError::new(
                Some(container_id),
                GodevError::Engine(EngineError::Command {
                    message: format!("container exited with status {}", status),
                }),
            ));
        }
    }

    Ok(container_id)
}

/// Stop a devcontainer. Containers that belong to a compose project (by the
/// config-path label) are stopped through `docker compose stop`.
pub async fn stop_devcontainer(
    engine: &dyn ContainerEngine,
    container_id: &str,
    timeout: Option<Duration>,
) -> Result<()> {
    if let Some(project) = compose_target_from_container(engine, container_id).await? {
        return project.stop(timeout).await;
    }
    engine.stop_container(container_id, timeout).await
}

/// Remove a devcontainer and its volumes; compose projects are torn down
/// with `docker compose down --volumes --remove-orphans`.
pub async fn remove_devcontainer(engine: &dyn ContainerEngine, container_id: &str) -> Result<()> {
    if let Some(project) = compose_target_from_container(engine, container_id).await? {
        return project.down().await;
    }
    engine.remove_container(container_id).await
}

/// Build the image for a configuration without starting anything. With
/// features configured the result is the derived features image.
pub async fn build_image_from_devcontainer(
    engine: &dyn ContainerEngine,
    fetcher: &FeatureFetcher,
    config_path: &Path,
) -> Result<String> {
    let config_path = resolve_config_path(Some(config_path))?;
    let cfg = load_config(&config_path)?;
    validate_config(&cfg)?;
    if is_compose_config(&cfg) {
        return Err(GodevError::Compose(ComposeError::Unsupported {
            option: "build".to_string(),
        }));
    }
    let paths = resolve_workspace_paths(&config_path, &cfg)?;
    let devcontainer_id = paths.vars["devcontainerId"].clone();
    let mut features =
        resolve_features(fetcher, &config_path, &paths.workspace_root, &cfg).await?;

    let image_ref =
        build_image(engine, &cfg, &config_path, &paths.workspace_root, &devcontainer_id).await?;
    let Some(features) = features.as_mut() else {
        return Ok(image_ref);
    };
    let base_user = engine.image_user(&image_ref).await?;
    build_features_image(
        engine,
        &image_ref,
        &base_user,
        &paths.workspace_root,
        &devcontainer_id,
        &cfg,
        &mut features.order,
        &paths.vars,
    )
    .await
}

fn with_container<T>(container_id: &str, result: Result<T>) -> StartResult<T> {
    result.map_err(|e| StartError::new(Some(container_id.to_string()), e))
}

fn user_hooks(cfg: &DevcontainerConfig) -> UserHooks<'_> {
    let mut hooks: UserHooks = HashMap::new();
    hooks.insert("onCreateCommand", cfg.on_create_command.as_ref());
    hooks.insert("updateContentCommand", cfg.update_content_command.as_ref());
    hooks.insert("postCreateCommand", cfg.post_create_command.as_ref());
    hooks.insert("postStartCommand", cfg.post_start_command.as_ref());
    hooks.insert("postAttachCommand", cfg.post_attach_command.as_ref());
    hooks
}

/// Fold the feature plan's runtime contributions into the effective config:
/// capability union, privileged OR, init propagation, and feature mounts
/// ahead of user mounts.
fn apply_feature_contributions(cfg: &mut DevcontainerConfig, features: &ResolvedFeatures) {
    cfg.privileged = cfg.privileged || features.privileged;
    if features.init.is_some() {
        cfg.init = features.init;
    }
    append_unique(&mut cfg.cap_add, &features.cap_add);
    append_unique(&mut cfg.security_opt, &features.security_opt);
    let mut mounts: Vec<MountSpec> = features.mounts.clone();
    mounts.extend(cfg.mounts.iter().cloned());
    cfg.mounts = mounts;
}

/// Container env: feature contributions, then the config's containerEnv,
/// then runtime overrides, each pass expanded.
fn assemble_container_env(
    cfg: &DevcontainerConfig,
    features: Option<&ResolvedFeatures>,
    overrides: &HashMap<String, String>,
    vars: &HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    let base = match features {
        Some(features) if !features.container_env.is_empty() => {
            merge_env_maps(&features.container_env, &cfg.container_env, vars)?
        }
        _ => cfg.container_env.clone(),
    };
    merge_env_maps(&base, overrides, vars)
}

fn validate_compose_options(options: &StartOptions) -> Result<()> {
    if !options.extra_publish.is_empty() {
        return Err(compose_unsupported("extra publishes"));
    }
    if !options.extra_mounts.is_empty() {
        return Err(compose_unsupported("extra mounts"));
    }
    if !options.run_args.is_empty() {
        return Err(compose_unsupported("runArgs"));
    }
    if options.network.is_some() {
        return Err(compose_unsupported("network override"));
    }
    if options.workdir.is_some() {
        return Err(compose_unsupported("workdir override"));
    }
    if options.resources.is_set() {
        return Err(compose_unsupported("resource limits"));
    }
    Ok(())
}

fn compose_unsupported(option: &str) -> GodevError {
    GodevError::Compose(ComposeError::Unsupported {
        option: option.to_string(),
    })
}

async fn compose_target_from_container(
    engine: &dyn ContainerEngine,
    container_id: &str,
) -> Result<Option<ComposeProject>> {
    let labels = engine.container_labels(container_id).await?;
    let Some(config_path) = labels.get(CONFIG_PATH_LABEL) else {
        return Ok(None);
    };
    if config_path.is_empty() {
        return Ok(None);
    }
    let config_path = PathBuf::from(config_path);
    let Ok(cfg) = load_config(&config_path) else {
        return Ok(None);
    };
    if !is_compose_config(&cfg) {
        return Ok(None);
    }
    let (workspace_root, _, vars) = resolve_compose_workspace_paths(&config_path, &cfg)?;
    let files = resolve_compose_files(&config_path, &cfg)?;
    let name = resolve_compose_project_name(&cfg, &workspace_root, &vars["devcontainerId"]);
    Ok(Some(ComposeProject::new(workspace_root, name, files)?))
}

fn resolve_config_path(path: Option<&Path>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
    match path {
        Some(path) if path.is_absolute() => Ok(path.to_path_buf()),
        Some(path) => Ok(cwd.join(path)),
        None => crate::config::find_config_path(&cwd),
    }
}

/// Pull the configured image or build from the `build` section; returns the
/// image reference to run.
async fn ensure_image(
    engine: &dyn ContainerEngine,
    cfg: &DevcontainerConfig,
    config_path: &Path,
    workspace_root: &Path,
    devcontainer_id: &str,
) -> Result<String> {
    if let Some(image) = cfg.image.as_deref().filter(|i| !i.is_empty()) {
        engine.pull_image(image).await?;
        return Ok(image.to_string());
    }
    build_image(engine, cfg, config_path, workspace_root, devcontainer_id).await
}

async fn build_image(
    engine: &dyn ContainerEngine,
    cfg: &DevcontainerConfig,
    config_path: &Path,
    workspace_root: &Path,
    devcontainer_id: &str,
) -> Result<String> {
    let build = cfg.build.as_ref().ok_or_else(|| {
        GodevError::Config(ConfigError::Validation {
            message: "build config is required".to_string(),
        })
    })?;
    if !build.options.is_empty() {
        return Err(GodevError::Config(ConfigError::Validation {
            message: "build.options is not supported yet".to_string(),
        }));
    }
    let (context_dir, dockerfile_rel) = resolve_build_paths(config_path, build)?;
    let tag = image_tag_for_build(workspace_root, devcontainer_id);
    let mut build_args: Vec<(String, String)> = build
        .args
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    build_args.sort();
    engine
        .build_image(&BuildRequest {
            context_dir,
            dockerfile: dockerfile_rel,
            tags: vec![tag.clone()],
            build_args,
            target: build.target.clone(),
            cache_from: build.cache_from.clone(),
        })
        .await?;
    Ok(tag)
}

/// The Dockerfile must live inside the build context.
fn resolve_build_paths(
    config_path: &Path,
    build: &crate::config::DevcontainerBuild,
) -> Result<(PathBuf, String)> {
    let config_dir = config_path.parent().unwrap_or(Path::new("/"));
    let context = build.context.as_deref().unwrap_or(".");
    let context_dir = normalize_join(config_dir, context);
    let dockerfile = build.dockerfile.as_deref().filter(|d| !d.is_empty()).ok_or_else(|| {
        GodevError::Config(ConfigError::Validation {
            message: "build.dockerfile is required".to_string(),
        })
    })?;
    let dockerfile_path = normalize_join(config_dir, dockerfile);
    let rel = dockerfile_path
        .strip_prefix(&context_dir)
        .map_err(|_| {
            GodevError::Config(ConfigError::Validation {
                message: "dockerfile is outside build context".to_string(),
            })
        })?;
    Ok((context_dir, rel.display().to_string()))
}

fn normalize_join(base: &Path, rel: &str) -> PathBuf {
    use std::path::Component;
    let mut out = base.to_path_buf();
    for component in Path::new(rel).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn image_tag_for_build(workspace_root: &Path, devcontainer_id: &str) -> String {
    let mut base = sanitize_name(
        &workspace_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    );
    if base.is_empty() {
        base = "devcontainer".to_string();
    }
    format!("godev-{}-{}:latest", base, devcontainer_id)
}

/// The workspace mount comes first, then config mounts (raw strings
/// expanded), then runtime extras.
fn build_mounts(
    workspace_mount: &str,
    config_mounts: &[MountSpec],
    extra_mounts: &[Mount],
    vars: &HashMap<String, String>,
) -> Result<Vec<Mount>> {
    let expanded = expand_variables(workspace_mount, vars, None)?;
    let mut mounts = vec![parse_mount_string(&expanded)?];
    for spec in config_mounts {
        match spec {
            MountSpec::Raw(raw) => {
                let expanded = expand_variables(raw, vars, None)?;
                mounts.push(parse_mount_string(&expanded)?);
            }
            parsed => mounts.push(mount_from_spec(parsed)?),
        }
    }
    for extra in extra_mounts {
        if extra.target.is_empty() {
            return Err(GodevError::Config(ConfigError::Validation {
                message: "mount target is required".to_string(),
            }));
        }
        let mut extra = extra.clone();
        if extra.mount_type.is_empty() {
            extra.mount_type = "volume".to_string();
        }
        mounts.push(extra);
    }
    Ok(mounts)
}
