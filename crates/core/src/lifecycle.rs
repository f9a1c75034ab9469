//! Lifecycle command execution
//!
//! Hooks run in a fixed order: `initializeCommand` on the host before the
//! container exists, then `onCreateCommand`, `updateContentCommand`,
//! `postCreateCommand`, `postStartCommand`, and `postAttachCommand` inside
//! the container. For each in-container phase every feature's command runs
//! (in installation order) before the user's. A hook written as a named map
//! runs its sub-commands concurrently; a failure in any phase aborts the
//! remaining phases.

use crate::engine::{ContainerEngine, ExecSpec};
use crate::errors::{GodevError, LifecycleError, Result};
use crate::features::{feature_entrypoint_path, ResolvedFeature, ResolvedFeatures};
use crate::variable::expand_variables;
use async_trait::async_trait;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// In-container lifecycle phases, in execution order.
pub const LIFECYCLE_ORDER: [&str; 5] = [
    "onCreateCommand",
    "updateContentCommand",
    "postCreateCommand",
    "postStartCommand",
    "postAttachCommand",
];

/// The host-side phase that runs before the container exists.
pub const INITIALIZE_COMMAND: &str = "initializeCommand";

/// One lifecycle command: a shell string (run under `/bin/sh -c`) or an argv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleCommand {
    Shell(String),
    Exec(Vec<String>),
}

/// A named sub-command of a parallel hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedLifecycleCommand {
    pub name: String,
    pub command: LifecycleCommand,
}

/// A hook value: one command run sequentially, or named sub-commands run
/// concurrently. Names are sorted at decode time so display order is stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleCommands {
    Single(LifecycleCommand),
    Parallel(Vec<NamedLifecycleCommand>),
}

fn parse_lifecycle_command(value: &serde_json::Value) -> std::result::Result<LifecycleCommand, String> {
    match value {
        serde_json::Value::String(s) => {
            if s.trim().is_empty() {
                return Err("lifecycle command cannot be empty".to_string());
            }
            Ok(LifecycleCommand::Shell(s.clone()))
        }
        serde_json::Value::Array(items) => {
            if items.is_empty() {
                return Err("lifecycle command array cannot be empty".to_string());
            }
            let mut argv = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_json::Value::String(s) => argv.push(s.clone()),
                    other => return Err(format!("invalid lifecycle command element: {}", other)),
                }
            }
            Ok(LifecycleCommand::Exec(argv))
        }
        other => Err(format!("invalid lifecycle command: {}", other)),
    }
}

impl<'de> Deserialize<'de> for LifecycleCommands {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match &value {
            serde_json::Value::String(_) | serde_json::Value::Array(_) => {
                let command = parse_lifecycle_command(&value).map_err(de::Error::custom)?;
                Ok(LifecycleCommands::Single(command))
            }
            serde_json::Value::Object(map) => {
                if map.is_empty() {
                    return Err(de::Error::custom("lifecycle command object cannot be empty"));
                }
                let mut names: Vec<&String> = map.keys().collect();
                names.sort();
                let mut commands = Vec::with_capacity(names.len());
                for name in names {
                    if name.trim().is_empty() {
                        return Err(de::Error::custom("lifecycle command name cannot be empty"));
                    }
                    let command = parse_lifecycle_command(&map[name])
                        .map_err(|e| de::Error::custom(format!("lifecycle command {}: {}", name, e)))?;
                    commands.push(NamedLifecycleCommand {
                        name: name.clone(),
                        command,
                    });
                }
                Ok(LifecycleCommands::Parallel(commands))
            }
            other => Err(de::Error::custom(format!(
                "invalid lifecycle command: {}",
                other
            ))),
        }
    }
}

impl Serialize for LifecycleCommands {
    /// Canonical form: shell commands as strings, exec commands as arrays,
    /// parallel hooks as objects with names in their decoded (sorted) order.
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            LifecycleCommands::Single(LifecycleCommand::Shell(s)) => serializer.serialize_str(s),
            LifecycleCommands::Single(LifecycleCommand::Exec(argv)) => argv.serialize(serializer),
            LifecycleCommands::Parallel(commands) => {
                let mut map = serializer.serialize_map(Some(commands.len()))?;
                for named in commands {
                    match &named.command {
                        LifecycleCommand::Shell(s) => map.serialize_entry(&named.name, s)?,
                        LifecycleCommand::Exec(argv) => map.serialize_entry(&named.name, argv)?,
                    }
                }
                map.end()
            }
        }
    }
}

/// Executes one expanded lifecycle command under a display name.
#[async_trait]
pub trait CommandRunner: Sync {
    async fn run(&self, name: &str, command: &LifecycleCommand) -> Result<()>;
}

/// Run one hook value: a single command, or all named sub-commands
/// concurrently (joining all; the first observed error wins).
pub async fn run_lifecycle_commands(
    hook_name: &str,
    commands: &LifecycleCommands,
    runner: &dyn CommandRunner,
) -> Result<()> {
    match commands {
        LifecycleCommands::Single(command) => runner.run(hook_name, command).await,
        LifecycleCommands::Parallel(named) => {
            info!("running {} sub-commands of {} in parallel", named.len(), hook_name);
            let tasks = named.iter().map(|sub| {
                let display = format!("{}:{}", hook_name, sub.name);
                async move { runner.run(&display, &sub.command).await }
            });
            let results = futures::future::join_all(tasks).await;
            for result in results {
                result?;
            }
            Ok(())
        }
    }
}

/// User hooks for the in-container phases, in a lookup shape.
pub type UserHooks<'a> = HashMap<&'static str, Option<&'a LifecycleCommands>>;

fn feature_lifecycle_commands<'a>(
    hook: &str,
    feature: &'a ResolvedFeature,
) -> Option<&'a LifecycleCommands> {
    match hook {
        "onCreateCommand" => feature.metadata.on_create_command.as_ref(),
        "updateContentCommand" => feature.metadata.update_content_command.as_ref(),
        "postCreateCommand" => feature.metadata.post_create_command.as_ref(),
        "postStartCommand" => feature.metadata.post_start_command.as_ref(),
        "postAttachCommand" => feature.metadata.post_attach_command.as_ref(),
        _ => None,
    }
}

/// Run the in-container phases in canonical order, feature commands first
/// within each phase, stopping at the first failure.
pub async fn run_lifecycle_with_features(
    features: Option<&ResolvedFeatures>,
    user_hooks: &UserHooks<'_>,
    runner: &dyn CommandRunner,
) -> Result<()> {
    for hook in LIFECYCLE_ORDER {
        if let Some(features) = features {
            for feature in &features.order {
                if let Some(commands) = feature_lifecycle_commands(hook, feature) {
                    debug!("running {} for feature {}", hook, feature.metadata.id);
                    run_lifecycle_commands(hook, commands, runner).await?;
                }
            }
        }
        if let Some(Some(commands)) = user_hooks.get(hook) {
            run_lifecycle_commands(hook, commands, runner).await?;
        }
    }
    Ok(())
}

/// Run each feature's entrypoint (as declared) in installation order. Each
/// runs as `sh -c <entrypoint>` under the name `featureEntrypoint:<id>`.
pub async fn run_feature_entrypoints(
    features: &[ResolvedFeature],
    vars: &HashMap<String, String>,
    runner: &dyn CommandRunner,
) -> Result<()> {
    for feature in features {
        let Some(entrypoint) = feature_entrypoint_path(feature, vars)? else {
            continue;
        };
        let name = format!("featureEntrypoint:{}", feature.metadata.id);
        let command = LifecycleCommand::Shell(entrypoint);
        runner.run(&name, &command).await?;
    }
    Ok(())
}

/// Expand variables in a command: the shell string as a whole, or each argv
/// element.
pub fn expand_lifecycle_command(
    command: &LifecycleCommand,
    vars: &HashMap<String, String>,
    container_env: Option<&HashMap<String, String>>,
) -> Result<LifecycleCommand> {
    match command {
        LifecycleCommand::Shell(shell) => Ok(LifecycleCommand::Shell(expand_variables(
            shell,
            vars,
            container_env,
        )?)),
        LifecycleCommand::Exec(argv) => {
            let mut expanded = Vec::with_capacity(argv.len());
            for item in argv {
                expanded.push(expand_variables(item, vars, container_env)?);
            }
            Ok(LifecycleCommand::Exec(expanded))
        }
    }
}

/// The argv actually executed: `/bin/sh -c <shell>` or the exec argv as-is.
pub fn lifecycle_command_args(command: &LifecycleCommand) -> Vec<String> {
    match command {
        LifecycleCommand::Shell(shell) => vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            shell.clone(),
        ],
        LifecycleCommand::Exec(argv) => argv.clone(),
    }
}

/// Assemble the lifecycle env: the resolved container env overlaid with
/// `remoteEnv`, each remote value expanded against the accumulating map.
pub fn build_lifecycle_env(
    container_env: &HashMap<String, String>,
    remote_env: &HashMap<String, String>,
    vars: &HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    let mut merged = container_env.clone();
    let mut keys: Vec<&String> = remote_env.keys().collect();
    keys.sort();
    for key in keys {
        let expanded = expand_variables(&remote_env[key], vars, Some(&merged))?;
        merged.insert(key.clone(), expanded);
    }
    Ok(merged)
}

fn format_failure(name: &str, args: &[String], stdout: &str, stderr: &str, detail: &str) -> GodevError {
    let output = format!("{}\n{}", stdout, stderr).trim().to_string();
    let message = if output.is_empty() {
        format!("{} failed ({}): {}", name, args.join(" "), detail)
    } else {
        format!("{} failed ({}): {}: {}", name, args.join(" "), detail, output)
    };
    GodevError::Lifecycle(LifecycleError::CommandFailed { message })
}

fn expansion_failure(name: &str, err: GodevError) -> GodevError {
    GodevError::Lifecycle(LifecycleError::Expansion {
        hook: name.to_string(),
        message: err.to_string(),
    })
}

/// Runs commands as host subprocesses in the workspace root with the host's
/// environment.
pub struct HostRunner {
    pub workdir: PathBuf,
    pub vars: HashMap<String, String>,
    pub container_env: HashMap<String, String>,
}

#[async_trait]
impl CommandRunner for HostRunner {
    async fn run(&self, name: &str, command: &LifecycleCommand) -> Result<()> {
        let expanded = expand_lifecycle_command(command, &self.vars, Some(&self.container_env))
            .map_err(|e| expansion_failure(name, e))?;
        let args = lifecycle_command_args(&expanded);
        info!("running {} on host: {}", name, args.join(" "));
        let output = tokio::process::Command::new(&args[0])
            .args(&args[1..])
            .current_dir(&self.workdir)
            .output()
            .await
            .map_err(|e| format_failure(name, &args, "", "", &e.to_string()))?;
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = match output.status.code() {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            };
            return Err(format_failure(name, &args, &stdout, &stderr, &detail));
        }
        Ok(())
    }
}

/// Runs commands via engine exec inside a started container.
pub struct ContainerRunner<'a> {
    pub engine: &'a dyn ContainerEngine,
    pub container_id: String,
    pub workdir: String,
    pub user: String,
    pub vars: HashMap<String, String>,
    pub container_env: HashMap<String, String>,
    /// Sorted `KEY=VALUE` pairs passed to each exec
    pub env: Vec<String>,
}

#[async_trait]
impl CommandRunner for ContainerRunner<'_> {
    async fn run(&self, name: &str, command: &LifecycleCommand) -> Result<()> {
        let expanded = expand_lifecycle_command(command, &self.vars, Some(&self.container_env))
            .map_err(|e| expansion_failure(name, e))?;
        let args = lifecycle_command_args(&expanded);
        info!("running {} in container {}", name, self.container_id);
        let spec = ExecSpec {
            cmd: args.clone(),
            env: self.env.clone(),
            working_dir: self.workdir.clone(),
            user: self.user.clone(),
        };
        let output = self
            .engine
            .exec(&self.container_id, &spec)
            .await
            .map_err(|e| format_failure(name, &args, "", "", &e.to_string()))?;
        if output.exit_code != 0 {
            let detail = format!("exit code {}", output.exit_code);
            return Err(format_failure(
                name,
                &args,
                &output.stdout,
                &output.stderr,
                &detail,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_decode_shell_and_exec() {
        let commands: LifecycleCommands = serde_json::from_str(r#""echo hi""#).unwrap();
        assert_eq!(
            commands,
            LifecycleCommands::Single(LifecycleCommand::Shell("echo hi".into()))
        );

        let commands: LifecycleCommands = serde_json::from_str(r#"["echo","hi"]"#).unwrap();
        assert_eq!(
            commands,
            LifecycleCommands::Single(LifecycleCommand::Exec(vec!["echo".into(), "hi".into()]))
        );
    }

    #[test]
    fn test_decode_parallel_sorts_names() {
        let commands: LifecycleCommands =
            serde_json::from_str(r#"{"b":"echo b","a":["echo","a"]}"#).unwrap();
        match &commands {
            LifecycleCommands::Parallel(named) => {
                assert_eq!(named[0].name, "a");
                assert_eq!(named[1].name, "b");
                assert_eq!(
                    named[0].command,
                    LifecycleCommand::Exec(vec!["echo".into(), "a".into()])
                );
            }
            other => panic!("expected parallel commands, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_invalid_shapes() {
        assert!(serde_json::from_str::<LifecycleCommands>("42").is_err());
        assert!(serde_json::from_str::<LifecycleCommands>(r#""""#).is_err());
        assert!(serde_json::from_str::<LifecycleCommands>("[]").is_err());
        assert!(serde_json::from_str::<LifecycleCommands>("{}").is_err());
        assert!(serde_json::from_str::<LifecycleCommands>(r#"{"a": 1}"#).is_err());
    }

    #[test]
    fn test_canonical_round_trip() {
        let original: LifecycleCommands =
            serde_json::from_str(r#"{"b":"echo b","a":"echo a"}"#).unwrap();
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: LifecycleCommands = serde_json::from_str(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_lifecycle_command_args() {
        let shell = LifecycleCommand::Shell("echo hi".into());
        assert_eq!(lifecycle_command_args(&shell), vec!["/bin/sh", "-c", "echo hi"]);

        let exec = LifecycleCommand::Exec(vec!["echo".into(), "hi".into()]);
        assert_eq!(lifecycle_command_args(&exec), vec!["echo", "hi"]);
    }

    #[test]
    fn test_build_lifecycle_env_expands_remote_against_base() {
        let container_env = HashMap::from([("BASE".to_string(), "/opt".to_string())]);
        let remote_env =
            HashMap::from([("TOOLS".to_string(), "${containerEnv:BASE}/tools".to_string())]);
        let env = build_lifecycle_env(&container_env, &remote_env, &HashMap::new()).unwrap();
        assert_eq!(env["TOOLS"], "/opt/tools");
    }

    /// Records every invocation; fails those whose name appears in `fail`.
    struct RecordingRunner {
        calls: Mutex<Vec<String>>,
        fail: Vec<String>,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: Vec::new(),
            }
        }

        fn failing(names: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: names.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, name: &str, _command: &LifecycleCommand) -> Result<()> {
            self.calls.lock().unwrap().push(name.to_string());
            if self.fail.iter().any(|f| f == name) {
                return Err(GodevError::Lifecycle(LifecycleError::CommandFailed {
                    message: format!("{} failed", name),
                }));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_parallel_names_and_aggregate_failure() {
        let commands: LifecycleCommands =
            serde_json::from_str(r#"{"alpha":"echo a","beta":"echo b"}"#).unwrap();

        let runner = RecordingRunner::new();
        run_lifecycle_commands("postCreateCommand", &commands, &runner)
            .await
            .unwrap();
        let mut calls = runner.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec!["postCreateCommand:alpha", "postCreateCommand:beta"]
        );

        let runner = RecordingRunner::failing(&["postCreateCommand:beta"]);
        let err = run_lifecycle_commands("postCreateCommand", &commands, &runner)
            .await
            .unwrap_err();
        assert!(format!("{}", err).contains("postCreateCommand:beta"));
        // both sub-commands still ran
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_parallel_subcommands_overlap() {
        use tokio::sync::Barrier;

        struct BarrierRunner {
            barrier: Barrier,
        }

        #[async_trait]
        impl CommandRunner for BarrierRunner {
            async fn run(&self, _name: &str, _command: &LifecycleCommand) -> Result<()> {
                // both sub-commands must reach the barrier before either returns
                self.barrier.wait().await;
                Ok(())
            }
        }

        let commands: LifecycleCommands =
            serde_json::from_str(r#"{"a":"sleep 1","b":"sleep 1"}"#).unwrap();
        let runner = BarrierRunner {
            barrier: Barrier::new(2),
        };
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            run_lifecycle_commands("postStartCommand", &commands, &runner),
        )
        .await
        .expect("parallel sub-commands deadlocked")
        .unwrap();
    }

    #[tokio::test]
    async fn test_feature_hooks_run_before_user_hooks() {
        use crate::features::tests::sample_feature;

        let mut feature = sample_feature("tooling");
        feature.metadata.post_create_command =
            Some(serde_json::from_str(r#""echo feat""#).unwrap());
        let features = ResolvedFeatures {
            order: vec![feature],
            ..ResolvedFeatures::default()
        };

        let user_post_create: LifecycleCommands = serde_json::from_str(r#""echo user""#).unwrap();
        let mut hooks: UserHooks = HashMap::new();
        hooks.insert("postCreateCommand", Some(&user_post_create));

        let runner = RecordingRunner::new();
        run_lifecycle_with_features(Some(&features), &hooks, &runner)
            .await
            .unwrap();
        assert_eq!(runner.calls(), vec!["postCreateCommand", "postCreateCommand"]);
    }

    #[tokio::test]
    async fn test_failure_stops_later_phases() {
        let on_create: LifecycleCommands = serde_json::from_str(r#""echo create""#).unwrap();
        let post_start: LifecycleCommands = serde_json::from_str(r#""echo start""#).unwrap();
        let mut hooks: UserHooks = HashMap::new();
        hooks.insert("onCreateCommand", Some(&on_create));
        hooks.insert("postStartCommand", Some(&post_start));

        let runner = RecordingRunner::failing(&["onCreateCommand"]);
        let err = run_lifecycle_with_features(None, &hooks, &runner)
            .await
            .unwrap_err();
        assert!(format!("{}", err).contains("onCreateCommand"));
        assert_eq!(runner.calls(), vec!["onCreateCommand"]);
    }

    #[tokio::test]
    async fn test_feature_entrypoints_run_in_order() {
        use crate::features::tests::sample_feature;

        let mut first = sample_feature("a");
        first.image_dir = "/usr/local/share/devcontainer/features/01-a".into();
        first.metadata.entrypoint = Some("entry.sh".into());
        let mut second = sample_feature("b");
        second.image_dir = "/usr/local/share/devcontainer/features/02-b".into();
        second.metadata.entrypoint = Some("/usr/bin/b-init".into());
        let third = sample_feature("c");

        let runner = RecordingRunner::new();
        run_feature_entrypoints(&[first, second, third], &HashMap::new(), &runner)
            .await
            .unwrap();
        assert_eq!(
            runner.calls(),
            vec!["featureEntrypoint:a", "featureEntrypoint:b"]
        );
    }

    #[tokio::test]
    async fn test_host_runner_reports_output_on_failure() {
        let runner = HostRunner {
            workdir: std::env::temp_dir(),
            vars: HashMap::new(),
            container_env: HashMap::new(),
        };
        let command =
            LifecycleCommand::Shell("echo boom-stdout; echo boom-stderr >&2; exit 3".into());
        let err = runner.run("onCreateCommand", &command).await.unwrap_err();
        let message = format!("{}", err);
        assert!(message.contains("onCreateCommand failed"));
        assert!(message.contains("exit code 3"));
        assert!(message.contains("boom-stdout"));
        assert!(message.contains("boom-stderr"));
    }

    #[tokio::test]
    async fn test_host_runner_success() {
        let runner = HostRunner {
            workdir: std::env::temp_dir(),
            vars: HashMap::new(),
            container_env: HashMap::new(),
        };
        let command = LifecycleCommand::Exec(vec!["true".into()]);
        runner.run("postCreateCommand", &command).await.unwrap();
    }
}
