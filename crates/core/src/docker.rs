//! Docker CLI engine
//!
//! Implements [`ContainerEngine`] by shelling out to the `docker` binary.
//! Output is captured; stderr from a failed invocation becomes the error
//! message. The binary path defaults to `docker` and can be overridden via
//! the `GODEV_DOCKER` environment variable.

use crate::engine::{BuildRequest, ContainerEngine, ContainerSpec, ExecOutput, ExecSpec};
use crate::errors::{EngineError, GodevError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Container engine backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker_path: String,
}

impl DockerCli {
    pub fn new() -> Self {
        let docker_path =
            std::env::var("GODEV_DOCKER").unwrap_or_else(|_| "docker".to_string());
        Self { docker_path }
    }

    pub fn with_path(docker_path: impl Into<String>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }

    /// Run a docker command and return trimmed stdout; a non-zero exit turns
    /// stderr into the error message.
    async fn run(&self, args: &[String]) -> Result<String> {
        debug!("docker {}", args.join(" "));
        let output = Command::new(&self.docker_path)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                GodevError::Engine(EngineError::Command {
                    message: format!("failed to execute {}: {}", self.docker_path, e),
                })
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            let message = if message.is_empty() {
                format!("exit status {:?}", output.status.code())
            } else {
                message.to_string()
            };
            return Err(GodevError::Engine(EngineError::Command {
                message: format!("docker {}: {}", args.join(" "), message),
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn pull_image(&self, image: &str) -> Result<()> {
        self.run(&["pull".to_string(), image.to_string()])
            .await
            .map_err(|e| {
                GodevError::Engine(EngineError::Pull {
                    image: image.to_string(),
                    message: e.to_string(),
                })
            })?;
        Ok(())
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<()> {
        let mut args = vec!["build".to_string()];
        args.push("-f".to_string());
        args.push(
            request
                .context_dir
                .join(&request.dockerfile)
                .display()
                .to_string(),
        );
        for tag in &request.tags {
            args.push("-t".to_string());
            args.push(tag.clone());
        }
        for (key, value) in &request.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(target) = &request.target {
            args.push("--target".to_string());
            args.push(target.clone());
        }
        for cache in &request.cache_from {
            args.push("--cache-from".to_string());
            args.push(cache.clone());
        }
        args.push(request.context_dir.display().to_string());
        self.run(&args).await.map_err(|e| {
            GodevError::Engine(EngineError::Build {
                message: e.to_string(),
            })
        })?;
        Ok(())
    }

    async fn image_user(&self, image: &str) -> Result<String> {
        let user = self
            .run(&[
                "image".to_string(),
                "inspect".to_string(),
                "--format".to_string(),
                "{{.Config.User}}".to_string(),
                image.to_string(),
            ])
            .await?;
        Ok(user)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut args = vec!["create".to_string()];
        if !spec.name.is_empty() {
            args.push("--name".to_string());
            args.push(spec.name.clone());
        }
        for env in &spec.env {
            args.push("-e".to_string());
            args.push(env.clone());
        }
        if !spec.working_dir.is_empty() {
            args.push("-w".to_string());
            args.push(spec.working_dir.clone());
        }
        if !spec.user.is_empty() {
            args.push("-u".to_string());
            args.push(spec.user.clone());
        }
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        for port in &spec.ports {
            args.push("-p".to_string());
            args.push(port.clone());
        }
        for mount in &spec.mounts {
            args.push("--mount".to_string());
            args.push(mount.to_string());
        }
        if spec.tty {
            args.push("-t".to_string());
        }
        if spec.auto_remove {
            args.push("--rm".to_string());
        }
        if spec.privileged {
            args.push("--privileged".to_string());
        }
        for cap in &spec.cap_add {
            args.push("--cap-add".to_string());
            args.push(cap.clone());
        }
        for opt in &spec.security_opt {
            args.push("--security-opt".to_string());
            args.push(opt.clone());
        }
        if spec.init == Some(true) {
            args.push("--init".to_string());
        }
        if let Some(network) = &spec.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        if let Some(cpu_quota) = spec.cpu_quota {
            args.push("--cpu-quota".to_string());
            args.push(cpu_quota.to_string());
        }
        if let Some(memory) = &spec.memory {
            args.push("--memory".to_string());
            args.push(memory.clone());
        }
        args.push(spec.image.clone());
        if let Some(command) = &spec.command {
            args.extend(command.iter().cloned());
        }
        let id = self.run(&args).await?;
        Ok(id.lines().last().unwrap_or("").trim().to_string())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.run(&["start".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Option<Duration>) -> Result<()> {
        let mut args = vec!["stop".to_string()];
        if let Some(timeout) = timeout {
            args.push("-t".to_string());
            args.push(timeout.as_secs().to_string());
        }
        args.push(id.to_string());
        self.run(&args).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.run(&[
            "rm".to_string(),
            "-f".to_string(),
            "-v".to_string(),
            id.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecOutput> {
        let mut args = vec!["exec".to_string()];
        if !spec.working_dir.is_empty() {
            args.push("-w".to_string());
            args.push(spec.working_dir.clone());
        }
        if !spec.user.is_empty() {
            args.push("-u".to_string());
            args.push(spec.user.clone());
        }
        for env in &spec.env {
            args.push("-e".to_string());
            args.push(env.clone());
        }
        args.push(id.to_string());
        args.extend(spec.cmd.iter().cloned());

        debug!("docker {}", args.join(" "));
        let output = Command::new(&self.docker_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                GodevError::Engine(EngineError::Command {
                    message: format!("failed to execute {}: {}", self.docker_path, e),
                })
            })?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1) as i64,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn container_labels(&self, id: &str) -> Result<HashMap<String, String>> {
        let raw = self
            .run(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{json .Config.Labels}}".to_string(),
                id.to_string(),
            ])
            .await?;
        if raw.is_empty() || raw == "null" {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            GodevError::Engine(EngineError::Command {
                message: format!("failed to parse container labels: {}", e),
            })
        })
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let raw = self.run(&["wait".to_string(), id.to_string()]).await?;
        raw.trim().parse::<i64>().map_err(|e| {
            GodevError::Engine(EngineError::Command {
                message: format!("unexpected docker wait output {:?}: {}", raw, e),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_reports_stderr_on_failure() {
        // `false` exits non-zero without output; the error still names the args
        let cli = DockerCli::with_path("false");
        let err = cli.run(&["ps".to_string()]).await.unwrap_err();
        assert!(format!("{}", err).contains("docker ps"));
    }

    #[tokio::test]
    async fn test_run_missing_binary() {
        let cli = DockerCli::with_path("/nonexistent/docker-binary");
        let err = cli.pull_image("alpine").await.unwrap_err();
        assert!(matches!(err, GodevError::Engine(_)));
    }

    #[tokio::test]
    async fn test_exec_returns_exit_code_not_error() {
        // use /bin/sh as a stand-in "docker" so `sh exec ...` fails with a
        // real exit code instead of an engine error
        let cli = DockerCli::with_path("sh");
        let spec = ExecSpec {
            cmd: vec!["irrelevant".to_string()],
            ..ExecSpec::default()
        };
        let output = cli.exec("container", &spec).await.unwrap();
        assert_ne!(output.exit_code, 0);
    }
}
