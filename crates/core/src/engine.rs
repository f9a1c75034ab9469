//! Container engine abstraction
//!
//! The orchestrator talks to the container runtime through [`ContainerEngine`]
//! so the runtime stays swappable and tests can run against a mock. The
//! default implementation is [`crate::docker::DockerCli`].

use crate::errors::Result;
use crate::mount::Mount;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    /// Sorted `KEY=VALUE` pairs
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub labels: BTreeMap<String, String>,
    /// `host:container[/proto]` publish specs
    pub ports: Vec<String>,
    pub mounts: Vec<Mount>,
    /// Command override; `None` keeps the image's default
    pub command: Option<Vec<String>>,
    pub tty: bool,
    pub auto_remove: bool,
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub init: Option<bool>,
    pub network: Option<String>,
    pub cpu_quota: Option<i64>,
    /// Memory limit in the engine's human form (`"512m"`, `"2g"`)
    pub memory: Option<String>,
}

/// An exec request inside a running container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
}

/// Captured result of an exec. A non-zero exit code is data, not an engine
/// error; callers decide how to report it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// An image build request against a prepared context directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildRequest {
    pub context_dir: PathBuf,
    /// Dockerfile path relative to the context
    pub dockerfile: String,
    pub tags: Vec<String>,
    pub build_args: Vec<(String, String)>,
    pub target: Option<String>,
    pub cache_from: Vec<String>,
}

/// Container runtime operations used by the orchestrator.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<()>;

    async fn build_image(&self, request: &BuildRequest) -> Result<()>;

    /// The default user configured on an image (empty when unset).
    async fn image_user(&self, image: &str) -> Result<String>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, id: &str, timeout: Option<Duration>) -> Result<()>;

    /// Force-remove a container and its volumes.
    async fn remove_container(&self, id: &str) -> Result<()>;

    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecOutput>;

    async fn container_labels(&self, id: &str) -> Result<HashMap<String, String>>;

    /// Block until the container stops; returns its exit status.
    async fn wait_container(&self, id: &str) -> Result<i64>;
}
