//! Shared test support: a scripted container engine and workspace fixtures.
#![allow(dead_code)]

use async_trait::async_trait;
use godev_core::engine::{
    BuildRequest, ContainerEngine, ContainerSpec, ExecOutput, ExecSpec,
};
use godev_core::errors::{EngineError, GodevError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Every call the mock engine observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Pull(String),
    Build { dockerfile: String, tags: Vec<String> },
    ImageUser(String),
    Create(Box<ContainerSpec>),
    Start(String),
    Stop(String),
    Remove(String),
    Exec { container_id: String, spec: ExecSpec },
    Wait(String),
}

/// Scripted [`ContainerEngine`]: successful by default, with switches for
/// exec failures and container exit status.
#[derive(Default)]
pub struct MockEngine {
    pub calls: Mutex<Vec<EngineCall>>,
    /// Commands whose joined argv contains one of these markers exit 1
    pub failing_exec_markers: Vec<String>,
    /// Exit status reported by wait_container
    pub wait_status: i64,
    /// User reported for every image
    pub image_user: String,
    pub labels: Mutex<HashMap<String, String>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn execs(&self) -> Vec<ExecSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Exec { spec, .. } => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn created_spec(&self) -> Option<ContainerSpec> {
        self.calls().into_iter().find_map(|call| match call {
            EngineCall::Create(spec) => Some(*spec),
            _ => None,
        })
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn pull_image(&self, image: &str) -> Result<()> {
        self.record(EngineCall::Pull(image.to_string()));
        Ok(())
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<()> {
        // capture the emitted Dockerfile so tests can assert on it
        let dockerfile_path = request.context_dir.join(&request.dockerfile);
        let dockerfile = std::fs::read_to_string(&dockerfile_path).unwrap_or_default();
        self.record(EngineCall::Build {
            dockerfile,
            tags: request.tags.clone(),
        });
        Ok(())
    }

    async fn image_user(&self, image: &str) -> Result<String> {
        self.record(EngineCall::ImageUser(image.to_string()));
        Ok(self.image_user.clone())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(EngineCall::Create(Box::new(spec.clone())));
        Ok("mock-container-id".to_string())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record(EngineCall::Start(id.to_string()));
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Option<Duration>) -> Result<()> {
        self.record(EngineCall::Stop(id.to_string()));
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.record(EngineCall::Remove(id.to_string()));
        Ok(())
    }

    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecOutput> {
        self.record(EngineCall::Exec {
            container_id: id.to_string(),
            spec: spec.clone(),
        });
        let joined = spec.cmd.join(" ");
        if self
            .failing_exec_markers
            .iter()
            .any(|marker| joined.contains(marker))
        {
            return Ok(ExecOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "scripted failure".to_string(),
            });
        }
        Ok(ExecOutput::default())
    }

    async fn container_labels(&self, id: &str) -> Result<HashMap<String, String>> {
        if id != "mock-container-id" {
            return Err(GodevError::Engine(EngineError::Command {
                message: format!("no such container: {}", id),
            }));
        }
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        self.record(EngineCall::Wait(id.to_string()));
        Ok(self.wait_status)
    }
}

/// A workspace directory with `.devcontainer/devcontainer.json` and optional
/// local features.
pub struct WorkspaceFixture {
    pub dir: tempfile::TempDir,
}

impl WorkspaceFixture {
    pub fn new(config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let devcontainer = dir.path().join(".devcontainer");
        std::fs::create_dir_all(&devcontainer).unwrap();
        std::fs::write(devcontainer.join("devcontainer.json"), config).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join(".devcontainer").join("devcontainer.json")
    }

    /// Add a local feature under `.devcontainer/<id>/`.
    pub fn add_feature(&self, id: &str, metadata: &str) {
        let feature_dir = self.dir.path().join(".devcontainer").join(id);
        std::fs::create_dir_all(&feature_dir).unwrap();
        std::fs::write(feature_dir.join("devcontainer-feature.json"), metadata).unwrap();
        std::fs::write(feature_dir.join("install.sh"), "#!/bin/sh\ntrue\n").unwrap();
    }
}
