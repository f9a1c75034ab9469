//! Feature resolution
//!
//! Walks the requested features (sorted for determinism), fetching each one,
//! resolving its options, and recursing into `dependsOn`. Requests are keyed
//! by `source:id:hash(options)` for cycle detection and caching; resolved
//! features dedupe on their content-derived `dependencyKey`, so two requests
//! for the same installation unit produce a single plan node.

use crate::config::DevcontainerConfig;
use crate::errors::{GodevError, GraphError, Result};
use crate::feature_ref::{normalize_feature_id, parse_feature_reference, FeatureReference};
use crate::features::{
    aggregate_feature_config, feature_equality_key, feature_request_key, read_feature_metadata,
    resolve_feature_options, validate_feature_dir_name, validate_feature_metadata, FeatureOptions,
    ResolvedFeature, ResolvedFeatures,
};
use crate::oci::{fetch_local_feature, FeatureFetcher, FetchedFeature};
use crate::ordering::order_features;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, instrument};

/// Resolve the configuration's feature set into an ordered installation
/// plan. Returns `None` when no features are requested.
#[instrument(skip_all, fields(config_path = %config_path.display()))]
pub async fn resolve_features(
    fetcher: &FeatureFetcher,
    config_path: &Path,
    workspace_root: &Path,
    cfg: &DevcontainerConfig,
) -> Result<Option<ResolvedFeatures>> {
    if cfg.features.is_empty() {
        return Ok(None);
    }
    let config_dir = config_path
        .parent()
        .unwrap_or(Path::new("/"))
        .to_path_buf();
    let devcontainer_dir = workspace_root.join(".devcontainer");
    let mut resolver = FeatureResolver {
        config_dir,
        devcontainer_dir,
        fetcher,
        resolving: Vec::new(),
        resolved: HashMap::new(),
        features: Vec::new(),
        temp_dirs: Vec::new(),
    };

    // BTreeMap iteration gives the lexicographic seed order
    for (id, options) in &cfg.features {
        resolver.resolve_request(id.clone(), options.clone()).await?;
    }
    info!("resolved {} feature(s)", resolver.features.len());

    let ordered = order_features(resolver.features, &cfg.override_feature_install_order)?;
    let contributions = aggregate_feature_config(&ordered);
    Ok(Some(ResolvedFeatures {
        order: ordered,
        container_env: contributions.container_env,
        mounts: contributions.mounts,
        privileged: contributions.privileged,
        init: contributions.init,
        cap_add: contributions.cap_add,
        security_opt: contributions.security_opt,
        temp_dirs: resolver.temp_dirs,
    }))
}

struct FeatureResolver<'a> {
    config_dir: PathBuf,
    devcontainer_dir: PathBuf,
    fetcher: &'a FeatureFetcher,
    /// Request keys currently on the resolve stack
    resolving: Vec<String>,
    /// Request keys and dependency keys, both mapping into `features`
    resolved: HashMap<String, usize>,
    features: Vec<ResolvedFeature>,
    temp_dirs: Vec<TempDir>,
}

impl FeatureResolver<'_> {
    fn resolve_request(
        &mut self,
        id: String,
        options: FeatureOptions,
    ) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let reference = parse_feature_reference(&id)?;
            let request_key = feature_request_key(&reference, &options);
            if self.resolving.contains(&request_key) {
                return Err(GodevError::Graph(GraphError::Cycle { path: id }));
            }
            if let Some(&index) = self.resolved.get(&request_key) {
                return Ok(index);
            }
            self.resolving.push(request_key.clone());
            let result = self.fetch_and_record(&reference, &options, &request_key).await;
            self.resolving.pop();
            result
        })
    }

    async fn fetch_and_record(
        &mut self,
        reference: &FeatureReference,
        options: &FeatureOptions,
        request_key: &str,
    ) -> Result<usize> {
        let resolved = self.fetch_and_parse(reference, options).await?;
        if let Some(&index) = self.resolved.get(&resolved.dependency_key) {
            // same installation unit reached through a different request
            self.resolved.insert(request_key.to_string(), index);
            return Ok(index);
        }

        let index = self.features.len();
        self.resolved
            .insert(resolved.dependency_key.clone(), index);
        self.resolved.insert(request_key.to_string(), index);
        let depends_on = resolved.metadata.depends_on.clone();
        let installs_after = resolved.metadata.installs_after.clone();
        self.features.push(resolved);

        for (dep_id, dep_options) in depends_on {
            let dep_index = self.resolve_request(dep_id, dep_options).await?;
            let dep_key = self.features[dep_index].dependency_key.clone();
            self.features[index].depends_on_keys.push(dep_key);
        }
        self.features[index].installs_after_ids = normalize_ids(&installs_after);
        Ok(index)
    }

    async fn fetch_and_parse(
        &mut self,
        reference: &FeatureReference,
        options: &FeatureOptions,
    ) -> Result<ResolvedFeature> {
        let (fetched, base_name, tag) = match reference {
            FeatureReference::Local { path, .. } => {
                let fetched =
                    fetch_local_feature(path, &self.config_dir, &self.devcontainer_dir)?;
                (fetched, normalize_feature_id(path), String::new())
            }
            FeatureReference::Http { url, .. } => {
                let fetched = self.fetcher.fetch_http(url).await?;
                (fetched, normalize_feature_id(url), String::new())
            }
            FeatureReference::Oci {
                registry,
                repository,
                reference: oci_ref,
                ..
            } => {
                let fetched = self.fetcher.fetch_oci(registry, repository, oci_ref).await?;
                let base_name = format!(
                    "{}/{}",
                    registry.to_lowercase(),
                    repository.to_lowercase()
                );
                (fetched, base_name, oci_ref.clone())
            }
        };
        let FetchedFeature {
            feature_dir,
            digest,
            temp_dir,
        } = fetched;
        if let Some(temp_dir) = temp_dir {
            self.temp_dirs.push(temp_dir);
        }
        debug!(
            "fetched feature {} -> {} ({})",
            reference.id(),
            feature_dir.display(),
            digest
        );

        let metadata = read_feature_metadata(&feature_dir)?;
        validate_feature_metadata(&metadata)?;
        if matches!(reference, FeatureReference::Local { .. }) {
            validate_feature_dir_name(&metadata.id, &feature_dir)?;
        }
        let resolved_options = resolve_feature_options(&metadata.options, options)?;
        let dependency_key =
            feature_equality_key(reference.source(), &digest, &resolved_options.values);
        let canonical_name = match reference {
            FeatureReference::Local { .. } => base_name.clone(),
            _ => format!("{}@{}", base_name, digest),
        };

        Ok(ResolvedFeature {
            reference: reference.clone(),
            metadata,
            feature_dir,
            image_dir: String::new(),
            options: resolved_options,
            dependency_key,
            depends_on_keys: Vec::new(),
            installs_after_ids: Vec::new(),
            installs_after_keys: Vec::new(),
            base_name,
            tag,
            canonical_name,
        })
    }
}

fn normalize_ids(ids: &[String]) -> Vec<String> {
    ids.iter()
        .filter(|id| !id.trim().is_empty())
        .map(|id| normalize_feature_id(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn write_local_feature(devcontainer_dir: &Path, id: &str, metadata: &str) {
        let dir = devcontainer_dir.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("devcontainer-feature.json"), metadata).unwrap();
        std::fs::write(dir.join("install.sh"), "#!/bin/sh\ntrue\n").unwrap();
    }

    fn workspace_with_features(features: &[(&str, &str)]) -> tempfile::TempDir {
        let workspace = tempfile::tempdir().unwrap();
        let devcontainer_dir = workspace.path().join(".devcontainer");
        std::fs::create_dir_all(&devcontainer_dir).unwrap();
        for (id, metadata) in features {
            write_local_feature(&devcontainer_dir, id, metadata);
        }
        workspace
    }

    async fn resolve(
        workspace: &Path,
        config: &str,
    ) -> Result<Option<ResolvedFeatures>> {
        let cfg = parse_config(config).unwrap();
        let fetcher = FeatureFetcher::new().unwrap();
        let config_path = workspace.join(".devcontainer/devcontainer.json");
        resolve_features(&fetcher, &config_path, workspace, &cfg).await
    }

    #[tokio::test]
    async fn test_empty_features_yield_no_plan() {
        let workspace = workspace_with_features(&[]);
        let plan = resolve(workspace.path(), r#"{"image":"alpine"}"#)
            .await
            .unwrap();
        assert!(plan.is_none());
    }

    #[tokio::test]
    async fn test_single_local_feature() {
        let workspace = workspace_with_features(&[(
            "tooling",
            r#"{"id":"tooling","version":"1.0.0","name":"Tooling"}"#,
        )]);
        let plan = resolve(
            workspace.path(),
            r#"{"image":"alpine","features":{"./tooling":{}}}"#,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(plan.order.len(), 1);
        assert_eq!(plan.order[0].metadata.id, "tooling");
        assert_eq!(plan.order[0].base_name, "./tooling");
        assert!(plan.order[0].dependency_key.starts_with("local:sha256:"));
    }

    #[tokio::test]
    async fn test_depends_on_pulls_in_dependency() {
        let workspace = workspace_with_features(&[
            (
                "base",
                r#"{"id":"base","version":"1.0.0","name":"Base"}"#,
            ),
            (
                "tool",
                r#"{"id":"tool","version":"1.0.0","name":"Tool","dependsOn":{"./base":{}}}"#,
            ),
        ]);
        let plan = resolve(
            workspace.path(),
            r#"{"image":"alpine","features":{"./tool":{}}}"#,
        )
        .await
        .unwrap()
        .unwrap();
        let ids: Vec<&str> = plan.order.iter().map(|f| f.metadata.id.as_str()).collect();
        assert_eq!(ids, vec!["base", "tool"]);
    }

    #[tokio::test]
    async fn test_dependency_cycle_detected() {
        let workspace = workspace_with_features(&[
            (
                "a",
                r#"{"id":"a","version":"1.0.0","name":"A","dependsOn":{"./b":{}}}"#,
            ),
            (
                "b",
                r#"{"id":"b","version":"1.0.0","name":"B","dependsOn":{"./a":{}}}"#,
            ),
        ]);
        let err = resolve(
            workspace.path(),
            r#"{"image":"alpine","features":{"./a":{}}}"#,
        )
        .await
        .unwrap_err();
        assert!(format!("{}", err).contains("cycle"));
    }

    #[tokio::test]
    async fn test_duplicate_requests_dedupe() {
        let workspace = workspace_with_features(&[
            (
                "shared",
                r#"{"id":"shared","version":"1.0.0","name":"Shared"}"#,
            ),
            (
                "tool",
                r#"{"id":"tool","version":"1.0.0","name":"Tool","dependsOn":{"./shared":{}}}"#,
            ),
        ]);
        // shared requested directly and via tool's dependsOn
        let plan = resolve(
            workspace.path(),
            r#"{"image":"alpine","features":{"./tool":{},"./shared":{}}}"#,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(plan.order.len(), 2);
    }

    #[tokio::test]
    async fn test_local_dir_name_must_match_id() {
        let workspace = workspace_with_features(&[(
            "tooling",
            r#"{"id":"other","version":"1.0.0","name":"Other"}"#,
        )]);
        let err = resolve(
            workspace.path(),
            r#"{"image":"alpine","features":{"./tooling":{}}}"#,
        )
        .await
        .unwrap_err();
        assert!(format!("{}", err).contains("does not match id"));
    }

    #[tokio::test]
    async fn test_metadata_requires_id_version_name() {
        let workspace = workspace_with_features(&[(
            "tooling",
            r#"{"id":"tooling","name":"Tooling"}"#,
        )]);
        let err = resolve(
            workspace.path(),
            r#"{"image":"alpine","features":{"./tooling":{}}}"#,
        )
        .await
        .unwrap_err();
        assert!(format!("{}", err).contains("requires id, version, and name"));
    }

    #[tokio::test]
    async fn test_option_values_recorded() {
        let workspace = workspace_with_features(&[(
            "tooling",
            r#"{
                "id": "tooling", "version": "1.0.0", "name": "Tooling",
                "options": {
                    "version": {"type": "string", "default": "lts"},
                    "extras": {"type": "boolean", "default": false}
                }
            }"#,
        )]);
        let plan = resolve(
            workspace.path(),
            r#"{"image":"alpine","features":{"./tooling":{"version":"18"}}}"#,
        )
        .await
        .unwrap()
        .unwrap();
        let feature = &plan.order[0];
        assert_eq!(feature.options.values["version"], "18");
        assert_eq!(feature.options.values["extras"], "false");
        assert_eq!(feature.options.user_values.len(), 1);
    }

    #[test]
    fn test_normalize_ids() {
        let ids = vec![
            "GHCR.io/Acme/A".to_string(),
            "  ".to_string(),
            "b".to_string(),
        ];
        assert_eq!(normalize_ids(&ids), vec!["ghcr.io/acme/a", "b"]);
    }
}
