//! Feature fetching over OCI and HTTP, plus local path resolution

use super::auth::{load_registry_auth, RegistryCredential};
use super::client::{HttpClient, HttpResponse, ReqwestClient};
use crate::errors::{FetchError, GodevError, Result};
use crate::features::local_feature_digest;
use flate2::read::GzDecoder;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, instrument};

/// Media type fragment identifying the feature content layer.
const FEATURE_LAYER_MEDIA_TYPE: &str = "devcontainers.layer.v1+tar";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(rename = "mediaType", default)]
    media_type: String,
    #[serde(default)]
    digest: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "mediaType", default)]
    media_type: String,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

/// A feature staged on local disk.
///
/// `temp_dir` owns the extraction directory for fetched features; it is
/// `None` for local features, whose directory belongs to the workspace.
#[derive(Debug)]
pub struct FetchedFeature {
    pub feature_dir: PathBuf,
    pub digest: String,
    pub temp_dir: Option<TempDir>,
}

/// Fetches features from OCI registries and HTTP URLs.
pub struct FeatureFetcher {
    client: Box<dyn HttpClient>,
    auth_cache: Mutex<HashMap<String, RegistryCredential>>,
}

impl FeatureFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(Box::new(ReqwestClient::new()?)))
    }

    pub fn with_client(client: Box<dyn HttpClient>) -> Self {
        Self {
            client,
            auth_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Download a feature archive from a direct URL.
    #[instrument(skip(self))]
    pub async fn fetch_http(&self, url: &str) -> Result<FetchedFeature> {
        let response = self.client.get(url, &[]).await?;
        if !response.is_success() {
            return Err(GodevError::Fetch(FetchError::Download {
                message: format!("{}: HTTP {}", url, response.status),
            }));
        }
        let digest = sha256_digest(&response.body);
        let (temp_dir, feature_dir) = extract_feature_archive(&response.body)?;
        Ok(FetchedFeature {
            feature_dir,
            digest,
            temp_dir: Some(temp_dir),
        })
    }

    /// Resolve and download a feature from an OCI registry.
    #[instrument(skip(self))]
    pub async fn fetch_oci(
        &self,
        registry: &str,
        repository: &str,
        reference: &str,
    ) -> Result<FetchedFeature> {
        let base = registry_base_url(registry);
        let manifest_url = format!("{}/v2/{}/manifests/{}", base, repository, reference);
        let response = self
            .request_with_auth(registry, &manifest_url, Some(MANIFEST_ACCEPT))
            .await?;
        if !response.is_success() {
            return Err(oci_error(format!(
                "manifest fetch failed for {}: HTTP {}",
                manifest_url, response.status
            )));
        }
        let mut manifest_bytes = response.body.to_vec();
        let mut manifest: Manifest = parse_manifest(&manifest_bytes)?;
        let media_type = response
            .header("content-type")
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .unwrap_or_else(|| manifest.media_type.clone());

        if is_manifest_index(&media_type) {
            let first = manifest.manifests.first().ok_or_else(|| {
                oci_error("OCI manifest index has no manifests".to_string())
            })?;
            debug!("descending into image index entry {}", first.digest);
            let entry_url = format!("{}/v2/{}/manifests/{}", base, repository, first.digest);
            let entry = self
                .request_with_auth(registry, &entry_url, Some(MANIFEST_ACCEPT))
                .await?;
            if !entry.is_success() {
                return Err(oci_error(format!(
                    "manifest fetch failed for {}: HTTP {}",
                    entry_url, entry.status
                )));
            }
            manifest_bytes = entry.body.to_vec();
            manifest = parse_manifest(&manifest_bytes)?;
        }

        let digest = sha256_digest(&manifest_bytes);
        let layer = manifest
            .layers
            .iter()
            .find(|layer| layer.media_type.contains(FEATURE_LAYER_MEDIA_TYPE))
            .ok_or_else(|| oci_error("feature layer not found in OCI manifest".to_string()))?;

        let blob_url = format!("{}/v2/{}/blobs/{}", base, repository, layer.digest);
        let blob = self.request_with_auth(registry, &blob_url, None).await?;
        if !blob.is_success() {
            return Err(oci_error(format!(
                "blob fetch failed for {}: HTTP {}",
                blob_url, blob.status
            )));
        }

        let (temp_dir, feature_dir) = extract_feature_archive(&blob.body)?;
        Ok(FetchedFeature {
            feature_dir,
            digest,
            temp_dir: Some(temp_dir),
        })
    }

    /// GET with stored credentials; on a 401 bearer challenge, exchange for a
    /// token and retry once. A failed token exchange returns the original
    /// response rather than a new error.
    async fn request_with_auth(
        &self,
        registry: &str,
        url: &str,
        accept: Option<&str>,
    ) -> Result<HttpResponse> {
        let mut headers = Vec::new();
        if let Some(accept) = accept {
            headers.push(("Accept".to_string(), accept.to_string()));
        }
        if let Some(authorization) = self.lookup_auth(registry).authorization_header() {
            headers.push(("Authorization".to_string(), authorization));
        }
        let response = self.client.get(url, &headers).await?;
        if response.status != 401 {
            return Ok(response);
        }
        let Some(challenge) = response.header("www-authenticate").map(|s| s.to_string()) else {
            return Ok(response);
        };
        let Some(token) = self.exchange_bearer_token(&challenge).await else {
            return Ok(response);
        };
        debug!("retrying {} with exchanged bearer token", url);
        let mut retry_headers = Vec::new();
        if let Some(accept) = accept {
            retry_headers.push(("Accept".to_string(), accept.to_string()));
        }
        retry_headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        self.client.get(url, &retry_headers).await
    }

    /// Parse `Bearer realm="...",service="...",scope="..."` and fetch a
    /// token from the realm. Any failure yields `None`.
    async fn exchange_bearer_token(&self, challenge: &str) -> Option<String> {
        let params = challenge.strip_prefix("Bearer ")?;
        let mut realm = None;
        let mut query = Vec::new();
        for param in params.split(',') {
            let (key, value) = param.trim().split_once('=')?;
            let value = value.trim_matches('"');
            match key {
                "realm" => realm = Some(value.to_string()),
                "service" => query.push(format!("service={}", value)),
                "scope" => query.push(format!("scope={}", value)),
                _ => {}
            }
        }
        let mut token_url = realm?;
        if !query.is_empty() {
            token_url.push('?');
            token_url.push_str(&query.join("&"));
        }
        let response = self.client.get(&token_url, &[]).await.ok()?;
        if !response.is_success() {
            return None;
        }
        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            token: Option<String>,
            #[serde(default)]
            access_token: Option<String>,
        }
        let parsed: TokenResponse = serde_json::from_slice(&response.body).ok()?;
        parsed.token.or(parsed.access_token).filter(|t| !t.is_empty())
    }

    fn lookup_auth(&self, registry: &str) -> RegistryCredential {
        let mut cache = self
            .auth_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(credential) = cache.get(registry) {
            return credential.clone();
        }
        let credential = load_registry_auth(registry);
        cache.insert(registry.to_string(), credential.clone());
        credential
    }
}

/// Resolve a local feature path. The path must be relative, the workspace's
/// `.devcontainer` directory must exist, and the resolved directory must sit
/// inside it.
pub fn fetch_local_feature(
    relative_path: &str,
    config_dir: &Path,
    devcontainer_dir: &Path,
) -> Result<FetchedFeature> {
    if Path::new(relative_path).is_absolute() {
        return Err(local_error("local feature path must be relative".to_string()));
    }
    if !devcontainer_dir.is_dir() {
        return Err(local_error(
            "local features require .devcontainer directory".to_string(),
        ));
    }
    let joined = config_dir.join(relative_path);
    let abs = normalize_path(&joined);
    if !abs.starts_with(devcontainer_dir) {
        return Err(local_error(format!(
            "local feature path must be inside {}",
            devcontainer_dir.display()
        )));
    }
    let digest = local_feature_digest(&abs);
    Ok(FetchedFeature {
        feature_dir: abs,
        digest,
        temp_dir: None,
    })
}

/// Lexical path normalization: `.` dropped, `..` pops.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
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

fn registry_base_url(registry: &str) -> String {
    if is_local_registry(registry) {
        format!("http://{}", registry)
    } else {
        format!("https://{}", registry)
    }
}

/// Plain HTTP is allowed only for loopback registries.
fn is_local_registry(registry: &str) -> bool {
    let host = if let Some(rest) = registry.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        registry.rsplit_once(':').map(|(host, _)| host).unwrap_or(registry)
    };
    host == "localhost" || host == "127.0.0.1" || host == "::1"
}

fn is_manifest_index(media_type: &str) -> bool {
    matches!(
        media_type,
        "application/vnd.oci.image.index.v1+json"
            | "application/vnd.docker.distribution.manifest.list.v2+json"
    )
}

fn parse_manifest(bytes: &[u8]) -> Result<Manifest> {
    serde_json::from_slice(bytes)
        .map_err(|e| oci_error(format!("failed to parse OCI manifest: {}", e)))
}

fn sha256_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{:x}", hasher.finalize())
}

/// Extract a feature archive (tar or gzip+tar) into a fresh temp directory
/// and locate the feature root inside it.
pub(crate) fn extract_feature_archive(data: &[u8]) -> Result<(TempDir, PathBuf)> {
    let root = tempfile::Builder::new()
        .prefix("godev-feature-")
        .tempdir()
        .map_err(FetchError::Io)?;

    if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
        let decoder = GzDecoder::new(data);
        unpack_tar(decoder, root.path())?;
    } else {
        unpack_tar(data, root.path())?;
    }

    let feature_dir = find_feature_root(root.path())?;
    Ok((root, feature_dir))
}

fn unpack_tar<R: Read>(reader: R, root: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive.entries().map_err(FetchError::Io)?;
    for entry in entries {
        let mut entry = entry.map_err(FetchError::Io)?;
        let name = entry.path().map_err(FetchError::Io)?.into_owned();
        if name.as_os_str().is_empty() {
            continue;
        }
        let target = safe_extract_path(root, &name)?;
        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                std::fs::create_dir_all(&target).map_err(FetchError::Io)?;
            }
            tar::EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(FetchError::Io)?;
                }
                let mut file = std::fs::File::create(&target).map_err(FetchError::Io)?;
                std::io::copy(&mut entry, &mut file).map_err(FetchError::Io)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Ok(mode) = entry.header().mode() {
                        let _ = std::fs::set_permissions(
                            &target,
                            std::fs::Permissions::from_mode(mode),
                        );
                    }
                }
            }
            tar::EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(FetchError::Io)?
                    .ok_or_else(|| {
                        GodevError::Fetch(FetchError::Extraction {
                            message: format!("symlink {} has no target", name.display()),
                        })
                    })?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(FetchError::Io)?;
                }
                #[cfg(unix)]
                std::os::unix::fs::symlink(&link, &target).map_err(FetchError::Io)?;
                #[cfg(not(unix))]
                return Err(GodevError::Fetch(FetchError::Extraction {
                    message: "symlinks in feature archives are not supported on this platform"
                        .to_string(),
                }));
            }
            _ => continue,
        }
    }
    Ok(())
}

/// Join an archive entry name onto the extraction root, rejecting anything
/// that would resolve outside it.
fn safe_extract_path(root: &Path, name: &Path) -> Result<PathBuf> {
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    for component in name.components() {
        match component {
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(GodevError::Fetch(FetchError::Extraction {
                        message: "tar entry escapes destination".to_string(),
                    }));
                }
            }
            Component::Normal(part) => parts.push(part.to_os_string()),
        }
    }
    let mut target = root.to_path_buf();
    for part in parts {
        target.push(part);
    }
    Ok(target)
}

/// Find the single directory containing `devcontainer-feature.json`; it must
/// also hold an `install.sh`.
fn find_feature_root(root: &Path) -> Result<PathBuf> {
    let mut candidate: Option<PathBuf> = None;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(FetchError::Io)?;
        for entry in entries {
            let entry = entry.map_err(FetchError::Io)?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if entry.file_name() == "devcontainer-feature.json" {
                if candidate.is_some() {
                    return Err(GodevError::Fetch(FetchError::Extraction {
                        message: "multiple devcontainer-feature.json files found".to_string(),
                    }));
                }
                candidate = Some(dir.clone());
            }
        }
    }
    let candidate = candidate.ok_or_else(|| {
        GodevError::Fetch(FetchError::Extraction {
            message: "devcontainer-feature.json not found in archive".to_string(),
        })
    })?;
    if !candidate.join("install.sh").is_file() {
        return Err(GodevError::Fetch(FetchError::Extraction {
            message: "install.sh not found in feature".to_string(),
        }));
    }
    Ok(candidate)
}

fn oci_error(message: String) -> GodevError {
    GodevError::Fetch(FetchError::Oci { message })
}

fn local_error(message: String) -> GodevError {
    GodevError::Fetch(FetchError::Local { message })
}
