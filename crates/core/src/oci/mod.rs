//! Feature fetching
//!
//! Turns a parsed feature reference into a local directory plus a digest:
//!
//! - **OCI**: resolve the manifest (recursing into an image index by taking
//!   its first entry), pick the layer whose media type contains
//!   `devcontainers.layer.v1+tar`, download and extract it. Credentials come
//!   from the host's Docker config; anonymous bearer-token challenges get a
//!   single retry. Plain HTTP is allowed only for local registries.
//! - **HTTP(S)**: download the archive and extract it; the digest is the
//!   hash of the downloaded bytes.
//! - **Local**: resolve a relative path that must stay inside the
//!   workspace's `.devcontainer` directory; the digest is the hash of the
//!   absolute path.
//!
//! Extracted archives must contain exactly one `devcontainer-feature.json`
//! with an `install.sh` sibling; entries that would escape the extraction
//! root fail the fetch.

mod auth;
mod client;
mod fetcher;

pub use auth::{load_registry_auth, RegistryCredential};
pub use client::{HttpClient, HttpResponse, ReqwestClient};
pub use fetcher::{fetch_local_feature, FeatureFetcher, FetchedFeature};

#[cfg(test)]
pub use client::MockHttpClient;
