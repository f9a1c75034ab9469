//! Error types and handling
//!
//! Domain-specific error enums for each subsystem (configuration, features,
//! fetching, ordering, engine dispatch, lifecycle, compose), wrapped in the
//! top-level [`GodevError`] for unified propagation. Every failure carries the
//! context a user needs to act on it: the offending hook name, feature id,
//! file path, or argv.

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// devcontainer.json could not be parsed
    #[error("failed to parse configuration: {message}")]
    Parsing { message: String },

    /// Structural validation failed
    #[error("configuration validation error: {message}")]
    Validation { message: String },

    /// Configuration file not found
    #[error("devcontainer.json not found in {path}")]
    NotFound { path: String },

    /// Configuration file I/O error
    #[error("failed to read configuration file")]
    Io(#[from] std::io::Error),
}

/// Feature reference and metadata errors
#[derive(Error, Debug)]
pub enum FeatureError {
    /// Unparsable feature reference (OCI/HTTP/local)
    #[error("invalid feature reference: {message}")]
    Reference { message: String },

    /// Feature metadata parsing error
    #[error("failed to parse feature metadata: {message}")]
    Parsing { message: String },

    /// Feature metadata validation error
    #[error("feature validation error: {message}")]
    Validation { message: String },

    /// Feature option resolution error
    #[error("feature option error: {message}")]
    Option { message: String },

    /// Feature metadata file I/O error
    #[error("failed to read feature metadata")]
    Io(#[from] std::io::Error),
}

/// Feature download and extraction errors
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request failed or returned a non-success status
    #[error("feature download failed: {message}")]
    Download { message: String },

    /// OCI manifest or blob fetch failure
    #[error("OCI registry error: {message}")]
    Oci { message: String },

    /// Archive extraction failure, including tar-escape attempts
    #[error("feature extraction error: {message}")]
    Extraction { message: String },

    /// Local feature path resolution failure
    #[error("local feature error: {message}")]
    Local { message: String },

    /// I/O error while staging fetched content
    #[error("feature fetch I/O error")]
    Io(#[from] std::io::Error),
}

/// Dependency graph errors
#[derive(Error, Debug)]
pub enum GraphError {
    /// Cycle detected while resolving or ordering features
    #[error("feature dependency cycle detected at {path}")]
    Cycle { path: String },

    /// overrideFeatureInstallOrder names a feature that is not in the plan
    #[error("overrideFeatureInstallOrder includes unknown feature: {id}")]
    UnknownOverride { id: String },
}

/// Container engine errors (image pull/build, container create/start/exec)
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine CLI invocation failed
    #[error("engine error: {message}")]
    Command { message: String },

    /// Image pull failed
    #[error("image pull failed for {image}: {message}")]
    Pull { image: String, message: String },

    /// Image build failed
    #[error("image build failed: {message}")]
    Build { message: String },

    /// Exec inside the container returned a non-zero exit code
    #[error("exec failed with exit code {code}")]
    ExecFailed { code: i32 },

    /// Engine I/O error
    #[error("engine I/O error")]
    Io(#[from] std::io::Error),
}

/// Lifecycle hook execution errors
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A hook command failed; the message includes hook name, argv, and output
    #[error("{message}")]
    CommandFailed { message: String },

    /// Variable expansion failed inside a hook command
    #[error("{hook}: {message}")]
    Expansion { hook: String, message: String },
}

/// Docker Compose mode errors
#[derive(Error, Debug)]
pub enum ComposeError {
    /// Compose file resolution failure
    #[error("compose file error: {message}")]
    Files { message: String },

    /// An option was supplied that compose mode cannot express
    #[error("compose does not support {option}")]
    Unsupported { option: String },

    /// docker compose subprocess failure
    #[error("docker {command}: {message}")]
    Command { command: String, message: String },

    /// Primary service container could not be located
    #[error("primary service container not found: {service}")]
    ServiceNotFound { service: String },
}

/// Top-level error wrapping all domain errors
#[derive(Error, Debug)]
pub enum GodevError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("feature error: {0}")]
    Feature(#[from] FeatureError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("compose error: {0}")]
    Compose(#[from] ComposeError),

    #[error("variable error: {0}")]
    Variable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the core
pub type Result<T> = std::result::Result<T, GodevError>;

/// Outcome of a start attempt that may have created a container before failing.
///
/// The container id is reported alongside the error so callers can stop or
/// remove a partially started container.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct StartError {
    /// Container id if one was created before the failure
    pub container_id: Option<String>,
    #[source]
    pub source: Box<GodevError>,
}

impl StartError {
    pub fn new(container_id: Option<String>, source: GodevError) -> Self {
        Self {
            container_id,
            source: Box::new(source),
        }
    }
}

impl From<GodevError> for StartError {
    fn from(source: GodevError) -> Self {
        Self::new(None, source)
    }
}
