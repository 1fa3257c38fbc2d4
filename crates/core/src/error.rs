//! Error types -- per-domain error definitions.
//!
//! [`FleetscanError`] is the top-level error for the workspace. Domain crates
//! define their own error enums and convert into it, so callers can match on
//! one type at the boundary while `?` keeps working inside each crate.

/// Top-level fleetscan error.
#[derive(Debug, thiserror::Error)]
pub enum FleetscanError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Container-orchestration platform error.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Scan orchestration error.
    #[error("orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// Config parsing failed.
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// Invalid config value.
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors from the container-orchestration platform API.
///
/// All platform calls propagate typed errors; the workspace never panics on
/// an API failure.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Generic API call failure.
    #[error("cluster api error: {0}")]
    Api(String),

    /// A named object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The platform endpoint is unreachable.
    #[error("cluster connection error: {0}")]
    Connection(String),
}

/// Scan orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Target discovery failed; the run never started dispatching.
    #[error("scan initialization failed: {0}")]
    InitFailed(String),

    /// The operation is not valid in the current run state.
    #[error("invalid run state: {0}")]
    InvalidState(String),

    /// An image reference could not be parsed.
    #[error("invalid image reference: {0}")]
    InvalidImage(String),

    /// A scan job could not be submitted.
    #[error("job run failed: {0}")]
    JobRun(String),
}
