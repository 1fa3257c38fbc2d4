//! Orchestrator error types.
//!
//! [`OrchestratorError`] covers every failure inside the scan orchestration
//! engine. A `From<OrchestratorError> for FleetscanError` conversion is
//! provided so upper layers can propagate with `?`.

use fleetscan_core::error::{ClusterError, FleetscanError, OrchestrationError};

/// Scan orchestration domain error.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A platform API call failed.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Target discovery failed; the run transitions to
    /// `InitializationFailed` and nothing is dispatched.
    #[error("scan initialization failed: {0}")]
    InitFailed(String),

    /// The requested operation is not valid in the current run state
    /// (starting while a run is active, cancelling twice, ...).
    #[error("invalid run state: {0}")]
    InvalidState(String),

    /// An image reference could not be parsed into a job name.
    #[error("invalid image reference '{image}': {reason}")]
    InvalidImage {
        /// The offending image reference.
        image: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A scan job could not be submitted for one image.
    #[error("failed to run scan job: {0}")]
    JobRun(String),
}

impl From<OrchestratorError> for FleetscanError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Cluster(e) => FleetscanError::Cluster(e),
            OrchestratorError::InitFailed(msg) => {
                FleetscanError::Orchestration(OrchestrationError::InitFailed(msg))
            }
            OrchestratorError::InvalidState(msg) => {
                FleetscanError::Orchestration(OrchestrationError::InvalidState(msg))
            }
            OrchestratorError::InvalidImage { image, reason } => FleetscanError::Orchestration(
                OrchestrationError::InvalidImage(format!("{image}: {reason}")),
            ),
            OrchestratorError::JobRun(msg) => {
                FleetscanError::Orchestration(OrchestrationError::JobRun(msg))
            }
        }
    }
}
