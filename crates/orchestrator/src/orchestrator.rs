//! Scan orchestration facade -- run lifecycle, progress, results, and the
//! result-delivery entry points.
//!
//! [`ScanOrchestrator`] is the surface a triggering caller (an HTTP front
//! end, a CLI) talks to, and the surface dispatched detectors report back
//! through.
//!
//! # Control flow
//!
//! ```text
//! start_run ──> discovery (sync) ──> unit map ──> batch scheduler
//!                                                  │  N workers
//!                                                  ▼
//!                                    dispatch job ──> wait ──> cleanup
//!                                                  ▲
//! apply_*_result (out-of-band) ── completion ──────┘
//! ```
//!
//! A `FleetRun` is created per invocation and replaced on the next one;
//! there is no cross-run persistence.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};

use fleetscan_core::types::{ScanProgress, ScanResults, ScanStatus};

use crate::cluster::ClusterClient;
use crate::config::{OrchestratorConfig, ScanRequest};
use crate::discovery;
use crate::error::OrchestratorError;
use crate::job::JobDispatcher;
use crate::scheduler;
use crate::state::{DockerfileReport, FleetRun, VulnerabilitiesReport};

/// Fleet-wide scan orchestrator.
///
/// Generic over the platform client so production deployments and tests
/// plug in their own [`ClusterClient`].
pub struct ScanOrchestrator<C: ClusterClient> {
    cluster: Arc<C>,
    config: OrchestratorConfig,
    /// Current run; replaced wholesale when a new run starts or state is
    /// cleared.
    run: Mutex<Arc<FleetRun>>,
}

impl<C: ClusterClient> ScanOrchestrator<C> {
    pub fn new(cluster: Arc<C>, config: OrchestratorConfig) -> Self {
        Self {
            cluster,
            config,
            run: Mutex::new(Arc::new(FleetRun::idle())),
        }
    }

    /// Start a fleet scan run.
    ///
    /// Discovery runs to completion before anything is dispatched. With
    /// nothing to scan the run returns to idle immediately; otherwise the
    /// batch scheduler is spawned and this method returns while the scan
    /// proceeds.
    ///
    /// # Errors
    ///
    /// - `OrchestratorError::InvalidState`: a run is already active
    /// - `OrchestratorError::InitFailed`: workload listing failed; the run
    ///   ends in `InitializationFailed` and nothing was dispatched
    pub async fn start_run(&self, request: ScanRequest) -> Result<(), OrchestratorError> {
        let run = {
            let mut current = self.run.lock().await;
            if matches!(
                current.status(),
                ScanStatus::Initializing | ScanStatus::Running
            ) {
                return Err(OrchestratorError::InvalidState(
                    "a scan run is already active, cancel or clear it first".to_owned(),
                ));
            }
            // discard the previous run; close its signal if still open
            current.clear_signal();
            let run = Arc::new(FleetRun::initializing());
            *current = run.clone();
            run
        };

        let namespace_label = if request.target_namespace.is_empty() {
            "<all>"
        } else {
            request.target_namespace.as_str()
        };
        info!(
            target_namespace = namespace_label,
            max_parallelism = request.max_parallelism,
            "starting fleet scan"
        );

        let units = match discovery::discover(self.cluster.as_ref(), &request).await {
            Ok(units) => units,
            Err(e) => {
                error!(error = %e, "scan initialization failed");
                run.set_status(ScanStatus::InitializationFailed);
                return Err(e);
            }
        };

        if units.is_empty() {
            info!("nothing to scan");
            run.set_status(ScanStatus::Idle);
            return Ok(());
        }

        run.install_units(units).await;
        run.set_status(ScanStatus::Running);

        let targets = run.targets().await;
        let dispatcher = Arc::new(JobDispatcher::new(
            self.cluster.clone(),
            self.config.clone(),
            request.retention,
        ));
        let batch_run = run.clone();
        tokio::spawn(async move {
            scheduler::run_batch(
                batch_run.clone(),
                targets,
                dispatcher,
                request.max_parallelism,
                request.job_timeout,
            )
            .await;
            // a finished or cancelled batch returns the run to idle
            batch_run.set_status(ScanStatus::Idle);
        });

        Ok(())
    }

    /// Lock-free progress snapshot of the current run.
    pub async fn progress(&self) -> ScanProgress {
        self.run.lock().await.progress()
    }

    /// Per-instance findings for every completed unit of the current run.
    pub async fn results(&self) -> ScanResults {
        let run = self.run.lock().await.clone();
        ScanResults {
            images: run.results().await,
            progress: run.progress(),
        }
    }

    /// Cancel the active run by closing its cancellation signal.
    ///
    /// Allowed once per run: in-flight jobs are treated as incomplete and
    /// deleted, and the batch scheduler returns within one scheduling step.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::InvalidState` when no run is active or
    /// the signal was already closed; a double cancel is a caller error the
    /// core does not silently tolerate.
    pub async fn cancel(&self) -> Result<(), OrchestratorError> {
        let run = self.run.lock().await.clone();
        if !matches!(
            run.status(),
            ScanStatus::Initializing | ScanStatus::Running
        ) {
            return Err(OrchestratorError::InvalidState(
                "no active scan run to cancel".to_owned(),
            ));
        }
        run.request_cancel()
    }

    /// Discard the current run and its results.
    ///
    /// Closes the cancellation signal only when it is still open, so this
    /// is safe to call any number of times, in any state.
    pub async fn clear(&self) {
        let mut current = self.run.lock().await;
        current.clear_signal();
        *current = Arc::new(FleetRun::idle());
        info!("scan state cleared");
    }

    /// Result-delivery entry point for the vulnerability detector.
    ///
    /// Stale, duplicate, late, or unknown deliveries are logged and
    /// dropped; the deliverer never sees an error.
    pub async fn apply_vulnerabilities_result(&self, report: VulnerabilitiesReport) {
        let run = self.run.lock().await.clone();
        run.apply_vulnerabilities_result(report).await;
    }

    /// Result-delivery entry point for the dockerfile detector.
    pub async fn apply_dockerfile_result(&self, report: DockerfileReport) {
        let run = self.run.lock().await.clone();
        run.apply_dockerfile_result(report).await;
    }
}
