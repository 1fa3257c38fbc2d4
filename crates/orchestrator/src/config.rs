//! Orchestrator configuration.
//!
//! [`OrchestratorConfig`] carries the static job-dispatch settings, derived
//! from the `[jobs]` section of
//! [`FleetscanConfig`](fleetscan_core::config::FleetscanConfig).
//! [`ScanRequest`] carries the per-run parameters a caller passes to
//! `start_run`, derived from the `[scan]` section by default.

use std::time::Duration;

use fleetscan_core::config::FleetscanConfig;
use fleetscan_core::types::RetentionPolicy;

/// Static dispatch settings shared by every run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Image of the vulnerability scanner container.
    pub scanner_image: String,
    /// Image of the dockerfile scanner container.
    pub dockerfile_scanner_image: String,
    /// Address detectors deliver results to.
    pub result_service_address: String,
    /// Service account assigned to scan job pods (empty for the namespace
    /// default).
    pub service_account: String,
    /// Namespace holding the credential-strategy secrets.
    pub creds_secret_namespace: String,
    /// Minimum severity forwarded to the vulnerability detector.
    pub severity_threshold: String,
    /// Allow plain-HTTP registries in dispatched detectors.
    pub registry_insecure: bool,
    /// Detector trace/verbosity flag.
    pub trace: bool,
}

impl OrchestratorConfig {
    /// Build dispatch settings from the loaded core configuration.
    pub fn from_core(core: &FleetscanConfig) -> Self {
        Self {
            scanner_image: core.jobs.scanner_image.clone(),
            dockerfile_scanner_image: core.jobs.dockerfile_scanner_image.clone(),
            result_service_address: core.jobs.result_service_address.clone(),
            service_account: core.jobs.service_account.clone(),
            creds_secret_namespace: core.jobs.creds_secret_namespace.clone(),
            severity_threshold: core.scan.severity_threshold.clone(),
            registry_insecure: core.scan.registry_insecure,
            trace: core.scan.trace,
        }
    }
}

/// Parameters for one scan run.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Namespace to scan; empty scans all namespaces.
    pub target_namespace: String,
    /// Namespaces excluded from scanning.
    pub ignored_namespaces: Vec<String>,
    /// Maximum number of images scanned concurrently.
    pub max_parallelism: usize,
    /// Per-image wait deadline for results.
    pub job_timeout: Duration,
    /// Retention policy for completed jobs.
    pub retention: RetentionPolicy,
    /// Whether the dockerfile detector runs as a second result source.
    pub dockerfile_scan: bool,
}

impl ScanRequest {
    /// Build a request from the loaded core configuration.
    pub fn from_core(core: &FleetscanConfig) -> Self {
        Self {
            target_namespace: core.scan.target_namespace.clone(),
            ignored_namespaces: core.scan.ignored_namespaces.clone(),
            max_parallelism: core.scan.max_parallelism,
            job_timeout: Duration::from_secs(core.scan.job_timeout_secs),
            retention: core.jobs.retention,
            dockerfile_scan: core.scan.dockerfile_scan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_core_carries_jobs_section() {
        let mut core = FleetscanConfig::default();
        core.jobs.scanner_image = "registry.local/scanner:9".to_owned();
        core.jobs.creds_secret_namespace = "security".to_owned();
        core.scan.severity_threshold = "high".to_owned();

        let config = OrchestratorConfig::from_core(&core);
        assert_eq!(config.scanner_image, "registry.local/scanner:9");
        assert_eq!(config.creds_secret_namespace, "security");
        assert_eq!(config.severity_threshold, "high");
    }

    #[test]
    fn scan_request_from_core_converts_timeout() {
        let mut core = FleetscanConfig::default();
        core.scan.job_timeout_secs = 120;
        core.scan.max_parallelism = 7;
        core.jobs.retention = RetentionPolicy::DeleteNever;

        let request = ScanRequest::from_core(&core);
        assert_eq!(request.job_timeout, Duration::from_secs(120));
        assert_eq!(request.max_parallelism, 7);
        assert_eq!(request.retention, RetentionPolicy::DeleteNever);
    }
}
