//! Domain types shared across the workspace.
//!
//! These are the types that cross crate boundaries: run status and progress,
//! the job retention policy, structured per-unit scan errors, detector
//! finding payloads, and the per-instance result rows returned to callers.

use serde::{Deserialize, Serialize};

/// Status of a fleet scan run.
///
/// `Idle → Initializing → Running`; `InitializationFailed` is terminal for
/// that run. A finished batch returns the run to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanStatus {
    /// No scan is running.
    Idle,
    /// Target discovery is in progress; nothing dispatched yet.
    Initializing,
    /// Jobs are being dispatched and results collected.
    Running,
    /// Target discovery failed; no jobs were dispatched.
    InitializationFailed,
}

/// Aggregate scan progress, readable without lock contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Distinct images discovered in this run.
    pub images_to_scan: u32,
    /// Images handed to a worker so far.
    pub images_dispatched: u32,
    /// Images whose scan finished (successfully or not).
    pub images_completed: u32,
    /// Current run status.
    pub status: ScanStatus,
}

impl ScanProgress {
    /// An idle progress snapshot with zero counters.
    pub fn idle() -> Self {
        Self {
            images_to_scan: 0,
            images_dispatched: 0,
            images_completed: 0,
            status: ScanStatus::Idle,
        }
    }
}

/// Policy governing whether a completed scan job is deleted.
///
/// Jobs that never completed (dispatch error, timeout, cancellation) are
/// always deleted regardless of policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionPolicy {
    /// Delete every completed job.
    #[default]
    DeleteAll,
    /// Delete only jobs whose scan fully succeeded; keep failures for triage.
    DeleteSuccessful,
    /// Keep every completed job.
    DeleteNever,
}

impl std::str::FromStr for RetentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delete-all" => Ok(Self::DeleteAll),
            "delete-successful" => Ok(Self::DeleteSuccessful),
            "delete-never" => Ok(Self::DeleteNever),
            other => Err(format!(
                "unknown retention policy '{other}', expected delete-all, delete-successful, or delete-never"
            )),
        }
    }
}

/// Vulnerability severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// What failed for a scan unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanErrorKind {
    /// The scan job could not be submitted.
    JobRun,
    /// No completion arrived before the per-image deadline.
    JobTimeout,
    /// A detector ran but reported failure.
    ScanFailed,
}

/// Which subsystem produced a scan error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanErrorSource {
    /// Job dispatch / lifecycle handling.
    Job,
    /// The vulnerability detector.
    Vulnerabilities,
    /// The dockerfile/configuration detector.
    Dockerfile,
}

/// Structured error attached to a scan unit's result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    /// Human-readable failure description.
    pub message: String,
    /// Failure classification.
    pub kind: ScanErrorKind,
    /// Subsystem that produced the error.
    pub source: ScanErrorSource,
}

impl ScanError {
    pub fn job_run(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ScanErrorKind::JobRun,
            source: ScanErrorSource::Job,
        }
    }

    pub fn job_timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ScanErrorKind::JobTimeout,
            source: ScanErrorSource::Job,
        }
    }
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{:?}: {}", self.source, self.kind, self.message)
    }
}

/// One vulnerability reported by the vulnerability detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    /// Advisory identifier (e.g. CVE-2024-12345).
    pub name: String,
    /// Affected package name.
    pub package: String,
    /// Installed package version.
    pub version: String,
    /// First fixed version, empty when no fix is published.
    #[serde(default)]
    pub fix_version: String,
    /// Severity as rated by the detector.
    pub severity: Severity,
    /// Advisory description.
    #[serde(default)]
    pub description: String,
}

/// One finding reported by the dockerfile/configuration detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerfileFinding {
    /// Checkpoint code (e.g. CIS-DI-0001).
    pub code: String,
    /// Detector-defined level (fatal, warn, info, ...).
    pub level: String,
    /// Checkpoint message.
    pub message: String,
}

/// Scan outcome for one workload instance of one image.
///
/// A unit scanned once is fanned out to a row per pod/container that runs
/// the image, so callers see findings in workload terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageScanResult {
    pub pod_name: String,
    pub pod_namespace: String,
    pub pod_uid: String,
    pub container_name: String,
    /// Image reference exactly as found on the container spec.
    pub image_name: String,
    /// Image digest hex, empty when it could not be resolved.
    pub image_digest: String,
    pub vulnerabilities: Vec<Vulnerability>,
    pub dockerfile_findings: Vec<DockerfileFinding>,
    /// True only when every configured detector succeeded.
    pub success: bool,
    /// Structured errors collected for this unit.
    pub errors: Vec<ScanError>,
}

/// Full result set for a run: per-instance rows plus a progress snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResults {
    pub images: Vec<ImageScanResult>,
    pub progress: ScanProgress,
}
