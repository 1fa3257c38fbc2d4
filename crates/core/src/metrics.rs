//! Metric name constants and description registration.
//!
//! Central definition of every Prometheus metric name used by the workspace.
//! Subsystems call `metrics::counter!()` / `metrics::gauge!()` with these
//! constants.
//!
//! # Naming convention
//!
//! - Prefix: `fleetscan_`
//! - Suffix: `_total` (counter), `_seconds` (histogram), none (gauge)

// --- Label keys ---

/// Reason label key for ignored result deliveries
/// (unknown-image, stale-correlation, after-timeout, duplicate).
pub const LABEL_REASON: &str = "reason";

/// Result-source label key (vulnerabilities, dockerfile).
pub const LABEL_SOURCE: &str = "source";

// --- Scan run metrics ---

/// Distinct images discovered in the current run (gauge).
pub const IMAGES_TO_SCAN: &str = "fleetscan_images_to_scan";

/// Images handed to a scan worker (counter).
pub const IMAGES_DISPATCHED_TOTAL: &str = "fleetscan_images_dispatched_total";

/// Images whose scan finished, successfully or not (counter).
pub const IMAGES_COMPLETED_TOTAL: &str = "fleetscan_images_completed_total";

/// Result deliveries ignored by the correlation state machine
/// (counter, label: reason).
pub const RESULTS_IGNORED_TOTAL: &str = "fleetscan_results_ignored_total";

/// Scan jobs deleted during cleanup (counter).
pub const JOBS_DELETED_TOTAL: &str = "fleetscan_jobs_deleted_total";

/// Scan jobs whose deletion failed; best-effort cleanup leaks these
/// (counter).
pub const JOB_DELETE_FAILURES_TOTAL: &str = "fleetscan_job_delete_failures_total";

/// Time a worker spent waiting for a unit's results (histogram, seconds).
pub const UNIT_WAIT_DURATION_SECONDS: &str = "fleetscan_unit_wait_duration_seconds";

/// Register descriptions for all metrics.
///
/// Calls `metrics::describe_*!()` to set Prometheus HELP text. Call once
/// after the global recorder is installed, typically from the hosting
/// process's startup path.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_gauge!(
        IMAGES_TO_SCAN,
        "Number of distinct images discovered in the current scan run"
    );
    describe_counter!(
        IMAGES_DISPATCHED_TOTAL,
        "Total number of images handed to a scan worker"
    );
    describe_counter!(
        IMAGES_COMPLETED_TOTAL,
        "Total number of images whose scan finished (successfully or not)"
    );
    describe_counter!(
        RESULTS_IGNORED_TOTAL,
        "Total number of result deliveries rejected as unknown, stale, late, or duplicate"
    );
    describe_counter!(JOBS_DELETED_TOTAL, "Total number of scan jobs deleted");
    describe_counter!(
        JOB_DELETE_FAILURES_TOTAL,
        "Total number of scan job deletions that failed"
    );
    describe_histogram!(
        UNIT_WAIT_DURATION_SECONDS,
        "Time a worker spent waiting for a scan unit's results in seconds"
    );
}
