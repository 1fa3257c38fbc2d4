//! Fleet run state and the result-correlation state machine.
//!
//! A [`FleetRun`] is created per orchestration invocation. Its unit map is
//! populated once by discovery and never grows afterward; units are mutated
//! only by result application and by worker timeout marking. One mutex
//! covers the map and every unit's mutable fields, so two result deliveries,
//! or a delivery racing a timeout, are linearized per unit. Progress
//! counters are atomics so progress polling never contends on that lock.
//!
//! Result deliveries walk four rejection predicates in order -- unknown
//! image, correlation mismatch, arrival after timeout, duplicate -- and each
//! rejection is a logged no-op, never an error to the deliverer: ephemeral
//! scan jobs cannot guarantee exactly-once or in-order delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use fleetscan_core::metrics as m;
use fleetscan_core::types::{
    DockerfileFinding, ImageScanResult, ScanError, ScanErrorKind, ScanErrorSource, ScanProgress,
    ScanStatus, Vulnerability,
};

use crate::error::OrchestratorError;

/// Immutable snapshot of one workload occurrence of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkloadInstance {
    pub container_name: String,
    pub pod_name: String,
    pub pod_uid: String,
    pub namespace: String,
    /// Resolved pull secret name, empty when none matched.
    pub pull_secret: String,
    /// Image digest hex, empty when it could not be resolved.
    pub image_digest: String,
}

/// Vulnerability detector result delivery.
///
/// This is the payload the result-delivery endpoint hands to
/// [`ScanOrchestrator::apply_vulnerabilities_result`](crate::ScanOrchestrator::apply_vulnerabilities_result),
/// keyed by image reference and correlation ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilitiesReport {
    /// Image reference the job scanned.
    pub image_name: String,
    /// Correlation ID the job was dispatched with.
    pub scan_id: String,
    /// Whether the detector succeeded.
    pub success: bool,
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
    /// Structured detector error, if any.
    #[serde(default)]
    pub error: Option<ScanError>,
}

/// Dockerfile/configuration detector result delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerfileReport {
    pub image_name: String,
    pub scan_id: String,
    pub success: bool,
    #[serde(default)]
    pub findings: Vec<DockerfileFinding>,
    #[serde(default)]
    pub error: Option<ScanError>,
}

/// Completion record for one independent result source.
#[derive(Debug, Clone, Default)]
struct SourceSlot<T> {
    completed: bool,
    success: bool,
    findings: T,
    error: Option<ScanError>,
}

/// One distinct image awaiting scan, with all its workload occurrences
/// folded together.
#[derive(Debug)]
pub(crate) struct ScanUnit {
    image_name: String,
    /// Correlation ID; result deliveries must present it.
    scan_id: String,
    instances: Vec<WorkloadInstance>,
    /// Whether the dockerfile source slot is configured for this unit.
    dockerfile_scan: bool,
    /// Capacity-1 wake signal for the waiting worker. `notify_one` on a
    /// Notify with no waiter stores a permit, so a worker reaching the wait
    /// after completion still wakes immediately.
    notify: Arc<Notify>,
    vulnerabilities: SourceSlot<Vec<Vulnerability>>,
    dockerfile: SourceSlot<Vec<DockerfileFinding>>,
    completed: bool,
    success: bool,
    timed_out: bool,
    /// Job-level error (dispatch failure or timeout).
    scan_err: Option<ScanError>,
}

impl ScanUnit {
    pub(crate) fn new(image_name: String, dockerfile_scan: bool, instance: WorkloadInstance) -> Self {
        Self {
            image_name,
            scan_id: Uuid::new_v4().to_string(),
            instances: vec![instance],
            dockerfile_scan,
            notify: Arc::new(Notify::new()),
            vulnerabilities: SourceSlot::default(),
            dockerfile: SourceSlot::default(),
            completed: false,
            success: false,
            timed_out: false,
            scan_err: None,
        }
    }

    pub(crate) fn push_instance(&mut self, instance: WorkloadInstance) {
        self.instances.push(instance);
    }

    /// Recompute the derived completion flags after a slot write.
    ///
    /// `completed` requires every configured slot completed; `success`
    /// additionally requires every configured slot successful.
    fn update_result(&mut self) {
        if self.vulnerabilities.completed && (!self.dockerfile_scan || self.dockerfile.completed) {
            self.completed = true;
        }
        if self.vulnerabilities.success && (!self.dockerfile_scan || self.dockerfile.success) {
            self.success = true;
        }
    }

    /// Rejection predicate shared by both result sources. `None` means the
    /// delivery is applicable.
    fn should_ignore(&self, scan_id: &str) -> Option<RejectReason> {
        if scan_id != self.scan_id {
            return Some(RejectReason::StaleCorrelation);
        }
        if self.timed_out {
            return Some(RejectReason::AfterTimeout);
        }
        if self.completed {
            return Some(RejectReason::Duplicate);
        }
        None
    }

    /// Collect every structured error recorded for this unit.
    fn errors(&self) -> Vec<ScanError> {
        let mut errors = Vec::new();
        if let Some(err) = &self.scan_err {
            errors.push(err.clone());
        }
        if let Some(err) = &self.vulnerabilities.error {
            errors.push(ScanError {
                message: err.message.clone(),
                kind: err.kind,
                source: ScanErrorSource::Vulnerabilities,
            });
        }
        if let Some(err) = &self.dockerfile.error {
            errors.push(ScanError {
                message: err.message.clone(),
                kind: err.kind,
                source: ScanErrorSource::Dockerfile,
            });
        }
        errors
    }
}

/// Why a result delivery was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectReason {
    StaleCorrelation,
    AfterTimeout,
    Duplicate,
}

impl RejectReason {
    fn label(self) -> &'static str {
        match self {
            Self::StaleCorrelation => "stale-correlation",
            Self::AfterTimeout => "after-timeout",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Worker-side snapshot of a unit: everything needed to dispatch the job
/// and wait for its completion without holding the run lock.
///
/// Each image is scanned once, from its first discovered instance; the
/// result fans out to every instance.
#[derive(Debug, Clone)]
pub(crate) struct ScanTarget {
    pub image_name: String,
    pub scan_id: String,
    pub namespace: String,
    pub pull_secret: String,
    pub image_digest: String,
    pub dockerfile_scan: bool,
    pub notify: Arc<Notify>,
}

fn status_to_u8(status: ScanStatus) -> u8 {
    match status {
        ScanStatus::Idle => 0,
        ScanStatus::Initializing => 1,
        ScanStatus::Running => 2,
        ScanStatus::InitializationFailed => 3,
    }
}

fn status_from_u8(value: u8) -> ScanStatus {
    match value {
        1 => ScanStatus::Initializing,
        2 => ScanStatus::Running,
        3 => ScanStatus::InitializationFailed,
        _ => ScanStatus::Idle,
    }
}

/// Top-level mutable aggregate for one orchestration run.
pub(crate) struct FleetRun {
    /// Unit map; the single lock covering every unit's mutable fields.
    units: Mutex<HashMap<String, ScanUnit>>,
    status: AtomicU8,
    images_to_scan: AtomicU32,
    dispatched: AtomicU32,
    completed: AtomicU32,
    /// Cancellation signal shared by every worker, closed at most once.
    cancel: CancellationToken,
    cancel_requested: AtomicBool,
}

impl FleetRun {
    /// A run that has never started; `progress()` reports idle.
    pub(crate) fn idle() -> Self {
        Self::with_status(ScanStatus::Idle)
    }

    /// A freshly started run in the discovery phase.
    pub(crate) fn initializing() -> Self {
        Self::with_status(ScanStatus::Initializing)
    }

    fn with_status(status: ScanStatus) -> Self {
        Self {
            units: Mutex::new(HashMap::new()),
            status: AtomicU8::new(status_to_u8(status)),
            images_to_scan: AtomicU32::new(0),
            dispatched: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn status(&self) -> ScanStatus {
        status_from_u8(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn set_status(&self, status: ScanStatus) {
        self.status.store(status_to_u8(status), Ordering::SeqCst);
    }

    /// Install the discovered unit map. Called once, before dispatch starts.
    pub(crate) async fn install_units(&self, units: HashMap<String, ScanUnit>) {
        let count = u32::try_from(units.len()).unwrap_or(u32::MAX);
        self.images_to_scan.store(count, Ordering::SeqCst);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(m::IMAGES_TO_SCAN).set(count as f64);
        *self.units.lock().await = units;
    }

    /// Snapshot every unit into dispatchable targets.
    pub(crate) async fn targets(&self) -> Vec<ScanTarget> {
        let units = self.units.lock().await;
        units
            .values()
            .map(|unit| {
                // instances are non-empty by construction
                let first = &unit.instances[0];
                ScanTarget {
                    image_name: unit.image_name.clone(),
                    scan_id: unit.scan_id.clone(),
                    namespace: first.namespace.clone(),
                    pull_secret: first.pull_secret.clone(),
                    image_digest: first.image_digest.clone(),
                    dockerfile_scan: unit.dockerfile_scan,
                    notify: unit.notify.clone(),
                }
            })
            .collect()
    }

    /// Apply a vulnerability detector delivery. Every rejection is a logged
    /// no-op; the deliverer never sees an error.
    pub(crate) async fn apply_vulnerabilities_result(&self, report: VulnerabilitiesReport) {
        let mut units = self.units.lock().await;
        let Some(unit) = units.get_mut(&report.image_name) else {
            ignore_result(&report.image_name, &report.scan_id, "vulnerabilities", "unknown-image");
            return;
        };
        if let Some(reason) = unit.should_ignore(&report.scan_id) {
            ignore_result(&report.image_name, &report.scan_id, "vulnerabilities", reason.label());
            return;
        }
        if unit.vulnerabilities.completed {
            // write-once per slot even while the other source is pending
            ignore_result(
                &report.image_name,
                &report.scan_id,
                "vulnerabilities",
                RejectReason::Duplicate.label(),
            );
            return;
        }

        if !report.success {
            warn!(
                image = %report.image_name,
                error = ?report.error,
                "vulnerabilities scan reported failure"
            );
        }
        unit.vulnerabilities = SourceSlot {
            completed: true,
            success: report.success,
            findings: report.vulnerabilities,
            error: report.error,
        };
        unit.update_result();
        info!(image = %report.image_name, "vulnerabilities result recorded");

        if unit.completed {
            // non-blocking send; an unconsumed permit is kept for the worker
            unit.notify.notify_one();
        } else {
            info!(image = %report.image_name, "scan not yet complete, waiting for remaining source");
        }
    }

    /// Apply a dockerfile detector delivery; same contract as the
    /// vulnerabilities path.
    pub(crate) async fn apply_dockerfile_result(&self, report: DockerfileReport) {
        let mut units = self.units.lock().await;
        let Some(unit) = units.get_mut(&report.image_name) else {
            ignore_result(&report.image_name, &report.scan_id, "dockerfile", "unknown-image");
            return;
        };
        if let Some(reason) = unit.should_ignore(&report.scan_id) {
            ignore_result(&report.image_name, &report.scan_id, "dockerfile", reason.label());
            return;
        }
        if unit.dockerfile.completed {
            ignore_result(
                &report.image_name,
                &report.scan_id,
                "dockerfile",
                RejectReason::Duplicate.label(),
            );
            return;
        }

        if !report.success {
            warn!(
                image = %report.image_name,
                error = ?report.error,
                "dockerfile scan reported failure"
            );
        }
        unit.dockerfile = SourceSlot {
            completed: true,
            success: report.success,
            findings: report.findings,
            error: report.error,
        };
        unit.update_result();
        info!(image = %report.image_name, "dockerfile result recorded");

        if unit.completed {
            unit.notify.notify_one();
        } else {
            info!(image = %report.image_name, "scan not yet complete, waiting for remaining source");
        }
    }

    /// Mark a unit failed because its job could not be submitted.
    pub(crate) async fn mark_dispatch_failed(&self, image_name: &str, message: String) {
        let mut units = self.units.lock().await;
        if let Some(unit) = units.get_mut(image_name) {
            unit.success = false;
            unit.completed = true;
            unit.scan_err = Some(ScanError {
                message,
                kind: ScanErrorKind::JobRun,
                source: ScanErrorSource::Job,
            });
        }
    }

    /// Mark a unit timed out. Runs under the same lock as result
    /// application, so a result landing concurrently either completes the
    /// unit first (and this is a no-op) or loses and is rejected later.
    pub(crate) async fn mark_timed_out(&self, image_name: &str) {
        let mut units = self.units.lock().await;
        if let Some(unit) = units.get_mut(image_name) {
            if unit.completed {
                return;
            }
            unit.success = false;
            unit.timed_out = true;
            unit.completed = true;
            unit.scan_err = Some(ScanError::job_timeout(format!(
                "no scan result within deadline for image '{image_name}'"
            )));
        }
    }

    pub(crate) async fn is_completed(&self, image_name: &str) -> bool {
        let units = self.units.lock().await;
        units.get(image_name).is_some_and(|u| u.completed)
    }

    /// `(completed, success)` for cleanup policy decisions.
    pub(crate) async fn unit_outcome(&self, image_name: &str) -> (bool, bool) {
        let units = self.units.lock().await;
        units
            .get(image_name)
            .map(|u| (u.completed, u.success))
            .unwrap_or((false, false))
    }

    /// Per-instance findings for every completed unit.
    pub(crate) async fn results(&self) -> Vec<ImageScanResult> {
        let units = self.units.lock().await;
        let mut rows = Vec::new();
        for unit in units.values() {
            if !unit.completed {
                continue;
            }
            let errors = unit.errors();
            for instance in &unit.instances {
                rows.push(ImageScanResult {
                    pod_name: instance.pod_name.clone(),
                    pod_namespace: instance.namespace.clone(),
                    pod_uid: instance.pod_uid.clone(),
                    container_name: instance.container_name.clone(),
                    image_name: unit.image_name.clone(),
                    image_digest: instance.image_digest.clone(),
                    vulnerabilities: unit.vulnerabilities.findings.clone(),
                    dockerfile_findings: unit.dockerfile.findings.clone(),
                    success: unit.success,
                    errors: errors.clone(),
                });
            }
        }
        rows
    }

    /// Lock-free progress snapshot.
    pub(crate) fn progress(&self) -> ScanProgress {
        ScanProgress {
            images_to_scan: self.images_to_scan.load(Ordering::SeqCst),
            images_dispatched: self.dispatched.load(Ordering::SeqCst),
            images_completed: self.completed.load(Ordering::SeqCst),
            status: self.status(),
        }
    }

    pub(crate) fn note_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        metrics::counter!(m::IMAGES_DISPATCHED_TOTAL).increment(1);
    }

    pub(crate) fn note_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        metrics::counter!(m::IMAGES_COMPLETED_TOTAL).increment(1);
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Close the cancellation signal. Closing twice is a caller error.
    pub(crate) fn request_cancel(&self) -> Result<(), OrchestratorError> {
        if self.cancel_requested.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::InvalidState(
                "scan run already cancelled".to_owned(),
            ));
        }
        self.cancel.cancel();
        Ok(())
    }

    /// Close the cancellation signal only if it is still open. Safe to call
    /// any number of times; used when discarding a run.
    pub(crate) fn clear_signal(&self) {
        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }
}

fn ignore_result(image: &str, scan_id: &str, source: &'static str, reason: &'static str) {
    warn!(
        image = %image,
        scan_id = %scan_id,
        source = source,
        reason = reason,
        "ignoring scan result delivery"
    );
    metrics::counter!(m::RESULTS_IGNORED_TOTAL, m::LABEL_REASON => reason, m::LABEL_SOURCE => source)
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(pod: &str) -> WorkloadInstance {
        WorkloadInstance {
            container_name: "app".to_owned(),
            pod_name: pod.to_owned(),
            pod_uid: format!("uid-{pod}"),
            namespace: "default".to_owned(),
            pull_secret: String::new(),
            image_digest: "abc123".to_owned(),
        }
    }

    async fn run_with_unit(image: &str, dockerfile_scan: bool) -> (FleetRun, String, Arc<Notify>) {
        let unit = ScanUnit::new(image.to_owned(), dockerfile_scan, instance("pod-a"));
        let scan_id = unit.scan_id.clone();
        let notify = unit.notify.clone();
        let mut map = HashMap::new();
        map.insert(image.to_owned(), unit);
        let run = FleetRun::initializing();
        run.install_units(map).await;
        run.set_status(ScanStatus::Running);
        (run, scan_id, notify)
    }

    fn vuln_report(image: &str, scan_id: &str, success: bool) -> VulnerabilitiesReport {
        VulnerabilitiesReport {
            image_name: image.to_owned(),
            scan_id: scan_id.to_owned(),
            success,
            vulnerabilities: vec![],
            error: None,
        }
    }

    fn dockerfile_report(image: &str, scan_id: &str, success: bool) -> DockerfileReport {
        DockerfileReport {
            image_name: image.to_owned(),
            scan_id: scan_id.to_owned(),
            success,
            findings: vec![],
            error: None,
        }
    }

    #[tokio::test]
    async fn completes_only_after_both_sources_vulnerabilities_first() {
        let (run, scan_id, _) = run_with_unit("nginx:1", true).await;

        run.apply_vulnerabilities_result(vuln_report("nginx:1", &scan_id, true))
            .await;
        assert!(!run.is_completed("nginx:1").await);

        run.apply_dockerfile_result(dockerfile_report("nginx:1", &scan_id, true))
            .await;
        assert!(run.is_completed("nginx:1").await);
        assert_eq!(run.unit_outcome("nginx:1").await, (true, true));
    }

    #[tokio::test]
    async fn completes_only_after_both_sources_dockerfile_first() {
        let (run, scan_id, _) = run_with_unit("nginx:1", true).await;

        run.apply_dockerfile_result(dockerfile_report("nginx:1", &scan_id, true))
            .await;
        assert!(!run.is_completed("nginx:1").await);

        run.apply_vulnerabilities_result(vuln_report("nginx:1", &scan_id, true))
            .await;
        assert_eq!(run.unit_outcome("nginx:1").await, (true, true));
    }

    #[tokio::test]
    async fn single_source_unit_completes_on_vulnerabilities_alone() {
        let (run, scan_id, _) = run_with_unit("nginx:1", false).await;

        run.apply_vulnerabilities_result(vuln_report("nginx:1", &scan_id, true))
            .await;
        assert_eq!(run.unit_outcome("nginx:1").await, (true, true));
    }

    #[tokio::test]
    async fn failed_source_completes_without_success() {
        let (run, scan_id, _) = run_with_unit("nginx:1", true).await;

        let mut report = vuln_report("nginx:1", &scan_id, false);
        report.error = Some(ScanError {
            message: "scanner crashed".to_owned(),
            kind: ScanErrorKind::ScanFailed,
            source: ScanErrorSource::Vulnerabilities,
        });
        run.apply_vulnerabilities_result(report).await;
        run.apply_dockerfile_result(dockerfile_report("nginx:1", &scan_id, true))
            .await;

        assert_eq!(run.unit_outcome("nginx:1").await, (true, false));
        let results = run.results().await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].errors.len(), 1);
        assert_eq!(results[0].errors[0].source, ScanErrorSource::Vulnerabilities);
    }

    #[tokio::test]
    async fn stale_correlation_id_is_a_noop() {
        let (run, _scan_id, _) = run_with_unit("nginx:1", true).await;

        run.apply_vulnerabilities_result(vuln_report("nginx:1", "other-scan-id", true))
            .await;
        assert!(!run.is_completed("nginx:1").await);
        assert!(run.results().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_image_is_a_noop() {
        let (run, scan_id, _) = run_with_unit("nginx:1", true).await;
        run.apply_vulnerabilities_result(vuln_report("ghost:1", &scan_id, true))
            .await;
        assert!(!run.is_completed("nginx:1").await);
    }

    #[tokio::test]
    async fn result_after_timeout_is_a_noop() {
        let (run, scan_id, _) = run_with_unit("nginx:1", true).await;

        run.mark_timed_out("nginx:1").await;
        assert_eq!(run.unit_outcome("nginx:1").await, (true, false));

        run.apply_vulnerabilities_result(vuln_report("nginx:1", &scan_id, true))
            .await;
        run.apply_dockerfile_result(dockerfile_report("nginx:1", &scan_id, true))
            .await;

        let results = run.results().await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].vulnerabilities.is_empty());
        assert_eq!(results[0].errors[0].kind, ScanErrorKind::JobTimeout);
    }

    #[tokio::test]
    async fn timeout_after_completion_is_a_noop() {
        let (run, scan_id, _) = run_with_unit("nginx:1", false).await;

        run.apply_vulnerabilities_result(vuln_report("nginx:1", &scan_id, true))
            .await;
        run.mark_timed_out("nginx:1").await;

        // success survives; the late timer did not overwrite the outcome
        assert_eq!(run.unit_outcome("nginx:1").await, (true, true));
    }

    #[tokio::test]
    async fn duplicate_slot_write_keeps_first_payload() {
        let (run, scan_id, _) = run_with_unit("nginx:1", true).await;

        let mut first = vuln_report("nginx:1", &scan_id, true);
        first.vulnerabilities = vec![Vulnerability {
            name: "CVE-2024-0001".to_owned(),
            package: "openssl".to_owned(),
            version: "3.0.1".to_owned(),
            fix_version: String::new(),
            severity: fleetscan_core::types::Severity::High,
            description: String::new(),
        }];
        run.apply_vulnerabilities_result(first).await;

        // second delivery for the same slot while the unit is still pending
        let mut second = vuln_report("nginx:1", &scan_id, false);
        second.vulnerabilities = vec![];
        run.apply_vulnerabilities_result(second).await;

        run.apply_dockerfile_result(dockerfile_report("nginx:1", &scan_id, true))
            .await;
        let results = run.results().await;
        assert!(results[0].success, "first (successful) write must be kept");
        assert_eq!(results[0].vulnerabilities.len(), 1);
        assert_eq!(results[0].vulnerabilities[0].name, "CVE-2024-0001");
    }

    #[tokio::test]
    async fn duplicate_delivery_after_completion_is_a_noop() {
        let (run, scan_id, _) = run_with_unit("nginx:1", false).await;

        run.apply_vulnerabilities_result(vuln_report("nginx:1", &scan_id, true))
            .await;
        run.apply_vulnerabilities_result(vuln_report("nginx:1", &scan_id, false))
            .await;
        assert_eq!(run.unit_outcome("nginx:1").await, (true, true));
    }

    #[tokio::test]
    async fn completion_leaves_a_stored_wakeup_permit() {
        let (run, scan_id, notify) = run_with_unit("nginx:1", false).await;

        run.apply_vulnerabilities_result(vuln_report("nginx:1", &scan_id, true))
            .await;

        // the worker was not yet waiting; the permit must still wake it
        tokio::time::timeout(std::time::Duration::from_millis(50), notify.notified())
            .await
            .expect("stored permit should complete the wait immediately");
    }

    #[tokio::test]
    async fn results_fan_out_per_instance() {
        let mut unit = ScanUnit::new("nginx:1".to_owned(), false, instance("pod-a"));
        unit.push_instance(instance("pod-b"));
        unit.push_instance(instance("pod-c"));
        let scan_id = unit.scan_id.clone();
        let mut map = HashMap::new();
        map.insert("nginx:1".to_owned(), unit);
        let run = FleetRun::initializing();
        run.install_units(map).await;

        run.apply_vulnerabilities_result(vuln_report("nginx:1", &scan_id, true))
            .await;
        let results = run.results().await;
        assert_eq!(results.len(), 3);
        let pods: Vec<&str> = results.iter().map(|r| r.pod_name.as_str()).collect();
        assert!(pods.contains(&"pod-a"));
        assert!(pods.contains(&"pod-b"));
        assert!(pods.contains(&"pod-c"));
    }

    #[tokio::test]
    async fn dispatch_failure_marks_unit_failed() {
        let (run, _scan_id, _) = run_with_unit("nginx:1", true).await;

        run.mark_dispatch_failed("nginx:1", "create refused".to_owned())
            .await;
        assert_eq!(run.unit_outcome("nginx:1").await, (true, false));
        let results = run.results().await;
        assert_eq!(results[0].errors[0].kind, ScanErrorKind::JobRun);
        assert_eq!(results[0].errors[0].source, ScanErrorSource::Job);
    }

    #[tokio::test]
    async fn cancel_twice_is_an_error() {
        let (run, _, _) = run_with_unit("nginx:1", true).await;
        run.request_cancel().unwrap();
        assert!(run.cancel_token().is_cancelled());
        assert!(run.request_cancel().is_err());
    }

    #[tokio::test]
    async fn clear_signal_is_idempotent() {
        let (run, _, _) = run_with_unit("nginx:1", true).await;
        run.clear_signal();
        run.clear_signal();
        assert!(run.cancel_token().is_cancelled());
        // clear after explicit cancel stays quiet as well
        let (run, _, _) = run_with_unit("redis:7", true).await;
        run.request_cancel().unwrap();
        run.clear_signal();
    }

    #[tokio::test]
    async fn progress_counters_track_dispatch_and_completion() {
        let (run, _, _) = run_with_unit("nginx:1", true).await;
        assert_eq!(run.progress().images_to_scan, 1);
        run.note_dispatched();
        run.note_completed();
        let progress = run.progress();
        assert_eq!(progress.images_dispatched, 1);
        assert_eq!(progress.images_completed, 1);
        assert_eq!(progress.status, ScanStatus::Running);
    }
}
