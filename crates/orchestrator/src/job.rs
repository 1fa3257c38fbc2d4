//! Scan job lifecycle.
//!
//! Builds and submits the per-image scan job (one container per configured
//! result source), derives platform-safe job names, and applies the cleanup
//! retention policy after a worker stops waiting.
//!
//! Job names must satisfy the platform's DNS-label constraints: at most 63
//! characters, lowercase alphanumerics and `-`, starting and ending with an
//! alphanumeric character.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use fleetscan_core::error::ClusterError;
use fleetscan_core::metrics as m;
use fleetscan_core::types::RetentionPolicy;

use crate::cluster::{
    ClusterClient, ContainerSpec, DOCKER_CONFIG_JSON_KEY, EnvVar, JobHandle, JobSpec,
};
use crate::config::OrchestratorConfig;
use crate::creds::{CredentialResolver, IMAGE_PULL_SECRET_ENV};
use crate::discovery::{IGNORE_SCAN_LABEL_KEY, IGNORE_SCAN_LABEL_VALUE};
use crate::error::OrchestratorError;
use crate::registry;
use crate::state::ScanTarget;

/// Fixed prefix of every scan job name.
const JOB_NAME_PREFIX: &str = "fleetscan";
/// DNS label length limit enforced by the platform.
const MAX_JOB_NAME_LEN: usize = 63;

/// Finished jobs are garbage-collected by the platform after this many
/// seconds even when the retention policy keeps them.
const JOB_TTL_SECONDS: u32 = 300;

pub(crate) const VULNERABILITY_SCANNER_CONTAINER: &str = "vulnerability-scanner";
pub(crate) const DOCKERFILE_SCANNER_CONTAINER: &str = "dockerfile-scanner";

// Environment contract passed to every dispatched detector.
pub(crate) const SCAN_UUID_ENV: &str = "SCAN_UUID";
pub(crate) const RESULT_SERVICE_ADDRESS_ENV: &str = "RESULT_SERVICE_ADDRESS";
pub(crate) const SEVERITY_THRESHOLD_ENV: &str = "SEVERITY_THRESHOLD";
pub(crate) const REGISTRY_INSECURE_ENV: &str = "REGISTRY_INSECURE";
pub(crate) const SCANNER_TRACE_ENV: &str = "SCANNER_TRACE";
pub(crate) const IMAGE_DIGEST_ENV: &str = "IMAGE_DIGEST_TO_SCAN";

/// Builds, submits, and cleans up scan jobs for one run.
pub(crate) struct JobDispatcher<C> {
    cluster: Arc<C>,
    config: OrchestratorConfig,
    retention: RetentionPolicy,
    creds: CredentialResolver<C>,
}

impl<C: ClusterClient> JobDispatcher<C> {
    pub(crate) fn new(
        cluster: Arc<C>,
        config: OrchestratorConfig,
        retention: RetentionPolicy,
    ) -> Self {
        let creds = CredentialResolver::new(cluster.clone(), &config.creds_secret_namespace);
        Self {
            cluster,
            config,
            retention,
            creds,
        }
    }

    /// Build and submit the scan job for one unit.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::InvalidImage` when no job name can be
    /// derived from the image reference, and `OrchestratorError::JobRun`
    /// when submission fails. Either way the unit is marked failed by the
    /// caller; other units are unaffected.
    pub(crate) async fn dispatch(&self, target: &ScanTarget) -> Result<JobHandle, OrchestratorError> {
        let spec = self.build_job_spec(target).await?;
        debug!(job = %spec.name, "scan job spec built");

        info!(
            job = %spec.name,
            namespace = %spec.namespace,
            image = %target.image_name,
            "running scan job"
        );
        let handle = self.cluster.create_job(&spec).await.map_err(|e| {
            OrchestratorError::JobRun(format!(
                "failed to create job {}/{}: {e}",
                spec.namespace, spec.name
            ))
        })?;
        Ok(handle)
    }

    async fn build_job_spec(&self, target: &ScanTarget) -> Result<JobSpec, OrchestratorError> {
        let name = create_job_name(&target.image_name)?;

        let mut labels = HashMap::new();
        labels.insert("app".to_owned(), JOB_NAME_PREFIX.to_owned());
        // scan jobs must never be scanned themselves
        labels.insert(
            IGNORE_SCAN_LABEL_KEY.to_owned(),
            IGNORE_SCAN_LABEL_VALUE.to_owned(),
        );

        let mut containers = vec![self.vulnerability_container(target)];
        if target.dockerfile_scan {
            containers.push(self.dockerfile_container(target));
        }

        let mut spec = JobSpec {
            name,
            namespace: target.namespace.clone(),
            labels,
            service_account: self.config.service_account.clone(),
            backoff_limit: 0,
            ttl_seconds_after_finished: JOB_TTL_SECONDS,
            containers,
        };

        // Fall back to the credential strategies only when the instance
        // carries no pull secret of its own.
        if target.pull_secret.is_empty() {
            self.creds.apply_all(&mut spec).await;
        }

        Ok(spec)
    }

    fn common_env(&self, target: &ScanTarget) -> Vec<EnvVar> {
        let mut env = vec![
            EnvVar::literal(SCAN_UUID_ENV, &target.scan_id),
            EnvVar::literal(
                RESULT_SERVICE_ADDRESS_ENV,
                &self.config.result_service_address,
            ),
            EnvVar::literal(REGISTRY_INSECURE_ENV, self.config.registry_insecure.to_string()),
            EnvVar::literal(SCANNER_TRACE_ENV, self.config.trace.to_string()),
            EnvVar::literal(IMAGE_DIGEST_ENV, &target.image_digest),
        ];
        if !target.pull_secret.is_empty() {
            debug!(image = %target.image_name, "adding private registry credentials");
            env.push(EnvVar::secret_key(
                IMAGE_PULL_SECRET_ENV,
                &target.pull_secret,
                DOCKER_CONFIG_JSON_KEY,
            ));
        }
        env
    }

    fn vulnerability_container(&self, target: &ScanTarget) -> ContainerSpec {
        let mut env = self.common_env(target);
        env.push(EnvVar::literal(
            SEVERITY_THRESHOLD_ENV,
            &self.config.severity_threshold,
        ));
        ContainerSpec {
            name: VULNERABILITY_SCANNER_CONTAINER.to_owned(),
            image: self.config.scanner_image.clone(),
            args: vec![target.image_name.clone()],
            env,
        }
    }

    fn dockerfile_container(&self, target: &ScanTarget) -> ContainerSpec {
        ContainerSpec {
            name: DOCKERFILE_SCANNER_CONTAINER.to_owned(),
            image: self.config.dockerfile_scanner_image.clone(),
            args: vec![target.image_name.clone()],
            env: self.common_env(target),
        }
    }

    /// Apply the cleanup policy after the worker stopped waiting.
    ///
    /// Jobs that never completed are always deleted; completed jobs follow
    /// the configured retention policy. Called exactly once per dispatched
    /// job.
    pub(crate) async fn cleanup(&self, job: &JobHandle, completed: bool, success: bool) {
        // incomplete jobs (cancellation, timeout before completion) always go
        if !completed {
            self.delete_job(job).await;
            return;
        }

        match self.retention {
            RetentionPolicy::DeleteAll => self.delete_job(job).await,
            RetentionPolicy::DeleteSuccessful => {
                if success {
                    self.delete_job(job).await;
                }
            }
            RetentionPolicy::DeleteNever => {}
        }
    }

    /// Best-effort deletion: failures are logged, never propagated. A
    /// leaked job is a quality issue, not a correctness one.
    async fn delete_job(&self, job: &JobHandle) {
        info!(job = %job.name, namespace = %job.namespace, "deleting scan job");
        match self.cluster.delete_job(job).await {
            Ok(()) => {
                metrics::counter!(m::JOBS_DELETED_TOTAL).increment(1);
            }
            Err(ClusterError::NotFound(_)) => {
                debug!(job = %job.name, "scan job already gone");
            }
            Err(e) => {
                error!(
                    job = %job.name,
                    namespace = %job.namespace,
                    error = %e,
                    "failed to delete scan job"
                );
                metrics::counter!(m::JOB_DELETE_FAILURES_TOTAL).increment(1);
            }
        }
    }
}

/// Derive a DNS-label compliant job name from an image reference.
///
/// `lowercase("fleetscan-" + short image name + "-" + uuid)`, truncated to
/// 63 characters, invalid characters mapped to `-`, trailing `-` trimmed
/// after truncation.
pub(crate) fn create_job_name(image_name: &str) -> Result<String, OrchestratorError> {
    let simple = registry::simple_image_name(image_name)?;
    let mut name = format!("{JOB_NAME_PREFIX}-{simple}-{}", Uuid::new_v4());

    name.truncate(MAX_JOB_NAME_LEN);
    let name: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    // truncation can leave a trailing separator
    Ok(name.trim_end_matches('-').to_owned())
}
