//! Target discovery.
//!
//! Walks the current cluster state and folds every eligible container into
//! the scan unit map: one unit per distinct image reference, with a
//! back-reference to every pod/container instance using it. Seeing an image
//! again never creates a new unit or a new job.
//!
//! Only the pod-list call is fatal. Per-container resolution failures
//! (missing digest, unreadable pull secret) degrade to empty fields with a
//! warning so one broken pod cannot abort a fleet run.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::cluster::{ClusterClient, PodDescriptor, SecretDescriptor};
use crate::config::ScanRequest;
use crate::error::OrchestratorError;
use crate::registry;
use crate::state::{ScanUnit, WorkloadInstance};

/// Pods carrying this label with [`IGNORE_SCAN_LABEL_VALUE`] are skipped.
/// Dispatched scan jobs carry the same label so scanners never scan
/// themselves.
pub(crate) const IGNORE_SCAN_LABEL_KEY: &str = "fleetscanShouldScan";
pub(crate) const IGNORE_SCAN_LABEL_VALUE: &str = "false";

/// Build the scan unit map for one run.
///
/// # Errors
///
/// Returns `OrchestratorError::InitFailed` when the workload listing call
/// fails; the run transitions to `InitializationFailed` and nothing is
/// dispatched.
pub(crate) async fn discover<C: ClusterClient>(
    cluster: &C,
    request: &ScanRequest,
) -> Result<HashMap<String, ScanUnit>, OrchestratorError> {
    let pods = cluster
        .list_pods(&request.target_namespace)
        .await
        .map_err(|e| {
            let namespace = if request.target_namespace.is_empty() {
                "<all>"
            } else {
                request.target_namespace.as_str()
            };
            OrchestratorError::InitFailed(format!(
                "failed to list pods in namespace '{namespace}': {e}"
            ))
        })?;

    let mut units: HashMap<String, ScanUnit> = HashMap::new();

    for pod in &pods {
        if should_ignore_pod(pod, &request.ignored_namespaces) {
            continue;
        }

        let secrets = fetch_pull_secrets(cluster, pod).await;

        for container in &pod.containers {
            let digest = registry::parse_image_digest(&container.image_id);
            if digest.is_empty() {
                warn!(
                    pod = %pod.name,
                    namespace = %pod.namespace,
                    container = %container.name,
                    image = %container.image,
                    "image digest unavailable, continuing with empty digest"
                );
            }

            let instance = WorkloadInstance {
                container_name: container.name.clone(),
                pod_name: pod.name.clone(),
                pod_uid: pod.uid.clone(),
                namespace: pod.namespace.clone(),
                pull_secret: registry::matching_secret_name(&secrets, &container.image),
                image_digest: digest,
            };

            match units.get_mut(&container.image) {
                // image already known, fold this occurrence into the unit
                Some(unit) => unit.push_instance(instance),
                None => {
                    units.insert(
                        container.image.clone(),
                        ScanUnit::new(container.image.clone(), request.dockerfile_scan, instance),
                    );
                }
            }
        }
    }

    info!(unique_images = units.len(), "target discovery finished");
    Ok(units)
}

fn should_ignore_pod(pod: &PodDescriptor, ignored_namespaces: &[String]) -> bool {
    if ignored_namespaces.contains(&pod.namespace) {
        info!(
            pod = %pod.name,
            namespace = %pod.namespace,
            "skipping pod scan, namespace is in the ignored namespaces list"
        );
        return true;
    }
    if pod
        .labels
        .get(IGNORE_SCAN_LABEL_KEY)
        .is_some_and(|v| v == IGNORE_SCAN_LABEL_VALUE)
    {
        info!(
            pod = %pod.name,
            namespace = %pod.namespace,
            "skipping pod scan, pod has an ignore label"
        );
        return true;
    }
    false
}

/// Fetch the pod's pull secrets, deduplicated by name. Unreadable secrets
/// are skipped with a warning.
async fn fetch_pull_secrets<C: ClusterClient>(
    cluster: &C,
    pod: &PodDescriptor,
) -> Vec<SecretDescriptor> {
    let mut seen = Vec::new();
    let mut secrets = Vec::new();
    for name in &pod.image_pull_secrets {
        if seen.contains(name) {
            warn!(pod = %pod.name, secret = %name, "duplicate image pull secret name");
            continue;
        }
        seen.push(name.clone());
        match cluster.get_secret(&pod.namespace, name).await {
            Ok(secret) => secrets.push(secret),
            Err(e) => {
                warn!(
                    pod = %pod.name,
                    namespace = %pod.namespace,
                    secret = %name,
                    error = %e,
                    "failed to read pull secret, continuing without it"
                );
            }
        }
    }
    secrets
}
