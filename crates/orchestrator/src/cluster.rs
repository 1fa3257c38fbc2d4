//! Container-orchestration platform abstraction.
//!
//! The [`ClusterClient`] trait abstracts the workload API the orchestrator
//! consumes: listing pods, reading pull secrets, and creating/deleting batch
//! jobs. Production deployments provide a client backed by their platform;
//! tests use the in-memory [`MockCluster`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ ScanOrchestrator │
//! └────────┬─────────┘
//!          │
//!          ▼
//!   ┌──────────────┐
//!   │ClusterClient │ (trait)
//!   └──────────────┘
//!        │     │
//!        ▼     ▼
//!  platform   Mock
//!   client
//! ```
//!
//! All calls return typed [`ClusterError`]s; a platform failure never panics
//! the orchestrator.

use std::collections::HashMap;
use std::future::Future;

use fleetscan_core::error::ClusterError;

/// Secret data key holding a registry auth document.
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// A pod as seen by target discovery: identity, labels, pull secrets, and a
/// merged view of its containers.
#[derive(Debug, Clone, Default)]
pub struct PodDescriptor {
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
    /// Names of the pod's image pull secrets, as listed on the pod spec.
    pub image_pull_secrets: Vec<String>,
    pub containers: Vec<ContainerDescriptor>,
}

/// One container of a pod, spec and status merged.
///
/// `image` comes from the container spec; `image_id` comes from the
/// container status. The two can diverge, which is why digest resolution
/// only trusts `image_id`.
#[derive(Debug, Clone, Default)]
pub struct ContainerDescriptor {
    pub name: String,
    pub image: String,
    /// Status-reported image ID (e.g. `docker-pullable://…@sha256:…`);
    /// empty when the platform has not reported one.
    pub image_id: String,
}

/// A secret with its raw data entries.
#[derive(Debug, Clone, Default)]
pub struct SecretDescriptor {
    pub name: String,
    pub namespace: String,
    pub data: HashMap<String, Vec<u8>>,
}

/// Specification of a scan job to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// DNS-label compliant job name.
    pub name: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
    /// Service account for the job's pod; empty for the namespace default.
    pub service_account: String,
    /// Scan jobs never retry; a failed detector reports through the result
    /// channel instead.
    pub backoff_limit: u32,
    /// Platform-side garbage collection deadline for finished jobs.
    pub ttl_seconds_after_finished: u32,
    pub containers: Vec<ContainerSpec>,
}

/// One container of a scan job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
}

/// Environment variable of a job container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: EnvValue,
}

impl EnvVar {
    /// A literal-valued variable.
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::Literal(value.into()),
        }
    }

    /// A variable sourced from a secret key.
    pub fn secret_key(
        name: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::SecretKeyRef {
                secret: secret.into(),
                key: key.into(),
            },
        }
    }
}

/// Value source of an [`EnvVar`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// Inline value.
    Literal(String),
    /// Value resolved from a secret key by the platform.
    SecretKeyRef { secret: String, key: String },
}

/// Handle to a submitted job, sufficient to delete it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    pub namespace: String,
}

/// Trait abstracting the container-orchestration platform API.
///
/// The trait is `Send + Sync + 'static`, allowing safe sharing across async
/// tasks via `Arc`.
///
/// # Implementations
///
/// - A production client backed by the platform's API (out of scope for this
///   workspace; the orchestrator is generic over it)
/// - [`MockCluster`]: in-memory test implementation with configurable
///   responses (available in tests only)
pub trait ClusterClient: Send + Sync + 'static {
    /// Lists pods in a namespace; an empty namespace lists all namespaces.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Api` when the listing call fails. This is the
    /// one discovery failure that aborts a scan run.
    fn list_pods(
        &self,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<PodDescriptor>, ClusterError>> + Send;

    /// Reads a named secret.
    ///
    /// # Errors
    ///
    /// - `ClusterError::NotFound`: the secret does not exist
    /// - `ClusterError::Api`: any other failure
    fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<SecretDescriptor, ClusterError>> + Send;

    /// Submits a batch job.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Api` when submission fails; the affected scan
    /// unit is marked failed without blocking other units.
    fn create_job(
        &self,
        spec: &JobSpec,
    ) -> impl Future<Output = Result<JobHandle, ClusterError>> + Send;

    /// Deletes a submitted job and its pods.
    ///
    /// # Errors
    ///
    /// - `ClusterError::NotFound`: the job is already gone (treated as
    ///   success by cleanup)
    /// - `ClusterError::Api`: any other failure (logged, never propagated)
    fn delete_job(&self, job: &JobHandle) -> impl Future<Output = Result<(), ClusterError>> + Send;
}

/// In-memory mock cluster for tests.
///
/// Returns configurable pod/secret fixtures and records every job created
/// or deleted through it.
#[cfg(test)]
#[derive(Default)]
pub struct MockCluster {
    /// Pods returned by `list_pods`.
    pub pods: Vec<PodDescriptor>,
    /// Secrets returned by `get_secret`, keyed by (namespace, name).
    pub secrets: HashMap<(String, String), SecretDescriptor>,
    /// When set, `list_pods` fails.
    pub fail_list_pods: bool,
    /// When set, `create_job` fails.
    pub fail_create_job: bool,
    /// Jobs submitted through this client.
    pub created_jobs: std::sync::Mutex<Vec<JobSpec>>,
    /// Jobs deleted through this client.
    pub deleted_jobs: std::sync::Mutex<Vec<JobHandle>>,
    /// Number of `get_secret` calls, for memoization tests.
    pub secret_lookups: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pods(mut self, pods: Vec<PodDescriptor>) -> Self {
        self.pods = pods;
        self
    }

    pub fn with_secret(mut self, secret: SecretDescriptor) -> Self {
        self.secrets
            .insert((secret.namespace.clone(), secret.name.clone()), secret);
        self
    }

    pub fn with_failing_list_pods(mut self) -> Self {
        self.fail_list_pods = true;
        self
    }

    pub fn with_failing_create_job(mut self) -> Self {
        self.fail_create_job = true;
        self
    }

    pub fn created(&self) -> Vec<JobSpec> {
        self.created_jobs.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<JobHandle> {
        self.deleted_jobs.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ClusterClient for MockCluster {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodDescriptor>, ClusterError> {
        if self.fail_list_pods {
            return Err(ClusterError::Api("mock list failure".to_owned()));
        }
        if namespace.is_empty() {
            return Ok(self.pods.clone());
        }
        Ok(self
            .pods
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<SecretDescriptor, ClusterError> {
        self.secret_lookups
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.secrets
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("secret {namespace}/{name}")))
    }

    async fn create_job(&self, spec: &JobSpec) -> Result<JobHandle, ClusterError> {
        if self.fail_create_job {
            return Err(ClusterError::Api("mock create failure".to_owned()));
        }
        self.created_jobs.lock().unwrap().push(spec.clone());
        Ok(JobHandle {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
        })
    }

    async fn delete_job(&self, job: &JobHandle) -> Result<(), ClusterError> {
        let created = self.created_jobs.lock().unwrap();
        if !created.iter().any(|j| j.name == job.name) {
            return Err(ClusterError::NotFound(format!("job {}", job.name)));
        }
        drop(created);
        self.deleted_jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pod() -> PodDescriptor {
        PodDescriptor {
            name: "web-5f7c".to_owned(),
            uid: "uid-1".to_owned(),
            namespace: "default".to_owned(),
            labels: HashMap::new(),
            image_pull_secrets: vec![],
            containers: vec![ContainerDescriptor {
                name: "web".to_owned(),
                image: "nginx:1.25".to_owned(),
                image_id: "docker-pullable://nginx@sha256:aa11".to_owned(),
            }],
        }
    }

    fn sample_job_spec() -> JobSpec {
        JobSpec {
            name: "fleetscan-nginx-123".to_owned(),
            namespace: "default".to_owned(),
            labels: HashMap::new(),
            service_account: String::new(),
            backoff_limit: 0,
            ttl_seconds_after_finished: 300,
            containers: vec![],
        }
    }

    #[tokio::test]
    async fn mock_list_pods_all_namespaces() {
        let cluster = MockCluster::new().with_pods(vec![sample_pod()]);
        let pods = cluster.list_pods("").await.unwrap();
        assert_eq!(pods.len(), 1);
    }

    #[tokio::test]
    async fn mock_list_pods_filters_namespace() {
        let cluster = MockCluster::new().with_pods(vec![sample_pod()]);
        assert_eq!(cluster.list_pods("default").await.unwrap().len(), 1);
        assert!(cluster.list_pods("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mock_list_pods_failure() {
        let cluster = MockCluster::new().with_failing_list_pods();
        assert!(cluster.list_pods("").await.is_err());
    }

    #[tokio::test]
    async fn mock_get_secret_not_found() {
        let cluster = MockCluster::new();
        let result = cluster.get_secret("default", "missing").await;
        assert!(matches!(result.unwrap_err(), ClusterError::NotFound(_)));
    }

    #[tokio::test]
    async fn mock_get_secret_counts_lookups() {
        let cluster = MockCluster::new();
        let _ = cluster.get_secret("default", "a").await;
        let _ = cluster.get_secret("default", "b").await;
        assert_eq!(
            cluster
                .secret_lookups
                .load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[tokio::test]
    async fn mock_create_and_delete_job() {
        let cluster = MockCluster::new();
        let handle = cluster.create_job(&sample_job_spec()).await.unwrap();
        assert_eq!(cluster.created().len(), 1);

        cluster.delete_job(&handle).await.unwrap();
        assert_eq!(cluster.deleted().len(), 1);
    }

    #[tokio::test]
    async fn mock_delete_unknown_job_is_not_found() {
        let cluster = MockCluster::new();
        let handle = JobHandle {
            name: "ghost".to_owned(),
            namespace: "default".to_owned(),
        };
        assert!(matches!(
            cluster.delete_job(&handle).await.unwrap_err(),
            ClusterError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn mock_create_job_failure() {
        let cluster = MockCluster::new().with_failing_create_job();
        assert!(cluster.create_job(&sample_job_spec()).await.is_err());
    }

    #[test]
    fn env_var_constructors() {
        let lit = EnvVar::literal("SCAN_UUID", "abc");
        assert_eq!(lit.value, EnvValue::Literal("abc".to_owned()));

        let sec = EnvVar::secret_key("IMAGE_PULL_SECRET", "regcred", DOCKER_CONFIG_JSON_KEY);
        assert_eq!(
            sec.value,
            EnvValue::SecretKeyRef {
                secret: "regcred".to_owned(),
                key: ".dockerconfigjson".to_owned(),
            }
        );
    }

    #[test]
    fn cluster_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<MockCluster>();
    }
}
