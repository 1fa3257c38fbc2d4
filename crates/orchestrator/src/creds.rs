//! Registry credential strategies.
//!
//! When the workload instance chosen for a scan carries no pull secret, the
//! job dispatcher consults an ordered list of credential strategies. Each
//! strategy is gated on the one-time existence of a well-known secret in the
//! credentials namespace; every applicable strategy appends its own
//! environment/secret references to the job (strategies are not mutually
//! exclusive).
//!
//! The existence check is memoized per strategy instance: it runs on the
//! first `should_apply` call and is cached for the rest of the run.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use fleetscan_core::error::ClusterError;

use crate::cluster::{ClusterClient, DOCKER_CONFIG_JSON_KEY, EnvVar, JobSpec};

/// Well-known secret backing the basic registry credential strategy.
const BASIC_REGISTRY_SECRET: &str = "fleetscan-registry-auth";
/// Well-known secret backing the AWS ECR strategy.
const ECR_SECRET: &str = "ecr-sa";
/// Well-known secret backing the GCP GCR strategy.
const GCR_SECRET: &str = "gcr-sa";

/// Environment variable detectors read registry auth documents from.
pub(crate) const IMAGE_PULL_SECRET_ENV: &str = "IMAGE_PULL_SECRET";

/// Which credential mechanism a strategy injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrategyKind {
    /// A static `.dockerconfigjson` document.
    BasicRegistry,
    /// AWS access keys for ECR token exchange.
    AwsEcr,
    /// A GCP service account document for GCR.
    GcpGcr,
}

/// One capability-checked credential strategy.
pub(crate) struct CredentialStrategy<C> {
    kind: StrategyKind,
    secret_name: &'static str,
    secret_namespace: String,
    cluster: Arc<C>,
    available: OnceCell<bool>,
}

impl<C: ClusterClient> CredentialStrategy<C> {
    fn new(kind: StrategyKind, secret_name: &'static str, namespace: &str, cluster: Arc<C>) -> Self {
        Self {
            kind,
            secret_name,
            secret_namespace: namespace.to_owned(),
            cluster,
            available: OnceCell::new(),
        }
    }

    fn name(&self) -> &'static str {
        match self.kind {
            StrategyKind::BasicRegistry => "basic-registry",
            StrategyKind::AwsEcr => "aws-ecr",
            StrategyKind::GcpGcr => "gcp-gcr",
        }
    }

    /// Whether this strategy's backing secret exists. Checked once per
    /// strategy instance and cached.
    async fn should_apply(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                match self
                    .cluster
                    .get_secret(&self.secret_namespace, self.secret_name)
                    .await
                {
                    Ok(_) => true,
                    Err(ClusterError::NotFound(_)) => false,
                    Err(e) => {
                        warn!(
                            strategy = self.name(),
                            secret = self.secret_name,
                            namespace = %self.secret_namespace,
                            error = %e,
                            "credential secret lookup failed, strategy disabled"
                        );
                        false
                    }
                }
            })
            .await
    }

    /// Append this strategy's credentials to every container of the job.
    fn apply(&self, spec: &mut JobSpec) {
        let env = match self.kind {
            StrategyKind::BasicRegistry => vec![EnvVar::secret_key(
                IMAGE_PULL_SECRET_ENV,
                self.secret_name,
                DOCKER_CONFIG_JSON_KEY,
            )],
            StrategyKind::AwsEcr => vec![
                EnvVar::secret_key("AWS_ACCESS_KEY_ID", self.secret_name, "access_key_id"),
                EnvVar::secret_key(
                    "AWS_SECRET_ACCESS_KEY",
                    self.secret_name,
                    "secret_access_key",
                ),
                EnvVar::secret_key("AWS_DEFAULT_REGION", self.secret_name, "region"),
            ],
            StrategyKind::GcpGcr => vec![EnvVar::secret_key(
                "GOOGLE_APPLICATION_CREDENTIALS_JSON",
                self.secret_name,
                "sa.json",
            )],
        };
        for container in &mut spec.containers {
            container.env.extend(env.iter().cloned());
        }
    }
}

/// Ordered set of credential strategies for one run.
pub(crate) struct CredentialResolver<C> {
    strategies: Vec<CredentialStrategy<C>>,
}

impl<C: ClusterClient> CredentialResolver<C> {
    /// Build the standard strategy list against the credentials namespace.
    pub(crate) fn new(cluster: Arc<C>, creds_namespace: &str) -> Self {
        Self {
            strategies: vec![
                CredentialStrategy::new(
                    StrategyKind::BasicRegistry,
                    BASIC_REGISTRY_SECRET,
                    creds_namespace,
                    cluster.clone(),
                ),
                CredentialStrategy::new(
                    StrategyKind::AwsEcr,
                    ECR_SECRET,
                    creds_namespace,
                    cluster.clone(),
                ),
                CredentialStrategy::new(StrategyKind::GcpGcr, GCR_SECRET, creds_namespace, cluster),
            ],
        }
    }

    /// Run every applicable strategy against the job spec, in order.
    pub(crate) async fn apply_all(&self, spec: &mut JobSpec) {
        for strategy in &self.strategies {
            if strategy.should_apply().await {
                debug!(strategy = strategy.name(), job = %spec.name, "applying credential strategy");
                strategy.apply(spec);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::cluster::{ContainerSpec, EnvValue, MockCluster, SecretDescriptor};

    fn job_spec() -> JobSpec {
        JobSpec {
            name: "fleetscan-nginx-1".to_owned(),
            namespace: "default".to_owned(),
            labels: Default::default(),
            service_account: String::new(),
            backoff_limit: 0,
            ttl_seconds_after_finished: 300,
            containers: vec![
                ContainerSpec {
                    name: "vulnerability-scanner".to_owned(),
                    image: "scanner:1".to_owned(),
                    args: vec![],
                    env: vec![],
                },
                ContainerSpec {
                    name: "dockerfile-scanner".to_owned(),
                    image: "scanner:1".to_owned(),
                    args: vec![],
                    env: vec![],
                },
            ],
        }
    }

    fn secret(namespace: &str, name: &str) -> SecretDescriptor {
        SecretDescriptor {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            data: Default::default(),
        }
    }

    #[tokio::test]
    async fn applies_nothing_when_no_secrets_exist() {
        let cluster = Arc::new(MockCluster::new());
        let resolver = CredentialResolver::new(cluster, "fleetscan");
        let mut spec = job_spec();
        resolver.apply_all(&mut spec).await;
        assert!(spec.containers[0].env.is_empty());
        assert!(spec.containers[1].env.is_empty());
    }

    #[tokio::test]
    async fn applies_every_available_strategy_to_all_containers() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_secret(secret("fleetscan", BASIC_REGISTRY_SECRET))
                .with_secret(secret("fleetscan", GCR_SECRET)),
        );
        let resolver = CredentialResolver::new(cluster, "fleetscan");
        let mut spec = job_spec();
        resolver.apply_all(&mut spec).await;

        for container in &spec.containers {
            let names: Vec<&str> = container.env.iter().map(|e| e.name.as_str()).collect();
            assert!(names.contains(&IMAGE_PULL_SECRET_ENV));
            assert!(names.contains(&"GOOGLE_APPLICATION_CREDENTIALS_JSON"));
            // ECR secret absent, its strategy stays off
            assert!(!names.contains(&"AWS_ACCESS_KEY_ID"));
        }
    }

    #[tokio::test]
    async fn basic_registry_env_references_the_secret_key() {
        let cluster = Arc::new(MockCluster::new().with_secret(secret("fleetscan", BASIC_REGISTRY_SECRET)));
        let resolver = CredentialResolver::new(cluster, "fleetscan");
        let mut spec = job_spec();
        resolver.apply_all(&mut spec).await;

        let env = spec.containers[0]
            .env
            .iter()
            .find(|e| e.name == IMAGE_PULL_SECRET_ENV)
            .expect("basic registry env present");
        assert_eq!(
            env.value,
            EnvValue::SecretKeyRef {
                secret: BASIC_REGISTRY_SECRET.to_owned(),
                key: DOCKER_CONFIG_JSON_KEY.to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn should_apply_is_memoized_per_strategy() {
        let cluster = Arc::new(MockCluster::new().with_secret(secret("fleetscan", ECR_SECRET)));
        let resolver = CredentialResolver::new(cluster.clone(), "fleetscan");

        let mut spec = job_spec();
        resolver.apply_all(&mut spec).await;
        let lookups_after_first = cluster.secret_lookups.load(Ordering::SeqCst);
        assert_eq!(lookups_after_first, 3, "one existence check per strategy");

        let mut spec = job_spec();
        resolver.apply_all(&mut spec).await;
        assert_eq!(
            cluster.secret_lookups.load(Ordering::SeqCst),
            lookups_after_first,
            "existence checks must be cached"
        );
    }

    #[tokio::test]
    async fn strategies_respect_the_creds_namespace() {
        // secret exists, but in another namespace
        let cluster = Arc::new(MockCluster::new().with_secret(secret("other", BASIC_REGISTRY_SECRET)));
        let resolver = CredentialResolver::new(cluster, "fleetscan");
        let mut spec = job_spec();
        resolver.apply_all(&mut spec).await;
        assert!(spec.containers[0].env.is_empty());
    }
}
