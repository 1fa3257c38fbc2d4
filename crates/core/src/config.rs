//! Configuration -- fleetscan.toml parsing and runtime settings.
//!
//! [`FleetscanConfig`] is the top-level structure holding every section.
//!
//! # Loading precedence
//! 1. Environment variables (`FLEETSCAN_SCAN_MAX_PARALLELISM=20` form)
//! 2. Config file (`fleetscan.toml`)
//! 3. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), fleetscan_core::error::FleetscanError> {
//! use fleetscan_core::config::FleetscanConfig;
//!
//! // Load from file + apply environment overrides
//! let config = FleetscanConfig::load("fleetscan.toml").await?;
//!
//! // Parse directly from a TOML string
//! let config = FleetscanConfig::parse("[scan]\nmax_parallelism = 20")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FleetscanError};
use crate::types::RetentionPolicy;

/// Top-level fleetscan configuration.
///
/// Represents the structure of `fleetscan.toml`. Each subsystem reads only
/// its own section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetscanConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Scan run settings.
    #[serde(default)]
    pub scan: ScanConfig,
    /// Scan job settings.
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl FleetscanConfig {
    /// Load configuration from a TOML file and apply environment overrides.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FleetscanError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file (no environment overrides).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FleetscanError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FleetscanError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FleetscanError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, FleetscanError> {
        toml::from_str(toml_str).map_err(|e| {
            FleetscanError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Override configuration values from environment variables.
    ///
    /// Naming convention: `FLEETSCAN_{SECTION}_{FIELD}`,
    /// e.g. `FLEETSCAN_SCAN_TARGET_NAMESPACE=production`.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "FLEETSCAN_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "FLEETSCAN_GENERAL_LOG_FORMAT");

        // Scan
        override_string(&mut self.scan.target_namespace, "FLEETSCAN_SCAN_TARGET_NAMESPACE");
        override_csv(
            &mut self.scan.ignored_namespaces,
            "FLEETSCAN_SCAN_IGNORED_NAMESPACES",
        );
        override_usize(
            &mut self.scan.max_parallelism,
            "FLEETSCAN_SCAN_MAX_PARALLELISM",
        );
        override_u64(&mut self.scan.job_timeout_secs, "FLEETSCAN_SCAN_JOB_TIMEOUT_SECS");
        override_bool(&mut self.scan.dockerfile_scan, "FLEETSCAN_SCAN_DOCKERFILE_SCAN");
        override_string(
            &mut self.scan.severity_threshold,
            "FLEETSCAN_SCAN_SEVERITY_THRESHOLD",
        );
        override_bool(&mut self.scan.registry_insecure, "FLEETSCAN_SCAN_REGISTRY_INSECURE");
        override_bool(&mut self.scan.trace, "FLEETSCAN_SCAN_TRACE");

        // Jobs
        override_string(&mut self.jobs.scanner_image, "FLEETSCAN_JOBS_SCANNER_IMAGE");
        override_string(
            &mut self.jobs.dockerfile_scanner_image,
            "FLEETSCAN_JOBS_DOCKERFILE_SCANNER_IMAGE",
        );
        override_string(
            &mut self.jobs.result_service_address,
            "FLEETSCAN_JOBS_RESULT_SERVICE_ADDRESS",
        );
        override_string(&mut self.jobs.service_account, "FLEETSCAN_JOBS_SERVICE_ACCOUNT");
        override_retention(&mut self.jobs.retention, "FLEETSCAN_JOBS_RETENTION");
        override_string(
            &mut self.jobs.creds_secret_namespace,
            "FLEETSCAN_JOBS_CREDS_SECRET_NAMESPACE",
        );
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), FleetscanError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.scan.max_parallelism == 0 || self.scan.max_parallelism > MAX_PARALLELISM {
            return Err(ConfigError::InvalidValue {
                field: "scan.max_parallelism".to_owned(),
                reason: format!("must be 1-{MAX_PARALLELISM}"),
            }
            .into());
        }

        if self.scan.job_timeout_secs == 0 || self.scan.job_timeout_secs > MAX_JOB_TIMEOUT_SECS {
            return Err(ConfigError::InvalidValue {
                field: "scan.job_timeout_secs".to_owned(),
                reason: format!("must be 1-{MAX_JOB_TIMEOUT_SECS}"),
            }
            .into());
        }

        let valid_severities = ["info", "low", "medium", "high", "critical"];
        if !valid_severities.contains(&self.scan.severity_threshold.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "scan.severity_threshold".to_owned(),
                reason: format!("must be one of: {}", valid_severities.join(", ")),
            }
            .into());
        }

        if self.jobs.scanner_image.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "jobs.scanner_image".to_owned(),
                reason: "scanner image must not be empty".to_owned(),
            }
            .into());
        }

        if self.scan.dockerfile_scan && self.jobs.dockerfile_scanner_image.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "jobs.dockerfile_scanner_image".to_owned(),
                reason: "must not be empty when scan.dockerfile_scan is enabled".to_owned(),
            }
            .into());
        }

        if self.jobs.result_service_address.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "jobs.result_service_address".to_owned(),
                reason: "result service address must not be empty".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// Upper bounds for validated fields.
const MAX_PARALLELISM: usize = 100;
const MAX_JOB_TIMEOUT_SECS: u64 = 24 * 3600;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (json, pretty).
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// Scan run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Namespace to scan; empty scans all namespaces.
    pub target_namespace: String,
    /// Namespaces excluded from scanning.
    pub ignored_namespaces: Vec<String>,
    /// Maximum number of images scanned concurrently.
    pub max_parallelism: usize,
    /// Per-image wait deadline for results, in seconds.
    pub job_timeout_secs: u64,
    /// Whether to run the dockerfile/configuration detector as a second
    /// result source.
    pub dockerfile_scan: bool,
    /// Minimum severity forwarded to the vulnerability detector.
    pub severity_threshold: String,
    /// Allow plain-HTTP registries in dispatched detectors.
    pub registry_insecure: bool,
    /// Detector trace/verbosity flag.
    pub trace: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target_namespace: String::new(),
            ignored_namespaces: vec!["kube-system".to_owned()],
            max_parallelism: 10,
            job_timeout_secs: 600,
            dockerfile_scan: true,
            severity_threshold: "medium".to_owned(),
            registry_insecure: false,
            trace: false,
        }
    }
}

/// Scan job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Image of the vulnerability scanner container.
    pub scanner_image: String,
    /// Image of the dockerfile scanner container.
    pub dockerfile_scanner_image: String,
    /// Address the detectors deliver results to.
    pub result_service_address: String,
    /// Service account assigned to scan job pods.
    pub service_account: String,
    /// Retention policy for completed jobs.
    pub retention: RetentionPolicy,
    /// Namespace holding the credential-strategy secrets.
    pub creds_secret_namespace: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            scanner_image: "fleetscan/vuln-scanner:latest".to_owned(),
            dockerfile_scanner_image: "fleetscan/dockerfile-scanner:latest".to_owned(),
            result_service_address: "fleetscan.fleetscan:8080".to_owned(),
            service_account: String::new(),
            retention: RetentionPolicy::DeleteAll,
            creds_secret_namespace: "fleetscan".to_owned(),
        }
    }
}

// --- Environment override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val.split(',').map(|s| s.trim().to_owned()).collect();
    }
}

fn override_retention(target: &mut RetentionPolicy, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<RetentionPolicy>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse retention policy from env var, ignoring"
            ),
        }
    }
}
