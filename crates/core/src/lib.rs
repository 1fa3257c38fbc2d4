//! Fleetscan shared foundation -- config, errors, domain types, metric names.
//!
//! `fleetscan-core` holds everything that crosses crate boundaries in the
//! fleetscan workspace. The scan orchestration engine itself lives in
//! `fleetscan-orchestrator`.
//!
//! # Module structure
//!
//! - [`config`]: `fleetscan.toml` parsing, env overrides, validation
//! - [`error`]: top-level and per-domain error types
//! - [`types`]: run status/progress, retention policy, finding payloads,
//!   per-instance result rows
//! - [`metrics`]: central metric name constants

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// --- Main type re-exports ---
// Core types are usable straight from the crate root.

// Errors
pub use error::{ClusterError, ConfigError, FleetscanError, OrchestrationError};

// Configuration
pub use config::FleetscanConfig;

// Domain types
pub use types::{
    DockerfileFinding, ImageScanResult, RetentionPolicy, ScanError, ScanErrorKind,
    ScanErrorSource, ScanProgress, ScanResults, ScanStatus, Severity, Vulnerability,
};
