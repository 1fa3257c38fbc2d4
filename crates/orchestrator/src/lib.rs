//! Fleetscan scan orchestration engine.
//!
//! Given a cluster, the engine discovers every distinct running container
//! image, dispatches one isolated scan job per image across a bounded worker
//! pool, correlates the asynchronously delivered detector results, and
//! exposes aggregate progress and per-instance findings.
//!
//! # Module structure
//!
//! - [`error`]: domain error types (`OrchestratorError`)
//! - [`config`]: dispatch settings and per-run parameters
//! - [`cluster`]: platform API abstraction (`ClusterClient` trait)
//! - [`orchestrator`]: the caller surface (`ScanOrchestrator`)
//!
//! Internal modules: `registry` (image reference helpers), `discovery`
//! (unit map construction), `state` (the fleet run aggregate and result
//! correlation state machine), `creds` (credential strategies), `job`
//! (job lifecycle), `scheduler` (bounded-parallelism batch dispatch).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fleetscan_core::config::FleetscanConfig;
//! use fleetscan_orchestrator::{OrchestratorConfig, ScanOrchestrator, ScanRequest};
//!
//! let core = FleetscanConfig::load("fleetscan.toml").await?;
//! let orchestrator = ScanOrchestrator::new(cluster, OrchestratorConfig::from_core(&core));
//!
//! orchestrator.start_run(ScanRequest::from_core(&core)).await?;
//! let progress = orchestrator.progress().await;
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod orchestrator;

mod creds;
mod discovery;
mod job;
mod registry;
mod scheduler;
mod state;

// --- Public API re-exports ---

// Orchestrator (main surface)
pub use orchestrator::ScanOrchestrator;

// Configuration
pub use config::{OrchestratorConfig, ScanRequest};

// Error
pub use error::OrchestratorError;

// Platform abstraction
pub use cluster::{
    ClusterClient, ContainerDescriptor, ContainerSpec, EnvValue, EnvVar, JobHandle, JobSpec,
    PodDescriptor, SecretDescriptor,
};

// Result deliveries
pub use state::{DockerfileReport, VulnerabilitiesReport};
