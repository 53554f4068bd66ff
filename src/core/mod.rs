//! Core orchestration logic.
//!
//! This module contains:
//! - Pipeline: Pipeline definitions, loading and validation
//! - Build: The artifact-producing step
//! - EventBus: Lifecycle event fan-out
//! - RunStore: Append-only run journal
//! - Orchestrator: Main execution engine

pub mod build;
pub mod bus;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod run_store;

// Re-export commonly used types
pub use build::{artifact_id, run_build};
pub use bus::EventBus;
pub use error::{BuildError, CommandFailure, ProvisionError, StageFailure};
pub use orchestrator::Orchestrator;
pub use pipeline::{Action, BuildPhase, BuildStep, DeployTarget, NotificationConfig, Pipeline, StageSpec};
pub use run_store::{list_runs, load_run, resolve_approval, RunClaim, RunStore};
