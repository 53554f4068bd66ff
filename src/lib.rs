//! promote - Event-sourced deployment pipeline orchestrator
//!
//! Builds an application once and promotes the resulting artifact through an
//! ordered list of stages (e.g. staging, then production), pausing at manual
//! approval gates and broadcasting lifecycle events to chat channels.
//!
//! # Architecture
//!
//! The system is built around an append-only run journal:
//! - Every state change is recorded as an immutable journal entry
//! - Current run state is derived by replaying the journal
//! - A run waiting on approval is suspended on disk and resumed later,
//!   possibly by another process
//!
//! # Modules
//!
//! - `adapters`: External collaborators (shell, provisioning, Slack)
//! - `core`: Orchestration logic (Pipeline, Build, EventBus, RunStore, Orchestrator)
//! - `domain`: Data structures (Event, Stage, ApprovalGate, Run)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline
//! promote run sample-backend
//!
//! # Approve the production gate and continue
//! promote approve <run-id> <gate-id> --by alice --comment release-42 --resume
//!
//! # Check run status
//! promote status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::core::{EventBus, Orchestrator, Pipeline};
pub use domain::{Event, EventKind, Run, RunState, StageStatus};
