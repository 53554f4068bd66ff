//! Domain types for the promote orchestrator.
//!
//! This module contains the core data structures:
//! - Events: Immutable lifecycle records broadcast to subscribers
//! - Stage / Approval: The per-run state machines
//! - Unit / Artifact: What gets deployed and what the build produced
//! - Journal / Run: Durable run record and the state derived from it

pub mod approval;
pub mod artifact;
pub mod events;
pub mod journal;
pub mod run;
pub mod stage;
pub mod unit;

// Re-export commonly used types
pub use approval::{ApprovalError, ApprovalGate, ApprovalRecord, Decision, GateState};
pub use artifact::{ArtifactRef, ProvisionedRef};
pub use events::{Event, EventKind};
pub use journal::Entry;
pub use run::{ReplayError, Run, RunState};
pub use stage::{StageState, StageStatus, TransitionError};
pub use unit::{DeployableUnit, UnitKind};
