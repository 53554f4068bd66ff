//! Journal entries: the durable record of a run.
//!
//! A run's state is never stored directly. It is derived by replaying these
//! entries in order (see [`Run::from_entries`](super::run::Run::from_entries)).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::pipeline::Pipeline;

use super::approval::ApprovalRecord;
use super::artifact::{ArtifactRef, ProvisionedRef};
use super::events::Event;
use super::stage::StageStatus;

/// One line of `journal.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum Entry {
    /// First entry of every run; snapshots the pipeline definition
    RunOpened {
        run_id: Uuid,
        pipeline: Pipeline,
        /// Units are logged instead of provisioned, for the whole run
        #[serde(default)]
        dry_run: bool,
        at: DateTime<Utc>,
    },

    /// A lifecycle event that was (or will be) published on the bus
    Lifecycle { event: Event },

    /// The build step produced its artifact
    ArtifactProduced { artifact: ArtifactRef },

    /// A stage changed status
    StageTransition {
        stage: String,
        to: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at: DateTime<Utc>,
    },

    /// An approval gate instance was created for this run
    GateOpened {
        gate_id: Uuid,
        stage: String,
        label: String,
        at: DateTime<Utc>,
    },

    /// An approver recorded a decision
    GateResolved {
        gate_id: Uuid,
        record: ApprovalRecord,
    },

    /// A waiting gate lost to a sibling rejection
    GateSuperseded { gate_id: Uuid, at: DateTime<Utc> },

    /// A deployable unit was applied
    UnitApplied {
        stage: String,
        provisioned: ProvisionedRef,
    },
}

impl Entry {
    pub fn transition(stage: impl Into<String>, to: StageStatus) -> Self {
        Entry::StageTransition {
            stage: stage.into(),
            to,
            error: None,
            at: Utc::now(),
        }
    }

    pub fn failure(stage: impl Into<String>, error: impl Into<String>) -> Self {
        Entry::StageTransition {
            stage: stage.into(),
            to: StageStatus::Failed,
            error: Some(error.into()),
            at: Utc::now(),
        }
    }

    /// The lifecycle event carried by this entry, if any
    pub fn event(&self) -> Option<&Event> {
        match self {
            Entry::Lifecycle { event } => Some(event),
            _ => None,
        }
    }
}
