//! Approval gates: pre-actions resolved by an external human decision.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// State of an approval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Waiting,
    Approved,
    Rejected,
    /// A sibling gate was rejected first; terminal and non-actionable
    Superseded,
}

impl GateState {
    pub fn is_resolved(self) -> bool {
        self != GateState::Waiting
    }
}

/// Decision recorded by an approver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approved => f.write_str("approved"),
            Decision::Rejected => f.write_str("rejected"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Decision::Approved),
            "reject" | "rejected" => Ok(Decision::Rejected),
            other => Err(format!("unknown decision '{}'", other)),
        }
    }
}

/// Who decided, what they said, and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approver: String,
    pub decision: Decision,
    pub comment: String,
    pub decided_at: DateTime<Utc>,
}

/// A single approval gate instance. A fresh instance (new id) is created for
/// every run; nothing is carried over between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalGate {
    pub id: Uuid,
    pub label: String,

    /// Owning stage name (back-reference only)
    pub stage: String,

    pub state: GateState,

    /// Present once the gate was approved or rejected
    pub record: Option<ApprovalRecord>,
}

impl ApprovalGate {
    pub fn new(id: Uuid, label: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            stage: stage.into(),
            state: GateState::Waiting,
            record: None,
        }
    }

    /// Record a decision. Callable exactly once; any later call fails with
    /// `AlreadyResolved` and leaves the gate untouched.
    pub fn record(&mut self, record: ApprovalRecord) -> Result<(), ApprovalError> {
        if self.state.is_resolved() {
            return Err(ApprovalError::AlreadyResolved {
                gate_id: self.id,
                state: self.state,
            });
        }

        self.state = match record.decision {
            Decision::Approved => GateState::Approved,
            Decision::Rejected => GateState::Rejected,
        };
        self.record = Some(record);
        Ok(())
    }

    /// Mark a still-waiting gate as superseded by a sibling rejection
    pub fn supersede(&mut self) -> Result<(), ApprovalError> {
        if self.state.is_resolved() {
            return Err(ApprovalError::AlreadyResolved {
                gate_id: self.id,
                state: self.state,
            });
        }
        self.state = GateState::Superseded;
        Ok(())
    }
}

/// Errors surfaced by the approval signal interface
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Gate {gate_id} is already resolved ({state:?})")]
    AlreadyResolved { gate_id: Uuid, state: GateState },

    #[error("Gate not found: {0}")]
    UnknownGate(Uuid),

    #[error("Run journal error: {0}")]
    Journal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
