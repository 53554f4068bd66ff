//! Stage status state machine.
//!
//! `Pending -> AwaitingApproval -> Running -> {Succeeded, Failed}`.
//! Transitions only move forward; `Failed` is reachable from every
//! non-terminal status and terminal statuses never change again.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::approval::{ApprovalGate, GateState};
use super::artifact::ProvisionedRef;

/// Status of a stage within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not reached yet
    Pending,

    /// Waiting for every approval gate to be approved
    AwaitingApproval,

    /// Deployable units are being applied
    Running,

    /// All units applied and all post-actions completed
    Succeeded,

    /// Rejected, or a pre-action, unit or post-action failed
    Failed,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl StageStatus {
    fn rank(self) -> u8 {
        match self {
            StageStatus::Pending => 0,
            StageStatus::AwaitingApproval => 1,
            StageStatus::Running => 2,
            StageStatus::Succeeded | StageStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Failed)
    }

    /// Check whether `self -> next` is a legal transition
    pub fn can_transition(self, next: StageStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            StageStatus::Pending => false,
            StageStatus::Failed => true,
            // Succeeded is only reachable through Running
            StageStatus::Succeeded => self == StageStatus::Running,
            _ => next.rank() > self.rank(),
        }
    }

    /// Apply a transition, returning the new status
    pub fn transition(self, stage: &str, next: StageStatus) -> Result<StageStatus, TransitionError> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                stage: stage.to_string(),
                from: self,
                to: next,
            })
        }
    }
}

/// Illegal stage status change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid transition for stage '{stage}': {from:?} -> {to:?}")]
pub struct TransitionError {
    pub stage: String,
    pub from: StageStatus,
    pub to: StageStatus,
}

/// Runtime snapshot of one stage in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageState {
    pub name: String,
    pub environment: String,
    pub status: StageStatus,

    /// Gates opened for this stage in this run
    pub gates: Vec<ApprovalGate>,

    /// Units applied so far, in application order
    pub applied: Vec<ProvisionedRef>,

    /// Failure reason once the stage is `Failed`
    pub error: Option<String>,
}

impl StageState {
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            status: StageStatus::Pending,
            gates: Vec::new(),
            applied: Vec::new(),
            error: None,
        }
    }

    pub fn set_status(&mut self, next: StageStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition(&self.name, next)?;
        Ok(())
    }

    pub fn gate(&self, gate_id: uuid::Uuid) -> Option<&ApprovalGate> {
        self.gates.iter().find(|g| g.id == gate_id)
    }

    pub fn gate_mut(&mut self, gate_id: uuid::Uuid) -> Option<&mut ApprovalGate> {
        self.gates.iter_mut().find(|g| g.id == gate_id)
    }

    /// First rejected gate, if any
    pub fn rejected_gate(&self) -> Option<&ApprovalGate> {
        self.gates.iter().find(|g| g.state == GateState::Rejected)
    }

    pub fn waiting_gates(&self) -> impl Iterator<Item = &ApprovalGate> {
        self.gates.iter().filter(|g| g.state == GateState::Waiting)
    }
}
