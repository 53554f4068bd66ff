//! Run state and reconstruction from the journal.
//!
//! A Run represents a single execution of a pipeline. The engine mutates it
//! only by applying journal entries, so a replayed run is identical to the
//! live one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::pipeline::Pipeline;

use super::approval::{ApprovalError, ApprovalGate, Decision};
use super::artifact::ArtifactRef;
use super::events::EventKind;
use super::journal::Entry;
use super::stage::{StageState, StageStatus, TransitionError};

/// A pipeline execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Pipeline definition snapshotted at run start
    pub pipeline: Pipeline,

    /// Current state of the run
    pub state: RunState,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Build output, once the build succeeded
    pub artifact: Option<ArtifactRef>,

    /// One entry per declared stage, in declaration order
    pub stages: Vec<StageState>,

    /// Started with a dry-run provisioner; every resume must use one too
    pub dry_run: bool,

    /// Index of the stage most recently entered
    pub current_stage: Option<usize>,

    /// Kind of the last lifecycle event
    pub last_event: Option<EventKind>,
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Build step executing
    Building,

    /// Stages executing
    Deploying,

    /// Suspended on approval gates (durable; resumable)
    AwaitingApproval,

    /// Every stage succeeded
    Succeeded,

    /// Build or a stage failed
    Failed { error: String },
}

impl RunState {
    pub fn label(&self) -> &'static str {
        match self {
            RunState::Building => "building",
            RunState::Deploying => "deploying",
            RunState::AwaitingApproval => "awaiting-approval",
            RunState::Succeeded => "succeeded",
            RunState::Failed { .. } => "failed",
        }
    }
}

/// Journal could not be applied to the run
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("journal is empty")]
    Empty,

    #[error("journal does not start with run_opened")]
    MissingHeader,

    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

impl Run {
    /// Create a fresh run: every stage `Pending`, no gates, no artifact
    pub fn new(id: Uuid, pipeline: Pipeline, started_at: DateTime<Utc>) -> Self {
        let stages = pipeline
            .stages
            .iter()
            .map(|s| StageState::new(s.name.clone(), s.environment.clone()))
            .collect();

        Self {
            id,
            pipeline,
            state: RunState::Building,
            started_at,
            completed_at: None,
            artifact: None,
            stages,
            dry_run: false,
            current_stage: None,
            last_event: None,
        }
    }

    /// Reconstruct run state from journal entries
    pub fn from_entries(entries: &[Entry]) -> Result<Self, ReplayError> {
        let (first, rest) = entries.split_first().ok_or(ReplayError::Empty)?;

        let mut run = match first {
            Entry::RunOpened {
                run_id,
                pipeline,
                dry_run,
                at,
            } => Self {
                dry_run: *dry_run,
                ..Self::new(*run_id, pipeline.clone(), *at)
            },
            _ => return Err(ReplayError::MissingHeader),
        };

        for entry in rest {
            run.apply(entry)?;
        }

        Ok(run)
    }

    /// Apply a single entry to update run state
    pub fn apply(&mut self, entry: &Entry) -> Result<(), ReplayError> {
        match entry {
            Entry::RunOpened { .. } => {}
            Entry::Lifecycle { event } => {
                self.last_event = Some(event.kind);
                match event.kind {
                    EventKind::BuildSucceeded => self.state = RunState::Deploying,
                    EventKind::StageEntered => {
                        if let Some(name) = &event.stage {
                            self.current_stage = Some(self.stage_index(name)?);
                        }
                        self.state = RunState::Deploying;
                    }
                    EventKind::StageAwaitingApproval => self.state = RunState::AwaitingApproval,
                    EventKind::StageApproved => self.state = RunState::Deploying,
                    EventKind::PipelineSucceeded => {
                        self.state = RunState::Succeeded;
                        self.completed_at = Some(event.timestamp);
                    }
                    EventKind::PipelineFailed => {
                        self.state = RunState::Failed {
                            error: event.error.clone().unwrap_or_default(),
                        };
                        self.completed_at = Some(event.timestamp);
                    }
                    _ => {}
                }
            }
            Entry::ArtifactProduced { artifact } => {
                self.artifact = Some(artifact.clone());
            }
            Entry::StageTransition {
                stage, to, error, ..
            } => {
                let state = self.stage_mut(stage)?;
                state.set_status(*to)?;
                if error.is_some() {
                    state.error = error.clone();
                }
            }
            Entry::GateOpened {
                gate_id,
                stage,
                label,
                ..
            } => {
                let state = self.stage_mut(stage)?;
                state
                    .gates
                    .push(ApprovalGate::new(*gate_id, label.clone(), stage.clone()));
            }
            Entry::GateResolved { gate_id, record } => {
                self.gate_mut(*gate_id)?.record(record.clone())?;
            }
            Entry::GateSuperseded { gate_id, .. } => {
                self.gate_mut(*gate_id)?.supersede()?;
            }
            Entry::UnitApplied { stage, provisioned } => {
                self.stage_mut(stage)?.applied.push(provisioned.clone());
            }
        }
        Ok(())
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline.name
    }

    pub fn stage(&self, name: &str) -> Option<&StageState> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_status(&self, name: &str) -> Option<StageStatus> {
        self.stage(name).map(|s| s.status)
    }

    fn stage_index(&self, name: &str) -> Result<usize, ReplayError> {
        self.stages
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| ReplayError::UnknownStage(name.to_string()))
    }

    fn stage_mut(&mut self, name: &str) -> Result<&mut StageState, ReplayError> {
        let idx = self.stage_index(name)?;
        Ok(&mut self.stages[idx])
    }

    pub fn gate(&self, gate_id: Uuid) -> Option<&ApprovalGate> {
        self.stages.iter().find_map(|s| s.gate(gate_id))
    }

    fn gate_mut(&mut self, gate_id: Uuid) -> Result<&mut ApprovalGate, ReplayError> {
        self.stages
            .iter_mut()
            .find_map(|s| s.gate_mut(gate_id))
            .ok_or(ReplayError::Approval(ApprovalError::UnknownGate(gate_id)))
    }

    /// Gates still waiting for a decision
    pub fn waiting_gates(&self) -> Vec<&ApprovalGate> {
        self.stages.iter().flat_map(|s| s.waiting_gates()).collect()
    }

    /// Most recent approval decision that approved a gate
    pub fn latest_approval(&self) -> Option<&super::approval::ApprovalRecord> {
        self.stages
            .iter()
            .flat_map(|s| s.gates.iter())
            .filter_map(|g| g.record.as_ref())
            .filter(|r| r.decision == Decision::Approved)
            .max_by_key(|r| r.decided_at)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, RunState::Succeeded | RunState::Failed { .. })
    }

    pub fn is_suspended(&self) -> bool {
        self.state == RunState::AwaitingApproval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::approval::{ApprovalRecord, GateState};
    use crate::domain::events::Event;

    const PIPELINE_YAML: &str = r#"
name: demo
build:
  output: out
  phases:
    - phase: package
      commands: ["make dist"]
stages:
  - name: Staging
    environment: staging
  - name: Production
    environment: production
    pre:
      - type: approval
        label: ReleaseApproval
"#;

    fn opened() -> (Uuid, Entry) {
        let run_id = Uuid::new_v4();
        let pipeline = Pipeline::from_yaml(PIPELINE_YAML).unwrap();
        (
            run_id,
            Entry::RunOpened {
                run_id,
                pipeline,
                dry_run: false,
                at: Utc::now(),
            },
        )
    }

    fn lifecycle(run_id: Uuid, stage: Option<&str>, kind: EventKind) -> Entry {
        Entry::Lifecycle {
            event: Event::new(run_id, "demo", stage.map(String::from), kind, ""),
        }
    }

    #[test]
    fn test_run_creation_all_pending() {
        let (_, header) = opened();
        let run = Run::from_entries(&[header]).unwrap();

        assert_eq!(run.state, RunState::Building);
        assert_eq!(run.stages.len(), 2);
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Pending));
    }

    #[test]
    fn test_replay_suspended_run() {
        let (run_id, header) = opened();
        let gate_id = Uuid::new_v4();

        let entries = vec![
            header,
            lifecycle(run_id, None, EventKind::BuildStarted),
            lifecycle(run_id, None, EventKind::BuildSucceeded),
            lifecycle(run_id, Some("Staging"), EventKind::StageEntered),
            Entry::transition("Staging", StageStatus::Running),
            Entry::transition("Staging", StageStatus::Succeeded),
            lifecycle(run_id, Some("Staging"), EventKind::StageSucceeded),
            lifecycle(run_id, Some("Production"), EventKind::StageEntered),
            Entry::GateOpened {
                gate_id,
                stage: "Production".to_string(),
                label: "ReleaseApproval".to_string(),
                at: Utc::now(),
            },
            Entry::transition("Production", StageStatus::AwaitingApproval),
            lifecycle(run_id, Some("Production"), EventKind::StageAwaitingApproval),
        ];

        let run = Run::from_entries(&entries).unwrap();
        assert!(run.is_suspended());
        assert_eq!(run.current_stage, Some(1));
        assert_eq!(run.stage_status("Staging"), Some(StageStatus::Succeeded));
        assert_eq!(run.waiting_gates().len(), 1);
        assert_eq!(run.waiting_gates()[0].id, gate_id);
    }

    #[test]
    fn test_replay_rejects_backwards_transition() {
        let (_, header) = opened();
        let entries = vec![
            header,
            Entry::transition("Staging", StageStatus::Running),
            Entry::transition("Staging", StageStatus::Pending),
        ];

        let err = Run::from_entries(&entries).unwrap_err();
        assert!(matches!(err, ReplayError::Transition(_)));
    }

    #[test]
    fn test_replay_rejects_double_resolution() {
        let (_, header) = opened();
        let gate_id = Uuid::new_v4();
        let record = ApprovalRecord {
            approver: "bob".to_string(),
            decision: Decision::Approved,
            comment: String::new(),
            decided_at: Utc::now(),
        };

        let entries = vec![
            header,
            Entry::GateOpened {
                gate_id,
                stage: "Production".to_string(),
                label: "ReleaseApproval".to_string(),
                at: Utc::now(),
            },
            Entry::GateResolved {
                gate_id,
                record: record.clone(),
            },
            Entry::GateResolved { gate_id, record },
        ];

        let err = Run::from_entries(&entries).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Approval(ApprovalError::AlreadyResolved {
                state: GateState::Approved,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_header() {
        let entries = vec![Entry::transition("Staging", StageStatus::Running)];
        assert!(matches!(
            Run::from_entries(&entries),
            Err(ReplayError::MissingHeader)
        ));
        assert!(matches!(Run::from_entries(&[]), Err(ReplayError::Empty)));
    }
}
