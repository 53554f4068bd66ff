//! Lifecycle events broadcast by the orchestrator.
//!
//! Events are immutable once emitted. They are journaled before being handed
//! to the event bus, so the journal and every subscriber observe the same order.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single lifecycle event of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Name of the pipeline being executed
    pub pipeline: String,

    /// Stage name (if the event concerns a stage)
    pub stage: Option<String>,

    /// Kind of event
    pub kind: EventKind,

    /// Human-readable detail (NO secrets)
    pub detail: String,

    /// Error message for failure events
    pub error: Option<String>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        pipeline: impl Into<String>,
        stage: Option<String>,
        kind: EventKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            pipeline: pipeline.into(),
            stage,
            kind,
            detail: detail.into(),
            error: None,
        }
    }

    /// Attach error information
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// True for the two events that end a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::PipelineSucceeded | EventKind::PipelineFailed
        )
    }
}

/// Kinds of lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BuildStarted,
    BuildSucceeded,
    BuildFailed,
    StageEntered,
    StageAwaitingApproval,
    StageApproved,
    StageRejected,
    StageSucceeded,
    StageFailed,
    PipelineSucceeded,
    PipelineFailed,
}

impl EventKind {
    /// Every kind, in lifecycle order
    pub const ALL: [EventKind; 11] = [
        EventKind::BuildStarted,
        EventKind::BuildSucceeded,
        EventKind::BuildFailed,
        EventKind::StageEntered,
        EventKind::StageAwaitingApproval,
        EventKind::StageApproved,
        EventKind::StageRejected,
        EventKind::StageSucceeded,
        EventKind::StageFailed,
        EventKind::PipelineSucceeded,
        EventKind::PipelineFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BuildStarted => "BuildStarted",
            EventKind::BuildSucceeded => "BuildSucceeded",
            EventKind::BuildFailed => "BuildFailed",
            EventKind::StageEntered => "StageEntered",
            EventKind::StageAwaitingApproval => "StageAwaitingApproval",
            EventKind::StageApproved => "StageApproved",
            EventKind::StageRejected => "StageRejected",
            EventKind::StageSucceeded => "StageSucceeded",
            EventKind::StageFailed => "StageFailed",
            EventKind::PipelineSucceeded => "PipelineSucceeded",
            EventKind::PipelineFailed => "PipelineFailed",
        }
    }

    /// Failure-flavoured kinds (used for chat formatting)
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventKind::BuildFailed
                | EventKind::StageRejected
                | EventKind::StageFailed
                | EventKind::PipelineFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
