//! Error taxonomy for pipeline execution.
//!
//! None of these are retried. Build errors end the run, provisioning and
//! script errors end the containing stage (and with it the run), and an
//! approval rejection is a normal terminal outcome rather than a fault.

use thiserror::Error;

use super::pipeline::BuildPhase;

/// A command exited unsuccessfully
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("command `{command}` exited with {exit_code}")]
pub struct CommandFailure {
    pub command: String,

    /// Process exit code; -1 when killed by a signal, timed out or never spawned
    pub exit_code: i32,

    /// Trailing stderr output (may be empty)
    pub stderr: String,
}

impl CommandFailure {
    pub fn new(command: impl Into<String>, exit_code: i32) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stderr: String::new(),
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

/// The build step failed; fatal to the run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("build phase '{phase}' failed: `{command}` exited with {exit_code}")]
pub struct BuildError {
    pub phase: BuildPhase,
    pub command: String,
    pub exit_code: i32,
}

/// A deployable unit could not be applied; fatal to its stage
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to provision unit '{unit}': {cause}")]
pub struct ProvisionError {
    pub unit: String,
    pub cause: String,
}

impl ProvisionError {
    pub fn new(unit: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            cause: cause.into(),
        }
    }
}

/// Why a stage ended `Failed`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageFailure {
    #[error("approval gate '{gate}' rejected by {approver}: {comment}")]
    Rejected {
        gate: String,
        approver: String,
        comment: String,
    },

    #[error("pre-action '{action}' failed: {source}")]
    PreAction {
        action: String,
        #[source]
        source: CommandFailure,
    },

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("post-action '{action}' failed: {source}")]
    PostAction {
        action: String,
        #[source]
        source: CommandFailure,
    },
}

impl StageFailure {
    /// Rejection is an expected outcome, not a fault
    pub fn is_rejection(&self) -> bool {
        matches!(self, StageFailure::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_message() {
        let err = BuildError {
            phase: BuildPhase::Test,
            command: "pytest tests/unit".to_string(),
            exit_code: 2,
        };
        assert_eq!(
            err.to_string(),
            "build phase 'test' failed: `pytest tests/unit` exited with 2"
        );
    }

    #[test]
    fn test_stage_failure_kinds() {
        let rejected = StageFailure::Rejected {
            gate: "ReleaseApproval".to_string(),
            approver: "alice".to_string(),
            comment: "not this week".to_string(),
        };
        assert!(rejected.is_rejection());

        let provision: StageFailure = ProvisionError::new("api", "stack rollback").into();
        assert!(!provision.is_rejection());
        assert_eq!(
            provision.to_string(),
            "failed to provision unit 'api': stack rollback"
        );
    }
}
