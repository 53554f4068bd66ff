//! Adapter interfaces for external collaborators.
//!
//! The orchestrator never talks to a shell, a cloud API or a chat service
//! directly. It goes through these three narrow traits:
//! - [`CommandRunner`]: executes a command group (build phases, scripts)
//! - [`Provisioner`]: applies one deployable unit
//! - [`NotificationSink`]: receives lifecycle events from the bus

pub mod notify;
pub mod provisioner;
pub mod shell;
pub mod slack;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::core::error::{CommandFailure, ProvisionError};
use crate::core::pipeline::DeployTarget;
use crate::domain::{ArtifactRef, DeployableUnit, Event, ProvisionedRef};

pub use notify::{sinks_from_config, LogSink, TopicSink};
pub use provisioner::{CommandProvisioner, DryRunProvisioner};
pub use shell::ShellRunner;
pub use slack::SlackWebhook;

/// A named, ordered batch of shell commands sharing one environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandGroup {
    /// Build phase, script or unit name (for logs and errors)
    pub name: String,

    /// Commands, run in order; the first failure stops the group
    pub commands: Vec<String>,

    /// Extra environment variables
    pub env: BTreeMap<String, String>,
}

impl CommandGroup {
    pub fn new(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            commands,
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Trait for command execution backends
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Human-readable runner name
    fn name(&self) -> &str;

    /// Run every command of the group in order; returns on completion
    async fn execute(&self, group: &CommandGroup) -> Result<(), CommandFailure>;
}

/// Everything a provisioner may know about where a unit is going
#[derive(Debug, Clone)]
pub struct ApplyContext {
    pub pipeline: String,
    pub run_id: Uuid,
    pub stage: String,
    pub environment: String,
    pub target: DeployTarget,

    /// Read-only build output shared by all stages
    pub artifact: ArtifactRef,
}

/// Trait for deployable unit provisioning backends
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn name(&self) -> &str;

    /// Create or update the resources behind `unit`. The config bag is
    /// passed through untouched; schema validation belongs to the backend.
    async fn apply(
        &self,
        unit: &DeployableUnit,
        ctx: &ApplyContext,
    ) -> Result<ProvisionedRef, ProvisionError>;
}

/// Trait for event bus subscribers
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one event. Errors are logged by the bus and otherwise ignored.
    async fn notify(&self, event: &Event) -> Result<()>;
}
