//! Shared scripted collaborators for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use promote::adapters::{ApplyContext, CommandGroup, CommandRunner, NotificationSink, Provisioner};
use promote::core::{CommandFailure, EventBus, Orchestrator, ProvisionError};
use promote::domain::{DeployableUnit, Event, EventKind, ProvisionedRef};

/// Four single-unit stages; production data store gated on ReleaseApproval
pub const SAMPLE_PIPELINE: &str = r#"
name: sample-backend
build:
  output: cdk/cdk.out
  phases:
    - phase: install
      commands: ["yarn install"]
    - phase: test
      commands: ["pytest tests/unit"]
    - phase: synth
      commands: ["npx cdk synth"]
stages:
  - name: StagingDB
    environment: staging
    units:
      - { name: Database, kind: data_store }
  - name: StagingAPI
    environment: staging
    units:
      - { name: Api, kind: api_service }
  - name: ProductionDB
    environment: production
    pre:
      - { type: approval, label: ReleaseApproval }
    units:
      - { name: Database, kind: data_store }
  - name: ProductionAPI
    environment: production
    units:
      - { name: Api, kind: api_service }
    post:
      - type: script
        name: Tag Script
        commands: ["./scripts/tag_repository.sh"]
"#;

/// Records every group it runs; fails groups whose name is listed
#[derive(Default)]
pub struct ScriptedRunner {
    failing: HashSet<String>,
    pub executed: Mutex<Vec<CommandGroup>>,
}

impl ScriptedRunner {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.executed.lock().unwrap().iter().map(|g| g.name.clone()).collect()
    }

    pub fn env_of(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.env.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, group: &CommandGroup) -> Result<(), CommandFailure> {
        self.executed.lock().unwrap().push(group.clone());
        if self.failing.contains(&group.name) {
            return Err(CommandFailure::new(group.commands[0].clone(), 2).with_stderr("boom"));
        }
        Ok(())
    }
}

/// Records `stage/unit` for every apply; fails the listed ones
#[derive(Default)]
pub struct ScriptedProvisioner {
    failing: HashSet<String>,
    pub applied: Mutex<Vec<String>>,
}

impl ScriptedProvisioner {
    pub fn failing(keys: &[&str]) -> Self {
        Self {
            failing: keys.iter().map(|k| k.to_string()).collect(),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provisioner for ScriptedProvisioner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn apply(
        &self,
        unit: &DeployableUnit,
        ctx: &ApplyContext,
    ) -> Result<ProvisionedRef, ProvisionError> {
        let key = format!("{}/{}", ctx.stage, unit.name);
        self.applied.lock().unwrap().push(key.clone());
        if self.failing.contains(&key) {
            return Err(ProvisionError::new(&unit.name, "quota exceeded"));
        }
        Ok(ProvisionedRef::new(&unit.name, unit.kind, key))
    }
}

/// Keeps every event it is notified of
#[derive(Default)]
pub struct CollectingSink {
    pub events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    /// `(kind, stage)` pairs, stage-less events as `"-"`
    pub fn trace(&self) -> Vec<(EventKind, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.kind, e.stage.clone().unwrap_or_else(|| "-".to_string())))
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.kinds().iter().filter(|k| **k == kind).count()
    }
}

#[async_trait]
impl NotificationSink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Errors on every event
pub struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn notify(&self, _event: &Event) -> Result<()> {
        anyhow::bail!("chat service unavailable")
    }
}

/// Orchestrator over `runs_dir` with the given collaborators and sinks
pub fn orchestrator(
    runs_dir: &Path,
    runner: Arc<ScriptedRunner>,
    provisioner: Arc<ScriptedProvisioner>,
    sinks: Vec<Arc<dyn NotificationSink>>,
) -> Orchestrator {
    Orchestrator::new(runs_dir, runner, provisioner, EventBus::with_sinks(sinks))
}
