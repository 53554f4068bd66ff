//! Main orchestrator for pipeline execution.
//!
//! Runs the build, then drives stages strictly in declared order. Every state
//! change is journaled before it is applied to the in-memory [`Run`] and
//! before the matching lifecycle event is published, so a replayed run always
//! matches what subscribers saw.
//!
//! Approval gates do not block a task. When a stage needs a decision the run
//! is suspended (state `AwaitingApproval`), the claim on it is released and
//! [`Orchestrator::run`] returns. [`Orchestrator::resume`] picks it up again,
//! possibly from another process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{ApplyContext, CommandGroup, CommandRunner, Provisioner};
use crate::domain::{
    ApprovalError, ApprovalRecord, Decision, Entry, Event, EventKind, Run, RunState, StageStatus,
};

use super::build::run_build;
use super::bus::EventBus;
use super::error::StageFailure;
use super::pipeline::{Action, Pipeline, StageSpec};
use super::run_store::{self, RunStore};

/// How a stage left the engine
#[derive(Debug)]
enum StageOutcome {
    Succeeded,
    Suspended,
    Failed(StageFailure),
}

/// Journal, live state and bus for the run being driven
struct Session<'a> {
    store: RunStore,
    run: Run,
    bus: &'a EventBus,
}

impl Session<'_> {
    /// Journal an entry, apply it, and publish it if it is a lifecycle event
    async fn record(&mut self, entry: Entry) -> Result<()> {
        self.store.append(&entry).await?;
        self.run
            .apply(&entry)
            .with_context(|| format!("Journal entry rejected for run {}", self.run.id))?;
        if let Entry::Lifecycle { event } = &entry {
            self.bus.publish(event);
        }
        Ok(())
    }

    fn event(&self, stage: Option<&str>, kind: EventKind, detail: impl Into<String>) -> Event {
        Event::new(
            self.run.id,
            self.run.pipeline_name(),
            stage.map(String::from),
            kind,
            detail,
        )
    }

    async fn emit(&mut self, stage: Option<&str>, kind: EventKind, detail: impl Into<String>) -> Result<()> {
        let event = self.event(stage, kind, detail);
        self.record(Entry::Lifecycle { event }).await
    }

    async fn emit_error(
        &mut self,
        stage: Option<&str>,
        kind: EventKind,
        detail: impl Into<String>,
        error: impl Into<String>,
    ) -> Result<()> {
        let event = self.event(stage, kind, detail).with_error(error);
        self.record(Entry::Lifecycle { event }).await
    }

    fn status(&self, stage: &str) -> Result<StageStatus> {
        self.run
            .stage_status(stage)
            .with_context(|| format!("Stage '{}' missing from run {}", stage, self.run.id))
    }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    /// Directory holding one sub-directory per run
    runs_dir: PathBuf,

    /// Executes build phases and scripted actions
    runner: Arc<dyn CommandRunner>,

    /// Applies deployable units
    provisioner: Arc<dyn Provisioner>,

    /// Lifecycle event fan-out
    bus: EventBus,

    /// Whether `provisioner` only logs units
    dry_run: bool,
}

impl Orchestrator {
    pub fn new(
        runs_dir: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        provisioner: Arc<dyn Provisioner>,
        bus: EventBus,
    ) -> Self {
        Self {
            runs_dir: runs_dir.into(),
            runner,
            provisioner,
            bus,
            dry_run: false,
        }
    }

    /// Mark the provisioner as a dry-run one. Runs started here are
    /// journaled as dry runs and only a dry-run orchestrator may resume them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Start a new run of `pipeline`.
    ///
    /// Returns when the run succeeds, fails, or suspends on an approval gate.
    /// Build, provisioning and rejection outcomes are reported through the
    /// returned run's state; `Err` means the journal itself could not be
    /// written or the pipeline is invalid.
    #[instrument(skip(self, pipeline), fields(pipeline = %pipeline.name))]
    pub async fn run(&self, pipeline: &Pipeline) -> Result<Run> {
        pipeline.validate()?;

        let run_id = Uuid::new_v4();
        info!(%run_id, stages = pipeline.stages.len(), "Starting pipeline run");

        let store = RunStore::create(&self.runs_dir, run_id).await?;
        let _claim = store.claim()?;

        let opened = Entry::RunOpened {
            run_id,
            pipeline: pipeline.clone(),
            dry_run: self.dry_run,
            at: Utc::now(),
        };
        store.append(&opened).await?;
        let run = Run::from_entries(std::slice::from_ref(&opened))?;

        let mut session = Session {
            store,
            run,
            bus: &self.bus,
        };

        if !self.build(&mut session).await? {
            return Ok(session.run);
        }

        self.drive(&mut session, 0).await?;
        Ok(session.run)
    }

    /// Continue a run suspended on approval gates
    #[instrument(skip(self), fields(%run_id))]
    pub async fn resume(&self, run_id: Uuid) -> Result<Run> {
        let store = RunStore::open(&self.runs_dir, run_id).await?;
        let _claim = store.claim()?;
        let run = store.load().await?;

        if run.is_finished() {
            anyhow::bail!("Run {} already finished ({})", run_id, run.state.label());
        }
        if !run.is_suspended() {
            anyhow::bail!(
                "Run {} was interrupted while {} and cannot be resumed; start a new run",
                run_id,
                run.state.label()
            );
        }

        if run.dry_run != self.dry_run {
            anyhow::bail!(
                "Run {} was started {} and must be resumed the same way",
                run_id,
                if run.dry_run { "as a dry run" } else { "with live provisioning" }
            );
        }

        let start = run
            .current_stage
            .with_context(|| format!("Run {} is suspended but has no current stage", run_id))?;

        info!(stage = %run.stages[start].name, "Resuming run");

        let mut session = Session {
            store,
            run,
            bus: &self.bus,
        };
        self.drive(&mut session, start).await?;
        Ok(session.run)
    }

    /// Record an approval decision for a gate of a suspended run
    pub async fn resolve_approval(
        &self,
        run_id: Uuid,
        gate_id: Uuid,
        approver: &str,
        decision: Decision,
        comment: &str,
    ) -> Result<ApprovalRecord, ApprovalError> {
        run_store::resolve_approval(&self.runs_dir, run_id, gate_id, approver, decision, comment).await
    }

    /// Flush pending notifications and stop the bus
    pub async fn shutdown(self) {
        self.bus.shutdown().await;
    }

    /// Run the build step. Returns false when the run ended in failure.
    async fn build(&self, session: &mut Session<'_>) -> Result<bool> {
        let build = session.run.pipeline.build.clone();
        session
            .emit(
                None,
                EventKind::BuildStarted,
                format!("Build started ({} phase(s))", build.phases.len()),
            )
            .await?;

        let env = BTreeMap::from([
            ("PIPELINE_NAME".to_string(), session.run.pipeline_name().to_string()),
            ("RUN_ID".to_string(), session.run.id.to_string()),
        ]);

        match run_build(&build, self.runner.as_ref(), session.run.id, &env).await {
            Ok(artifact) => {
                let detail = format!("Artifact {} at {}", artifact.id, artifact.location);
                session.record(Entry::ArtifactProduced { artifact }).await?;
                session.emit(None, EventKind::BuildSucceeded, detail).await?;
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "Build failed");
                let message = e.to_string();
                session
                    .emit_error(None, EventKind::BuildFailed, "Build failed", &message)
                    .await?;
                session
                    .emit_error(None, EventKind::PipelineFailed, "Pipeline failed during build", message)
                    .await?;
                Ok(false)
            }
        }
    }

    /// Execute stages from `start` onward until the run ends or suspends
    async fn drive(&self, session: &mut Session<'_>, start: usize) -> Result<()> {
        let stages = session.run.pipeline.stages.clone();

        for spec in stages.iter().skip(start) {
            match self.execute_stage(session, spec).await? {
                StageOutcome::Succeeded => continue,
                StageOutcome::Suspended => {
                    info!(stage = %spec.name, "Run suspended awaiting approval");
                    return Ok(());
                }
                StageOutcome::Failed(failure) => {
                    let message = format!("stage '{}' failed: {}", spec.name, failure);
                    session
                        .emit_error(None, EventKind::PipelineFailed, "Pipeline failed", message)
                        .await?;
                    return Ok(());
                }
            }
        }

        info!(stages = stages.len(), "Pipeline succeeded");
        session
            .emit(
                None,
                EventKind::PipelineSucceeded,
                format!("{} stage(s) deployed", stages.len()),
            )
            .await
    }

    #[instrument(skip_all, fields(stage = %spec.name, environment = %spec.environment))]
    async fn execute_stage(&self, session: &mut Session<'_>, spec: &StageSpec) -> Result<StageOutcome> {
        let stage = spec.name.as_str();

        if session.status(stage)? == StageStatus::Pending {
            session
                .emit(
                    Some(stage),
                    EventKind::StageEntered,
                    format!("Entering {} ({})", stage, spec.environment),
                )
                .await?;

            if spec.has_approval_gate() {
                let labels: Vec<String> = spec.approval_labels().map(String::from).collect();
                for label in &labels {
                    let gate_id = Uuid::new_v4();
                    debug!(%gate_id, label = %label, "Opening approval gate");
                    session
                        .record(Entry::GateOpened {
                            gate_id,
                            stage: stage.to_string(),
                            label: label.clone(),
                            at: Utc::now(),
                        })
                        .await?;
                }
                session
                    .record(Entry::transition(stage, StageStatus::AwaitingApproval))
                    .await?;
                session
                    .emit(
                        Some(stage),
                        EventKind::StageAwaitingApproval,
                        format!("Waiting on {}", labels.join(", ")),
                    )
                    .await?;
            }
        }

        if session.status(stage)? == StageStatus::AwaitingApproval {
            if let Some(outcome) = self.check_gates(session, spec).await? {
                return Ok(outcome);
            }
        }

        let env = self.script_env(&session.run, spec)?;

        for action in spec.pre_scripts() {
            if let Err(source) = self.run_script(action, &env).await {
                let failure = StageFailure::PreAction {
                    action: action.name().to_string(),
                    source,
                };
                return self.fail_stage(session, stage, failure).await;
            }
        }

        session
            .record(Entry::transition(stage, StageStatus::Running))
            .await?;

        let ctx = self.apply_context(&session.run, spec)?;
        for unit in &spec.units {
            match self.provisioner.apply(unit, &ctx).await {
                Ok(provisioned) => {
                    info!(unit = %unit.name, reference = %provisioned.reference, "Unit applied");
                    session
                        .record(Entry::UnitApplied {
                            stage: stage.to_string(),
                            provisioned,
                        })
                        .await?;
                }
                Err(e) => {
                    warn!(unit = %unit.name, error = %e, "Provisioning failed");
                    return self.fail_stage(session, stage, e.into()).await;
                }
            }
        }

        for action in &spec.post {
            if let Err(source) = self.run_script(action, &env).await {
                let failure = StageFailure::PostAction {
                    action: action.name().to_string(),
                    source,
                };
                return self.fail_stage(session, stage, failure).await;
            }
        }

        session
            .record(Entry::transition(stage, StageStatus::Succeeded))
            .await?;
        session
            .emit(
                Some(stage),
                EventKind::StageSucceeded,
                format!("{} unit(s) applied", spec.units.len()),
            )
            .await?;

        Ok(StageOutcome::Succeeded)
    }

    /// Evaluate the gates of a stage awaiting approval. `None` means every
    /// gate is approved and the stage may proceed.
    async fn check_gates(
        &self,
        session: &mut Session<'_>,
        spec: &StageSpec,
    ) -> Result<Option<StageOutcome>> {
        let stage = spec.name.as_str();
        let state = session
            .run
            .stage(stage)
            .with_context(|| format!("Stage '{}' missing from run", stage))?
            .clone();

        if let Some(gate) = state.rejected_gate() {
            let record = gate.record.clone().with_context(|| {
                format!("Journal inconsistent: rejected gate {} has no decision record", gate.id)
            })?;

            for sibling in state.waiting_gates() {
                session
                    .record(Entry::GateSuperseded {
                        gate_id: sibling.id,
                        at: Utc::now(),
                    })
                    .await?;
            }

            let failure = StageFailure::Rejected {
                gate: gate.label.clone(),
                approver: record.approver,
                comment: record.comment,
            };
            info!(gate = %gate.label, "Stage rejected");
            session
                .emit(Some(stage), EventKind::StageRejected, failure.to_string())
                .await?;
            return self.fail_stage(session, stage, failure).await.map(Some);
        }

        let waiting: Vec<String> = state.waiting_gates().map(|g| g.label.clone()).collect();
        if !waiting.is_empty() {
            debug!(waiting = %waiting.join(", "), "Gates still waiting");
            return Ok(Some(StageOutcome::Suspended));
        }

        let approvers: Vec<String> = state
            .gates
            .iter()
            .filter_map(|g| g.record.as_ref().map(|r| r.approver.clone()))
            .collect();
        session
            .emit(
                Some(stage),
                EventKind::StageApproved,
                format!("Approved by {}", approvers.join(", ")),
            )
            .await?;

        Ok(None)
    }

    async fn fail_stage(
        &self,
        session: &mut Session<'_>,
        stage: &str,
        failure: StageFailure,
    ) -> Result<StageOutcome> {
        let message = failure.to_string();
        if !failure.is_rejection() {
            error!(stage, error = %message, "Stage failed");
        }
        session.record(Entry::failure(stage, &message)).await?;
        session
            .emit_error(Some(stage), EventKind::StageFailed, "Stage failed", message)
            .await?;
        Ok(StageOutcome::Failed(failure))
    }

    async fn run_script(
        &self,
        action: &Action,
        env: &BTreeMap<String, String>,
    ) -> Result<(), super::error::CommandFailure> {
        let Action::Script {
            name,
            commands,
            env: extra,
        } = action
        else {
            return Ok(());
        };

        let group = CommandGroup::new(name, commands.clone())
            .with_env(env.clone())
            .with_env(extra.clone());

        self.runner.execute(&group).await?;
        info!(script = %name, "Script completed");
        Ok(())
    }

    /// Environment shared by every scripted action of a stage
    fn script_env(&self, run: &Run, spec: &StageSpec) -> Result<BTreeMap<String, String>> {
        let artifact = run
            .artifact
            .as_ref()
            .with_context(|| format!("Run {} has no build artifact", run.id))?;

        let mut env = BTreeMap::from([
            ("PIPELINE_NAME".to_string(), run.pipeline_name().to_string()),
            ("RUN_ID".to_string(), run.id.to_string()),
            ("STAGE_NAME".to_string(), spec.name.clone()),
            ("STAGE_ENVIRONMENT".to_string(), spec.environment.clone()),
            ("ARTIFACT_ID".to_string(), artifact.id.clone()),
            ("ARTIFACT_LOCATION".to_string(), artifact.location.clone()),
        ]);

        if let Some(approval) = run.latest_approval() {
            env.insert("APPROVED_BY".to_string(), approval.approver.clone());
            env.insert("APPROVAL_COMMENT".to_string(), approval.comment.clone());
        }

        Ok(env)
    }

    fn apply_context(&self, run: &Run, spec: &StageSpec) -> Result<ApplyContext> {
        let artifact = run
            .artifact
            .clone()
            .with_context(|| format!("Run {} has no build artifact", run.id))?;

        Ok(ApplyContext {
            pipeline: run.pipeline_name().to_string(),
            run_id: run.id,
            stage: spec.name.clone(),
            environment: spec.environment.clone(),
            target: spec.target.clone(),
            artifact,
        })
    }
}
