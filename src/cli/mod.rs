//! Command-line interface for promote.
//!
//! Provides commands for running pipelines, recording approval decisions,
//! resuming suspended runs, and inspecting run history.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use crate::adapters::{
    sinks_from_config, CommandProvisioner, CommandRunner, DryRunProvisioner, Provisioner, ShellRunner,
};
use crate::config::{self, ProvisionerMode, ResolvedConfig};
use crate::core::{list_runs, load_run, resolve_approval, EventBus, NotificationConfig, Orchestrator, Pipeline};
use crate::domain::{Decision, Run, RunState};

/// Environment variable supplying the approver identity
pub const APPROVER_ENV: &str = "PROMOTE_APPROVER";

/// promote - Deployment pipeline orchestrator with approval gates
#[derive(Parser, Debug)]
#[command(name = "promote")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and promote a pipeline through its stages
    Run {
        /// Pipeline name (will look for pipelines/<name>.yaml) or path
        pipeline_name: String,

        /// Log units instead of provisioning them
        #[arg(long)]
        dry_run: bool,
    },

    /// Continue a run suspended on approval gates
    Resume {
        /// Run ID to resume
        run_id: String,

        /// Log units instead of provisioning them
        #[arg(long)]
        dry_run: bool,
    },

    /// Approve a waiting gate
    Approve {
        /// Run ID (UUID)
        run_id: String,

        /// Gate ID (UUID, shown by `status`)
        gate_id: String,

        /// Approver identity
        #[arg(long = "by", env = APPROVER_ENV)]
        approver: String,

        /// Free-text comment (e.g. a release id)
        #[arg(short, long, default_value = "")]
        comment: String,

        /// Resume the run right after recording the approval
        #[arg(long)]
        resume: bool,
    },

    /// Reject a waiting gate; the stage and the run fail
    Reject {
        /// Run ID (UUID)
        run_id: String,

        /// Gate ID (UUID, shown by `status`)
        gate_id: String,

        /// Approver identity
        #[arg(long = "by", env = APPROVER_ENV)]
        approver: String,

        /// Reason for the rejection
        #[arg(short, long, default_value = "")]
        comment: String,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Check a pipeline definition without running it
    Validate {
        /// Pipeline name or path
        pipeline_name: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::load_config()?;

        match self.command {
            Commands::Run {
                pipeline_name,
                dry_run,
            } => run_pipeline(&cfg, &pipeline_name, dry_run).await,
            Commands::Resume { run_id, dry_run } => resume_run(&cfg, &run_id, dry_run).await,
            Commands::Approve {
                run_id,
                gate_id,
                approver,
                comment,
                resume,
            } => {
                decide(&cfg, &run_id, &gate_id, &approver, Decision::Approved, &comment).await?;
                if resume {
                    resume_run(&cfg, &run_id, false).await?;
                }
                Ok(())
            }
            Commands::Reject {
                run_id,
                gate_id,
                approver,
                comment,
            } => {
                decide(&cfg, &run_id, &gate_id, &approver, Decision::Rejected, &comment).await?;
                // The engine turns the rejection into the stage failure
                resume_run(&cfg, &run_id, false).await
            }
            Commands::Status { run_id } => show_status(&cfg, &run_id).await,
            Commands::Runs { limit } => show_runs(&cfg, limit).await,
            Commands::Validate { pipeline_name } => validate_pipeline(&cfg, &pipeline_name),
            Commands::Config => show_config(&cfg),
        }
    }
}

/// Assemble an orchestrator for the given notification routing
fn orchestrator(cfg: &ResolvedConfig, notifications: &NotificationConfig, dry_run: bool) -> Result<Orchestrator> {
    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::from_settings(&cfg.shell));

    let dry_run = dry_run || cfg.provisioner.mode == ProvisionerMode::DryRun;
    let provisioner: Arc<dyn Provisioner> = if dry_run {
        Arc::new(DryRunProvisioner)
    } else {
        let mut provisioner = CommandProvisioner::new(runner.clone());
        for (kind, template) in &cfg.provisioner.commands {
            provisioner = provisioner.with_template(*kind, template);
        }
        Arc::new(provisioner)
    };

    let bus = EventBus::with_sinks(sinks_from_config(notifications)?);
    Ok(Orchestrator::new(cfg.runs_dir(), runner, provisioner, bus).with_dry_run(dry_run))
}

/// Run a pipeline
async fn run_pipeline(cfg: &ResolvedConfig, pipeline_name: &str, dry_run: bool) -> Result<()> {
    let pipeline = load_pipeline(cfg, pipeline_name)?;

    let orchestrator = orchestrator(cfg, &pipeline.notifications, dry_run)?;
    let result = orchestrator.run(&pipeline).await;
    orchestrator.shutdown().await;

    report(&result?)
}

/// Resume a suspended run.
///
/// A run started as a dry run is always resumed as one. Asking for a dry run
/// of a live run is refused by the orchestrator.
async fn resume_run(cfg: &ResolvedConfig, run_id_str: &str, dry_run: bool) -> Result<()> {
    let run_id = parse_id(run_id_str, "run")?;

    // Notification routing comes from the pipeline snapshot the run started with
    let existing = load_run(&cfg.runs_dir(), run_id).await?;
    if existing.dry_run && !dry_run {
        info!(%run_id, "Run was started as a dry run; resuming without provisioning");
    }

    let orchestrator = orchestrator(cfg, &existing.pipeline.notifications, existing.dry_run || dry_run)?;
    let result = orchestrator.resume(run_id).await;
    orchestrator.shutdown().await;

    report(&result?)
}

/// Record an approval decision
async fn decide(
    cfg: &ResolvedConfig,
    run_id_str: &str,
    gate_id_str: &str,
    approver: &str,
    decision: Decision,
    comment: &str,
) -> Result<()> {
    let run_id = parse_id(run_id_str, "run")?;
    let gate_id = parse_id(gate_id_str, "gate")?;

    if approver.trim().is_empty() {
        anyhow::bail!("Approver identity cannot be empty (use --by or ${})", APPROVER_ENV);
    }

    let record = resolve_approval(&cfg.runs_dir(), run_id, gate_id, approver, decision, comment).await?;

    eprintln!(
        "[Gate {} {} by {} at {}]",
        gate_id,
        record.decision,
        record.approver,
        record.decided_at.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

/// Print the outcome of a run and set the exit status
fn report(run: &Run) -> Result<()> {
    match &run.state {
        RunState::Succeeded => {
            eprintln!("\n[Run {} succeeded]", run.id);
        }
        RunState::AwaitingApproval => {
            eprintln!("\n[Run {} awaiting approval]", run.id);
            for gate in run.waiting_gates() {
                println!("{}  {}  {}", gate.id, gate.stage, gate.label);
            }
            eprintln!("Approve with: promote approve {} <gate-id> --by <name> --resume", run.id);
        }
        RunState::Failed { error } => {
            eprintln!("\n[Run {} failed: {}]", run.id, error);
            std::process::exit(1);
        }
        _ => {
            eprintln!("\n[Run {} in state: {}]", run.id, run.state.label());
        }
    }

    Ok(())
}

/// Show the status of a run
async fn show_status(cfg: &ResolvedConfig, run_id_str: &str) -> Result<()> {
    let run_id = parse_id(run_id_str, "run")?;
    let run = load_run(&cfg.runs_dir(), run_id).await?;

    println!("Run ID:   {}", run.id);
    println!("Pipeline: {}", run.pipeline_name());
    println!("State:    {}", run.state.label());
    if let RunState::Failed { error } = &run.state {
        println!("Error:    {}", error);
    }
    println!("Started:  {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(artifact) = &run.artifact {
        println!("Artifact: {} ({})", artifact.id, artifact.location);
    }

    println!("\nStages:");
    for stage in &run.stages {
        println!("  {:<24} {:<12} {:?}", stage.name, stage.environment, stage.status);
        for unit in &stage.applied {
            println!("      unit  {} -> {}", unit.unit, unit.reference);
        }
        for gate in &stage.gates {
            let decision = gate
                .record
                .as_ref()
                .map(|r| format!(" by {} \"{}\"", r.approver, r.comment))
                .unwrap_or_default();
            println!("      gate  {} {} {:?}{}", gate.id, gate.label, gate.state, decision);
        }
        if let Some(error) = &stage.error {
            println!("      error {}", error);
        }
    }

    Ok(())
}

/// List recent runs
async fn show_runs(cfg: &ResolvedConfig, limit: usize) -> Result<()> {
    let runs = list_runs(&cfg.runs_dir(), limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<18} {:<20}", "RUN ID", "PIPELINE", "STATE", "STARTED");
    println!("{}", "-".repeat(96));

    for run in runs {
        println!(
            "{:<38} {:<20} {:<18} {:<20}",
            run.id,
            run.pipeline_name(),
            run.state.label(),
            run.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

fn validate_pipeline(cfg: &ResolvedConfig, name: &str) -> Result<()> {
    let pipeline = load_pipeline(cfg, name)?;

    println!("Pipeline '{}' is valid", pipeline.name);
    println!("  Build phases: {}", pipeline.build.phases.len());
    for stage in &pipeline.stages {
        let gates: Vec<&str> = stage.approval_labels().collect();
        println!(
            "  {:<24} {:<12} units: {:<3} gates: {}",
            stage.name,
            stage.environment,
            stage.units.len(),
            if gates.is_empty() { "-".to_string() } else { gates.join(", ") }
        );
    }
    println!("  Notification topics: {}", pipeline.notifications.topics.len());

    Ok(())
}

fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Runs:      {}", cfg.runs_dir().display());
    println!("  Pipelines: {}", cfg.pipelines_dir.display());
    println!();
    println!("Shell:");
    println!("  Program: {}", cfg.shell.program);
    println!("  Timeout: {}s", cfg.shell.timeout_seconds);
    if let Some(dir) = &cfg.shell.working_dir {
        println!("  Working dir: {}", dir.display());
    }
    println!();
    println!("Provisioner: {:?}", cfg.provisioner.mode);
    let mut commands: Vec<_> = cfg.provisioner.commands.iter().collect();
    commands.sort_by_key(|(kind, _)| kind.as_str());
    for (kind, template) in commands {
        println!("  {}: {}", kind, template);
    }

    Ok(())
}

/// Load and validate a pipeline by name or path
fn load_pipeline(cfg: &ResolvedConfig, name: &str) -> Result<Pipeline> {
    let path = cfg.pipeline_path(name);
    if !path.exists() {
        anyhow::bail!("Pipeline '{}' not found (looked for {})", name, path.display());
    }

    let pipeline = Pipeline::from_file(&path)?;
    pipeline
        .validate()
        .with_context(|| format!("Invalid pipeline: {}", path.display()))?;
    Ok(pipeline)
}

fn parse_id(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {} ID: {}", what, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approve_arguments() {
        let cli = Cli::try_parse_from([
            "promote",
            "approve",
            "6f1c1f3e-8a8e-4d55-9a3b-1d2f3c4b5a69",
            "0b7f2f0e-3c1a-4a5e-8f4f-7e2d9c8b1a23",
            "--by",
            "alice",
            "--comment",
            "release-42",
            "--resume",
        ])
        .unwrap();

        match cli.command {
            Commands::Approve {
                approver,
                comment,
                resume,
                ..
            } => {
                assert_eq!(approver, "alice");
                assert_eq!(comment, "release-42");
                assert!(resume);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_run_dry_run_flag() {
        let cli = Cli::try_parse_from(["promote", "run", "sample-backend", "--dry-run"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run { dry_run: true, .. }
        ));
    }

    const GATED_PIPELINE: &str = r#"
name: gated
build:
  output: dist
  phases:
    - { phase: package, commands: ["true"] }
stages:
  - name: Production
    environment: production
    pre:
      - { type: approval, label: ReleaseApproval }
    units:
      - { name: Database, kind: data_store }
"#;

    /// Live provisioning config whose data store command leaves a marker file
    fn live_config(home: &std::path::Path, marker: &std::path::Path) -> ResolvedConfig {
        let mut commands = std::collections::HashMap::new();
        commands.insert(
            crate::domain::UnitKind::DataStore,
            format!("touch {}", marker.display()),
        );

        ResolvedConfig {
            home: home.to_path_buf(),
            pipelines_dir: home.join("pipelines"),
            config_file: None,
            shell: config::ShellSettings {
                working_dir: Some(home.to_path_buf()),
                ..Default::default()
            },
            provisioner: config::ProvisionerSettings {
                mode: ProvisionerMode::Command,
                commands,
            },
        }
    }

    #[tokio::test]
    async fn test_approve_resume_keeps_dry_run() {
        let temp = tempfile::TempDir::new().unwrap();
        let marker = temp.path().join("provisioned");
        let cfg = live_config(temp.path(), &marker);

        let pipeline_path = temp.path().join("gated.yaml");
        std::fs::write(&pipeline_path, GATED_PIPELINE).unwrap();
        run_pipeline(&cfg, pipeline_path.to_str().unwrap(), true)
            .await
            .unwrap();

        let run = list_runs(&cfg.runs_dir(), 1).await.unwrap().remove(0);
        assert!(run.dry_run);
        let run_id = run.id.to_string();
        let gate_id = run.waiting_gates()[0].id.to_string();

        // Same path as `approve <run> <gate> --by alice --resume`
        decide(&cfg, &run_id, &gate_id, "alice", Decision::Approved, "")
            .await
            .unwrap();
        resume_run(&cfg, &run_id, false).await.unwrap();

        let finished = load_run(&cfg.runs_dir(), run.id).await.unwrap();
        assert_eq!(finished.state, RunState::Succeeded);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_dry_resume_of_live_run_refused() {
        let temp = tempfile::TempDir::new().unwrap();
        let marker = temp.path().join("provisioned");
        let cfg = live_config(temp.path(), &marker);

        let pipeline_path = temp.path().join("gated.yaml");
        std::fs::write(&pipeline_path, GATED_PIPELINE).unwrap();
        run_pipeline(&cfg, pipeline_path.to_str().unwrap(), false)
            .await
            .unwrap();

        let run = list_runs(&cfg.runs_dir(), 1).await.unwrap().remove(0);
        assert!(!run.dry_run);
        let run_id = run.id.to_string();
        let gate_id = run.waiting_gates()[0].id.to_string();
        decide(&cfg, &run_id, &gate_id, "alice", Decision::Approved, "")
            .await
            .unwrap();

        assert!(resume_run(&cfg, &run_id, true).await.is_err());
        assert!(!marker.exists());

        resume_run(&cfg, &run_id, false).await.unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert!(parse_id("not-a-uuid", "run").is_err());
    }
}
