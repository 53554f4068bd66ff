//! Append-only run journal with file-based persistence.
//!
//! Each run lives in `<runs_dir>/<run_id>/`:
//! - `journal.jsonl`: one [`Entry`] per line, newline-delimited JSON
//! - `run.lock`: held exclusively while a process is driving the run
//!
//! Appends take an exclusive lock on the journal and reads take a shared one,
//! so an approval recorded from another process never interleaves with the
//! engine's writes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{ApprovalError, ApprovalRecord, Decision, Entry, ReplayError, Run};

const JOURNAL_FILE: &str = "journal.jsonl";
const LOCK_FILE: &str = "run.lock";

/// File-based journal for one run
#[derive(Debug, Clone)]
pub struct RunStore {
    run_id: Uuid,

    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the journal.jsonl file
    journal_path: PathBuf,

    /// Path to the driver lock file
    lock_path: PathBuf,
}

/// Exclusive right to drive a run; released on drop
#[derive(Debug)]
pub struct RunClaim {
    file: File,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl RunStore {
    fn at(runs_dir: &Path, run_id: Uuid) -> Self {
        let run_dir = runs_dir.join(run_id.to_string());
        Self {
            run_id,
            journal_path: run_dir.join(JOURNAL_FILE),
            lock_path: run_dir.join(LOCK_FILE),
            run_dir,
        }
    }

    /// Create the directory for a new run
    pub async fn create(runs_dir: &Path, run_id: Uuid) -> Result<Self> {
        let store = Self::at(runs_dir, run_id);
        fs::create_dir_all(&store.run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", store.run_dir.display()))?;
        Ok(store)
    }

    /// Open the journal of an existing run
    pub async fn open(runs_dir: &Path, run_id: Uuid) -> Result<Self> {
        let store = Self::at(runs_dir, run_id);
        if !fs::try_exists(&store.journal_path).await.unwrap_or(false) {
            anyhow::bail!("Run {} not found in {}", run_id, runs_dir.display());
        }
        Ok(store)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Claim the run for this process. Fails immediately if another driver
    /// holds it.
    pub fn claim(&self) -> Result<RunClaim> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("Failed to open lock file: {}", self.lock_path.display()))?;

        file.try_lock_exclusive()
            .map_err(|_| anyhow::anyhow!("Run {} is already being driven by another process", self.run_id))?;

        debug!(run_id = %self.run_id, "Run claimed");
        Ok(RunClaim { file })
    }

    /// Append one entry to the journal
    pub async fn append(&self, entry: &Entry) -> Result<()> {
        self.append_all(std::slice::from_ref(entry)).await
    }

    /// Append several entries atomically with respect to other writers
    pub async fn append_all(&self, entries: &[Entry]) -> Result<()> {
        let payload = encode(entries).context("Failed to serialize journal entry")?;
        let path = self.journal_path.clone();

        tokio::task::spawn_blocking(move || append_locked(&path, &payload))
            .await
            .context("Journal writer task failed")?
            .with_context(|| format!("Failed to write journal: {}", self.journal_path.display()))
    }

    /// Replay all entries in order
    pub async fn replay(&self) -> Result<Vec<Entry>> {
        let path = self.journal_path.clone();

        let content = tokio::task::spawn_blocking(move || read_shared(&path))
            .await
            .context("Journal reader task failed")?
            .with_context(|| format!("Failed to read journal: {}", self.journal_path.display()))?;

        decode(&content).context("Failed to parse journal")
    }

    /// Reconstruct the run from its journal
    pub async fn load(&self) -> Result<Run> {
        let entries = self.replay().await?;
        Run::from_entries(&entries)
            .with_context(|| format!("Failed to reconstruct run {}", self.run_id))
    }

    /// Record an approval decision on a gate.
    ///
    /// Runs under the journal's exclusive lock, so concurrent callers are
    /// serialized: the first wins and every later call sees
    /// `AlreadyResolved`. A rejection also supersedes every sibling gate of
    /// the same stage that is still waiting.
    pub async fn resolve_gate(
        &self,
        gate_id: Uuid,
        approver: &str,
        decision: Decision,
        comment: &str,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let record = ApprovalRecord {
            approver: approver.to_string(),
            decision,
            comment: comment.to_string(),
            decided_at: Utc::now(),
        };
        let path = self.journal_path.clone();

        let resolved = tokio::task::spawn_blocking(move || resolve_locked(&path, gate_id, record))
            .await
            .map_err(|e| ApprovalError::Journal(e.to_string()))??;

        info!(
            run_id = %self.run_id,
            %gate_id,
            approver = %resolved.approver,
            decision = %resolved.decision,
            "Approval recorded"
        );
        Ok(resolved)
    }
}

/// External approval signal: record a decision for `gate_id` in `run_id`
pub async fn resolve_approval(
    runs_dir: &Path,
    run_id: Uuid,
    gate_id: Uuid,
    approver: &str,
    decision: Decision,
    comment: &str,
) -> Result<ApprovalRecord, ApprovalError> {
    let store = RunStore::open(runs_dir, run_id)
        .await
        .map_err(|e| ApprovalError::Journal(e.to_string()))?;
    store.resolve_gate(gate_id, approver, decision, comment).await
}

/// Load any run (finished, failed or suspended) by id
pub async fn load_run(runs_dir: &Path, run_id: Uuid) -> Result<Run> {
    RunStore::open(runs_dir, run_id).await?.load().await
}

/// List runs, most recent first
pub async fn list_runs(runs_dir: &Path, limit: usize) -> Result<Vec<Run>> {
    if !fs::try_exists(runs_dir).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    let mut entries = fs::read_dir(runs_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(run_id) = entry.file_name().to_str().and_then(|n| Uuid::parse_str(n).ok()) else {
            continue;
        };
        match load_run(runs_dir, run_id).await {
            Ok(run) => runs.push(run),
            Err(e) => debug!(%run_id, error = %e, "Skipping unreadable run"),
        }
    }

    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(limit);
    Ok(runs)
}

fn encode(entries: &[Entry]) -> serde_json::Result<String> {
    let mut payload = String::new();
    for entry in entries {
        payload.push_str(&serde_json::to_string(entry)?);
        payload.push('\n');
    }
    Ok(payload)
}

fn decode(content: &str) -> serde_json::Result<Vec<Entry>> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

fn append_locked(path: &Path, payload: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    file.write_all(payload.as_bytes())?;
    file.flush()?;
    file.sync_data()?;
    FileExt::unlock(&file)
}

fn read_shared(path: &Path) -> std::io::Result<String> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e),
    };
    FileExt::lock_shared(&file)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    FileExt::unlock(&file)?;
    Ok(content)
}

fn resolve_locked(
    path: &Path,
    gate_id: Uuid,
    record: ApprovalRecord,
) -> Result<ApprovalRecord, ApprovalError> {
    let mut file = OpenOptions::new().read(true).append(true).open(path)?;
    file.lock_exclusive()?;

    let mut content = String::new();
    file.read_to_string(&mut content)?;
    let entries = decode(&content)?;
    let mut run = Run::from_entries(&entries).map_err(|e| ApprovalError::Journal(e.to_string()))?;

    let stage = run
        .gate(gate_id)
        .map(|g| g.stage.clone())
        .ok_or(ApprovalError::UnknownGate(gate_id))?;

    let resolved = Entry::GateResolved {
        gate_id,
        record: record.clone(),
    };
    run.apply(&resolved).map_err(|e| match e {
        ReplayError::Approval(e) => e,
        other => ApprovalError::Journal(other.to_string()),
    })?;

    let mut new_entries = vec![resolved];
    if record.decision == Decision::Rejected {
        if let Some(state) = run.stage(&stage) {
            new_entries.extend(state.waiting_gates().map(|g| Entry::GateSuperseded {
                gate_id: g.id,
                at: Utc::now(),
            }));
        }
    }

    file.write_all(encode(&new_entries)?.as_bytes())?;
    file.flush()?;
    file.sync_data()?;
    FileExt::unlock(&file)?;

    Ok(record)
}
