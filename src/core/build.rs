//! Build step execution.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::adapters::{CommandGroup, CommandRunner};
use crate::domain::ArtifactRef;

use super::error::BuildError;
use super::pipeline::BuildStep;

/// Run every build phase in order and produce the artifact reference.
///
/// The first failing command aborts the remaining phases.
#[instrument(skip_all, fields(%run_id, phases = build.phases.len()))]
pub async fn run_build(
    build: &BuildStep,
    runner: &dyn CommandRunner,
    run_id: Uuid,
    env: &BTreeMap<String, String>,
) -> Result<ArtifactRef, BuildError> {
    for group in &build.phases {
        let commands = CommandGroup::new(group.phase.as_str(), group.commands.clone())
            .with_env(env.clone());

        runner
            .execute(&commands)
            .await
            .map_err(|failure| BuildError {
                phase: group.phase,
                command: failure.command,
                exit_code: failure.exit_code,
            })?;

        info!(phase = %group.phase, "Build phase completed");
    }

    Ok(ArtifactRef::new(artifact_id(run_id, build), &build.output))
}

/// Content-addressed artifact id: first 16 hex chars of SHA-256 over the run
/// id, the output location and every command.
pub fn artifact_id(run_id: Uuid, build: &BuildStep) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(build.output.as_bytes());
    for group in &build.phases {
        hasher.update(group.phase.as_str().as_bytes());
        for command in &group.commands {
            hasher.update([0u8]);
            hasher.update(command.as_bytes());
        }
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
