//! Rollback artifact store and executor
//!
//! Artifacts are persisted per change record and applied step by step.
//! Application is best-effort restoration with conflict surfacing: before a
//! resource is overwritten its current digest is compared against the
//! recorded post-execution state. Content that matches neither the recorded
//! state nor the backup payload means something else modified the resource
//! in between; the step fails with a conflict instead of clobbering it.
//! A step that already matches the backup is skipped, so re-applying a
//! fully-applied artifact is a no-op.
//!
//! A step failure stops the run. The engine escalates it to a
//! manual-intervention record in the ledger; nothing here retries.

use crate::backup::{digest_path, BackupManager};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;
use tracing::{info, warn};
use uuid::Uuid;
use warden_common::{
    ChangeRecord, Result, RollbackArtifact, RollbackStep, StateSummary, WardenError,
};

/// Result of applying one artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackReport {
    pub change_record_id: Uuid,
    pub steps_applied: usize,
    /// Steps whose target already matched the backup payload
    pub steps_skipped: usize,
    /// Documented manual-recovery steps that cannot run automatically
    pub manual_steps: usize,
    pub fully_applied: bool,
}

/// Durable per-record artifact storage
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Persist an artifact, keyed by its change record id.
    pub fn save(&self, artifact: &RollbackArtifact) -> Result<()> {
        let path = self.path_for(artifact.change_record_id);
        let mut file = File::create(&path)?;
        file.write_all(serde_json::to_string_pretty(artifact)?.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    pub fn load(&self, change_record_id: Uuid) -> Result<Option<RollbackArtifact>> {
        let path = self.path_for(change_record_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn path_for(&self, change_record_id: Uuid) -> PathBuf {
        self.root.join(format!("{}.json", change_record_id))
    }
}

/// Apply an artifact's steps in order, stopping at the first failure.
pub fn apply(
    artifact: &RollbackArtifact,
    record: &ChangeRecord,
    backups: &BackupManager,
) -> Result<RollbackReport> {
    let mut applied = 0usize;
    let mut skipped = 0usize;
    let mut manual = 0usize;

    for (index, step) in artifact.steps.iter().enumerate() {
        match step {
            RollbackStep::RestoreFromBackup { backup_id, target } => {
                match restore_step(backup_id, target, record, backups) {
                    Ok(StepOutcome::Applied) => applied += 1,
                    Ok(StepOutcome::AlreadyDone) => skipped += 1,
                    Err(e) => {
                        warn!("Rollback step {} failed: {}", index, e);
                        return Err(wrap_step_error(index, e));
                    }
                }
            }
            RollbackStep::RemovePath { target } => {
                match remove_step(target, record) {
                    Ok(StepOutcome::Applied) => applied += 1,
                    Ok(StepOutcome::AlreadyDone) => skipped += 1,
                    Err(e) => {
                        warn!("Rollback step {} failed: {}", index, e);
                        return Err(wrap_step_error(index, e));
                    }
                }
            }
            RollbackStep::SetServiceState { unit, active } => {
                let verb = if *active { "start" } else { "stop" };
                let output = ProcessCommand::new("systemctl")
                    .args([verb, unit])
                    .output()
                    .map_err(|e| WardenError::RollbackFailure {
                        step: index,
                        reason: format!("systemctl {} {}: {}", verb, unit, e),
                    })?;
                if !output.status.success() {
                    return Err(WardenError::RollbackFailure {
                        step: index,
                        reason: format!(
                            "systemctl {} {} exited {}",
                            verb,
                            unit,
                            output.status.code().unwrap_or(-1)
                        ),
                    });
                }
                applied += 1;
            }
            RollbackStep::ManualRecovery { instruction } => {
                // Surfaced, never executed
                info!("Rollback manual step: {}", instruction);
                manual += 1;
            }
        }
    }

    Ok(RollbackReport {
        change_record_id: artifact.change_record_id,
        steps_applied: applied,
        steps_skipped: skipped,
        manual_steps: manual,
        fully_applied: manual == 0,
    })
}

enum StepOutcome {
    Applied,
    AlreadyDone,
}

fn restore_step(
    backup_id: &str,
    target: &str,
    record: &ChangeRecord,
    backups: &BackupManager,
) -> Result<StepOutcome> {
    let backup = backups
        .get(backup_id)
        .ok_or_else(|| WardenError::BackupFailure {
            resource: target.to_string(),
            reason: format!("backup {} not found", backup_id),
        })?;

    let current = digest_path(Path::new(target)).ok().map(|(sha, _)| sha);

    if current.as_deref() == Some(backup.sha256.as_str()) {
        // Already restored; applying twice stays a no-op
        return Ok(StepOutcome::AlreadyDone);
    }

    // The target must look like what execution left behind; anything else
    // was modified independently and is not ours to overwrite.
    let expected_after = recorded_after_digest(record, target);
    let matches_after = match (&current, &expected_after) {
        (None, None) => true,                        // deleted then, still absent
        (Some(c), Some(a)) => c == a,
        (None, Some(_)) => false,
        (Some(_), None) => false,
    };
    if !matches_after {
        return Err(WardenError::RollbackConflict {
            resource: target.to_string(),
        });
    }

    backups.restore(backup_id)?;
    Ok(StepOutcome::Applied)
}

fn remove_step(target: &str, record: &ChangeRecord) -> Result<StepOutcome> {
    let path = Path::new(target);
    if !path.exists() {
        return Ok(StepOutcome::AlreadyDone);
    }

    // Only remove what the command itself created, unchanged
    let expected_after = recorded_after_digest(record, target);
    let current = digest_path(path).ok().map(|(sha, _)| sha);
    if let (Some(current), Some(expected)) = (&current, &expected_after) {
        if current != expected {
            return Err(WardenError::RollbackConflict {
                resource: target.to_string(),
            });
        }
    }

    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(StepOutcome::Applied)
}

/// Digest the record observed for this target after execution, if any.
fn recorded_after_digest(record: &ChangeRecord, target: &str) -> Option<String> {
    record
        .after
        .iter()
        .find(|s| s.resource.target == target)
        .and_then(|s| match &s.summary {
            StateSummary::Content { sha256, .. } => Some(sha256.clone()),
            _ => None,
        })
}

fn wrap_step_error(index: usize, e: WardenError) -> WardenError {
    match e {
        conflict @ WardenError::RollbackConflict { .. } => conflict,
        other => WardenError::RollbackFailure {
            step: index,
            reason: other.to_string(),
        },
    }
}
