//! Rollback Generator - inverse plans from completed change records
//!
//! `generate` derives an ordered list of inverse steps from a record's
//! before-state: restore file content from backup, put a service back in
//! its previous activation state, remove a path the command created. For
//! compound commands the inverse order is the reverse of the forward
//! execution order. A record with reversibility NONE still produces an
//! artifact; its steps document the manual recovery required, so callers
//! can never mistake a non-empty artifact for automatic recoverability.

use crate::record::{ChangeRecord, ResourceKind, StateSummary};
use crate::risk::Reversibility;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inverse operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "step")]
pub enum RollbackStep {
    /// Copy the backup payload back over the target
    RestoreFromBackup { backup_id: String, target: String },
    /// Remove a path the command created
    RemovePath { target: String },
    /// Return a service to its pre-command activation state
    SetServiceState { unit: String, active: bool },
    /// No automatic inverse exists; a human has to act
    ManualRecovery { instruction: String },
}

impl RollbackStep {
    pub fn describe(&self) -> String {
        match self {
            RollbackStep::RestoreFromBackup { backup_id, target } => {
                format!("restore {} from backup {}", target, backup_id)
            }
            RollbackStep::RemovePath { target } => format!("remove created path {}", target),
            RollbackStep::SetServiceState { unit, active } => format!(
                "{} service {}",
                if *active { "start" } else { "stop" },
                unit
            ),
            RollbackStep::ManualRecovery { instruction } => {
                format!("manual recovery required: {}", instruction)
            }
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, RollbackStep::ManualRecovery { .. })
    }
}

/// Ordered inverse-operation sequence for one ChangeRecord. Generated once
/// per record, after the record exists; may be applied zero or many times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackArtifact {
    /// Keyed by the change record it inverts
    pub change_record_id: Uuid,
    pub steps: Vec<RollbackStep>,
    /// True when no step can run automatically
    pub manual_only: bool,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}

/// Build the inverse plan for a completed change record.
pub fn generate(record: &ChangeRecord) -> RollbackArtifact {
    let mut steps = Vec::new();
    let mut restore_count = 0usize;
    let mut service_count = 0usize;
    let mut removal_count = 0usize;
    let mut manual_count = 0usize;

    if record.reversibility == Reversibility::None {
        if record.before.is_empty() {
            steps.push(RollbackStep::ManualRecovery {
                instruction: format!(
                    "no automatic inverse exists for '{}'; inspect the system and recover by hand",
                    record.command_text
                ),
            });
            manual_count += 1;
        }
        for state in record.before.iter().rev() {
            steps.push(RollbackStep::ManualRecovery {
                instruction: format!(
                    "restore {} '{}' by hand; no usable snapshot exists",
                    kind_word(state.resource.kind),
                    state.resource.target
                ),
            });
            manual_count += 1;
        }
    } else {
        // Last effect undone first
        for state in record.before.iter().rev() {
            match (&state.summary, state.resource.kind) {
                (StateSummary::Service { active }, _) => {
                    steps.push(RollbackStep::SetServiceState {
                        unit: state.resource.target.clone(),
                        active: *active,
                    });
                    service_count += 1;
                }
                (StateSummary::Absent, _) => {
                    // Created by the command; the inverse is removal
                    steps.push(RollbackStep::RemovePath {
                        target: state.resource.target.clone(),
                    });
                    removal_count += 1;
                }
                (StateSummary::Content { .. }, _) => {
                    if let Some(backup) = record.backup_for(&state.resource) {
                        steps.push(RollbackStep::RestoreFromBackup {
                            backup_id: backup.id.clone(),
                            target: state.resource.target.clone(),
                        });
                        restore_count += 1;
                    } else {
                        steps.push(RollbackStep::ManualRecovery {
                            instruction: format!(
                                "no backup covers '{}'; restore it by hand",
                                state.resource.target
                            ),
                        });
                        manual_count += 1;
                    }
                }
                (StateSummary::Unobserved, _) => {
                    steps.push(RollbackStep::ManualRecovery {
                        instruction: format!(
                            "pre-execution state of '{}' was not observed; verify and restore by hand",
                            state.resource.target
                        ),
                    });
                    manual_count += 1;
                }
            }
        }

        if steps.is_empty() {
            // A mutating record with no observed resources still yields a
            // documented artifact rather than silence.
            steps.push(RollbackStep::ManualRecovery {
                instruction: format!(
                    "no resource-level inverse recorded for '{}'; review the change record",
                    record.command_text
                ),
            });
            manual_count += 1;
        }
    }

    let manual_only = steps.iter().all(RollbackStep::is_manual);
    let summary = build_summary(restore_count, service_count, removal_count, manual_count);

    RollbackArtifact {
        change_record_id: record.id,
        steps,
        manual_only,
        summary,
        generated_at: Utc::now(),
    }
}

fn kind_word(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::File => "file",
        ResourceKind::Directory => "directory",
        ResourceKind::Service => "service",
    }
}

fn build_summary(restores: usize, services: usize, removals: usize, manual: usize) -> String {
    let mut parts = Vec::new();
    if restores > 0 {
        parts.push(format!(
            "restore {} backup{}",
            restores,
            if restores == 1 { "" } else { "s" }
        ));
    }
    if removals > 0 {
        parts.push(format!(
            "remove {} created path{}",
            removals,
            if removals == 1 { "" } else { "s" }
        ));
    }
    if services > 0 {
        parts.push(format!(
            "revert {} service change{}",
            services,
            if services == 1 { "" } else { "s" }
        ));
    }
    if manual > 0 {
        parts.push(format!(
            "{} step{} need manual recovery",
            manual,
            if manual == 1 { "" } else { "s" }
        ));
    }
    if parts.is_empty() {
        "Nothing to undo".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{
        BackupRef, ChangeKind, ChangeRecord, ExecutionOutcome, ResourceDescriptor, ResourceState,
    };
    use crate::risk::RiskTier;

    fn base_record(reversibility: Reversibility) -> ChangeRecord {
        let now = Utc::now();
        ChangeRecord {
            id: Uuid::new_v4(),
            kind: ChangeKind::Execution,
            command_id: Uuid::new_v4(),
            command_text: "rm /home/user/a.txt".to_string(),
            tier: RiskTier::High,
            reversibility,
            backups: vec![],
            before: vec![],
            after: vec![],
            outcome: ExecutionOutcome::Success,
            exit_code: Some(0),
            failure_detail: None,
            rollback_artifact_id: None,
            restore_point: None,
            rolled_back_record: None,
            executed_at: now,
            recorded_at: now,
        }
    }

    fn content_state(path: &str) -> ResourceState {
        ResourceState {
            resource: ResourceDescriptor::file(path),
            summary: StateSummary::Content {
                sha256: "ab".repeat(32),
                size_bytes: 10,
            },
        }
    }

    #[test]
    fn test_restore_step_from_backup() {
        let mut record = base_record(Reversibility::Full);
        record.before.push(content_state("/home/user/a.txt"));
        record.backups.push(BackupRef {
            id: "bk-1".to_string(),
            resource: ResourceDescriptor::file("/home/user/a.txt"),
            created_at: record.executed_at,
        });

        let artifact = generate(&record);
        assert_eq!(artifact.steps.len(), 1);
        assert!(matches!(
            &artifact.steps[0],
            RollbackStep::RestoreFromBackup { backup_id, target }
                if backup_id == "bk-1" && target == "/home/user/a.txt"
        ));
        assert!(!artifact.manual_only);
        assert!(artifact.summary.contains("restore 1 backup"));
    }

    #[test]
    fn test_inverse_order_is_reversed() {
        let mut record = base_record(Reversibility::Full);
        for path in ["/home/user/a.txt", "/home/user/b.txt", "/home/user/c.txt"] {
            record.before.push(content_state(path));
            record.backups.push(BackupRef {
                id: format!("bk-{}", path),
                resource: ResourceDescriptor::file(path),
                created_at: record.executed_at,
            });
        }

        let artifact = generate(&record);
        let targets: Vec<&str> = artifact
            .steps
            .iter()
            .filter_map(|s| match s {
                RollbackStep::RestoreFromBackup { target, .. } => Some(target.as_str()),
                _ => None,
            })
            .collect();
        // Last effect undone first
        assert_eq!(
            targets,
            vec!["/home/user/c.txt", "/home/user/b.txt", "/home/user/a.txt"]
        );
    }

    #[test]
    fn test_created_path_inverse_is_removal() {
        let mut record = base_record(Reversibility::Full);
        record.before.push(ResourceState {
            resource: ResourceDescriptor::file("/home/user/new.txt"),
            summary: StateSummary::Absent,
        });

        let artifact = generate(&record);
        assert!(matches!(
            &artifact.steps[0],
            RollbackStep::RemovePath { target } if target == "/home/user/new.txt"
        ));
    }

    #[test]
    fn test_service_state_inverse() {
        let mut record = base_record(Reversibility::Full);
        record.before.push(ResourceState {
            resource: ResourceDescriptor::service("nginx.service"),
            summary: StateSummary::Service { active: true },
        });

        let artifact = generate(&record);
        assert!(matches!(
            &artifact.steps[0],
            RollbackStep::SetServiceState { unit, active: true } if unit == "nginx.service"
        ));
        assert!(artifact.summary.contains("service change"));
    }

    #[test]
    fn test_irreversible_record_still_yields_artifact() {
        let mut record = base_record(Reversibility::None);
        record.before.push(content_state("/dev/sda"));

        let artifact = generate(&record);
        assert!(!artifact.steps.is_empty());
        assert!(artifact.manual_only);
        assert!(artifact.steps.iter().all(RollbackStep::is_manual));
    }

    #[test]
    fn test_missing_backup_degrades_to_manual() {
        let mut record = base_record(Reversibility::Partial);
        record.before.push(content_state("/home/user/a.txt"));
        // No backup covers the resource

        let artifact = generate(&record);
        assert!(matches!(
            &artifact.steps[0],
            RollbackStep::ManualRecovery { .. }
        ));
        assert!(artifact.manual_only);
    }

    #[test]
    fn test_empty_record_documents_itself() {
        let record = base_record(Reversibility::Partial);
        let artifact = generate(&record);
        assert_eq!(artifact.steps.len(), 1);
        assert!(artifact.manual_only);
    }
}
