//! Core data model: commands, risk reports, change records
//!
//! Everything here is a value that gets persisted or surfaced to the
//! confirmation UI. `Command` is immutable once the classifier creates it;
//! `ChangeRecord` is append-only — a correction is a new record, never an
//! edit.

use crate::risk::{Reversibility, RiskTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Privilege level a command needs on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    User,
    Admin,
}

/// An immutable, classified command proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    /// Raw text as received from the intent resolver
    pub text: String,
    /// Free-text intent the resolver attached, if any
    pub intent: Option<String>,
    pub privilege: Privilege,
    pub tier: RiskTier,
    pub reversibility: Reversibility,
    pub proposed_at: DateTime<Utc>,
}

/// Classifier output for one command evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub tier: RiskTier,
    pub reversibility: Reversibility,
    /// Names of every rule that matched, in table order
    pub matched_rules: Vec<String>,
    pub warnings: Vec<String>,
    /// Optional read-only command to run instead or first
    pub safer_alternative: Option<String>,
    /// Deny-list match: execution is permanently refused
    pub blocked: bool,
}

/// What kind of resource a descriptor points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    File,
    Directory,
    Service,
}

/// One resource a command touches; the unit of backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    /// Path for files/directories, unit name for services
    pub target: String,
}

impl ResourceDescriptor {
    pub fn file(path: impl Into<String>) -> Self {
        Self { kind: ResourceKind::File, target: path.into() }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self { kind: ResourceKind::Directory, target: path.into() }
    }

    pub fn service(unit: impl Into<String>) -> Self {
        Self { kind: ResourceKind::Service, target: unit.into() }
    }
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failure,
    /// Some effects applied, some not
    Partial,
    /// Timed out while executing; real state not observable
    Unknown,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failure => "failure",
            ExecutionOutcome::Partial => "partial",
            ExecutionOutcome::Unknown => "unknown",
        }
    }
}

/// Compact pre- or post-execution state of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum StateSummary {
    /// The resource did not exist
    Absent,
    /// File or directory content digest
    Content { sha256: String, size_bytes: u64 },
    /// Service activation state
    Service { active: bool },
    /// State could not be observed
    Unobserved,
}

/// One resource with its observed state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource: ResourceDescriptor,
    pub summary: StateSummary,
}

/// Reference to a backup owned by the Backup Manager. The payload is never
/// copied into the record; only the handle, the resource it covers, and
/// when it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRef {
    pub id: String,
    pub resource: ResourceDescriptor,
    pub created_at: DateTime<Utc>,
}

/// What kind of event a ledger entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A forward command execution
    Execution,
    /// Application of a rollback artifact
    Rollback,
    /// A backup restore requested from the backups view
    Restore,
    /// The audited retention-expiry sweep
    RetentionSweep,
}

/// The permanent audit entry for one command's outcome.
///
/// Append-only: fields are never edited after the record is written. A
/// rollback execution produces its own record referencing this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub kind: ChangeKind,
    /// The classified command this record belongs to
    pub command_id: Uuid,
    /// Sanitized command text (secrets redacted before persisting)
    pub command_text: String,
    pub tier: RiskTier,
    pub reversibility: Reversibility,
    /// Backups captured before execution; non-empty for HIGH/CRITICAL
    pub backups: Vec<BackupRef>,
    /// Pre-execution state of every touched resource, in forward order
    pub before: Vec<ResourceState>,
    /// Post-execution state of the same resources
    pub after: Vec<ResourceState>,
    pub outcome: ExecutionOutcome,
    /// Exit code if the process finished
    pub exit_code: Option<i32>,
    /// First lines of stderr when the command failed
    pub failure_detail: Option<String>,
    /// Identifier of the generated rollback artifact (keyed by this
    /// record's id in the artifact store)
    pub rollback_artifact_id: Option<String>,
    /// OS restore point captured before a CRITICAL execution
    pub restore_point: Option<RestorePointRef>,
    /// For Rollback records: the execution record being undone
    pub rolled_back_record: Option<Uuid>,
    pub executed_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// The backup-before-execution invariant for destructive tiers:
    /// a HIGH/CRITICAL execution record must reference at least one backup,
    /// and every referenced backup must have been created strictly before
    /// the execution timestamp.
    pub fn backups_precede_execution(&self) -> bool {
        if !self.tier.requires_backup() || self.kind != ChangeKind::Execution {
            return true;
        }
        !self.backups.is_empty() && self.backups.iter().all(|b| b.created_at < self.executed_at)
    }

    /// The backup that covers a given resource, if one was captured.
    pub fn backup_for(&self, resource: &ResourceDescriptor) -> Option<&BackupRef> {
        self.backups.iter().find(|b| &b.resource == resource)
    }
}

/// Opaque handle to an OS-level checkpoint. The OS owns the checkpoint;
/// Warden holds only the reference and when it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePointRef {
    pub id: String,
    pub created_at: DateTime<Utc>,
}
