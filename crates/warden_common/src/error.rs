//! Error types for Warden.

use crate::risk::RiskTier;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    /// Deny-list match. A deliberate refusal, not a failure.
    #[error("command blocked by rule '{rule}' (tier {tier:?}): {reason}")]
    ValidationBlocked {
        rule: String,
        tier: RiskTier,
        reason: String,
    },

    /// Snapshot could not be completed. Execution never starts.
    #[error("backup of '{resource}' failed: {reason}")]
    BackupFailure { resource: String, reason: String },

    /// The command ran and failed or partially applied.
    #[error("execution failed ({detail})")]
    ExecutionFailure { detail: String },

    /// Inverse steps could not be fully applied. Manual intervention required.
    #[error("rollback step {step} failed: {reason}")]
    RollbackFailure { step: usize, reason: String },

    /// A resource changed between backup and rollback time.
    #[error("rollback conflict on '{resource}': current content matches neither the recorded state nor the backup")]
    RollbackConflict { resource: String },

    /// External checkpoint mechanism is down. Execution deferred, not skipped.
    #[error("restore point mechanism unavailable: {reason}")]
    RestorePointUnavailable { reason: String },

    /// No proposal with this id is pending.
    #[error("unknown command id: {0}")]
    UnknownCommand(String),

    /// The command is not in a state that permits the requested transition.
    #[error("command {id} is in state {state}, cannot {action}")]
    InvalidState {
        id: String,
        state: String,
        action: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Whether any backup exists that could recover from this failure.
    /// Carried on user-visible failure surfaces alongside the risk tier.
    pub fn is_refusal(&self) -> bool {
        matches!(self, WardenError::ValidationBlocked { .. })
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
