//! Warden Common - shared types for the command safety engine
//!
//! Risk classification, dry-run simulation and rollback planning are pure
//! and live here; everything that touches the host (backups, execution,
//! the ledger) lives in the daemon crate.

pub mod classifier;
pub mod config;
pub mod error;
pub mod patterns;
pub mod record;
pub mod redact;
pub mod risk;
pub mod rollback;
pub mod simulator;

pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use patterns::{PatternOverlay, PatternStore};
pub use record::{
    BackupRef, ChangeKind, ChangeRecord, Command, ExecutionOutcome, Privilege, ResourceDescriptor,
    ResourceKind, ResourceState, RestorePointRef, RiskReport, StateSummary,
};
pub use risk::{Reversibility, RiskTier};
pub use rollback::{RollbackArtifact, RollbackStep};
pub use simulator::{PredictedChange, PredictedChangeSet, PredictedOperation};
