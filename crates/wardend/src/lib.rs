//! Warden Daemon - command safety and reversibility engine
//!
//! Classifies proposed commands, snapshots what they are about to mutate,
//! executes them under supervision and keeps an append-only change ledger
//! with generated rollback plans.

pub mod backup;
pub mod engine;
pub mod executor;
pub mod ledger;
pub mod restore_point;
pub mod rollback_exec;

pub use backup::{Backup, BackupManager, RestoreResult};
pub use engine::{ApprovalOptions, CommandState, Engine, ExecutionResult, Proposal};
pub use ledger::{ChangeLedger, LedgerFilter};
pub use restore_point::RestorePointManager;
pub use rollback_exec::{ArtifactStore, RollbackReport};
