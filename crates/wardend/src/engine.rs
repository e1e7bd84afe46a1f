//! Execution Coordinator - the engine facade
//!
//! Sequences validation, backup, execution and logging for one command at a
//! time. The state machine is explicit and approval arrives asynchronously:
//! a proposal sits in AwaitingApproval until the confirmation surface calls
//! `approve` or `cancel`. Exactly one command occupies the Approved..Logged
//! window; the window is an owned `tokio::sync::Mutex` held by this
//! instance, so multiple engines in one test process stay independent.
//!
//! A ChangeRecord is written unconditionally once execution finishes,
//! success or failure. Failures are never retried automatically.

use crate::backup::{Backup, BackupManager, RestoreResult};
use crate::executor::{run_supervised, RunResult};
use crate::ledger::{ChangeLedger, LedgerFilter};
use crate::restore_point::RestorePointManager;
use crate::rollback_exec::{self, ArtifactStore, RollbackReport};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use warden_common::{
    classifier, redact, rollback, simulator, ChangeKind, ChangeRecord, Command, ExecutionOutcome,
    PatternStore, PredictedChangeSet, ResourceState, Result, RiskReport, RiskTier, StateSummary,
    WardenConfig, WardenError,
};

/// Lifecycle of one proposed command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Proposed,
    Classified,
    /// Deny-list match; terminal, approval can never succeed
    Blocked,
    AwaitingApproval,
    Approved,
    BackingUp,
    Executing,
    Logged,
    BackupFailed,
    ExecutionFailed,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Proposed => "proposed",
            CommandState::Classified => "classified",
            CommandState::Blocked => "blocked",
            CommandState::AwaitingApproval => "awaiting_approval",
            CommandState::Approved => "approved",
            CommandState::BackingUp => "backing_up",
            CommandState::Executing => "executing",
            CommandState::Logged => "logged",
            CommandState::BackupFailed => "backup_failed",
            CommandState::ExecutionFailed => "execution_failed",
        }
    }
}

/// What `propose` hands to the confirmation surface
#[derive(Debug, Clone)]
pub struct Proposal {
    pub command_id: Uuid,
    pub risk_report: RiskReport,
    pub prediction: Option<PredictedChangeSet>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalOptions {
    /// Divert to the simulator instead of executing
    pub dry_run: bool,
}

/// What `approve` returns for display
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub command_id: Uuid,
    pub state: CommandState,
    pub risk_report: RiskReport,
    pub outcome: Option<ExecutionOutcome>,
    pub record: Option<ChangeRecord>,
    pub prediction: Option<PredictedChangeSet>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

struct PendingCommand {
    command: Command,
    report: RiskReport,
    prediction: Option<PredictedChangeSet>,
    state: CommandState,
    restore_point: Option<warden_common::RestorePointRef>,
}

/// The command safety engine
pub struct Engine {
    config: WardenConfig,
    patterns: PatternStore,
    backups: Mutex<BackupManager>,
    ledger: ChangeLedger,
    artifacts: ArtifactStore,
    restore_points: RestorePointManager,
    pending: Mutex<HashMap<Uuid, PendingCommand>>,
    /// Single-writer execution window: held from BackingUp through Logged
    exec_window: Mutex<()>,
}

impl Engine {
    pub fn new(config: WardenConfig) -> Result<Self> {
        let patterns = PatternStore::with_overlay(&config.patterns);
        let backups = BackupManager::open(config.storage.backup_dir())?;
        let ledger = ChangeLedger::open(config.storage.ledger_path())?;
        let artifacts = ArtifactStore::open(config.storage.artifact_dir())?;
        let restore_points = RestorePointManager::new(config.restore_point.clone());

        Ok(Self {
            config,
            patterns,
            backups: Mutex::new(backups),
            ledger,
            artifacts,
            restore_points,
            pending: Mutex::new(HashMap::new()),
            exec_window: Mutex::new(()),
        })
    }

    /// Classify a command and queue it for approval. Classification and
    /// simulation are read-only; any number of proposals may be in flight.
    pub async fn propose(&self, text: &str, intent: Option<String>) -> Result<Proposal> {
        let report = classifier::classify(&self.patterns, text);
        let command = classifier::build_command(&self.patterns, text, intent, &report);
        let command_id = command.id;

        let (state, prediction) = if report.blocked {
            info!(
                "Proposal {} blocked by {:?}",
                command_id, report.matched_rules
            );
            (CommandState::Blocked, None)
        } else {
            let prediction = simulator::simulate(&self.patterns, &command);
            (CommandState::AwaitingApproval, Some(prediction))
        };

        self.pending.lock().await.insert(
            command_id,
            PendingCommand {
                command,
                report: report.clone(),
                prediction: prediction.clone(),
                state,
                restore_point: None,
            },
        );

        Ok(Proposal {
            command_id,
            risk_report: report,
            prediction,
        })
    }

    /// Discard a command that has not been approved yet. No side effect has
    /// happened, so there is nothing to record.
    pub async fn cancel(&self, command_id: Uuid) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let entry = pending
            .get(&command_id)
            .ok_or_else(|| WardenError::UnknownCommand(command_id.to_string()))?;

        if entry.state != CommandState::AwaitingApproval {
            return Err(WardenError::InvalidState {
                id: command_id.to_string(),
                state: entry.state.as_str().to_string(),
                action: "cancel".to_string(),
            });
        }
        pending.remove(&command_id);
        info!("Proposal {} cancelled before approval", command_id);
        Ok(())
    }

    /// Explicit human approval. Dry-run approvals divert to the simulator
    /// and leave the command awaiting; real approvals run the full
    /// backup-execute-log sequence under the single-writer window.
    pub async fn approve(
        &self,
        command_id: Uuid,
        options: ApprovalOptions,
    ) -> Result<ExecutionResult> {
        // Check state and take what the window needs
        let (command, report, prediction) = {
            let mut pending = self.pending.lock().await;
            let entry = pending
                .get_mut(&command_id)
                .ok_or_else(|| WardenError::UnknownCommand(command_id.to_string()))?;

            match entry.state {
                CommandState::Blocked => {
                    // Deny-list verdicts are absolute; dry-run and repeat
                    // attempts change nothing
                    let rule = entry
                        .report
                        .matched_rules
                        .iter()
                        .find(|r| r.starts_with("deny.") || r.starts_with("unclassifiable."))
                        .cloned()
                        .unwrap_or_else(|| "deny-list".to_string());
                    return Err(WardenError::ValidationBlocked {
                        rule,
                        tier: entry.report.tier,
                        reason: "command is permanently blocked and cannot be approved".to_string(),
                    });
                }
                CommandState::AwaitingApproval | CommandState::Approved => {}
                other => {
                    return Err(WardenError::InvalidState {
                        id: command_id.to_string(),
                        state: other.as_str().to_string(),
                        action: "approve".to_string(),
                    });
                }
            }

            if options.dry_run {
                // Divert to the simulator; no state progression, no ledger
                let prediction = simulator::simulate(&self.patterns, &entry.command);
                return Ok(ExecutionResult {
                    command_id,
                    state: entry.state,
                    risk_report: entry.report.clone(),
                    outcome: None,
                    record: None,
                    prediction: Some(prediction),
                    stdout: None,
                    stderr: None,
                });
            }

            entry.state = CommandState::Approved;
            (
                entry.command.clone(),
                entry.report.clone(),
                entry.prediction.clone(),
            )
        };

        // CRITICAL commands need an OS checkpoint before entering Executing.
        // If the mechanism is down the command is held in Approved and
        // surfaced as blocked-pending-restore-point, never downgraded.
        let mut restore_point = {
            self.pending
                .lock()
                .await
                .get(&command_id)
                .and_then(|e| e.restore_point.clone())
        };
        if command.tier.requires_restore_point() && restore_point.is_none() {
            match self
                .restore_points
                .create(&format!("warden: before {}", redact::sanitize_for_ledger(&command.text)))
                .await
            {
                Ok(point) => {
                    if let Some(entry) = self.pending.lock().await.get_mut(&command_id) {
                        entry.restore_point = Some(point.clone());
                    }
                    restore_point = Some(point);
                }
                Err(e) => {
                    warn!(
                        "Command {} held in Approved: restore point unavailable",
                        command_id
                    );
                    return Err(e);
                }
            }
        }

        // Single-writer window: one command in BackingUp..Logged at a time
        let _window = self.exec_window.lock().await;

        let resources = prediction
            .as_ref()
            .map(|p| p.mutated_resources())
            .unwrap_or_default();

        // Observe pre-execution state of every touched resource
        let before: Vec<ResourceState> = resources
            .iter()
            .map(|r| ResourceState {
                resource: r.clone(),
                summary: BackupManager::observe_state(r),
            })
            .collect();

        // BackingUp: SAFE commands skip this phase entirely
        let backups: Vec<Backup> = if command.tier.requires_backup_phase() {
            self.set_state(command_id, CommandState::BackingUp).await;

            let to_snapshot: Vec<_> = before
                .iter()
                .filter(|s| !matches!(s.summary, StateSummary::Absent))
                .map(|s| s.resource.clone())
                .collect();

            let captured = match self.backups.lock().await.backup_all(&to_snapshot) {
                Ok(captured) => captured,
                Err(e) => {
                    self.set_state(command_id, CommandState::BackupFailed).await;
                    return Err(e);
                }
            };

            if command.tier.requires_backup() && captured.is_empty() {
                // Fail closed: a destructive command with nothing we could
                // snapshot must not run unprotected
                self.set_state(command_id, CommandState::BackupFailed).await;
                return Err(WardenError::BackupFailure {
                    resource: command.text.clone(),
                    reason: "no snapshotable resource identified for a destructive command"
                        .to_string(),
                });
            }
            captured
        } else {
            Vec::new()
        };

        // Executing
        self.set_state(command_id, CommandState::Executing).await;
        let executed_at = Utc::now();
        let run = run_supervised(
            &command.text,
            self.config.execution.timeout_secs,
            self.config.execution.output_cap_bytes,
        )
        .await;

        // Observe post-execution state
        let after: Vec<ResourceState> = resources
            .iter()
            .map(|r| ResourceState {
                resource: r.clone(),
                summary: BackupManager::observe_state(r),
            })
            .collect();

        // Logged: the record is written no matter how execution went
        let record_id = Uuid::new_v4();
        let record = ChangeRecord {
            id: record_id,
            kind: ChangeKind::Execution,
            command_id,
            command_text: redact::sanitize_for_ledger(&command.text),
            tier: command.tier,
            reversibility: command.reversibility,
            backups: backups.iter().map(|b| b.to_ref()).collect(),
            before,
            after,
            outcome: run.outcome,
            exit_code: run.exit_code,
            failure_detail: failure_detail(&run),
            rollback_artifact_id: Some(record_id.to_string()),
            restore_point,
            rolled_back_record: None,
            executed_at,
            recorded_at: Utc::now(),
        };
        self.ledger.record(&record)?;

        // The artifact is generated only after its record exists
        let artifact = rollback::generate(&record);
        self.artifacts.save(&artifact)?;

        let final_state = match run.outcome {
            ExecutionOutcome::Success | ExecutionOutcome::Failure => CommandState::Logged,
            _ => CommandState::ExecutionFailed,
        };
        self.pending.lock().await.remove(&command_id);

        info!(
            "Command {} finished: {} ({})",
            command_id,
            final_state.as_str(),
            run.outcome.as_str()
        );

        Ok(ExecutionResult {
            command_id,
            state: final_state,
            risk_report: report,
            outcome: Some(run.outcome),
            record: Some(record),
            prediction,
            stdout: Some(run.stdout),
            stderr: Some(run.stderr),
        })
    }

    /// Apply the rollback artifact generated for a change record. Runs
    /// under the execution window and writes its own ChangeRecord. A step
    /// failure or conflict is escalated as manual-intervention, never
    /// retried.
    pub async fn apply_rollback(&self, change_record_id: Uuid) -> Result<RollbackReport> {
        let record = self
            .ledger
            .find(change_record_id)?
            .ok_or_else(|| WardenError::UnknownCommand(change_record_id.to_string()))?;

        let artifact = match self.artifacts.load(change_record_id)? {
            Some(artifact) => artifact,
            None => {
                // Regenerate from the persisted record
                let artifact = rollback::generate(&record);
                self.artifacts.save(&artifact)?;
                artifact
            }
        };

        let _window = self.exec_window.lock().await;
        let applied_at = Utc::now();
        let result = {
            let backups = self.backups.lock().await;
            rollback_exec::apply(&artifact, &record, &backups)
        };

        let (outcome, detail) = match &result {
            Ok(report) if report.fully_applied => (ExecutionOutcome::Success, None),
            Ok(_) => (
                ExecutionOutcome::Partial,
                Some("manual recovery steps remain".to_string()),
            ),
            Err(e) => (
                ExecutionOutcome::Failure,
                Some(format!("manual intervention required: {}", e)),
            ),
        };

        let rollback_record = ChangeRecord {
            id: Uuid::new_v4(),
            kind: ChangeKind::Rollback,
            command_id: record.command_id,
            command_text: format!("rollback of {}", record.id),
            tier: record.tier,
            reversibility: record.reversibility,
            backups: record.backups.clone(),
            before: record.after.clone(),
            after: record.before.clone(),
            outcome,
            exit_code: None,
            failure_detail: detail,
            rollback_artifact_id: Some(record.id.to_string()),
            restore_point: None,
            rolled_back_record: Some(record.id),
            executed_at: applied_at,
            recorded_at: Utc::now(),
        };
        self.ledger.record(&rollback_record)?;

        result
    }

    /// Restore one backup on user request, audited like any other change.
    pub async fn restore(&self, backup_id: &str) -> Result<RestoreResult> {
        let _window = self.exec_window.lock().await;
        let restored_at = Utc::now();
        let (result, backup_ref) = {
            let backups = self.backups.lock().await;
            let backup = backups
                .get(backup_id)
                .ok_or_else(|| WardenError::UnknownCommand(backup_id.to_string()))?
                .clone();
            (backups.restore(backup_id), backup.to_ref())
        };
        let result = result?;

        let record = ChangeRecord {
            id: Uuid::new_v4(),
            kind: ChangeKind::Restore,
            command_id: Uuid::nil(),
            command_text: format!("restore backup {}", backup_id),
            tier: RiskTier::Caution,
            reversibility: warden_common::Reversibility::Full,
            backups: vec![backup_ref.clone()],
            before: vec![],
            after: vec![ResourceState {
                resource: backup_ref.resource,
                summary: StateSummary::Unobserved,
            }],
            outcome: if result.verified {
                ExecutionOutcome::Success
            } else {
                ExecutionOutcome::Partial
            },
            exit_code: None,
            failure_detail: if result.verified {
                None
            } else {
                Some("restored content digest does not match the snapshot".to_string())
            },
            rollback_artifact_id: None,
            restore_point: None,
            rolled_back_record: None,
            executed_at: restored_at,
            recorded_at: Utc::now(),
        };
        self.ledger.record(&record)?;

        Ok(result)
    }

    /// The audited retention-expiry sweep: the only path that ever deletes
    /// backups, and it leaves its own ledger entry.
    pub async fn run_retention_sweep(&self) -> Result<usize> {
        let _window = self.exec_window.lock().await;
        let swept_at = Utc::now();
        let expired = self
            .backups
            .lock()
            .await
            .expire_older_than(self.config.backups.retention_days)?;

        if expired.is_empty() {
            return Ok(0);
        }

        let record = ChangeRecord {
            id: Uuid::new_v4(),
            kind: ChangeKind::RetentionSweep,
            command_id: Uuid::nil(),
            command_text: format!(
                "retention sweep expired {} backup(s) past {} days",
                expired.len(),
                self.config.backups.retention_days
            ),
            tier: RiskTier::Caution,
            reversibility: warden_common::Reversibility::None,
            backups: expired.iter().map(|b| b.to_ref()).collect(),
            before: vec![],
            after: vec![],
            outcome: ExecutionOutcome::Success,
            exit_code: None,
            failure_detail: None,
            rollback_artifact_id: None,
            restore_point: None,
            rolled_back_record: None,
            executed_at: swept_at,
            recorded_at: Utc::now(),
        };
        self.ledger.record(&record)?;

        Ok(expired.len())
    }

    pub async fn list_backups(&self) -> Vec<Backup> {
        self.backups.lock().await.list()
    }

    pub fn list_changes(&self, filter: LedgerFilter) -> Result<Vec<ChangeRecord>> {
        Ok(self.ledger.query(filter)?.collect())
    }

    pub async fn create_restore_point(&self, description: &str) -> Result<warden_common::RestorePointRef> {
        self.restore_points.create(description).await
    }

    pub async fn list_restore_points(&self) -> Result<Vec<String>> {
        self.restore_points.list().await
    }

    /// Detect the crash window between "executed" and "logged": backups on
    /// disk that no change record references.
    pub async fn reconcile(&self) -> Result<Vec<String>> {
        let known = self.backups.lock().await.known_ids();
        self.ledger.reconcile(&known)
    }

    /// Current state of a pending proposal, if it is still queued.
    pub async fn state_of(&self, command_id: Uuid) -> Option<CommandState> {
        self.pending.lock().await.get(&command_id).map(|e| e.state)
    }

    async fn set_state(&self, command_id: Uuid, state: CommandState) {
        if let Some(entry) = self.pending.lock().await.get_mut(&command_id) {
            entry.state = state;
        }
    }
}

fn failure_detail(run: &RunResult) -> Option<String> {
    match run.outcome {
        ExecutionOutcome::Success => None,
        _ => {
            let head: String = run.stderr.lines().take(5).collect::<Vec<_>>().join("\n");
            Some(if head.is_empty() {
                format!("exit code {:?}", run.exit_code)
            } else {
                head
            })
        }
    }
}
