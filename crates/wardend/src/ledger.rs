//! Change Ledger - append-only audit log of command outcomes
//!
//! One JSON line per ChangeRecord, fsynced on append, surviving process
//! restart. Records are never edited and never deleted: a correction or a
//! rollback is a new record. The ledger deliberately exposes no delete
//! operation; audit history is permanent.
//!
//! Queries read the file lazily and yield records ordered by timestamp
//! ascending (the append order). `reconcile` cross-checks the backup store
//! so a crash between "executed" and "logged" is detectable on restart.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;
use warden_common::{ChangeKind, ChangeRecord, ExecutionOutcome, Result};

/// Query filter; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Exact resource target (path or unit name)
    pub resource: Option<String>,
    pub outcome: Option<ExecutionOutcome>,
    pub kind: Option<ChangeKind>,
}

impl LedgerFilter {
    fn matches(&self, record: &ChangeRecord) -> bool {
        if let Some(since) = self.since {
            if record.executed_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.executed_at > until {
                return false;
            }
        }
        if let Some(outcome) = self.outcome {
            if record.outcome != outcome {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            let touches = record
                .before
                .iter()
                .any(|s| &s.resource.target == resource)
                || record.backups.iter().any(|b| &b.resource.target == resource);
            if !touches {
                return false;
            }
        }
        true
    }
}

/// Lazy cursor over matching records, timestamp ascending. Dropping and
/// re-querying restarts the scan from the beginning.
pub struct LedgerCursor {
    lines: std::io::Lines<BufReader<File>>,
    filter: LedgerFilter,
}

impl Iterator for LedgerCursor {
    type Item = ChangeRecord;

    fn next(&mut self) -> Option<ChangeRecord> {
        for line in self.lines.by_ref() {
            let line = match line {
                Ok(l) => l,
                Err(_) => return None,
            };
            match serde_json::from_str::<ChangeRecord>(&line) {
                Ok(record) if self.filter.matches(&record) => return Some(record),
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping unreadable ledger line: {}", e);
                    continue;
                }
            }
        }
        None
    }
}

/// The append-only ledger store
pub struct ChangeLedger {
    path: PathBuf,
}

impl ChangeLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Append one record durably. The write is visible on disk before this
    /// returns.
    pub fn record(&self, record: &ChangeRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        info!(
            "Ledger: recorded {:?} {} ({})",
            record.kind,
            record.id,
            record.outcome.as_str()
        );
        Ok(())
    }

    /// Lazy query, timestamp ascending.
    pub fn query(&self, filter: LedgerFilter) -> Result<LedgerCursor> {
        if !self.path.exists() {
            // An empty ledger yields an empty cursor
            File::create(&self.path)?;
        }
        let file = File::open(&self.path)?;
        Ok(LedgerCursor {
            lines: BufReader::new(file).lines(),
            filter,
        })
    }

    pub fn find(&self, id: Uuid) -> Result<Option<ChangeRecord>> {
        Ok(self
            .query(LedgerFilter::default())?
            .find(|record| record.id == id))
    }

    /// Most recent records, still ascending within the returned window.
    pub fn recent(&self, limit: usize) -> Result<Vec<ChangeRecord>> {
        let all: Vec<ChangeRecord> = self.query(LedgerFilter::default())?.collect();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    /// Cross-check the backup store: a backup referenced by no record was
    /// captured for a command whose outcome never got logged (crash in the
    /// executed-to-logged window). Orphans are reported, never removed.
    pub fn reconcile(&self, known_backup_ids: &[String]) -> Result<Vec<String>> {
        let referenced: HashSet<String> = self
            .query(LedgerFilter::default())?
            .flat_map(|record| record.backups.into_iter().map(|b| b.id))
            .collect();

        let orphaned: Vec<String> = known_backup_ids
            .iter()
            .filter(|id| !referenced.contains(*id))
            .cloned()
            .collect();

        if !orphaned.is_empty() {
            warn!(
                "Ledger reconcile: {} backup(s) referenced by no change record: {:?}",
                orphaned.len(),
                orphaned
            );
        }
        Ok(orphaned)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;
    use warden_common::{
        BackupRef, Reversibility, RiskTier, ResourceDescriptor, ResourceState, StateSummary,
    };

    fn make_record(text: &str, outcome: ExecutionOutcome, target: &str) -> ChangeRecord {
        let now = Utc::now();
        ChangeRecord {
            id: Uuid::new_v4(),
            kind: ChangeKind::Execution,
            command_id: Uuid::new_v4(),
            command_text: text.to_string(),
            tier: RiskTier::Caution,
            reversibility: Reversibility::Full,
            backups: vec![],
            before: vec![ResourceState {
                resource: ResourceDescriptor::file(target),
                summary: StateSummary::Absent,
            }],
            after: vec![],
            outcome,
            exit_code: Some(0),
            failure_detail: None,
            rollback_artifact_id: None,
            restore_point: None,
            rolled_back_record: None,
            executed_at: now,
            recorded_at: now,
        }
    }

    #[test]
    fn test_record_and_query_roundtrip() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::open(dir.path().join("ledger/changes.jsonl")).unwrap();

        let record = make_record("echo one", ExecutionOutcome::Success, "/tmp/a");
        ledger.record(&record).unwrap();

        let found: Vec<ChangeRecord> = ledger.query(LedgerFilter::default()).unwrap().collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, record.id);
    }

    #[test]
    fn test_query_is_timestamp_ascending() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::open(dir.path().join("changes.jsonl")).unwrap();

        for i in 0..5 {
            ledger
                .record(&make_record(&format!("cmd {}", i), ExecutionOutcome::Success, "/tmp/a"))
                .unwrap();
        }

        let records: Vec<ChangeRecord> = ledger.query(LedgerFilter::default()).unwrap().collect();
        assert_eq!(records.len(), 5);
        for pair in records.windows(2) {
            assert!(pair[0].executed_at <= pair[1].executed_at);
        }
    }

    #[test]
    fn test_filter_by_outcome() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::open(dir.path().join("changes.jsonl")).unwrap();

        ledger
            .record(&make_record("good", ExecutionOutcome::Success, "/tmp/a"))
            .unwrap();
        ledger
            .record(&make_record("bad", ExecutionOutcome::Failure, "/tmp/b"))
            .unwrap();

        let failures: Vec<ChangeRecord> = ledger
            .query(LedgerFilter {
                outcome: Some(ExecutionOutcome::Failure),
                ..Default::default()
            })
            .unwrap()
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].command_text, "bad");
    }

    #[test]
    fn test_filter_by_resource() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::open(dir.path().join("changes.jsonl")).unwrap();

        ledger
            .record(&make_record("touch a", ExecutionOutcome::Success, "/tmp/a"))
            .unwrap();
        ledger
            .record(&make_record("touch b", ExecutionOutcome::Success, "/tmp/b"))
            .unwrap();

        let matches: Vec<ChangeRecord> = ledger
            .query(LedgerFilter {
                resource: Some("/tmp/b".to_string()),
                ..Default::default()
            })
            .unwrap()
            .collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].command_text, "touch b");
    }

    #[test]
    fn test_filter_by_time_range() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::open(dir.path().join("changes.jsonl")).unwrap();

        ledger
            .record(&make_record("now", ExecutionOutcome::Success, "/tmp/a"))
            .unwrap();

        let future_only: Vec<ChangeRecord> = ledger
            .query(LedgerFilter {
                since: Some(Utc::now() + Duration::hours(1)),
                ..Default::default()
            })
            .unwrap()
            .collect();
        assert!(future_only.is_empty());

        let past_window: Vec<ChangeRecord> = ledger
            .query(LedgerFilter {
                since: Some(Utc::now() - Duration::hours(1)),
                until: Some(Utc::now() + Duration::hours(1)),
                ..Default::default()
            })
            .unwrap()
            .collect();
        assert_eq!(past_window.len(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.jsonl");

        {
            let ledger = ChangeLedger::open(&path).unwrap();
            ledger
                .record(&make_record("persist me", ExecutionOutcome::Success, "/tmp/a"))
                .unwrap();
        }

        let ledger = ChangeLedger::open(&path).unwrap();
        let records: Vec<ChangeRecord> = ledger.query(LedgerFilter::default()).unwrap().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command_text, "persist me");
    }

    #[test]
    fn test_reconcile_reports_orphans() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::open(dir.path().join("changes.jsonl")).unwrap();

        let mut record = make_record("rm a", ExecutionOutcome::Success, "/tmp/a");
        record.backups.push(BackupRef {
            id: "bk-referenced".to_string(),
            resource: ResourceDescriptor::file("/tmp/a"),
            created_at: Utc::now(),
        });
        ledger.record(&record).unwrap();

        let orphans = ledger
            .reconcile(&["bk-referenced".to_string(), "bk-orphan".to_string()])
            .unwrap();
        assert_eq!(orphans, vec!["bk-orphan".to_string()]);
    }

    #[test]
    fn test_corrupt_line_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.jsonl");
        let ledger = ChangeLedger::open(&path).unwrap();

        ledger
            .record(&make_record("ok", ExecutionOutcome::Success, "/tmp/a"))
            .unwrap();
        // Simulate torn write
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{not json").unwrap();
        }
        ledger
            .record(&make_record("after", ExecutionOutcome::Success, "/tmp/b"))
            .unwrap();

        let records: Vec<ChangeRecord> = ledger.query(LedgerFilter::default()).unwrap().collect();
        assert_eq!(records.len(), 2);
    }
}
