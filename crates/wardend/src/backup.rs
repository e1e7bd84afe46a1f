//! Backup Manager - pre-execution snapshots of mutable resources
//!
//! The contract is all-or-nothing: every requested snapshot is captured and
//! durably persisted before success is reported. On any per-resource
//! failure the manager removes its own partial work and returns
//! BackupFailure, so a command can never become eligible for execution
//! with incomplete backups.
//!
//! Backups are timestamp-and-uuid keyed; a later backup of the same
//! resource never overwrites an earlier one. Payloads carry a SHA-256
//! digest that is re-verified on restore. Nothing here deletes a backup
//! except `expire_older_than`, whose only caller is the engine's audited
//! retention sweep.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;
use warden_common::{
    BackupRef, ResourceDescriptor, ResourceKind, Result, StateSummary, WardenError,
};

/// One durable snapshot of one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub resource: ResourceDescriptor,
    /// Payload location inside the backup store
    pub payload_path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl Backup {
    pub fn to_ref(&self) -> BackupRef {
        BackupRef {
            id: self.id.clone(),
            resource: self.resource.clone(),
            created_at: self.created_at,
        }
    }
}

/// Result of restoring one backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub backup_id: String,
    pub target: String,
    /// Digest of the restored content matches the snapshot
    pub verified: bool,
}

/// Backup store rooted at one directory, with a JSON index
pub struct BackupManager {
    root: PathBuf,
    index: BTreeMap<String, Backup>,
}

impl BackupManager {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let index_path = root.join("index.json");
        let index = if index_path.exists() {
            let content = fs::read_to_string(&index_path)?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Backup index unreadable ({}), starting empty", e);
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };

        Ok(Self { root, index })
    }

    /// Observe the current state of a resource without snapshotting it.
    pub fn observe_state(resource: &ResourceDescriptor) -> StateSummary {
        match resource.kind {
            ResourceKind::File | ResourceKind::Directory => {
                let path = Path::new(&resource.target);
                if !path.exists() {
                    return StateSummary::Absent;
                }
                match digest_path(path) {
                    Ok((sha256, size_bytes)) => StateSummary::Content { sha256, size_bytes },
                    Err(_) => StateSummary::Unobserved,
                }
            }
            ResourceKind::Service => match service_is_active(&resource.target) {
                Some(active) => StateSummary::Service { active },
                None => StateSummary::Unobserved,
            },
        }
    }

    /// Snapshot every resource, all-or-nothing.
    pub fn backup_all(&mut self, resources: &[ResourceDescriptor]) -> Result<Vec<Backup>> {
        let mut created = Vec::new();

        for resource in resources {
            match self.backup_one(resource) {
                Ok(backup) => created.push(backup),
                Err(e) => {
                    // Remove our own partial work before reporting failure
                    for backup in &created {
                        if let Some(dir) = backup.payload_path.parent() {
                            let _ = fs::remove_dir_all(dir);
                        }
                    }
                    return Err(WardenError::BackupFailure {
                        resource: resource.target.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Index and payloads are durable before success is reported
        for backup in &created {
            self.index.insert(backup.id.clone(), backup.clone());
        }
        if let Err(e) = self.persist_index() {
            for backup in &created {
                self.index.remove(&backup.id);
                if let Some(dir) = backup.payload_path.parent() {
                    let _ = fs::remove_dir_all(dir);
                }
            }
            return Err(WardenError::BackupFailure {
                resource: "backup index".to_string(),
                reason: e.to_string(),
            });
        }

        info!("Captured {} backup(s)", created.len());
        Ok(created)
    }

    fn backup_one(&self, resource: &ResourceDescriptor) -> anyhow::Result<Backup> {
        let id = format!(
            "bk-{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            &Uuid::new_v4().to_string()[..8]
        );
        let backup_dir = self.root.join(&id);
        fs::create_dir_all(&backup_dir)?;

        let result = (|| -> anyhow::Result<Backup> {
            let (payload_path, sha256, size_bytes) = match resource.kind {
                ResourceKind::File => {
                    let source = Path::new(&resource.target);
                    if !source.is_file() {
                        anyhow::bail!("not a regular file: {}", resource.target);
                    }
                    let payload = backup_dir.join("payload");
                    fs::copy(source, &payload)?;
                    sync_file(&payload)?;
                    let (sha256, size) = digest_path(&payload)?;
                    (payload, sha256, size)
                }
                ResourceKind::Directory => {
                    let source = Path::new(&resource.target);
                    if !source.is_dir() {
                        anyhow::bail!("not a directory: {}", resource.target);
                    }
                    let payload = backup_dir.join("payload");
                    copy_tree(source, &payload)?;
                    let (sha256, size) = digest_path(&payload)?;
                    (payload, sha256, size)
                }
                ResourceKind::Service => {
                    let active = service_is_active(&resource.target)
                        .ok_or_else(|| anyhow::anyhow!("service state not observable"))?;
                    let payload = backup_dir.join("service-state");
                    let content = if active { "active" } else { "inactive" };
                    fs::write(&payload, content)?;
                    sync_file(&payload)?;
                    let (sha256, size) = digest_path(&payload)?;
                    (payload, sha256, size)
                }
            };

            let backup = Backup {
                id: id.clone(),
                resource: resource.clone(),
                payload_path,
                sha256,
                size_bytes,
                created_at: Utc::now(),
            };

            // Per-backup metadata sits next to the payload so the store is
            // reconstructable without the index
            let meta_path = backup_dir.join("meta.json");
            fs::write(&meta_path, serde_json::to_string_pretty(&backup)?)?;
            sync_file(&meta_path)?;

            Ok(backup)
        })();

        if result.is_err() {
            let _ = fs::remove_dir_all(&backup_dir);
        }
        result
    }

    /// Restore a backup payload over its original target and verify the
    /// digest of what landed.
    pub fn restore(&self, backup_id: &str) -> Result<RestoreResult> {
        let backup = self.get(backup_id).ok_or_else(|| {
            WardenError::BackupFailure {
                resource: backup_id.to_string(),
                reason: "backup not found".to_string(),
            }
        })?;

        match backup.resource.kind {
            ResourceKind::File => {
                let target = Path::new(&backup.resource.target);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&backup.payload_path, target)?;
                sync_file(target)?;
            }
            ResourceKind::Directory => {
                let target = Path::new(&backup.resource.target);
                if target.exists() {
                    fs::remove_dir_all(target)?;
                }
                copy_tree(&backup.payload_path, target)
                    .map_err(|e| WardenError::Internal(e.to_string()))?;
            }
            ResourceKind::Service => {
                let desired = fs::read_to_string(&backup.payload_path)?;
                set_service_active(&backup.resource.target, desired.trim() == "active")
                    .map_err(|e| WardenError::Internal(e.to_string()))?;
            }
        }

        let verified = match backup.resource.kind {
            ResourceKind::Service => true,
            _ => digest_path(Path::new(&backup.resource.target))
                .map(|(sha, _)| sha == backup.sha256)
                .unwrap_or(false),
        };

        info!(
            "Restored backup {} onto {} (verified: {})",
            backup.id, backup.resource.target, verified
        );

        Ok(RestoreResult {
            backup_id: backup.id.clone(),
            target: backup.resource.target.clone(),
            verified,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Backup> {
        self.index.get(id)
    }

    /// All backups, oldest first.
    pub fn list(&self) -> Vec<Backup> {
        let mut backups: Vec<Backup> = self.index.values().cloned().collect();
        backups.sort_by_key(|b| b.created_at);
        backups
    }

    /// Backup ids present in the store; used by the ledger reconcile pass.
    pub fn known_ids(&self) -> Vec<String> {
        self.index.keys().cloned().collect()
    }

    /// Delete backups past the retention window. The ONLY deletion path in
    /// the store; callers outside the audited retention sweep must not use
    /// it.
    pub fn expire_older_than(&mut self, retention_days: i64) -> Result<Vec<Backup>> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let expired: Vec<Backup> = self
            .index
            .values()
            .filter(|b| b.created_at < cutoff)
            .cloned()
            .collect();

        for backup in &expired {
            if let Some(dir) = backup.payload_path.parent() {
                fs::remove_dir_all(dir)?;
            }
            self.index.remove(&backup.id);
            info!("Expired backup {} ({} days retention)", backup.id, retention_days);
        }
        if !expired.is_empty() {
            self.persist_index().map_err(WardenError::Io)?;
        }

        Ok(expired)
    }

    /// Atomic, fsynced index write.
    fn persist_index(&self) -> std::io::Result<()> {
        let index_path = self.root.join("index.json");
        let tmp_path = self.root.join("index.json.tmp");
        let content = serde_json::to_string_pretty(&self.index)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut file = File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, &index_path)?;
        Ok(())
    }
}

/// SHA-256 over a file's bytes, or over a directory's sorted relative
/// paths and file contents.
pub fn digest_path(path: &Path) -> anyhow::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut total = 0u64;

    if path.is_file() {
        let bytes = fs::read(path)?;
        total = bytes.len() as u64;
        hasher.update(&bytes);
    } else if path.is_dir() {
        let mut entries: Vec<PathBuf> = WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        entries.sort();
        for entry in entries {
            let rel = entry.strip_prefix(path).unwrap_or(&entry);
            hasher.update(rel.to_string_lossy().as_bytes());
            let bytes = fs::read(&entry)?;
            total += bytes.len() as u64;
            hasher.update(&bytes);
        }
    } else {
        anyhow::bail!("path does not exist: {}", path.display());
    }

    Ok((hex::encode(hasher.finalize()), total))
}

fn copy_tree(source: &Path, dest: &Path) -> anyhow::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(source)?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            sync_file(&target)?;
        }
    }
    Ok(())
}

fn sync_file(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

fn service_is_active(unit: &str) -> Option<bool> {
    let output = ProcessCommand::new("systemctl")
        .args(["is-active", unit])
        .output()
        .ok()?;
    let state = String::from_utf8_lossy(&output.stdout);
    match state.trim() {
        "active" => Some(true),
        "inactive" | "failed" => Some(false),
        _ => None,
    }
}

fn set_service_active(unit: &str, active: bool) -> anyhow::Result<()> {
    let verb = if active { "start" } else { "stop" };
    let output = ProcessCommand::new("systemctl").args([verb, unit]).output()?;
    if !output.status.success() {
        anyhow::bail!(
            "systemctl {} {} failed: {}",
            verb,
            unit,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_file_backup_and_restore_roundtrip() {
        let store = tempdir().unwrap();
        let data = tempdir().unwrap();
        let file = write_file(data.path(), "a.txt", "original content");

        let mut manager = BackupManager::open(store.path()).unwrap();
        let backups = manager
            .backup_all(&[ResourceDescriptor::file(file.to_string_lossy())])
            .unwrap();
        assert_eq!(backups.len(), 1);

        // Mutate, then restore
        fs::write(&file, "clobbered").unwrap();
        let result = manager.restore(&backups[0].id).unwrap();
        assert!(result.verified);
        assert_eq!(fs::read_to_string(&file).unwrap(), "original content");
    }

    #[test]
    fn test_restore_recreates_deleted_file() {
        let store = tempdir().unwrap();
        let data = tempdir().unwrap();
        let file = write_file(data.path(), "doomed.txt", "keep me");

        let mut manager = BackupManager::open(store.path()).unwrap();
        let backups = manager
            .backup_all(&[ResourceDescriptor::file(file.to_string_lossy())])
            .unwrap();

        fs::remove_file(&file).unwrap();
        let result = manager.restore(&backups[0].id).unwrap();
        assert!(result.verified);
        assert_eq!(fs::read_to_string(&file).unwrap(), "keep me");
    }

    #[test]
    fn test_directory_backup_roundtrip() {
        let store = tempdir().unwrap();
        let data = tempdir().unwrap();
        let tree = data.path().join("tree");
        fs::create_dir_all(tree.join("sub")).unwrap();
        fs::write(tree.join("one.txt"), "1").unwrap();
        fs::write(tree.join("sub/two.txt"), "2").unwrap();

        let mut manager = BackupManager::open(store.path()).unwrap();
        let backups = manager
            .backup_all(&[ResourceDescriptor::directory(tree.to_string_lossy())])
            .unwrap();

        fs::remove_dir_all(&tree).unwrap();
        let result = manager.restore(&backups[0].id).unwrap();
        assert!(result.verified);
        assert_eq!(fs::read_to_string(tree.join("sub/two.txt")).unwrap(), "2");
    }

    #[test]
    fn test_partial_failure_rolls_back_all() {
        let store = tempdir().unwrap();
        let data = tempdir().unwrap();
        let good = write_file(data.path(), "good.txt", "fine");

        let mut manager = BackupManager::open(store.path()).unwrap();
        let err = manager
            .backup_all(&[
                ResourceDescriptor::file(good.to_string_lossy()),
                ResourceDescriptor::file(data.path().join("ghost.txt").to_string_lossy()),
            ])
            .unwrap_err();

        assert!(matches!(err, WardenError::BackupFailure { .. }));
        // No partial backup survives, in the index or on disk
        assert!(manager.list().is_empty());
        let leftover: Vec<_> = fs::read_dir(store.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "index.json")
            .collect();
        assert!(leftover.is_empty(), "partial backup dirs left behind");
    }

    #[test]
    fn test_same_resource_backed_up_twice_keeps_both() {
        let store = tempdir().unwrap();
        let data = tempdir().unwrap();
        let file = write_file(data.path(), "a.txt", "v1");
        let descriptor = ResourceDescriptor::file(file.to_string_lossy());

        let mut manager = BackupManager::open(store.path()).unwrap();
        let first = manager.backup_all(std::slice::from_ref(&descriptor)).unwrap();
        fs::write(&file, "v2").unwrap();
        let second = manager.backup_all(std::slice::from_ref(&descriptor)).unwrap();

        assert_ne!(first[0].id, second[0].id);
        assert_ne!(first[0].sha256, second[0].sha256);
        assert_eq!(manager.list().len(), 2);
    }

    #[test]
    fn test_index_survives_reopen() {
        let store = tempdir().unwrap();
        let data = tempdir().unwrap();
        let file = write_file(data.path(), "a.txt", "persisted");

        let id = {
            let mut manager = BackupManager::open(store.path()).unwrap();
            manager
                .backup_all(&[ResourceDescriptor::file(file.to_string_lossy())])
                .unwrap()[0]
                .id
                .clone()
        };

        let manager = BackupManager::open(store.path()).unwrap();
        assert!(manager.get(&id).is_some());
    }

    #[test]
    fn test_observe_state() {
        let data = tempdir().unwrap();
        let file = write_file(data.path(), "a.txt", "abc");

        let present = BackupManager::observe_state(&ResourceDescriptor::file(file.to_string_lossy()));
        assert!(matches!(present, StateSummary::Content { size_bytes: 3, .. }));

        let absent = BackupManager::observe_state(&ResourceDescriptor::file(
            data.path().join("nope").to_string_lossy(),
        ));
        assert_eq!(absent, StateSummary::Absent);
    }

    #[test]
    fn test_retention_sweep_only_removes_expired() {
        let store = tempdir().unwrap();
        let data = tempdir().unwrap();
        let file = write_file(data.path(), "a.txt", "data");

        let mut manager = BackupManager::open(store.path()).unwrap();
        let backups = manager
            .backup_all(&[ResourceDescriptor::file(file.to_string_lossy())])
            .unwrap();

        // Fresh backup survives a 30-day retention sweep
        let expired = manager.expire_older_than(30).unwrap();
        assert!(expired.is_empty());
        assert!(manager.get(&backups[0].id).is_some());

        // Zero-day retention expires it
        let expired = manager.expire_older_than(-1).unwrap();
        assert_eq!(expired.len(), 1);
        assert!(manager.get(&backups[0].id).is_none());
    }
}
