//! Restore Point Manager - pass-through to OS-level checkpoints
//!
//! The engine never owns a restore point; the OS does. This module creates
//! and lists checkpoints through a configured backend and hands back opaque
//! references. When the backend is unavailable the caller gets
//! RestorePointUnavailable and a CRITICAL command stays held, never
//! silently downgraded.

use chrono::Utc;
use std::process::Stdio;
use tokio::process::Command as ProcessCommand;
use tracing::info;
use warden_common::config::RestorePointConfig;
use warden_common::{Result, RestorePointRef, WardenError};

pub struct RestorePointManager {
    config: RestorePointConfig,
}

impl RestorePointManager {
    pub fn new(config: RestorePointConfig) -> Self {
        Self { config }
    }

    /// Whether the configured backend can take checkpoints right now.
    pub async fn is_available(&self) -> bool {
        match self.config.method.as_str() {
            "timeshift" => binary_exists("timeshift").await,
            "snapper" => binary_exists("snapper").await,
            "command" => self.config.command.is_some(),
            _ => false,
        }
    }

    /// Create a checkpoint and return its opaque reference.
    pub async fn create(&self, description: &str) -> Result<RestorePointRef> {
        if !self.is_available().await {
            return Err(WardenError::RestorePointUnavailable {
                reason: format!("backend '{}' is not available", self.config.method),
            });
        }

        let output = match self.config.method.as_str() {
            "timeshift" => {
                ProcessCommand::new("timeshift")
                    .args(["--create", "--comments", description, "--tags", "O"])
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .await
            }
            "snapper" => {
                ProcessCommand::new("snapper")
                    .args(["create", "--description", description, "--print-number"])
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .await
            }
            "command" => {
                let command = self.config.command.as_deref().unwrap_or_default();
                ProcessCommand::new("sh")
                    .arg("-c")
                    .arg(command)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .await
            }
            other => {
                return Err(WardenError::RestorePointUnavailable {
                    reason: format!("unknown backend '{}'", other),
                })
            }
        };

        let output = output.map_err(|e| WardenError::RestorePointUnavailable {
            reason: format!("backend failed to start: {}", e),
        })?;

        if !output.status.success() {
            return Err(WardenError::RestorePointUnavailable {
                reason: format!(
                    "backend exited with {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        // Backend-printed identifier when there is one, timestamp otherwise
        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| format!("rp-{}", Utc::now().format("%Y%m%d-%H%M%S")));

        info!("Restore point created via {}: {}", self.config.method, id);

        Ok(RestorePointRef {
            id,
            created_at: Utc::now(),
        })
    }

    /// List checkpoint identifiers known to the backend.
    pub async fn list(&self) -> Result<Vec<String>> {
        if !self.is_available().await {
            return Err(WardenError::RestorePointUnavailable {
                reason: format!("backend '{}' is not available", self.config.method),
            });
        }

        let output = match self.config.method.as_str() {
            "timeshift" => {
                ProcessCommand::new("timeshift")
                    .args(["--list", "--scripted"])
                    .output()
                    .await
            }
            "snapper" => ProcessCommand::new("snapper").args(["list"]).output().await,
            "command" => {
                // A bare command backend tracks no history of its own
                return Ok(Vec::new());
            }
            other => {
                return Err(WardenError::RestorePointUnavailable {
                    reason: format!("unknown backend '{}'", other),
                })
            }
        };

        let output = output.map_err(|e| WardenError::RestorePointUnavailable {
            reason: format!("backend failed to start: {}", e),
        })?;

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

async fn binary_exists(name: &str) -> bool {
    ProcessCommand::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
