//! Supervised command runner
//!
//! Runs an approved command and captures real exit code, stdout, stderr and
//! duration without reinterpretation. A command that outlives the timeout
//! is reported as Unknown: the process may still be applying changes, so
//! neither success nor failure is assumed and the command is never killed
//! into a half-applied state silently.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command as ProcessCommand;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};
use warden_common::ExecutionOutcome;

/// Captured result of one supervised execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub outcome: ExecutionOutcome,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub stderr_truncated: bool,
    pub duration_ms: u64,
}

/// Execute a command line via `sh -c` under supervision.
pub async fn run_supervised(command_text: &str, timeout_secs: u64, output_cap: usize) -> RunResult {
    let start = Instant::now();
    info!("Executing under supervision: {}", command_text);

    let child = ProcessCommand::new("sh")
        .arg("-c")
        .arg(command_text)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    match timeout(Duration::from_secs(timeout_secs), child).await {
        Ok(Ok(output)) => {
            let (stdout, stdout_truncated) = truncate_output(&output.stdout, output_cap);
            let (stderr, stderr_truncated) = truncate_output(&output.stderr, output_cap);
            let exit_code = output.status.code();
            let outcome = if output.status.success() {
                ExecutionOutcome::Success
            } else {
                ExecutionOutcome::Failure
            };

            RunResult {
                outcome,
                exit_code,
                stdout,
                stdout_truncated,
                stderr,
                stderr_truncated,
                duration_ms: start.elapsed().as_millis() as u64,
            }
        }
        Ok(Err(e)) => RunResult {
            outcome: ExecutionOutcome::Failure,
            exit_code: None,
            stdout: String::new(),
            stdout_truncated: false,
            stderr: format!("OS error: {}", e),
            stderr_truncated: false,
            duration_ms: start.elapsed().as_millis() as u64,
        },
        Err(_) => {
            // Real state of the host is not observable from here.
            warn!(
                "Command exceeded {}s timeout; outcome recorded as unknown/partial",
                timeout_secs
            );
            RunResult {
                outcome: ExecutionOutcome::Unknown,
                exit_code: None,
                stdout: String::new(),
                stdout_truncated: false,
                stderr: format!("timed out after {}s; state unknown/partial", timeout_secs),
                stderr_truncated: false,
                duration_ms: start.elapsed().as_millis() as u64,
            }
        }
    }
}

/// Truncate captured output to the configured cap.
fn truncate_output(bytes: &[u8], cap: usize) -> (String, bool) {
    let truncated = bytes.len() > cap;
    let slice = if truncated { &bytes[..cap] } else { bytes };
    (String::from_utf8_lossy(slice).to_string(), truncated)
}
