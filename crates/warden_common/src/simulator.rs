//! Simulator - dry-run prediction without execution
//!
//! `simulate` interprets command text through a non-executing interpreter;
//! the real command runner is never involved, so any number of calls in any
//! mode produces zero observable change to the system. Predictions are
//! conservative: an effect that cannot be determined with confidence is
//! reported as "unknown effect, treat as destructive" rather than omitted.

use crate::classifier::{looks_like_path, required_privilege, split_statements};
use crate::patterns::PatternStore;
use crate::record::{Command, Privilege, ResourceDescriptor};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Predicted effect on one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictedOperation {
    Create,
    Modify,
    Delete,
    Read,
    /// Could not be determined; treat as destructive
    Unknown,
}

impl PredictedOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictedOperation::Create => "create",
            PredictedOperation::Modify => "modify",
            PredictedOperation::Delete => "delete",
            PredictedOperation::Read => "read",
            PredictedOperation::Unknown => "unknown effect, treat as destructive",
        }
    }

    /// Whether a pre-execution snapshot of the resource is warranted
    pub fn is_mutating(&self) -> bool {
        !matches!(self, PredictedOperation::Read)
    }
}

/// One predicted resource change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedChange {
    pub resource: ResourceDescriptor,
    pub operation: PredictedOperation,
}

/// Everything the simulator predicts for one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedChangeSet {
    pub command_id: Uuid,
    pub changes: Vec<PredictedChange>,
    /// Best-effort duration estimate
    pub estimated_secs: u64,
    pub admin_required: bool,
}

impl PredictedChangeSet {
    /// Resources that would be mutated and should be snapshotted
    pub fn mutated_resources(&self) -> Vec<ResourceDescriptor> {
        self.changes
            .iter()
            .filter(|c| c.operation.is_mutating())
            .map(|c| c.resource.clone())
            .collect()
    }
}

/// Predict the change set for a classified command. Pure: never touches
/// the filesystem, services, or the ledger.
pub fn simulate(store: &PatternStore, command: &Command) -> PredictedChangeSet {
    let mut changes = Vec::new();
    let mut estimated_secs = 1u64;

    for statement in split_statements(&command.text) {
        let mut tokens: Vec<&str> = statement.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens[0] == "sudo" || tokens[0] == "doas" {
            tokens.remove(0);
            if tokens.is_empty() {
                continue;
            }
        }
        let verb = tokens[0].to_lowercase();
        let recursive = tokens
            .iter()
            .any(|t| t.starts_with('-') && (t.contains('r') || t.contains('R')));

        if verb == "systemctl" || verb == "service" {
            predict_service(&tokens, &mut changes);
            estimated_secs = estimated_secs.max(5);
            continue;
        }

        let paths: Vec<&str> = tokens[1..]
            .iter()
            .map(|t| t.trim_matches(|c| c == '"' || c == '\''))
            .filter(|t| looks_like_path(t))
            .collect();

        // Redirect targets are created or appended regardless of the verb
        predict_redirects(&statement, &mut changes);

        let operation = if store.is_destructive_verb(&verb) || store.is_irreversible_verb(&verb) {
            estimated_secs = estimated_secs.max(if recursive { 30 } else { 2 });
            PredictedOperation::Delete
        } else if matches!(verb.as_str(), "touch" | "mkdir" | "ln") {
            PredictedOperation::Create
        } else if matches!(verb.as_str(), "cp" | "mv" | "tee" | "chmod" | "chown" | "sed") {
            estimated_secs = estimated_secs.max(2);
            PredictedOperation::Modify
        } else if store.is_read_only_verb(&verb) {
            PredictedOperation::Read
        } else {
            PredictedOperation::Unknown
        };

        for path in paths {
            let resource = if recursive || path.ends_with('/') {
                ResourceDescriptor::directory(path.trim_end_matches('/'))
            } else {
                ResourceDescriptor::file(path)
            };
            push_unique(&mut changes, PredictedChange { resource, operation });
        }

        // `mv a b`: the source disappears, the destination appears
        if verb == "mv" {
            let paths: Vec<&str> = tokens[1..]
                .iter()
                .filter(|t| looks_like_path(t))
                .copied()
                .collect();
            if paths.len() >= 2 {
                replace_operation(&mut changes, paths[0], PredictedOperation::Delete);
                replace_operation(&mut changes, paths[1], PredictedOperation::Create);
            }
        }
    }

    PredictedChangeSet {
        command_id: command.id,
        changes,
        estimated_secs,
        admin_required: required_privilege(store, &command.text) == Privilege::Admin
            || command.privilege == Privilege::Admin,
    }
}

fn predict_service(tokens: &[&str], changes: &mut Vec<PredictedChange>) {
    let mutating = tokens.iter().any(|t| {
        matches!(
            *t,
            "stop" | "start" | "restart" | "reload" | "enable" | "disable" | "mask" | "unmask"
        )
    });
    let operation = if mutating {
        PredictedOperation::Modify
    } else {
        PredictedOperation::Read
    };
    for token in &tokens[1..] {
        if token.starts_with('-') {
            continue;
        }
        if token.ends_with(".service") || token.ends_with(".timer") || token.ends_with(".socket") {
            push_unique(
                changes,
                PredictedChange {
                    resource: ResourceDescriptor::service(*token),
                    operation,
                },
            );
        } else if !matches!(
            *token,
            "stop" | "start" | "restart" | "reload" | "enable" | "disable" | "mask" | "unmask"
                | "status" | "show" | "list-units" | "is-active" | "is-enabled" | "systemctl"
                | "service"
        ) {
            push_unique(
                changes,
                PredictedChange {
                    resource: ResourceDescriptor::service(format!("{}.service", token)),
                    operation,
                },
            );
        }
    }
}

fn predict_redirects(statement: &str, changes: &mut Vec<PredictedChange>) {
    let mut tokens = statement.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        let (redirect, inline_target) = match token {
            ">" | ">>" => (true, None),
            t if t.starts_with(">>") => (true, Some(&t[2..])),
            t if t.starts_with('>') && t.len() > 1 => (true, Some(&t[1..])),
            _ => (false, None),
        };
        if !redirect {
            continue;
        }
        let target = inline_target.or_else(|| tokens.peek().copied());
        if let Some(target) = target {
            if looks_like_path(target) {
                push_unique(
                    changes,
                    PredictedChange {
                        resource: ResourceDescriptor::file(target),
                        operation: PredictedOperation::Modify,
                    },
                );
            }
        }
    }
}

fn push_unique(changes: &mut Vec<PredictedChange>, change: PredictedChange) {
    if !changes.iter().any(|c| c.resource == change.resource) {
        changes.push(change);
    }
}

fn replace_operation(changes: &mut [PredictedChange], target: &str, operation: PredictedOperation) {
    for change in changes.iter_mut() {
        if change.resource.target == target {
            change.operation = operation;
        }
    }
}

/// Render the prediction for the confirmation surface.
pub fn format_dry_run_report(set: &PredictedChangeSet) -> String {
    let mut lines = vec![
        "DRY RUN - no changes will be made".to_string(),
        String::new(),
        "Predicted changes:".to_string(),
    ];

    if set.changes.is_empty() {
        lines.push("  (no resource references found)".to_string());
    }
    for change in &set.changes {
        lines.push(format!(
            "  {} {} ({:?})",
            change.operation.as_str(),
            change.resource.target,
            change.resource.kind
        ));
    }

    lines.push(String::new());
    lines.push(format!("Estimated time: ~{}s", set.estimated_secs));
    lines.push(format!(
        "Requires admin: {}",
        if set.admin_required { "yes" } else { "no" }
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{build_command, classify};

    fn command(text: &str) -> (PatternStore, Command) {
        let store = PatternStore::new();
        let report = classify(&store, text);
        let cmd = build_command(&store, text, None, &report);
        (store, cmd)
    }

    #[test]
    fn test_delete_prediction() {
        let (store, cmd) = command("rm /home/user/notes.txt");
        let set = simulate(&store, &cmd);
        assert_eq!(set.changes.len(), 1);
        assert_eq!(set.changes[0].operation, PredictedOperation::Delete);
        assert_eq!(set.changes[0].resource.target, "/home/user/notes.txt");
    }

    #[test]
    fn test_recursive_delete_is_directory() {
        let (store, cmd) = command("rm -r /home/user/build");
        let set = simulate(&store, &cmd);
        assert_eq!(set.changes[0].resource.kind, crate::record::ResourceKind::Directory);
    }

    #[test]
    fn test_read_only_prediction() {
        let (store, cmd) = command("cat /home/user/notes.txt");
        let set = simulate(&store, &cmd);
        assert_eq!(set.changes[0].operation, PredictedOperation::Read);
        assert!(set.mutated_resources().is_empty());
    }

    #[test]
    fn test_unknown_verb_is_conservative() {
        let (store, cmd) = command("mystery-tool /home/user/data.bin");
        let set = simulate(&store, &cmd);
        assert_eq!(set.changes[0].operation, PredictedOperation::Unknown);
        // Unknown counts as mutating: it must be snapshotted
        assert_eq!(set.mutated_resources().len(), 1);
    }

    #[test]
    fn test_service_stop_prediction() {
        let (store, cmd) = command("systemctl stop nginx");
        let set = simulate(&store, &cmd);
        assert_eq!(set.changes.len(), 1);
        assert_eq!(set.changes[0].resource.target, "nginx.service");
        assert_eq!(set.changes[0].operation, PredictedOperation::Modify);
        assert!(set.admin_required);
    }

    #[test]
    fn test_redirect_target_predicted() {
        let (store, cmd) = command("echo hello > /home/user/out.txt");
        let set = simulate(&store, &cmd);
        assert!(set
            .changes
            .iter()
            .any(|c| c.resource.target == "/home/user/out.txt"
                && c.operation == PredictedOperation::Modify));
    }

    #[test]
    fn test_simulate_is_idempotent() {
        let (store, cmd) = command("rm -r /home/user/build");
        let a = simulate(&store, &cmd);
        let b = simulate(&store, &cmd);
        let c = simulate(&store, &cmd);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_report_formatting() {
        let (store, cmd) = command("rm /home/user/notes.txt");
        let set = simulate(&store, &cmd);
        let report = format_dry_run_report(&set);
        assert!(report.contains("DRY RUN"));
        assert!(report.contains("/home/user/notes.txt"));
    }
}
