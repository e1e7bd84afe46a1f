//! Risk Classifier - assigns a risk tier and reversibility class
//!
//! `classify` is a pure function over the pattern store. It never fails:
//! text it cannot make sense of defaults to CRITICAL with reversibility
//! NONE. Evaluation is a maximum-tier fold over the rule tables; a
//! deny-list match is absolute and cannot be overridden by an allow-list
//! match on the same text.

use crate::patterns::{PatternStore, RuleKind};
use crate::record::{Command, Privilege, RiskReport};
use crate::risk::{Reversibility, RiskTier};
use chrono::Utc;
use uuid::Uuid;

/// Classify arbitrary command text, possibly multi-statement.
pub fn classify(store: &PatternStore, text: &str) -> RiskReport {
    let normalized = text.trim();

    if normalized.is_empty() {
        return RiskReport {
            tier: RiskTier::Critical,
            reversibility: Reversibility::None,
            matched_rules: vec!["unclassifiable.empty".to_string()],
            warnings: vec!["Empty command text".to_string()],
            safer_alternative: None,
            blocked: true,
        };
    }

    let mut matched_rules = Vec::new();
    let mut warnings = Vec::new();
    let mut tier = None::<RiskTier>;
    let mut reversibility = Reversibility::Full;
    let mut blocked = false;

    // Unparseable structure fails closed before any table lookup.
    if let Some(lint) = syntax_lint(normalized) {
        warnings.push(lint);
        return RiskReport {
            tier: RiskTier::Critical,
            reversibility: Reversibility::None,
            matched_rules: vec!["unclassifiable.syntax".to_string()],
            warnings,
            safer_alternative: None,
            blocked: false,
        };
    }

    // (b) Deny-list signatures over the whole text. Absolute.
    for rule in store.rules() {
        if let RuleKind::DenySignature(re) = &rule.kind {
            if re.is_match(normalized) {
                matched_rules.push(rule.name.clone());
                tier = Some(RiskTier::Critical);
                reversibility = Reversibility::None;
                blocked = true;
            }
        }
    }

    let statements = split_statements(normalized);
    let mut all_read_only = !statements.is_empty();
    let mut destructive_seen = false;
    let mut protected_seen = false;

    for statement in &statements {
        let mut tokens = statement.split_whitespace();
        let mut verb = match tokens.next() {
            Some(v) => v.to_lowercase(),
            None => continue,
        };
        // `sudo rm ...` classifies as `rm ...` at admin privilege
        if verb == "sudo" || verb == "doas" {
            verb = match tokens.next() {
                Some(v) => v.to_lowercase(),
                None => continue,
            };
        }

        // (c) protected-path overlap on any path-like token
        for token in statement.split_whitespace() {
            let candidate = token.trim_matches(|c| c == '"' || c == '\'');
            if !looks_like_path(candidate) {
                continue;
            }
            for rule in store.rules() {
                if let RuleKind::ProtectedPath(prefix) = &rule.kind {
                    if candidate.starts_with(prefix.as_str())
                        && !matched_rules.contains(&rule.name)
                    {
                        matched_rules.push(rule.name.clone());
                        protected_seen = true;
                        tier = Some(tier.map_or(RiskTier::High, |t| t.max(RiskTier::High)));
                        reversibility = reversibility.min(Reversibility::Partial);
                    }
                }
            }
        }

        if store.is_destructive_verb(&verb) {
            let name = format!("destructive.{}", verb);
            if !matched_rules.contains(&name) {
                matched_rules.push(name);
            }
            destructive_seen = true;
            tier = Some(tier.map_or(RiskTier::High, |t| t.max(RiskTier::High)));
            all_read_only = false;
        } else if store.is_irreversible_verb(&verb) {
            // Not deny-listed in this form, but nothing to restore from
            reversibility = Reversibility::None;
            tier = Some(tier.map_or(RiskTier::High, |t| t.max(RiskTier::High)));
            all_read_only = false;
        } else if store.is_read_only_verb(&verb) {
            let name = format!("readonly.{}", verb);
            if !matched_rules.contains(&name) {
                matched_rules.push(name);
            }
        } else {
            all_read_only = false;
        }

        // A redirect writes no matter what the verb is
        if statement.contains('>') {
            all_read_only = false;
        }
    }

    // (d)/(e): allow-list only wins when nothing stronger matched
    let tier = match tier {
        Some(t) => t,
        None if all_read_only => RiskTier::Safe,
        None => RiskTier::Caution,
    };
    if tier == RiskTier::Safe {
        reversibility = Reversibility::Full;
    }

    warnings.extend(behavior_warnings(normalized, destructive_seen, protected_seen));

    let safer_alternative = suggest_alternative(&statements, destructive_seen);

    RiskReport {
        tier,
        reversibility,
        matched_rules,
        warnings,
        safer_alternative,
        blocked,
    }
}

/// Build the immutable Command value from a classification.
pub fn build_command(
    store: &PatternStore,
    text: &str,
    intent: Option<String>,
    report: &RiskReport,
) -> Command {
    Command {
        id: Uuid::new_v4(),
        text: text.trim().to_string(),
        intent,
        privilege: required_privilege(store, text),
        tier: report.tier,
        reversibility: report.reversibility,
        proposed_at: Utc::now(),
    }
}

/// Admin privilege is needed for admin verbs, sudo/doas prefixes, and any
/// write that overlaps a protected path.
pub fn required_privilege(store: &PatternStore, text: &str) -> Privilege {
    for statement in split_statements(text) {
        let mut tokens = statement.split_whitespace();
        let verb = match tokens.next() {
            Some(v) => v.to_lowercase(),
            None => continue,
        };
        if verb == "sudo" || verb == "doas" || store.is_admin_verb(&verb) {
            return Privilege::Admin;
        }
        if !store.is_read_only_verb(&verb) {
            for token in statement.split_whitespace() {
                if looks_like_path(token) && store.is_protected_path(token) {
                    return Privilege::Admin;
                }
            }
        }
    }
    Privilege::User
}

/// Split multi-statement text on shell separators. Pipe segments count as
/// separate statements so each verb is checked on its own.
pub fn split_statements(text: &str) -> Vec<String> {
    text.split(|c| c == ';' || c == '\n')
        .flat_map(|part| part.split("&&"))
        .flat_map(|part| part.split("||"))
        .flat_map(|part| part.split('|'))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn looks_like_path(token: &str) -> bool {
    token.starts_with('/') || token.starts_with("~/") || token.starts_with("./")
}

/// Structural problems that make the text unparseable.
fn syntax_lint(text: &str) -> Option<String> {
    if text.matches('"').count() % 2 != 0 {
        return Some("Unbalanced double quotes".to_string());
    }
    if text.matches('\'').count() % 2 != 0 {
        return Some("Unbalanced single quotes".to_string());
    }
    if text.matches('(').count() != text.matches(')').count() {
        return Some("Unbalanced parentheses".to_string());
    }
    if text.matches('{').count() != text.matches('}').count() {
        return Some("Unbalanced braces".to_string());
    }
    None
}

/// Warnings surfaced to the human alongside the tier.
fn behavior_warnings(text: &str, destructive: bool, protected: bool) -> Vec<String> {
    let mut warnings = Vec::new();
    let lower = text.to_lowercase();

    if destructive && text.contains('*') {
        warnings.push("Wildcard with a delete operation can match more than intended".to_string());
    }
    if destructive && (lower.contains(" -f") || lower.contains("--force")) {
        warnings.push("--force suppresses per-file confirmation".to_string());
    }
    if destructive && (lower.contains(" -r") || lower.contains("--recursive")) {
        warnings.push("Recursive deletion can affect many files".to_string());
    }
    if protected {
        warnings.push("Touches a protected system path".to_string());
    }

    warnings
}

/// Suggest a read-only alternative for destructive commands: inspect the
/// target before deleting it.
fn suggest_alternative(statements: &[String], destructive: bool) -> Option<String> {
    if !destructive {
        return None;
    }
    for statement in statements {
        let mut tokens = statement.split_whitespace();
        let verb = tokens.next()?.to_lowercase();
        if verb != "rm" && verb != "rmdir" && verb != "unlink" {
            continue;
        }
        if let Some(target) = tokens.rev().find(|t| !t.starts_with('-')) {
            return Some(format!("ls -la {}", target));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PatternStore {
        PatternStore::new()
    }

    #[test]
    fn test_read_only_is_safe() {
        let report = classify(&store(), "ls -la /home/user/documents");
        assert_eq!(report.tier, RiskTier::Safe);
        assert_eq!(report.reversibility, Reversibility::Full);
        assert!(!report.blocked);
    }

    #[test]
    fn test_pipeline_of_read_only_is_safe() {
        let report = classify(&store(), "cat /var/log/syslog | grep error | head -20");
        assert_eq!(report.tier, RiskTier::Safe);
    }

    #[test]
    fn test_redirect_is_not_safe() {
        let report = classify(&store(), "echo hello > /home/user/out.txt");
        assert_eq!(report.tier, RiskTier::Caution);
    }

    #[test]
    fn test_unknown_verb_is_caution() {
        let report = classify(&store(), "some-custom-tool --flag value");
        assert_eq!(report.tier, RiskTier::Caution);
        assert!(!report.blocked);
    }

    #[test]
    fn test_delete_named_file_is_high_and_reversible() {
        let report = classify(&store(), "rm /home/user/old-report.txt");
        assert_eq!(report.tier, RiskTier::High);
        assert_eq!(report.reversibility, Reversibility::Full);
        assert!(!report.blocked);
        assert!(report.matched_rules.iter().any(|r| r == "destructive.rm"));
    }

    #[test]
    fn test_recursive_delete_of_protected_path_is_blocked() {
        let report = classify(&store(), "rm -rf /etc");
        assert_eq!(report.tier, RiskTier::Critical);
        assert_eq!(report.reversibility, Reversibility::None);
        assert!(report.blocked);
        assert!(report
            .matched_rules
            .iter()
            .any(|r| r.starts_with("deny.")));
    }

    #[test]
    fn test_deny_overrides_allow_list() {
        // `ls` is allow-listed but the deny signature still fires
        let report = classify(&store(), "ls /tmp && rm -rf / ");
        assert_eq!(report.tier, RiskTier::Critical);
        assert!(report.blocked);
    }

    #[test]
    fn test_protected_path_write_caps_reversibility() {
        let report = classify(&store(), "my-editor /etc/fstab");
        assert_eq!(report.tier, RiskTier::High);
        assert_eq!(report.reversibility, Reversibility::Partial);
        assert!(!report.blocked);
    }

    #[test]
    fn test_format_volume_is_blocked() {
        let report = classify(&store(), "mkfs.ext4 /dev/sda1");
        assert!(report.blocked);
        assert_eq!(report.tier, RiskTier::Critical);
    }

    #[test]
    fn test_empty_text_fails_closed() {
        let report = classify(&store(), "   ");
        assert_eq!(report.tier, RiskTier::Critical);
        assert_eq!(report.reversibility, Reversibility::None);
    }

    #[test]
    fn test_unbalanced_quotes_fail_closed() {
        let report = classify(&store(), "echo \"unterminated");
        assert_eq!(report.tier, RiskTier::Critical);
        assert_eq!(report.reversibility, Reversibility::None);
        assert!(report
            .matched_rules
            .iter()
            .any(|r| r == "unclassifiable.syntax"));
    }

    #[test]
    fn test_wildcard_delete_warning() {
        let report = classify(&store(), "rm /home/user/cache/*.tmp");
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("Wildcard")));
    }

    #[test]
    fn test_safer_alternative_for_delete() {
        let report = classify(&store(), "rm /home/user/old.log");
        assert_eq!(report.safer_alternative.as_deref(), Some("ls -la /home/user/old.log"));
    }

    #[test]
    fn test_sudo_prefix_classifies_inner_verb() {
        let report = classify(&store(), "sudo rm /home/user/file.txt");
        assert_eq!(report.tier, RiskTier::High);
        assert_eq!(
            required_privilege(&store(), "sudo rm /home/user/file.txt"),
            Privilege::Admin
        );
    }

    #[test]
    fn test_privilege_for_protected_write() {
        assert_eq!(
            required_privilege(&store(), "my-editor /etc/hosts"),
            Privilege::Admin
        );
        assert_eq!(
            required_privilege(&store(), "cat /etc/hosts"),
            Privilege::User
        );
    }

    #[test]
    fn test_build_command_carries_classification() {
        let s = store();
        let report = classify(&s, "rm /home/user/a.txt");
        let command = build_command(&s, "rm /home/user/a.txt", Some("clean up".to_string()), &report);
        assert_eq!(command.tier, RiskTier::High);
        assert_eq!(command.reversibility, Reversibility::Full);
        assert_eq!(command.intent.as_deref(), Some("clean up"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let s = store();
        let a = classify(&s, "rm -r /home/user/build");
        let b = classify(&s, "rm -r /home/user/build");
        assert_eq!(a.tier, b.tier);
        assert_eq!(a.matched_rules, b.matched_rules);
        assert_eq!(a.warnings, b.warnings);
    }
}
