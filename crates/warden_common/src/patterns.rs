//! Pattern Store - rule tables for command risk classification
//!
//! The store is pure data: an ordered list of tagged rules, each carrying the
//! tier it forces when matched. The classifier folds over the list and keeps
//! the maximum tier; control flow never changes when a pattern is added.
//!
//! Built-in tables ship compiled into the binary so the intent resolver
//! cannot bypass them; the config overlay can only append rules, never
//! remove built-ins.

use crate::risk::RiskTier;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Deny-list signatures. Any match forces CRITICAL and permanently blocks
/// the command regardless of approval.
const DENY_SIGNATURES: &[(&str, &str)] = &[
    ("deny.recursive-delete-root", r"rm\s+(-[a-zA-Z]*r[a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*r)\s+/(\s|$)"),
    ("deny.recursive-delete-protected", r"rm\s+-[a-zA-Z]*r[a-zA-Z]*\s+.*(/boot|/etc|/usr|/bin|/lib|/var/lib)"),
    ("deny.format-volume", r"\bmkfs(\.\w+)?\s"),
    ("deny.mkswap-device", r"\bmkswap\s+/dev/"),
    ("deny.raw-disk-write", r"\bdd\s+.*of=/dev/(sd|nvme|mapper|vd)"),
    ("deny.wipe-device", r"\b(wipefs|shred|blkdiscard)\s+.*/dev/"),
    ("deny.boot-config-edit", r"(>|>>)\s*/boot/|rm\s+.*/boot/|\befibootmgr\s+.*(-b|--delete)"),
    ("deny.reinit-bootloader", r"\bgrub-install\b|\bbootctl\s+install\b"),
    ("deny.fork-bomb", r":\(\)\s*\{\s*:\|:&\s*\}"),
    ("deny.overwrite-passwd", r"(>|>>)\s*/etc/(passwd|shadow|sudoers)"),
];

/// Protected path prefixes. Overlap caps the tier at HIGH (unless a deny
/// rule already fired) and forces reversibility down to PARTIAL.
const PROTECTED_PATHS: &[&str] = &[
    "/boot",
    "/etc",
    "/usr",
    "/bin",
    "/sbin",
    "/lib",
    "/var/lib",
    "/proc",
    "/sys",
    "/dev",
];

/// Verbs that destroy data. Force at least HIGH; reversible through backups.
const DESTRUCTIVE_VERBS: &[&str] = &["rm", "rmdir", "unlink", "truncate"];

/// Verbs whose effect has no usable inverse even with a backup in hand.
const IRREVERSIBLE_VERBS: &[&str] = &["dd", "mkfs", "shred", "wipefs", "blkdiscard", "mkswap"];

/// Read-only allow-list. A statement whose first token is one of these is
/// SAFE unless a stronger rule also matched.
const READ_ONLY_VERBS: &[&str] = &[
    "ls", "cat", "head", "tail", "stat", "file", "wc", "du", "df", "find",
    "grep", "which", "whereis", "realpath", "basename", "dirname", "pwd",
    "echo", "date", "uptime", "uname", "hostname", "id", "whoami", "groups",
    "free", "ps", "pgrep", "lsblk", "lscpu", "lspci", "lsusb", "env",
    "printenv", "mount", "diff", "sort", "uniq", "tr", "cut",
];

/// Verbs that require admin privilege regardless of target path.
const ADMIN_VERBS: &[&str] = &[
    "systemctl", "service", "mount", "umount", "pacman", "apt", "apt-get",
    "dnf", "yum", "useradd", "userdel", "usermod", "chown", "sysctl",
];

/// A single classification rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub tier: RiskTier,
    pub kind: RuleKind,
}

/// What a rule matches against
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Regex over the whole normalized command text; absolute block
    DenySignature(Regex),
    /// Path prefix overlap with any token
    ProtectedPath(String),
    /// First token of a statement
    DestructiveVerb(String),
    /// First token of a statement
    ReadOnlyVerb(String),
}

/// Config overlay: extra rules appended to the built-in tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternOverlay {
    /// Extra deny-list regexes, named `deny.custom.<n>`
    #[serde(default)]
    pub extra_deny: Vec<String>,
    /// Extra protected path prefixes
    #[serde(default)]
    pub extra_protected: Vec<String>,
    /// Extra read-only verbs
    #[serde(default)]
    pub extra_read_only: Vec<String>,
}

/// The pattern store: ordered rules, deny-list first
#[derive(Debug, Clone)]
pub struct PatternStore {
    rules: Vec<Rule>,
    irreversible_verbs: Vec<String>,
    admin_verbs: Vec<String>,
}

impl Default for PatternStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternStore {
    /// Built-in tables only
    pub fn new() -> Self {
        Self::with_overlay(&PatternOverlay::default())
    }

    /// Built-in tables plus config overlay. Invalid overlay regexes are
    /// skipped with a warning rather than poisoning the store.
    pub fn with_overlay(overlay: &PatternOverlay) -> Self {
        let mut rules = Vec::new();

        for (name, pattern) in DENY_SIGNATURES {
            // Built-in patterns are compile-time constants; a failure here
            // is a programming error, caught by tests.
            let re = Regex::new(&format!("(?i){}", pattern))
                .unwrap_or_else(|e| panic!("built-in deny pattern '{}' invalid: {}", name, e));
            rules.push(Rule {
                name: (*name).to_string(),
                tier: RiskTier::Critical,
                kind: RuleKind::DenySignature(re),
            });
        }

        for (i, pattern) in overlay.extra_deny.iter().enumerate() {
            match Regex::new(&format!("(?i){}", pattern)) {
                Ok(re) => rules.push(Rule {
                    name: format!("deny.custom.{}", i),
                    tier: RiskTier::Critical,
                    kind: RuleKind::DenySignature(re),
                }),
                Err(e) => {
                    tracing::warn!("skipping invalid custom deny pattern '{}': {}", pattern, e)
                }
            }
        }

        for path in PROTECTED_PATHS {
            rules.push(Rule {
                name: format!("protected.{}", path.trim_start_matches('/')),
                tier: RiskTier::High,
                kind: RuleKind::ProtectedPath((*path).to_string()),
            });
        }
        for path in &overlay.extra_protected {
            rules.push(Rule {
                name: format!("protected.custom.{}", path.trim_start_matches('/')),
                tier: RiskTier::High,
                kind: RuleKind::ProtectedPath(path.clone()),
            });
        }

        for verb in DESTRUCTIVE_VERBS {
            rules.push(Rule {
                name: format!("destructive.{}", verb),
                tier: RiskTier::High,
                kind: RuleKind::DestructiveVerb((*verb).to_string()),
            });
        }

        for verb in READ_ONLY_VERBS {
            rules.push(Rule {
                name: format!("readonly.{}", verb),
                tier: RiskTier::Safe,
                kind: RuleKind::ReadOnlyVerb((*verb).to_string()),
            });
        }
        for verb in &overlay.extra_read_only {
            rules.push(Rule {
                name: format!("readonly.custom.{}", verb),
                tier: RiskTier::Safe,
                kind: RuleKind::ReadOnlyVerb(verb.clone()),
            });
        }

        Self {
            rules,
            irreversible_verbs: IRREVERSIBLE_VERBS.iter().map(|s| s.to_string()).collect(),
            admin_verbs: ADMIN_VERBS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Whether a path token falls under a protected prefix
    pub fn is_protected_path(&self, token: &str) -> bool {
        self.rules.iter().any(|r| match &r.kind {
            RuleKind::ProtectedPath(prefix) => token.starts_with(prefix.as_str()),
            _ => false,
        })
    }

    pub fn is_irreversible_verb(&self, verb: &str) -> bool {
        self.irreversible_verbs.iter().any(|v| v == verb)
    }

    pub fn is_admin_verb(&self, verb: &str) -> bool {
        self.admin_verbs.iter().any(|v| v == verb)
    }

    pub fn is_read_only_verb(&self, verb: &str) -> bool {
        self.rules.iter().any(|r| match &r.kind {
            RuleKind::ReadOnlyVerb(v) => v == verb,
            _ => false,
        })
    }

    pub fn is_destructive_verb(&self, verb: &str) -> bool {
        self.rules.iter().any(|r| match &r.kind {
            RuleKind::DestructiveVerb(v) => v == verb,
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_patterns_compile() {
        let store = PatternStore::new();
        assert!(store.rules().len() > DENY_SIGNATURES.len());
    }

    #[test]
    fn test_protected_path_prefixes() {
        let store = PatternStore::new();
        assert!(store.is_protected_path("/etc/fstab"));
        assert!(store.is_protected_path("/boot/grub/grub.cfg"));
        assert!(!store.is_protected_path("/home/user/notes.txt"));
        assert!(!store.is_protected_path("/tmp/scratch"));
    }

    #[test]
    fn test_verb_tables() {
        let store = PatternStore::new();
        assert!(store.is_read_only_verb("ls"));
        assert!(store.is_destructive_verb("rm"));
        assert!(store.is_irreversible_verb("dd"));
        assert!(store.is_admin_verb("systemctl"));
        assert!(!store.is_read_only_verb("rm"));
    }

    #[test]
    fn test_overlay_appends() {
        let overlay = PatternOverlay {
            extra_deny: vec![r"\bdrop\s+database\b".to_string()],
            extra_protected: vec!["/srv/data".to_string()],
            extra_read_only: vec!["zfs-list".to_string()],
        };
        let store = PatternStore::with_overlay(&overlay);
        assert!(store.is_protected_path("/srv/data/db"));
        assert!(store.is_read_only_verb("zfs-list"));
        // Built-ins survive the overlay
        assert!(store.is_protected_path("/etc/hosts"));
    }

    #[test]
    fn test_invalid_overlay_pattern_skipped() {
        let overlay = PatternOverlay {
            extra_deny: vec!["([unclosed".to_string()],
            ..Default::default()
        };
        // Must not panic
        let store = PatternStore::with_overlay(&overlay);
        assert!(store.rules().len() >= DENY_SIGNATURES.len());
    }
}
