//! Risk tiers and reversibility classes
//!
//! Deterministic risk vocabulary shared by the classifier, the coordinator
//! and the ledger. Tiers are ordered so rule evaluation can fold to the
//! maximum matched tier.

use serde::{Deserialize, Serialize};

/// Risk tier for a proposed command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Read-only, no backup required
    Safe,
    /// Mutating but routine, backed up when resources are identified
    Caution,
    /// Destructive on user resources, backup mandatory
    High,
    /// Deny-listed or unclassifiable, restore point required if approvable
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Safe => "safe",
            RiskTier::Caution => "caution",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }

    /// Whether this tier passes through the backup phase at all
    pub fn requires_backup_phase(&self) -> bool {
        !matches!(self, RiskTier::Safe)
    }

    /// Whether a non-empty backup set is mandatory before execution
    pub fn requires_backup(&self) -> bool {
        matches!(self, RiskTier::High | RiskTier::Critical)
    }

    /// Whether an OS restore point must exist before execution
    pub fn requires_restore_point(&self) -> bool {
        matches!(self, RiskTier::Critical)
    }
}

/// How completely a command's effect can be undone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reversibility {
    /// All snapshotted resources can be restored to pre-command content
    Full,
    /// Some effects can be restored, others need manual work
    Partial,
    /// No automatic inverse exists
    None,
}

impl Reversibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reversibility::Full => "full",
            Reversibility::Partial => "partial",
            Reversibility::None => "none",
        }
    }

    /// Combine two classes, keeping the weaker guarantee
    pub fn min(self, other: Reversibility) -> Reversibility {
        use Reversibility::*;
        match (self, other) {
            (None, _) | (_, None) => None,
            (Partial, _) | (_, Partial) => Partial,
            (Full, Full) => Full,
        }
    }
}

/// Human-readable tier description for the confirmation surface
pub fn describe_tier(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Safe => "This command is read-only and easily repeatable.",
        RiskTier::Caution => "This command modifies system state. Identified resources will be backed up.",
        RiskTier::High => "This command is destructive. A backup is required before it can run.",
        RiskTier::Critical => {
            "This command affects critical system components. A restore point is required, or it is blocked outright."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(RiskTier::Safe < RiskTier::Caution);
        assert!(RiskTier::Caution < RiskTier::High);
        assert!(RiskTier::High < RiskTier::Critical);
    }

    #[test]
    fn test_backup_requirements() {
        assert!(!RiskTier::Safe.requires_backup_phase());
        assert!(RiskTier::Caution.requires_backup_phase());
        assert!(!RiskTier::Caution.requires_backup());
        assert!(RiskTier::High.requires_backup());
        assert!(RiskTier::Critical.requires_restore_point());
    }

    #[test]
    fn test_reversibility_min() {
        assert_eq!(Reversibility::Full.min(Reversibility::Partial), Reversibility::Partial);
        assert_eq!(Reversibility::Partial.min(Reversibility::None), Reversibility::None);
        assert_eq!(Reversibility::Full.min(Reversibility::Full), Reversibility::Full);
    }
}
