// Privilege validation outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk classification attached to every privilege decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a privilege decision came back negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    RoleNotFound,
    SelfAssignment,
    LevelTooHighOrEqual,
    BatchTooLarge,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::RoleNotFound => "role_not_found",
            DenialReason::SelfAssignment => "self_assignment",
            DenialReason::LevelTooHighOrEqual => "level_too_high_or_equal",
            DenialReason::BatchTooLarge => "batch_too_large",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a privilege check. Transient: never persisted as a row, but
/// embedded into audit metadata when an attempt is denied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<DenialReason>,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
}

impl ValidationResult {
    /// A positive decision at the given risk level.
    pub fn allowed(risk_level: RiskLevel) -> Self {
        Self {
            valid: true,
            reason: None,
            risk_level,
            requires_approval: risk_level == RiskLevel::Critical,
        }
    }

    /// A negative decision. Approval is flagged for critical denials so the
    /// caller can route the attempt for review.
    pub fn denied(reason: DenialReason, risk_level: RiskLevel) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            risk_level,
            requires_approval: risk_level == RiskLevel::Critical,
        }
    }

    /// Force the approval flag regardless of risk level. Used by the bulk
    /// gate, where oversized-but-legal batches demand sign-off.
    pub fn with_approval_required(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}
