// Privilege escalation decision logic

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::RoleCatalog;
use crate::domain::role::{Actor, Role};
use crate::domain::validation::{DenialReason, RiskLevel, ValidationResult};
use crate::errors::Result;

/// Hard ceiling on batch size; larger requests are malformed.
pub const MAX_BATCH_ITEMS: usize = 50;
/// Batches above this size are legal but demand explicit approval.
pub const BULK_APPROVAL_THRESHOLD: usize = 20;

/// Everything the escalation pipeline needs, resolved up front so the
/// checks themselves stay pure.
#[derive(Debug, Clone)]
pub struct EscalationContext {
    pub actor_id: Uuid,
    pub actor_level: i32,
    pub target_user_id: Uuid,
    /// `None` when the requested role id did not resolve.
    pub target_role: Option<Role>,
    /// Highest level present in the catalog, i.e. the unrestricted tier.
    pub max_level: i32,
}

struct EscalationCheck {
    name: &'static str,
    run: fn(&EscalationContext) -> Option<ValidationResult>,
}

/// Ordered pipeline; the first check returning a denial wins.
const ESCALATION_CHECKS: &[EscalationCheck] = &[
    EscalationCheck {
        name: "role-exists",
        run: check_role_exists,
    },
    EscalationCheck {
        name: "not-self",
        run: check_not_self,
    },
    EscalationCheck {
        name: "level-below-actor",
        run: check_level_below_actor,
    },
];

fn check_role_exists(ctx: &EscalationContext) -> Option<ValidationResult> {
    if ctx.target_role.is_none() {
        return Some(ValidationResult::denied(
            DenialReason::RoleNotFound,
            RiskLevel::High,
        ));
    }
    None
}

fn check_not_self(ctx: &EscalationContext) -> Option<ValidationResult> {
    // Applies regardless of role levels: even the unrestricted tier may not
    // grant itself anything.
    if ctx.actor_id == ctx.target_user_id {
        return Some(ValidationResult::denied(
            DenialReason::SelfAssignment,
            RiskLevel::High,
        ));
    }
    None
}

fn check_level_below_actor(ctx: &EscalationContext) -> Option<ValidationResult> {
    let target = ctx.target_role.as_ref()?;
    if ctx.actor_level >= ctx.max_level {
        return None;
    }
    if target.level >= ctx.actor_level {
        let risk = if target.level >= ctx.max_level {
            RiskLevel::Critical
        } else {
            RiskLevel::High
        };
        return Some(ValidationResult::denied(
            DenialReason::LevelTooHighOrEqual,
            risk,
        ));
    }
    None
}

/// Decides whether an actor may grant a role, and at what risk.
#[derive(Clone)]
pub struct PrivilegeValidator {
    catalog: Arc<RoleCatalog>,
}

impl PrivilegeValidator {
    pub fn new(catalog: Arc<RoleCatalog>) -> Self {
        Self { catalog }
    }

    /// Resolve the target role and catalog ceiling into a context the pure
    /// pipeline can evaluate.
    pub async fn escalation_context(
        &self,
        actor: &Actor,
        actor_role: &Role,
        target_user_id: Uuid,
        target_role_id: Uuid,
    ) -> Result<EscalationContext> {
        let target_role = self.catalog.find_role(target_role_id).await?;
        let max_level = self.catalog.max_level().await?;
        Ok(EscalationContext {
            actor_id: actor.id,
            actor_level: actor_role.level,
            target_user_id,
            target_role,
            max_level,
        })
    }

    /// Run the pipeline over a prepared context. Pure and synchronous.
    pub fn evaluate(ctx: &EscalationContext) -> ValidationResult {
        for check in ESCALATION_CHECKS {
            if let Some(denial) = (check.run)(ctx) {
                debug!(
                    check = check.name,
                    actor = %ctx.actor_id,
                    target = %ctx.target_user_id,
                    reason = ?denial.reason,
                    "escalation check denied"
                );
                return denial;
            }
        }

        // Granting the tier directly below the actor's own is flagged as
        // elevated risk.
        let target_level = ctx.target_role.as_ref().map(|r| r.level).unwrap_or(0);
        let risk = if target_level == ctx.actor_level - 1 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        };
        ValidationResult::allowed(risk)
    }

    /// May `actor` grant the role `target_role_id` to `target_user_id`?
    pub async fn validate_escalation(
        &self,
        actor: &Actor,
        actor_role: &Role,
        target_user_id: Uuid,
        target_role_id: Uuid,
    ) -> Result<ValidationResult> {
        let ctx = self
            .escalation_context(actor, actor_role, target_user_id, target_role_id)
            .await?;
        Ok(Self::evaluate(&ctx))
    }

    /// Gate for bulk operations, applied before any per-item work.
    pub fn validate_bulk(&self, operation: &str, item_count: usize) -> ValidationResult {
        if item_count > MAX_BATCH_ITEMS {
            debug!(operation, item_count, "bulk operation over the size limit");
            return ValidationResult::denied(DenialReason::BatchTooLarge, RiskLevel::High);
        }
        if item_count > BULK_APPROVAL_THRESHOLD {
            debug!(operation, item_count, "bulk operation requires approval");
            return ValidationResult::allowed(RiskLevel::High).with_approval_required();
        }
        ValidationResult::allowed(RiskLevel::Low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(level: i32) -> Role {
        Role {
            id: Uuid::new_v4(),
            name: format!("tier{}", level),
            level,
        }
    }

    fn ctx(actor_level: i32, target_level: Option<i32>, max_level: i32) -> EscalationContext {
        EscalationContext {
            actor_id: Uuid::new_v4(),
            actor_level,
            target_user_id: Uuid::new_v4(),
            target_role: target_level.map(tier),
            max_level,
        }
    }

    #[test]
    fn test_unknown_role_denied_first() {
        let mut c = ctx(3, None, 4);
        // Even a self-assignment reports the missing role first.
        c.target_user_id = c.actor_id;
        let result = PrivilegeValidator::evaluate(&c);
        assert_eq!(result.reason, Some(DenialReason::RoleNotFound));
    }

    #[test]
    fn test_self_assignment_denied_even_at_max_level() {
        let mut c = ctx(4, Some(1), 4);
        c.target_user_id = c.actor_id;
        let result = PrivilegeValidator::evaluate(&c);
        assert!(!result.valid);
        assert_eq!(result.reason, Some(DenialReason::SelfAssignment));
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_equal_level_denied() {
        let result = PrivilegeValidator::evaluate(&ctx(2, Some(2), 4));
        assert_eq!(result.reason, Some(DenialReason::LevelTooHighOrEqual));
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(!result.requires_approval);
    }

    #[test]
    fn test_granting_max_tier_is_critical() {
        let result = PrivilegeValidator::evaluate(&ctx(3, Some(4), 4));
        assert_eq!(result.reason, Some(DenialReason::LevelTooHighOrEqual));
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert!(result.requires_approval);
    }

    #[test]
    fn test_max_level_actor_bypasses_level_check() {
        let result = PrivilegeValidator::evaluate(&ctx(4, Some(4), 4));
        assert!(result.valid);
    }

    #[test]
    fn test_no_grant_at_or_above_own_level() {
        // Actors below the ceiling can never reach their own level or higher.
        for actor_level in 0..4 {
            for target_level in actor_level..=4 {
                let result = PrivilegeValidator::evaluate(&ctx(actor_level, Some(target_level), 4));
                assert!(!result.valid, "level {} granted {}", actor_level, target_level);
            }
        }
    }

    #[test]
    fn test_adjacent_tier_is_moderate_risk() {
        let result = PrivilegeValidator::evaluate(&ctx(3, Some(2), 4));
        assert!(result.valid);
        assert_eq!(result.risk_level, RiskLevel::Moderate);

        let result = PrivilegeValidator::evaluate(&ctx(3, Some(0), 4));
        assert!(result.valid);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_bulk_thresholds() {
        let catalog = Arc::new(RoleCatalog::new(Arc::new(
            crate::store::MemoryStore::with_roles(vec![tier(0)]),
        )));
        let validator = PrivilegeValidator::new(catalog);

        let small = validator.validate_bulk("role_assignment", 5);
        assert!(small.valid);
        assert_eq!(small.risk_level, RiskLevel::Low);

        let boundary = validator.validate_bulk("role_assignment", 20);
        assert!(boundary.valid);
        assert!(!boundary.requires_approval);

        let large = validator.validate_bulk("role_assignment", 21);
        assert!(large.valid);
        assert_eq!(large.risk_level, RiskLevel::High);
        assert!(large.requires_approval);

        let at_limit = validator.validate_bulk("role_assignment", 50);
        assert!(at_limit.valid);

        let oversized = validator.validate_bulk("role_assignment", 51);
        assert!(!oversized.valid);
        assert_eq!(oversized.reason, Some(DenialReason::BatchTooLarge));
    }
}
