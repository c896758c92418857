// Role assignment orchestration

pub mod batch;

pub use batch::{BatchItemDetail, BatchItemOutcome, BatchOutcome};

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::authz::validator::{EscalationContext, PrivilegeValidator};
use crate::catalog::RoleCatalog;
use crate::domain::audit::{AuditLogEntry, RequestContext};
use crate::domain::role::{Actor, AssignRoleRequest, Role, RoleAssignment};
use crate::domain::validation::{DenialReason, ValidationResult};
use crate::errors::{AppError, Result};
use crate::store::{AssignmentStore, InsertOutcome};

/// Orchestrates role assignment: privilege validation, the uniqueness
/// check, and the paired assignment/audit write. Every denied attempt is
/// recorded before the error surfaces.
#[derive(Clone)]
pub struct AssignmentEngine {
    catalog: Arc<RoleCatalog>,
    validator: PrivilegeValidator,
    audit: Arc<AuditLog>,
    assignments: Arc<dyn AssignmentStore>,
}

impl AssignmentEngine {
    pub fn new(
        catalog: Arc<RoleCatalog>,
        validator: PrivilegeValidator,
        audit: Arc<AuditLog>,
        assignments: Arc<dyn AssignmentStore>,
    ) -> Self {
        Self {
            catalog,
            validator,
            audit,
            assignments,
        }
    }

    /// Assign a role to a user with no current assignment.
    #[tracing::instrument(skip(self, req, ctx), fields(actor = %actor.id, target = %req.target_user_id))]
    pub async fn assign_role(
        &self,
        actor: &Actor,
        req: &AssignRoleRequest,
        ctx: &RequestContext,
    ) -> Result<RoleAssignment> {
        req.validate()?;
        let actor_role = self.actor_role(actor).await?;

        let escalation = self
            .validator
            .escalation_context(actor, &actor_role, req.target_user_id, req.role_id)
            .await?;
        let verdict = PrivilegeValidator::evaluate(&escalation);
        if !verdict.valid {
            self.record_denial(req.target_user_id, actor.id, &req.reason, &verdict, ctx)
                .await?;
            return Err(Self::hierarchy_violation(verdict));
        }

        let Some(target_role) = escalation.target_role else {
            // A valid verdict implies the role resolved.
            return Err(AppError::RoleNotFound);
        };

        // Benign duplicate check: a read-only rejection, not a security
        // denial, so nothing is written to the trail.
        if self
            .assignments
            .assignment_for_user(req.target_user_id)
            .await?
            .is_some()
        {
            return Err(AppError::AlreadyAssigned);
        }

        let assignment = RoleAssignment::new(
            req.target_user_id,
            target_role.id,
            actor.id,
            req.reason.clone(),
        );
        let entry = AuditLogEntry::new(
            req.target_user_id,
            &target_role.name,
            actor.id,
            &req.reason,
        )
        .with_role_before(None)
        .with_context(ctx);

        // The row and its audit entry commit together or not at all. A
        // uniqueness race lost here surfaces the same way as the pre-check.
        match self.assignments.insert(&assignment, &entry).await? {
            InsertOutcome::Inserted { .. } => {
                metrics::counter!("role_assignments_total", 1);
                info!(role = %target_role.name, "role assigned");
                Ok(assignment)
            }
            InsertOutcome::Conflict => Err(AppError::AlreadyAssigned),
        }
    }

    /// Remove a user's assignment. Revocation follows the same hierarchy
    /// rule as granting: the actor must outrank the role being removed
    /// unless it holds the maximum level.
    #[tracing::instrument(skip(self, reason, ctx), fields(actor = %actor.id, target = %target_user_id))]
    pub async fn unassign_role(
        &self,
        actor: &Actor,
        target_user_id: Uuid,
        reason: &str,
        ctx: &RequestContext,
    ) -> Result<()> {
        let actor_role = self.actor_role(actor).await?;

        let current = self
            .assignments
            .assignment_for_user(target_user_id)
            .await?
            .ok_or(AppError::AssignmentNotFound)?;
        let current_role = self.catalog.role(current.role_id).await?;
        let max_level = self.catalog.max_level().await?;

        let escalation = EscalationContext {
            actor_id: actor.id,
            actor_level: actor_role.level,
            target_user_id,
            target_role: Some(current_role.clone()),
            max_level,
        };
        let verdict = PrivilegeValidator::evaluate(&escalation);
        if !verdict.valid {
            self.record_denial(target_user_id, actor.id, reason, &verdict, ctx)
                .await?;
            return Err(Self::hierarchy_violation(verdict));
        }

        let entry = AuditLogEntry::new(
            target_user_id,
            AuditLogEntry::UNASSIGNED,
            actor.id,
            reason,
        )
        .with_role_before(Some(current_role.name.clone()))
        .with_context(ctx);

        if !self.assignments.remove(target_user_id, &entry).await? {
            return Err(AppError::AssignmentNotFound);
        }

        metrics::counter!("role_unassignments_total", 1);
        info!(role = %current_role.name, "role unassigned");
        Ok(())
    }

    pub(crate) async fn actor_role(&self, actor: &Actor) -> Result<Role> {
        // An actor whose role id no longer resolves cannot be authorized
        // for anything.
        self.catalog
            .find_role(actor.role_id)
            .await?
            .ok_or(AppError::PermissionDenied)
    }

    pub(crate) async fn record_denial(
        &self,
        user_id: Uuid,
        performed_by: Uuid,
        reason: &str,
        verdict: &ValidationResult,
        ctx: &RequestContext,
    ) -> Result<()> {
        let entry = AuditLog::denial_entry(
            user_id,
            performed_by,
            AuditLogEntry::ATTEMPT_FAILED,
            reason,
            verdict,
            ctx,
        );
        self.audit.append(&entry).await?;
        metrics::counter!("role_assignments_denied_total", 1);
        Ok(())
    }

    pub(crate) fn hierarchy_violation(verdict: ValidationResult) -> AppError {
        AppError::HierarchyViolation {
            reason: verdict.reason.unwrap_or(DenialReason::LevelTooHighOrEqual),
            risk_level: verdict.risk_level,
            requires_approval: verdict.requires_approval,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::{actor_with, engine_fixture};
    use super::*;
    use crate::domain::validation::RiskLevel;

    fn request(target: Uuid, role: &Role) -> AssignRoleRequest {
        AssignRoleRequest {
            target_user_id: target,
            role_id: role.id,
            reason: "manual".to_string(),
        }
    }

    #[tokio::test]
    async fn test_assign_success_writes_one_entry() {
        let (engine, store, roles) = engine_fixture();
        let superadmin = actor_with(&roles[4]);
        let target = Uuid::new_v4();

        let assignment = engine
            .assign_role(&superadmin, &request(target, &roles[1]), &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(assignment.user_id, target);
        assert_eq!(assignment.role_id, roles[1].id);
        assert_eq!(assignment.assigned_by, superadmin.id);

        let entries = store.audit_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_id, target);
        assert_eq!(entries[0].role_before, None);
        assert_eq!(entries[0].role_after, "staff");
        assert_eq!(entries[0].performed_by, superadmin.id);
    }

    #[tokio::test]
    async fn test_assign_above_own_level_is_critical_denial() {
        let (engine, store, roles) = engine_fixture();
        let admin = actor_with(&roles[3]);
        let target = Uuid::new_v4();

        let err = engine
            .assign_role(&admin, &request(target, &roles[4]), &RequestContext::default())
            .await
            .unwrap_err();

        match err {
            AppError::HierarchyViolation {
                reason,
                risk_level,
                requires_approval,
            } => {
                assert_eq!(reason, DenialReason::LevelTooHighOrEqual);
                assert_eq!(risk_level, RiskLevel::Critical);
                assert!(requires_approval);
            }
            other => panic!("expected hierarchy violation, got {:?}", other),
        }

        // The denied attempt is on the trail with the verdict embedded.
        let entries = store.audit_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role_after, AuditLogEntry::ATTEMPT_FAILED);
        assert_eq!(
            entries[0].metadata["validation"]["risk_level"],
            serde_json::json!("critical")
        );
        assert_eq!(store.assignment_count().await, 0);
    }

    #[tokio::test]
    async fn test_self_assignment_rejected_for_any_level() {
        let (engine, store, roles) = engine_fixture();
        let superadmin = actor_with(&roles[4]);

        let err = engine
            .assign_role(
                &superadmin,
                &request(superadmin.id, &roles[0]),
                &RequestContext::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::HierarchyViolation {
                reason: DenialReason::SelfAssignment,
                ..
            }
        ));
        assert_eq!(store.audit_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_assignment_is_silent_conflict() {
        let (engine, store, roles) = engine_fixture();
        let superadmin = actor_with(&roles[4]);
        let target = Uuid::new_v4();

        engine
            .assign_role(&superadmin, &request(target, &roles[1]), &RequestContext::default())
            .await
            .unwrap();
        let err = engine
            .assign_role(&superadmin, &request(target, &roles[2]), &RequestContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::AlreadyAssigned));
        // One row, one success entry; the conflict wrote nothing.
        assert_eq!(store.assignment_count().await, 1);
        assert_eq!(store.audit_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_racing_assignments_yield_single_row() {
        let (engine, store, roles) = engine_fixture();
        let first = actor_with(&roles[4]);
        let second = actor_with(&roles[4]);
        let target = Uuid::new_v4();

        let req1 = request(target, &roles[1]);
        let req2 = request(target, &roles[2]);
        let ctx = RequestContext::default();
        let (r1, r2) = tokio::join!(
            engine.assign_role(&first, &req1, &ctx),
            engine.assign_role(&second, &req2, &ctx),
        );

        // Exactly one wins; the loser sees the conflict, not an error.
        assert_eq!(u8::from(r1.is_ok()) + u8::from(r2.is_ok()), 1);
        let loser = if r1.is_err() { r1.err() } else { r2.err() };
        assert!(matches!(loser, Some(AppError::AlreadyAssigned)));
        assert_eq!(store.assignment_count().await, 1);
        assert_eq!(store.audit_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_target_role_is_denied_and_recorded() {
        let (engine, store, roles) = engine_fixture();
        let superadmin = actor_with(&roles[4]);
        let ghost_role = Role {
            id: Uuid::new_v4(),
            name: "ghost".to_string(),
            level: 1,
        };

        let err = engine
            .assign_role(
                &superadmin,
                &request(Uuid::new_v4(), &ghost_role),
                &RequestContext::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::HierarchyViolation {
                reason: DenialReason::RoleNotFound,
                ..
            }
        ));
        assert_eq!(store.audit_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unassign_records_prior_role() {
        let (engine, store, roles) = engine_fixture();
        let superadmin = actor_with(&roles[4]);
        let target = Uuid::new_v4();

        engine
            .assign_role(&superadmin, &request(target, &roles[1]), &RequestContext::default())
            .await
            .unwrap();
        engine
            .unassign_role(&superadmin, target, "offboarding", &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(store.assignment_count().await, 0);
        let entries = store.audit_entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].role_after, AuditLogEntry::UNASSIGNED);
        assert_eq!(entries[1].role_before.as_deref(), Some("staff"));
    }

    #[tokio::test]
    async fn test_unassign_missing_assignment() {
        let (engine, _, roles) = engine_fixture();
        let superadmin = actor_with(&roles[4]);

        let err = engine
            .unassign_role(&superadmin, Uuid::new_v4(), "cleanup", &RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AssignmentNotFound));
    }

    #[tokio::test]
    async fn test_unassign_requires_outranking_the_held_role() {
        let (engine, store, roles) = engine_fixture();
        let superadmin = actor_with(&roles[4]);
        let moderator = actor_with(&roles[2]);
        let target = Uuid::new_v4();

        // Target holds administrator, above the moderator actor.
        engine
            .assign_role(&superadmin, &request(target, &roles[3]), &RequestContext::default())
            .await
            .unwrap();

        let err = engine
            .unassign_role(&moderator, target, "attempted removal", &RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HierarchyViolation { .. }));
        assert_eq!(store.assignment_count().await, 1);
    }

    #[tokio::test]
    async fn test_actor_with_unresolvable_role_is_refused() {
        let (engine, _, roles) = engine_fixture();
        let phantom = Actor {
            id: Uuid::new_v4(),
            role_id: Uuid::new_v4(),
        };

        let err = engine
            .assign_role(
                &phantom,
                &request(Uuid::new_v4(), &roles[0]),
                &RequestContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
    }
}
