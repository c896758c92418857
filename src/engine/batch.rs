// Two-phase batch assignment.
//
// Phase 1 pre-validates every item in input order without side effects.
// Phase 2 writes all valid items in a single transaction: a storage
// failure rolls the whole batch back, while an item losing the uniqueness
// race is downgraded to a per-item conflict. Denial entries for items
// rejected by the hierarchy checks are appended after execution so they
// survive a rolled-back batch.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::authz::validator::{PrivilegeValidator, MAX_BATCH_ITEMS};
use crate::domain::audit::{AuditLogEntry, RequestContext};
use crate::domain::role::{Actor, BatchAssignmentItem, RoleAssignment};
use crate::domain::validation::{DenialReason, RiskLevel, ValidationResult};
use crate::errors::{AppError, Result};
use crate::store::InsertOutcome;

use super::AssignmentEngine;

/// Final state of one batch item, in input order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItemOutcome {
    /// Written and committed; the id of its success audit entry.
    Assigned { audit_entry_id: Uuid },
    /// Failed pre-validation.
    Rejected { reason: DenialReason },
    /// The target already held an assignment (found in either phase).
    Conflict,
    /// Was valid, but the batch transaction aborted.
    RolledBack,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemDetail {
    pub index: usize,
    pub target_user_id: Uuid,
    pub outcome: BatchItemOutcome,
}

/// Partial-failure accounting for one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub total_attempted: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub executed_count: usize,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub items: Vec<BatchItemDetail>,
    pub errors: Vec<String>,
}

enum Prevalidated {
    Valid {
        assignment: RoleAssignment,
        entry: AuditLogEntry,
    },
    Denied(ValidationResult),
    Conflict,
}

impl AssignmentEngine {
    #[tracing::instrument(skip(self, items, ctx), fields(actor = %actor.id, items = items.len()))]
    pub async fn assign_roles_batch(
        &self,
        actor: &Actor,
        items: &[BatchAssignmentItem],
        ctx: &RequestContext,
    ) -> Result<BatchOutcome> {
        let bulk = self.validator.validate_bulk("role_assignment", items.len());
        if !bulk.valid {
            // Oversized batches are malformed requests: rejected before any
            // pre-validation, nothing written.
            return Err(AppError::Validation(format!(
                "batch of {} items exceeds the limit of {}",
                items.len(),
                MAX_BATCH_ITEMS
            )));
        }
        if bulk.requires_approval {
            let metadata = serde_json::json!({
                "validation": bulk,
                "item_count": items.len(),
                "operation": "assign_roles_batch",
            });
            let entry = AuditLogEntry::new(
                actor.id,
                AuditLogEntry::BLOCKED,
                actor.id,
                "bulk role assignment blocked pending approval",
            )
            .with_context(ctx)
            .with_metadata(metadata);
            self.audit.append(&entry).await?;
            metrics::counter!("role_batches_blocked_total", 1);
            return Err(AppError::PermissionDenied);
        }

        for item in items {
            item.validate()?;
        }
        let actor_role = self.actor_role(actor).await?;

        // Phase 1: pre-validation, read-only.
        let mut plan: Vec<Prevalidated> = Vec::with_capacity(items.len());
        for item in items {
            if item.target_user_id == actor.id {
                plan.push(Prevalidated::Denied(ValidationResult::denied(
                    DenialReason::SelfAssignment,
                    RiskLevel::High,
                )));
                continue;
            }
            if self
                .assignments
                .assignment_for_user(item.target_user_id)
                .await?
                .is_some()
            {
                plan.push(Prevalidated::Conflict);
                continue;
            }
            let escalation = self
                .validator
                .escalation_context(actor, &actor_role, item.target_user_id, item.target_role_id)
                .await?;
            let verdict = PrivilegeValidator::evaluate(&escalation);
            if !verdict.valid {
                plan.push(Prevalidated::Denied(verdict));
                continue;
            }
            let Some(role) = escalation.target_role else {
                plan.push(Prevalidated::Denied(ValidationResult::denied(
                    DenialReason::RoleNotFound,
                    RiskLevel::High,
                )));
                continue;
            };
            let assignment = RoleAssignment::new(
                item.target_user_id,
                role.id,
                actor.id,
                item.reason.clone(),
            );
            let entry =
                AuditLogEntry::new(item.target_user_id, &role.name, actor.id, &item.reason)
                    .with_context(ctx);
            plan.push(Prevalidated::Valid { assignment, entry });
        }

        let mut valid_indices = Vec::new();
        let mut writes = Vec::new();
        for (index, prevalidated) in plan.iter().enumerate() {
            if let Prevalidated::Valid { assignment, entry } = prevalidated {
                valid_indices.push(index);
                writes.push((assignment.clone(), entry.clone()));
            }
        }
        let valid_count = writes.len();
        let invalid_count = items.len() - valid_count;
        let mut errors = Vec::new();

        // Phase 2: execution in one transaction.
        let mut executed_count = 0;
        let mut write_outcomes: HashMap<usize, BatchItemOutcome> = HashMap::new();
        if !writes.is_empty() {
            match self.assignments.insert_batch(&writes).await {
                Ok(outcomes) => {
                    executed_count = valid_count;
                    for (index, outcome) in valid_indices.iter().zip(outcomes) {
                        let item_outcome = match outcome {
                            InsertOutcome::Inserted { audit_entry_id } => {
                                BatchItemOutcome::Assigned { audit_entry_id }
                            }
                            InsertOutcome::Conflict => BatchItemOutcome::Conflict,
                        };
                        write_outcomes.insert(*index, item_outcome);
                    }
                }
                Err(e) => {
                    error!("batch assignment transaction aborted: {:?}", e);
                    errors.push(e.to_string());
                    for index in &valid_indices {
                        write_outcomes.insert(*index, BatchItemOutcome::RolledBack);
                    }
                }
            }
        }

        // Denial entries for hierarchy-rejected items. Benign conflicts get
        // none, matching the single-assignment rule.
        let denials: Vec<AuditLogEntry> = items
            .iter()
            .zip(&plan)
            .filter_map(|(item, prevalidated)| match prevalidated {
                Prevalidated::Denied(verdict) => Some(AuditLog::denial_entry(
                    item.target_user_id,
                    actor.id,
                    AuditLogEntry::ATTEMPT_FAILED,
                    &item.reason,
                    verdict,
                    ctx,
                )),
                _ => None,
            })
            .collect();
        if let Err(e) = self.audit.append_many(&denials).await {
            error!("failed to record batch denial entries: {:?}", e);
            errors.push(e.to_string());
        }

        let mut succeeded_count = 0;
        let mut failed_count = 0;
        let details: Vec<BatchItemDetail> = items
            .iter()
            .zip(&plan)
            .enumerate()
            .map(|(index, (item, prevalidated))| {
                let outcome = match prevalidated {
                    Prevalidated::Valid { .. } => write_outcomes
                        .get(&index)
                        .cloned()
                        .unwrap_or(BatchItemOutcome::RolledBack),
                    Prevalidated::Denied(verdict) => BatchItemOutcome::Rejected {
                        reason: verdict.reason.unwrap_or(DenialReason::LevelTooHighOrEqual),
                    },
                    Prevalidated::Conflict => BatchItemOutcome::Conflict,
                };
                match &outcome {
                    BatchItemOutcome::Assigned { .. } => succeeded_count += 1,
                    BatchItemOutcome::Conflict if write_outcomes.contains_key(&index) => {
                        failed_count += 1
                    }
                    BatchItemOutcome::RolledBack => failed_count += 1,
                    _ => {}
                }
                BatchItemDetail {
                    index,
                    target_user_id: item.target_user_id,
                    outcome,
                }
            })
            .collect();

        metrics::counter!("role_batches_total", 1);
        metrics::counter!("role_assignments_total", succeeded_count as u64);
        info!(
            total = items.len(),
            valid = valid_count,
            succeeded = succeeded_count,
            failed = failed_count,
            "batch assignment finished"
        );

        Ok(BatchOutcome {
            total_attempted: items.len(),
            valid_count,
            invalid_count,
            executed_count,
            succeeded_count,
            failed_count,
            items: details,
            errors,
        })
    }
}
