// Role hierarchy domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// A named privilege tier. `level` is a small non-negative integer inducing
/// a total order over roles; the highest level present in the catalog is the
/// unrestricted tier. Roles are immutable reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub level: i32,
}

/// The authenticated entity performing an operation. Resolved by the
/// identity provider at the HTTP boundary; the core never sees credentials.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role_id: Uuid,
}

/// The binding of exactly one role to one user. At most one row exists per
/// `user_id`, enforced by the storage uniqueness constraint. Never updated
/// in place.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoleAssignment {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub assigned_by: Uuid,
    pub reason: String,
    pub assigned_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl RoleAssignment {
    pub fn new(user_id: Uuid, role_id: Uuid, assigned_by: Uuid, reason: String) -> Self {
        Self {
            user_id,
            role_id,
            assigned_by,
            reason,
            assigned_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }
}

const MAX_REASON_LENGTH: usize = 500;

fn validate_reason(reason: &str) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(AppError::Validation("reason must not be empty".to_string()));
    }
    if reason.len() > MAX_REASON_LENGTH {
        return Err(AppError::Validation(format!(
            "reason too long: {} characters (max {})",
            reason.len(),
            MAX_REASON_LENGTH
        )));
    }
    Ok(())
}

/// Request to assign a role to a single user.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignRoleRequest {
    pub target_user_id: Uuid,
    pub role_id: Uuid,
    pub reason: String,
}

impl AssignRoleRequest {
    /// Shape validation, run once at the boundary before any lookup.
    pub fn validate(&self) -> Result<()> {
        validate_reason(&self.reason)
    }
}

/// One element of a batch assignment request.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchAssignmentItem {
    pub target_user_id: Uuid,
    pub target_role_id: Uuid,
    pub reason: String,
}

impl BatchAssignmentItem {
    pub fn validate(&self) -> Result<()> {
        validate_reason(&self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_must_not_be_blank() {
        let req = AssignRoleRequest {
            target_user_id: Uuid::new_v4(),
            role_id: Uuid::new_v4(),
            reason: "   ".to_string(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_reason_length_bound() {
        let req = AssignRoleRequest {
            target_user_id: Uuid::new_v4(),
            role_id: Uuid::new_v4(),
            reason: "x".repeat(MAX_REASON_LENGTH + 1),
        };
        assert!(req.validate().is_err());

        let req = AssignRoleRequest {
            reason: "promotion to moderator".to_string(),
            ..req
        };
        assert!(req.validate().is_ok());
    }
}
