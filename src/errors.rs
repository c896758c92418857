use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domain::validation::{DenialReason, RiskLevel};

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Database migration error: {0}")]
    DatabaseMigration(#[from] sqlx::migrate::MigrateError),

    // Authentication / authorization
    #[error("Unauthenticated")]
    Unauthenticated,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Hierarchy violation: {reason} (risk: {risk_level})")]
    HierarchyViolation {
        reason: DenialReason,
        risk_level: RiskLevel,
        requires_approval: bool,
    },

    // Lookup errors
    #[error("Role not found")]
    RoleNotFound,
    #[error("Assignment not found")]
    AssignmentNotFound,

    // Uniqueness conflicts
    #[error("User already has a role assigned")]
    AlreadyAssigned,

    // Request shape errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Export serialization errors
    #[error("Export error: {0}")]
    Export(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Database(_) | AppError::DatabaseMigration(_) => {
                tracing::error!("Database error: {:?}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthenticated".to_string()),
            AppError::PermissionDenied => (StatusCode::FORBIDDEN, "Permission denied".to_string()),
            AppError::HierarchyViolation {
                reason,
                risk_level,
                requires_approval,
            } => {
                // Hierarchy violations carry their machine-readable detail
                // in the body alongside the status code.
                let body = Json(json!({
                    "error": reason.as_str(),
                    "status": StatusCode::FORBIDDEN.as_u16(),
                    "risk_level": risk_level.as_str(),
                    "requires_approval": requires_approval,
                }));
                return (StatusCode::FORBIDDEN, body).into_response();
            }
            AppError::RoleNotFound => (StatusCode::NOT_FOUND, "Role not found".to_string()),
            AppError::AssignmentNotFound => {
                (StatusCode::NOT_FOUND, "Assignment not found".to_string())
            }
            AppError::AlreadyAssigned => (
                StatusCode::CONFLICT,
                "User already has a role assigned".to_string(),
            ),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Configuration(_) => {
                tracing::error!("Configuration error: {:?}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Export(_) => {
                tracing::error!("Export error: {:?}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Internal(_) => {
                tracing::error!("Internal error: {:?}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;
