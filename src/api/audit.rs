// Audit trail endpoints

use axum::{
    extract::{Query, State},
    http::header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::{
        auth::{self, CurrentActor},
        routes::AppState,
        ApiResponse, PagedResponse, Pagination,
    },
    audit::ExportFormat,
    domain::audit::AuditFilter,
    errors::Result,
};

#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub user_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub role_before: Option<String>,
    pub role_after: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    /// Free-text term for the search endpoint.
    pub q: Option<String>,
    /// `csv` or `json` for the export endpoint.
    pub format: Option<String>,
}

impl AuditQueryParams {
    fn filter(&self) -> AuditFilter {
        AuditFilter {
            user_id: self.user_id,
            performed_by: self.performed_by,
            role_before: self.role_before.clone(),
            role_after: self.role_after.clone(),
            from: self.from,
            to: self.to,
            reason_contains: self.reason.clone(),
        }
    }
}

/// GET /v1/audit
#[tracing::instrument(skip(state, params))]
pub async fn list_entries(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(params): Query<AuditQueryParams>,
) -> Result<impl IntoResponse> {
    auth::require(state.gate.as_ref(), &actor, "audit", "read").await?;

    let page = state
        .audit
        .list(&params.filter(), params.page, params.limit)
        .await?;
    Ok(Json(PagedResponse::new(
        page.entries,
        Pagination {
            page: page.page,
            limit: page.limit,
            total: page.total,
        },
    )))
}

/// GET /v1/audit/search?q=term
#[tracing::instrument(skip(state, params))]
pub async fn search_entries(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(params): Query<AuditQueryParams>,
) -> Result<impl IntoResponse> {
    auth::require(state.gate.as_ref(), &actor, "audit", "read").await?;

    let term = params.q.as_deref().unwrap_or_default();
    let entries = state.audit.search(term, &params.filter()).await?;
    Ok(Json(ApiResponse::new(entries)))
}

/// GET /v1/audit/statistics
#[tracing::instrument(skip(state, params))]
pub async fn statistics(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(params): Query<AuditQueryParams>,
) -> Result<impl IntoResponse> {
    auth::require(state.gate.as_ref(), &actor, "audit", "read").await?;

    let stats = state.audit.statistics(params.user_id).await?;
    Ok(Json(ApiResponse::new(stats)))
}

/// GET /v1/audit/export?format=csv|json
#[tracing::instrument(skip(state, params))]
pub async fn export_entries(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(params): Query<AuditQueryParams>,
) -> Result<impl IntoResponse> {
    auth::require(state.gate.as_ref(), &actor, "audit", "export").await?;

    let format: ExportFormat = params.format.as_deref().unwrap_or("csv").parse()?;
    let bytes = state.audit.export(&params.filter(), format).await?;

    let headers = match format {
        ExportFormat::Csv => [
            (CONTENT_TYPE, "text/csv"),
            (
                CONTENT_DISPOSITION,
                "attachment; filename=\"audit_export.csv\"",
            ),
        ],
        ExportFormat::Json => [
            (CONTENT_TYPE, "application/json"),
            (
                CONTENT_DISPOSITION,
                "attachment; filename=\"audit_export.json\"",
            ),
        ],
    };
    Ok((headers, bytes))
}
