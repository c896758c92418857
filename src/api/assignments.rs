// Role and assignment endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    api::{
        auth::{self, ClientContext, CurrentActor},
        routes::AppState,
        ApiResponse,
    },
    domain::role::{AssignRoleRequest, BatchAssignmentItem},
    errors::Result,
};

/// GET /v1/roles
#[tracing::instrument(skip(state))]
pub async fn list_roles(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<impl IntoResponse> {
    auth::require(state.gate.as_ref(), &actor, "roles", "read").await?;

    let roles = state.catalog.all_roles().await?;
    Ok(Json(ApiResponse::new(roles)))
}

/// GET /v1/roles/assignable
///
/// Presentation support only: the authoritative hierarchy check is always
/// re-run at assignment time.
#[tracing::instrument(skip(state))]
pub async fn list_assignable_roles(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> Result<impl IntoResponse> {
    auth::require(state.gate.as_ref(), &actor, "roles", "read").await?;

    let actor_role = state.catalog.role(actor.role_id).await?;
    let roles = state.catalog.assignable_roles(&actor_role).await?;
    Ok(Json(ApiResponse::new(roles)))
}

/// POST /v1/roles/assignments
#[tracing::instrument(skip(state, ctx, req))]
pub async fn assign_role(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ClientContext(ctx): ClientContext,
    Json(req): Json<AssignRoleRequest>,
) -> Result<impl IntoResponse> {
    auth::require(state.gate.as_ref(), &actor, "roles", "manage").await?;

    let assignment = state.engine.assign_role(&actor, &req, &ctx).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(assignment))))
}

#[derive(Debug, Deserialize)]
pub struct UnassignParams {
    pub reason: Option<String>,
}

/// DELETE /v1/roles/assignments/:user_id
#[tracing::instrument(skip(state, ctx, params))]
pub async fn unassign_role(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ClientContext(ctx): ClientContext,
    Path(user_id): Path<Uuid>,
    Query(params): Query<UnassignParams>,
) -> Result<impl IntoResponse> {
    auth::require(state.gate.as_ref(), &actor, "roles", "manage").await?;

    let reason = params
        .reason
        .as_deref()
        .unwrap_or("unassigned by administrator");
    state.engine.unassign_role(&actor, user_id, reason, &ctx).await?;
    Ok(Json(ApiResponse::new(json!({
        "user_id": user_id,
        "status": "unassigned",
    }))))
}

#[derive(Debug, Deserialize)]
pub struct BatchAssignRequest {
    pub assignments: Vec<BatchAssignmentItem>,
}

/// POST /v1/roles/assignments/batch
#[tracing::instrument(skip(state, ctx, req))]
pub async fn assign_roles_batch(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ClientContext(ctx): ClientContext,
    Json(req): Json<BatchAssignRequest>,
) -> Result<impl IntoResponse> {
    auth::require(state.gate.as_ref(), &actor, "roles", "manage").await?;

    let outcome = state
        .engine
        .assign_roles_batch(&actor, &req.assignments, &ctx)
        .await?;
    Ok(Json(ApiResponse::new(outcome)))
}
