use crate::{
    api::{assignments, audit, auth, health},
    audit::AuditLog,
    authz::{IdentityProvider, PermissionGate},
    catalog::RoleCatalog,
    engine::AssignmentEngine,
};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AssignmentEngine>,
    pub audit: Arc<AuditLog>,
    pub catalog: Arc<RoleCatalog>,
    pub identity: Arc<dyn IdentityProvider>,
    pub gate: Arc<dyn PermissionGate>,
}

pub fn create_router(state: AppState) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let v1 = Router::new()
        .route("/roles", get(assignments::list_roles))
        .route("/roles/assignable", get(assignments::list_assignable_roles))
        .route("/roles/assignments", post(assignments::assign_role))
        .route(
            "/roles/assignments/batch",
            post(assignments::assign_roles_batch),
        )
        .route(
            "/roles/assignments/:user_id",
            delete(assignments::unassign_role),
        )
        .route("/audit", get(audit::list_entries))
        .route("/audit/search", get(audit::search_entries))
        .route("/audit/statistics", get(audit::statistics))
        .route("/audit/export", get(audit::export_entries))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ));

    Router::new()
        // Health endpoints stay outside the authenticated surface
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1)
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}
