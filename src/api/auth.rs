// Actor resolution at the HTTP boundary.
//
// The gateway terminates the session and forwards the authenticated actor
// id in a trusted header; this middleware resolves it into an `Actor` via
// the injected identity provider and captures the client context every
// audit write carries. No credential parsing happens in this crate.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::USER_AGENT, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::{
    api::routes::AppState,
    authz::PermissionGate,
    domain::{audit::RequestContext, role::Actor},
    errors::{AppError, Result},
};

/// Header carrying the gateway-authenticated actor id.
pub const ACTOR_HEADER: &str = "x-portal-actor";
const FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolve the actor and stash it, with the request context, in extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let credential = request
        .headers()
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthenticated)?;

    let actor = state.identity.resolve_actor(credential).await?;
    let ctx = client_context(request.headers());

    request.extensions_mut().insert(actor);
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

fn client_context(headers: &HeaderMap) -> RequestContext {
    let ip_address = headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        // The first hop is the client when the gateway appends.
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string());
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    RequestContext {
        ip_address,
        user_agent,
    }
}

/// The authenticated actor, set by the `authenticate` middleware.
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Actor>()
            .copied()
            .map(CurrentActor)
            .ok_or(AppError::Unauthenticated)
    }
}

/// Client context captured alongside the actor.
#[derive(Debug, Clone, Default)]
pub struct ClientContext(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .map(ClientContext)
            .unwrap_or_default())
    }
}

/// Gate check preceding every engine or audit operation.
pub async fn require(
    gate: &dyn PermissionGate,
    actor: &Actor,
    resource: &str,
    action: &str,
) -> Result<()> {
    if gate.has_permission(actor, resource, action).await? {
        Ok(())
    } else {
        Err(AppError::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_context_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.9, 10.0.0.2"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("portal-admin/2.1"));

        let ctx = client_context(&headers);
        assert_eq!(ctx.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(ctx.user_agent.as_deref(), Some("portal-admin/2.1"));
    }

    #[test]
    fn test_client_context_tolerates_missing_headers() {
        let ctx = client_context(&HeaderMap::new());
        assert!(ctx.ip_address.is_none());
        assert!(ctx.user_agent.is_none());
    }
}
