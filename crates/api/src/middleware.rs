use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use feeledger_core::{TenantId, UserId};

use crate::context::{ActorContext, TenantContext};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Resolve tenant and actor from gateway headers.
///
/// Authentication happens upstream; a request without both headers never
/// reaches a billing route.
pub async fn context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let tenant_id: TenantId = parse_header(req.headers(), TENANT_HEADER)?;
    let actor_id: UserId = parse_header(req.headers(), ACTOR_HEADER)?;

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    req.extensions_mut().insert(ActorContext::new(actor_id));

    Ok(next.run(req).await)
}

fn parse_header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Result<T, StatusCode> {
    let value = headers.get(name).ok_or(StatusCode::UNAUTHORIZED)?;
    let value = value.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
    value.trim().parse().map_err(|_| StatusCode::UNAUTHORIZED)
}
