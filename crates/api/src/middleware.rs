//! Authentication middleware: API key or bearer token → actor context.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use covenant_auth::{AuthenticationEngine, JwtValidator};

use crate::context::ActorContext;

#[derive(Clone)]
pub struct AuthState {
    pub authn: Arc<AuthenticationEngine>,
    pub jwt: Arc<dyn JwtValidator>,
}

/// Resolve credentials into an [`ActorContext`] extension.
///
/// Requests without credentials pass through anonymously; authorization
/// happens per-intent inside the pipeline, so unauthenticated calls can
/// still reach open intents and get audited denials everywhere else.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(key) = api_key(req.headers()) {
        let verified = state
            .authn
            .verify(key, Utc::now())
            .await
            .ok_or(StatusCode::UNAUTHORIZED)?;
        req.extensions_mut().insert(ActorContext {
            entity_id: verified.entity_id,
            realm_id: verified.realm_id,
            scopes: verified.scopes,
        });
        return Ok(next.run(req).await);
    }

    if let Some(token) = bearer(req.headers()) {
        let claims = state
            .jwt
            .validate(token, Utc::now())
            .map_err(|_| StatusCode::UNAUTHORIZED)?;
        req.extensions_mut().insert(ActorContext {
            entity_id: claims.sub,
            realm_id: claims.realm_id,
            scopes: claims.scopes,
        });
        return Ok(next.run(req).await);
    }

    Ok(next.run(req).await)
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
