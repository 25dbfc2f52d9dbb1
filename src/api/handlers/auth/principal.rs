//! Authenticated principal extraction and role-gated endpoints.
//!
//! Flow Overview: read the bearer token, resolve it through the auth service
//! (signature, expiry and, in bound mode, the live session), and hand the
//! principal to the handler.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::warn;

use super::types::ErrorResponse;
use crate::{
    api::handlers::extract_bearer_token,
    auth::{AuthError, AuthService, PrincipalContext, Role, require_role},
};

/// Resolve the bearer token into a principal.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    service: &AuthService,
) -> Result<PrincipalContext, AuthError> {
    let token = extract_bearer_token(headers).ok_or(AuthError::InvalidToken)?;
    service.current_principal(&token).await
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Current principal", body = PrincipalContext),
        (status = 401, description = "Missing, invalid or expired token", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> impl IntoResponse {
    match require_auth(&headers, &service).await {
        Ok(principal) => (StatusCode::OK, Json(principal)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/admin",
    responses(
        (status = 200, description = "Caller holds the super admin role", body = PrincipalContext),
        (status = 401, description = "Missing, invalid or expired token", body = ErrorResponse),
        (status = 403, description = "Insufficient role", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn admin(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> impl IntoResponse {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    if let Err(err) = require_role(&principal, Role::SuperAdmin) {
        warn!(user_id = %principal.id, role = %principal.role, "Role check failed");
        return err.into_response();
    }

    (StatusCode::OK, Json(principal)).into_response()
}
