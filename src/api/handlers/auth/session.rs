//! Token issuance, refresh and logout.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::info;

use super::types::{ErrorResponse, RefreshRequest, RefreshResponse, TokenPairResponse, TokenRequest};
use crate::{
    api::handlers::session_context,
    auth::{AuthError, AuthService},
};

#[utoipa::path(
    post,
    path = "/v1/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Session opened", body = TokenPairResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Code not verified or account unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn issue_tokens(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<TokenRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return AuthError::InvalidRequest("missing payload".to_string()).into_response();
    };
    if request.username.trim().is_empty() {
        return AuthError::InvalidRequest("username is required".to_string()).into_response();
    }

    match service
        .issue_tokens(&request.username, session_context(&headers))
        .await
    {
        Ok(pair) => {
            info!(username = %pair.username, "Session opened");
            (StatusCode::OK, Json(TokenPairResponse::from(pair))).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Invalid token or session no longer live", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn refresh(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return AuthError::InvalidRequest("missing payload".to_string()).into_response();
    };

    match service.refresh(request.refresh_token.trim()).await {
        Ok(tokens) => (StatusCode::OK, Json(RefreshResponse::from(tokens))).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = RefreshRequest,
    responses(
        (status = 204, description = "Session revoked"),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Token was not minted by this service", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return AuthError::InvalidRequest("missing payload".to_string()).into_response();
    };

    match service.logout(request.refresh_token.trim()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
