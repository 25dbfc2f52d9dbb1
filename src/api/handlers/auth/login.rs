//! Password check and one-time code confirmation.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use super::types::{
    ErrorResponse, LoginRequest, MessageResponse, TokenPairResponse, VerifyOtpRequest,
};
use crate::{
    api::handlers::session_context,
    auth::{AuthError, AuthService, LoginOutcome},
};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Code sent, or a token pair when second factor is disabled", body = MessageResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return AuthError::InvalidRequest("missing payload".to_string()).into_response();
    };
    if request.username.trim().is_empty() || request.password.is_empty() {
        return AuthError::InvalidRequest("username and password are required".to_string())
            .into_response();
    }

    match service
        .request_login(&request.username, &request.password, session_context(&headers))
        .await
    {
        Ok(LoginOutcome::ChallengeSent) => (
            StatusCode::OK,
            Json(MessageResponse::new("Verification code sent")),
        )
            .into_response(),
        Ok(LoginOutcome::Tokens(pair)) => {
            (StatusCode::OK, Json(TokenPairResponse::from(pair))).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/otp/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Code accepted", body = MessageResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "No pending code, expired or mismatched", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return AuthError::InvalidRequest("missing payload".to_string()).into_response();
    };
    if request.username.trim().is_empty() {
        return AuthError::InvalidRequest("username is required".to_string()).into_response();
    }

    match service.verify_otp(&request.username, &request.otp).await {
        Ok(()) => (StatusCode::OK, Json(MessageResponse::new("Code verified"))).into_response(),
        Err(err) => err.into_response(),
    }
}
