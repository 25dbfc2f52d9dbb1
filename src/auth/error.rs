//! Error taxonomy for the authentication core.
//!
//! Every failure is terminal for the request that produced it. Handlers turn
//! these into a JSON body of `{ "error": CODE, "message": text }`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown identifier, wrong secret and inactive account all look the same.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("no pending verification code")]
    ChallengeNotFound,

    #[error("verification code expired")]
    ChallengeExpired,

    #[error("verification code does not match")]
    ChallengeMismatch,

    #[error("verification code has not been confirmed")]
    OtpNotVerified,

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    ExpiredToken,

    #[error("unexpected token type")]
    TokenTypeMismatch,

    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    #[error("insufficient role")]
    Unauthorized,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage failure")]
    Storage(#[from] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::ChallengeNotFound
            | Self::ChallengeExpired
            | Self::ChallengeMismatch
            | Self::OtpNotVerified
            | Self::InvalidToken
            | Self::ExpiredToken
            | Self::TokenTypeMismatch
            | Self::SessionNotFound
            | Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::ChallengeNotFound => "CHALLENGE_NOT_FOUND",
            Self::ChallengeExpired => "CHALLENGE_EXPIRED",
            Self::ChallengeMismatch => "CHALLENGE_MISMATCH",
            Self::OtpNotVerified => "OTP_NOT_VERIFIED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::ExpiredToken => "EXPIRED_TOKEN",
            Self::TokenTypeMismatch => "TOKEN_TYPE_MISMATCH",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Storage(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Storage(err) => {
                error!("Auth storage failure: {err:#}");
                "internal error".to_string()
            }
            Self::Configuration(detail) => {
                error!("Auth configuration error: {detail}");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.error_code(),
            "message": message,
        }));

        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_share_one_status() {
        for err in [
            AuthError::InvalidCredentials,
            AuthError::ChallengeMismatch,
            AuthError::SessionExpired,
            AuthError::TokenTypeMismatch,
        ] {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(AuthError::Unauthorized.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn storage_errors_hide_detail() {
        let response =
            AuthError::Storage(anyhow::anyhow!("connection refused to 10.0.0.7")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(AuthError::SessionExpired.error_code(), "SESSION_EXPIRED");
        assert_eq!(
            AuthError::InvalidRequest("x".into()).error_code(),
            "INVALID_REQUEST"
        );
    }
}
