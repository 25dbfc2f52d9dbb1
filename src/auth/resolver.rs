//! Bearer token to principal resolution.
//!
//! Signature and expiry are checked first. In bound mode the token's session
//! is then touched, so a revoked or idle session rejects a token that is still
//! cryptographically valid.

use std::sync::Arc;
use tracing::debug;

use super::{
    config::SessionBinding,
    credentials::PrincipalContext,
    error::AuthError,
    session::{SessionStore, TouchOutcome},
    token::{TokenIssuer, TokenKind},
};

pub struct PrincipalResolver {
    issuer: Arc<TokenIssuer>,
    sessions: Arc<SessionStore>,
    binding: SessionBinding,
}

impl PrincipalResolver {
    #[must_use]
    pub fn new(
        issuer: Arc<TokenIssuer>,
        sessions: Arc<SessionStore>,
        binding: SessionBinding,
    ) -> Self {
        Self {
            issuer,
            sessions,
            binding,
        }
    }

    /// # Errors
    /// `InvalidToken`, `ExpiredToken`, `TokenTypeMismatch` or `SessionExpired`.
    pub async fn resolve(&self, bearer: &str) -> Result<PrincipalContext, AuthError> {
        let claims = self.issuer.verify(bearer, TokenKind::Access)?;
        let context = claims.principal_context()?;

        if self.binding == SessionBinding::Bound {
            let session_id = claims.sid.ok_or(AuthError::InvalidToken)?;
            match self.sessions.touch_or_expire(session_id).await {
                Ok(TouchOutcome::Fresh) => {}
                Ok(TouchOutcome::Expired) | Err(AuthError::SessionNotFound) => {
                    debug!(%session_id, user_id = %context.id, "Access token rejected by session state");
                    return Err(AuthError::SessionExpired);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(context)
    }
}
