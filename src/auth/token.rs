//! HS256 access and refresh tokens.
//!
//! Minting is a pure function of the principal, the clock and the signing key.
//! Expiry is checked here against the injected clock rather than by the JWT
//! library, so the same wall clock drives tokens and sessions.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    clock::{Clock, saturating_add},
    config::AuthConfig,
    credentials::{Principal, PrincipalContext, Role},
    error::AuthError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    /// Session the access token was issued under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<Uuid>,
}

impl Claims {
    /// Principal context carried by an access token.
    ///
    /// # Errors
    /// Returns `InvalidToken` when the role or username claim is missing.
    pub fn principal_context(&self) -> Result<PrincipalContext, AuthError> {
        let role = self.role.ok_or(AuthError::InvalidToken)?;
        let username = self.username.clone().ok_or(AuthError::InvalidToken)?;
        Ok(PrincipalContext {
            id: self.sub.clone(),
            username,
            role,
        })
    }
}

#[derive(Clone, Debug)]
pub struct MintedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    /// Build an issuer from the shared signing secret.
    ///
    /// # Errors
    /// Returns `Configuration` when the secret is empty.
    pub fn new(
        secret: &SecretString,
        config: &AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        let secret = secret.expose_secret();
        if secret.trim().is_empty() {
            return Err(AuthError::Configuration(
                "token signing secret must not be empty".to_string(),
            ));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl: config.access_token_ttl(),
            refresh_ttl: config.refresh_token_ttl(),
            clock,
        })
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// # Errors
    /// Returns `Configuration` if signing fails.
    pub fn mint_access(
        &self,
        principal: &Principal,
        session_id: Option<Uuid>,
    ) -> Result<MintedToken, AuthError> {
        self.mint(principal, TokenKind::Access, self.access_ttl, session_id)
    }

    /// # Errors
    /// Returns `Configuration` if signing fails.
    pub fn mint_refresh(&self, principal: &Principal) -> Result<MintedToken, AuthError> {
        self.mint(principal, TokenKind::Refresh, self.refresh_ttl, None)
    }

    fn mint(
        &self,
        principal: &Principal,
        kind: TokenKind,
        ttl: Duration,
        sid: Option<Uuid>,
    ) -> Result<MintedToken, AuthError> {
        let now = self.clock.now();
        let expires_at = saturating_add(now, ttl);
        let jti = Uuid::new_v4().to_string();

        let (username, role) = match kind {
            TokenKind::Access => (Some(principal.username.clone()), Some(principal.role)),
            TokenKind::Refresh => (None, None),
        };

        let claims = Claims {
            sub: principal.id.clone(),
            username,
            role,
            kind,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: jti.clone(),
            sid,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AuthError::Configuration(format!("failed to sign {kind} token: {err}")))?;

        Ok(MintedToken {
            token,
            jti,
            expires_at,
        })
    }

    /// Verify signature, expiry and token type.
    ///
    /// # Errors
    /// `InvalidToken`, `ExpiredToken` or `TokenTypeMismatch`.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        let claims = self.verify_ignoring_expiry(token, expected)?;
        if self.clock.now().timestamp() >= claims.exp {
            debug!(jti = %claims.jti, kind = %claims.kind, "Token expired");
            return Err(AuthError::ExpiredToken);
        }
        Ok(claims)
    }

    /// Verify signature and token type only. Used where an expired token
    /// still identifies something to clean up.
    ///
    /// # Errors
    /// `InvalidToken` or `TokenTypeMismatch`.
    pub fn verify_ignoring_expiry(
        &self,
        token: &str,
        expected: TokenKind,
    ) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|err| {
                debug!("Token rejected: {err}");
                AuthError::InvalidToken
            })?
            .claims;

        if claims.kind != expected {
            warn!(jti = %claims.jti, got = %claims.kind, want = %expected, "Token type mismatch");
            return Err(AuthError::TokenTypeMismatch);
        }

        Ok(claims)
    }
}
