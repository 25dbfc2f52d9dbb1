//! Login, token and session flows exposed to the HTTP layer.
//!
//! Flow Overview:
//! 1. `request_login` checks the password, then either issues a one-time code
//!    or, in direct mode, returns a token pair.
//! 2. `verify_otp` confirms the code and leaves a verified marker.
//! 3. `issue_tokens` consumes the marker, opens a session and returns the pair.
//! 4. `refresh` mints a new access token for a live session.
//! 5. `logout` revokes the session behind a refresh token.
//! 6. `current_principal` resolves a bearer token.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{
    clock::Clock,
    config::{AuthConfig, LoginMode},
    credentials::{
        CredentialVerifier, Principal, PrincipalContext, Role, UserDirectory,
        normalize_identifier,
    },
    error::AuthError,
    kv::KeyValueStore,
    otp::{Notifier, OtpChallenge, OtpChallengeStore, VerifiedMarker},
    resolver::PrincipalResolver,
    session::{SessionContext, SessionRepository, SessionStore, TouchOutcome},
    token::{TokenIssuer, TokenKind},
};
use secrecy::SecretString;

/// Everything the service talks to.
pub struct AuthDeps {
    pub directory: Arc<dyn UserDirectory>,
    pub sessions: Arc<dyn SessionRepository>,
    pub challenges: Arc<dyn KeyValueStore<OtpChallenge>>,
    pub verified: Arc<dyn KeyValueStore<VerifiedMarker>>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub username: String,
    pub role: Role,
}

#[derive(Clone, Debug)]
pub enum LoginOutcome {
    ChallengeSent,
    Tokens(TokenPair),
}

#[derive(Clone, Debug)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub expires_in: u64,
    /// Present only when refresh tokens are rotated.
    pub refresh_token: Option<String>,
}

pub struct AuthService {
    config: AuthConfig,
    verifier: CredentialVerifier,
    directory: Arc<dyn UserDirectory>,
    otp: OtpChallengeStore,
    issuer: Arc<TokenIssuer>,
    sessions: Arc<SessionStore>,
    resolver: PrincipalResolver,
}

impl AuthService {
    /// Wire the service together.
    ///
    /// # Errors
    /// Returns `Configuration` if the signing secret is unusable.
    pub fn new(
        config: AuthConfig,
        signing_secret: &SecretString,
        deps: AuthDeps,
    ) -> Result<Self, AuthError> {
        let issuer = Arc::new(TokenIssuer::new(
            signing_secret,
            &config,
            Arc::clone(&deps.clock),
        )?);
        let sessions = Arc::new(SessionStore::new(
            &config,
            deps.sessions,
            Arc::clone(&deps.clock),
        ));
        let resolver = PrincipalResolver::new(
            Arc::clone(&issuer),
            Arc::clone(&sessions),
            config.session_binding(),
        );
        let otp = OtpChallengeStore::new(&config, deps.challenges, deps.verified, deps.notifier);
        let verifier = CredentialVerifier::new(Arc::clone(&deps.directory), config.secret_scheme());

        Ok(Self {
            config,
            verifier,
            directory: deps.directory,
            otp,
            issuer,
            sessions,
            resolver,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Start background eviction of stale challenges.
    #[must_use]
    pub fn spawn_sweeper(&self) -> [JoinHandle<()>; 2] {
        self.otp.spawn_sweeper(self.config.otp_sweep_interval())
    }

    /// # Errors
    /// `InvalidCredentials` or `Storage`.
    #[instrument(skip(self, password, context))]
    pub async fn request_login(
        &self,
        username: &str,
        password: &str,
        context: SessionContext,
    ) -> Result<LoginOutcome, AuthError> {
        let principal = self.verifier.verify(username, password).await?;

        match self.config.login_mode() {
            LoginMode::Otp => {
                self.otp.issue(&principal).await?;
                info!(user_id = %principal.id, "One-time code issued");
                Ok(LoginOutcome::ChallengeSent)
            }
            LoginMode::Direct => {
                let pair = self.open_session(&principal, context).await?;
                Ok(LoginOutcome::Tokens(pair))
            }
        }
    }

    /// # Errors
    /// `ChallengeNotFound`, `ChallengeExpired`, `ChallengeMismatch` or `Storage`.
    #[instrument(skip(self, code))]
    pub async fn verify_otp(&self, username: &str, code: &str) -> Result<(), AuthError> {
        let result = self.otp.verify(username, code).await;
        if let Err(err) = &result {
            warn!(error_code = err.error_code(), "One-time code rejected");
        }
        result
    }

    /// Exchange a verified marker for a token pair and a new session.
    ///
    /// # Errors
    /// `OtpNotVerified` without a marker, `InvalidCredentials` if the account
    /// disappeared or was disabled in between.
    #[instrument(skip(self, context))]
    pub async fn issue_tokens(
        &self,
        username: &str,
        context: SessionContext,
    ) -> Result<TokenPair, AuthError> {
        let username = normalize_identifier(username);
        if !self.otp.take_verified(&username).await? {
            return Err(AuthError::OtpNotVerified);
        }

        let Some(record) = self.directory.find_by_username(&username).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !record.is_active() {
            return Err(AuthError::InvalidCredentials);
        }
        let principal = record.to_principal()?;

        self.open_session(&principal, context).await
    }

    async fn open_session(
        &self,
        principal: &Principal,
        context: SessionContext,
    ) -> Result<TokenPair, AuthError> {
        let refresh = self.issuer.mint_refresh(principal)?;
        let session_id = self
            .sessions
            .create(&principal.id, &refresh.jti, &refresh.token, context)
            .await?;
        let access = self.issuer.mint_access(principal, Some(session_id))?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            expires_in: self.issuer.access_ttl().as_secs(),
            username: principal.username.clone(),
            role: principal.role,
        })
    }

    /// Mint a new access token from a refresh token.
    ///
    /// # Errors
    /// Token errors from verification, `SessionNotFound` for unknown or revoked
    /// sessions, `SessionExpired` when the idle or absolute deadline passed.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, AuthError> {
        let claims = self.issuer.verify(refresh_token, TokenKind::Refresh)?;
        let session = self.sessions.find_active(&claims.jti).await?;

        if self.sessions.touch_or_expire(session.session_id).await? == TouchOutcome::Expired {
            info!(session_id = %session.session_id, "Refresh rejected: session expired");
            return Err(AuthError::SessionExpired);
        }

        let Some(record) = self.directory.find_by_id(&session.principal_id).await? else {
            self.sessions.revoke(&claims.jti).await?;
            return Err(AuthError::InvalidCredentials);
        };
        if !record.is_active() {
            warn!(user_id = %record.id, "Refresh rejected: account inactive");
            self.sessions.revoke(&claims.jti).await?;
            return Err(AuthError::InvalidCredentials);
        }
        let principal = record.to_principal()?;

        let rotated = if self.config.rotate_refresh_tokens() {
            let next = self.issuer.mint_refresh(&principal)?;
            self.sessions
                .rotate_refresh(session.session_id, &claims.jti, &next.jti, &next.token)
                .await?;
            Some(next.token)
        } else {
            None
        };

        let access = self
            .issuer
            .mint_access(&principal, Some(session.session_id))?;
        debug!(session_id = %session.session_id, "Access token refreshed");

        Ok(RefreshedTokens {
            access_token: access.token,
            expires_in: self.issuer.access_ttl().as_secs(),
            refresh_token: rotated,
        })
    }

    /// Revoke the session behind a refresh token. Expired tokens are accepted
    /// and unknown sessions are ignored.
    ///
    /// # Errors
    /// `InvalidToken` or `TokenTypeMismatch` for tokens this service did not mint.
    #[instrument(skip_all)]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self
            .issuer
            .verify_ignoring_expiry(refresh_token, TokenKind::Refresh)?;
        self.sessions.revoke(&claims.jti).await
    }

    /// # Errors
    /// See [`PrincipalResolver::resolve`].
    pub async fn current_principal(&self, bearer: &str) -> Result<PrincipalContext, AuthError> {
        self.resolver.resolve(bearer).await
    }

    /// # Errors
    /// Returns `Storage` if the session store is unreachable.
    pub async fn ping(&self) -> Result<(), AuthError> {
        self.sessions.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        clock::ManualClock,
        config::SessionBinding,
        credentials::DirectoryRecord,
        directory::MemoryUserDirectory,
        kv::MemoryStore,
        otp::LogNotifier,
        session::MemorySessionRepository,
    };
    use chrono::{TimeDelta, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingNotifier {
        codes: Mutex<Vec<String>>,
    }

    impl Notifier for CapturingNotifier {
        fn send(&self, _destination: &str, message: &str) -> bool {
            let code = message
                .split_whitespace()
                .find(|word| word.len() == 6 && word.chars().all(|c| c.is_ascii_digit()));
            if let (Some(code), Ok(mut codes)) = (code, self.codes.lock()) {
                codes.push(code.to_string());
            }
            true
        }
    }

    struct Harness {
        service: AuthService,
        directory: Arc<MemoryUserDirectory>,
        clock: Arc<ManualClock>,
        notifier: Arc<CapturingNotifier>,
    }

    fn harness(config: AuthConfig) -> Result<Harness, AuthError> {
        let directory = Arc::new(MemoryUserDirectory::new());
        directory.insert(DirectoryRecord {
            id: "u-1".to_string(),
            username: "root".to_string(),
            display_name: "Root".to_string(),
            secret: "s3cret".to_string(),
            role: "super_admin".to_string(),
            status: "Active".to_string(),
            contact: Some("root@example.com".to_string()),
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let notifier = Arc::new(CapturingNotifier::default());
        let service = AuthService::new(
            config,
            &SecretString::from("service-secret".to_string()),
            AuthDeps {
                directory: directory.clone(),
                sessions: Arc::new(MemorySessionRepository::new()),
                challenges: Arc::new(MemoryStore::new()),
                verified: Arc::new(MemoryStore::new()),
                notifier: notifier.clone(),
                clock: clock.clone(),
            },
        )?;
        Ok(Harness {
            service,
            directory,
            clock,
            notifier,
        })
    }

    async fn wait_for_code(notifier: &CapturingNotifier) -> String {
        for _ in 0..200 {
            if let Some(code) = notifier.codes.lock().ok().and_then(|c| c.last().cloned()) {
                return code;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        String::new()
    }

    async fn full_login(h: &Harness) -> Result<TokenPair, AuthError> {
        let outcome = h
            .service
            .request_login("Root", "s3cret", SessionContext::default())
            .await?;
        assert!(matches!(outcome, LoginOutcome::ChallengeSent));
        let code = wait_for_code(&h.notifier).await;
        h.service.verify_otp("root", &code).await?;
        h.service
            .issue_tokens("root", SessionContext::default())
            .await
    }

    #[tokio::test]
    async fn otp_login_issues_pair() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new())?;
        let pair = full_login(&h).await?;
        assert_eq!(pair.role, Role::SuperAdmin);
        assert_eq!(pair.expires_in, 3600);

        let me = h.service.current_principal(&pair.access_token).await?;
        assert_eq!(me.id, "u-1");
        assert_eq!(me.role, Role::SuperAdmin);
        Ok(())
    }

    #[tokio::test]
    async fn tokens_require_verified_code() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new())?;
        h.service
            .request_login("root", "s3cret", SessionContext::default())
            .await?;
        assert!(matches!(
            h.service
                .issue_tokens("root", SessionContext::default())
                .await,
            Err(AuthError::OtpNotVerified)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn verified_marker_is_single_use() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new())?;
        full_login(&h).await?;
        assert!(matches!(
            h.service
                .issue_tokens("root", SessionContext::default())
                .await,
            Err(AuthError::OtpNotVerified)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn direct_mode_skips_second_factor() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new().with_login_mode(LoginMode::Direct))?;
        let outcome = h
            .service
            .request_login("root", "s3cret", SessionContext::default())
            .await?;
        let LoginOutcome::Tokens(pair) = outcome else {
            return Err(AuthError::InvalidRequest("expected tokens".into()));
        };
        assert!(h.service.current_principal(&pair.access_token).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new())?;
        assert!(matches!(
            h.service
                .request_login("root", "guess", SessionContext::default())
                .await,
            Err(AuthError::InvalidCredentials)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_extends_session() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new())?;
        let pair = full_login(&h).await?;

        h.clock.advance(TimeDelta::minutes(100));
        let refreshed = h.service.refresh(&pair.refresh_token).await?;
        assert!(refreshed.refresh_token.is_none());

        h.clock.advance(TimeDelta::minutes(50));
        let me = h.service.current_principal(&refreshed.access_token).await?;
        assert_eq!(me.username, "root");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_after_logout_never_mints() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new())?;
        let pair = full_login(&h).await?;

        h.service.logout(&pair.refresh_token).await?;
        h.service.logout(&pair.refresh_token).await?;

        let result = h.service.refresh(&pair.refresh_token).await;
        assert!(matches!(
            result,
            Err(AuthError::SessionNotFound | AuthError::SessionExpired)
        ));
        assert!(matches!(
            h.service.current_principal(&pair.access_token).await,
            Err(AuthError::SessionExpired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_after_idle_timeout_is_expired() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new())?;
        let pair = full_login(&h).await?;

        h.clock.advance(TimeDelta::minutes(121));
        assert!(matches!(
            h.service.refresh(&pair.refresh_token).await,
            Err(AuthError::SessionExpired)
        ));
        // The expiry was recorded: the row is now revoked.
        assert!(matches!(
            h.service.refresh(&pair.refresh_token).await,
            Err(AuthError::SessionNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn rotation_invalidates_previous_refresh_token() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new().with_rotate_refresh_tokens(true))?;
        let pair = full_login(&h).await?;

        let refreshed = h.service.refresh(&pair.refresh_token).await?;
        let Some(next) = refreshed.refresh_token else {
            return Err(AuthError::InvalidRequest("expected rotation".into()));
        };
        assert!(matches!(
            h.service.refresh(&pair.refresh_token).await,
            Err(AuthError::SessionNotFound)
        ));
        assert!(h.service.refresh(&next).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn disabled_account_cannot_refresh() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new())?;
        let pair = full_login(&h).await?;

        h.directory.set_status("root", "Disabled");
        assert!(matches!(
            h.service.refresh(&pair.refresh_token).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            h.service.current_principal(&pair.access_token).await,
            Err(AuthError::SessionExpired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn logout_rejects_access_tokens() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new())?;
        let pair = full_login(&h).await?;
        assert!(matches!(
            h.service.logout(&pair.access_token).await,
            Err(AuthError::TokenTypeMismatch)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn stateless_binding_survives_idle_timeout() -> Result<(), AuthError> {
        let h = harness(AuthConfig::new().with_session_binding(SessionBinding::Stateless))?;
        let pair = full_login(&h).await?;
        h.clock.advance(TimeDelta::minutes(59));
        assert!(h.service.current_principal(&pair.access_token).await.is_ok());
        Ok(())
    }

    #[test]
    fn empty_secret_fails_at_boot() {
        let result = AuthService::new(
            AuthConfig::new(),
            &SecretString::from(String::new()),
            AuthDeps {
                directory: Arc::new(MemoryUserDirectory::new()),
                sessions: Arc::new(MemorySessionRepository::new()),
                challenges: Arc::new(MemoryStore::new()),
                verified: Arc::new(MemoryStore::new()),
                notifier: Arc::new(LogNotifier),
                clock: Arc::new(ManualClock::new(Utc::now())),
            },
        );
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }
}
