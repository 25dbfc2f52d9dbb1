//! Session records and their lifecycle.
//!
//! Flow Overview: a session row is created for every issued token pair and is
//! joined to the refresh token through its `jti`. A session is usable only
//! while it is not revoked, has not reached its absolute expiry, and has seen
//! activity within the idle timeout. Expiry is detected lazily by
//! [`SessionStore::touch_or_expire`], which either records activity or revokes
//! the row in one atomic step. Revocation is terminal.

mod memory;
mod postgres;

pub use memory::MemorySessionRepository;
pub use postgres::PgSessionRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    clock::{Clock, saturating_add},
    config::AuthConfig,
    error::AuthError,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub session_id: Uuid,
    pub principal_id: String,
    pub refresh_jti: String,
    pub refresh_token: String,
    pub device: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub revoked: bool,
}

impl Session {
    /// True once either the absolute or the idle deadline has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        now >= self.expires_at || now >= saturating_add(self.last_activity, idle_timeout)
    }

    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        !self.revoked && !self.is_expired_at(now, idle_timeout)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchOutcome {
    Fresh,
    Expired,
}

/// Storage for session rows.
///
/// `touch_or_expire` must be linearizable per row: the check and the write
/// happen as one step, `revoked` never goes back to false, and
/// `last_activity` never moves backwards.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new row. Fails if the `refresh_jti` is already used.
    async fn insert(&self, session: &Session) -> anyhow::Result<()>;

    async fn find_by_refresh_jti(&self, refresh_jti: &str) -> anyhow::Result<Option<Session>>;

    async fn find_by_id(&self, session_id: Uuid) -> anyhow::Result<Option<Session>>;

    /// `None` when no row has this id.
    async fn touch_or_expire(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
        idle_timeout: Duration,
    ) -> anyhow::Result<Option<TouchOutcome>>;

    /// Returns whether a row matched. Already revoked rows still match.
    async fn revoke_by_refresh_jti(&self, refresh_jti: &str) -> anyhow::Result<bool>;

    /// Swap the refresh token of a live session, only if it still holds `old_jti`.
    async fn rotate_refresh(
        &self,
        session_id: Uuid,
        old_jti: &str,
        new_jti: &str,
        new_token: &str,
    ) -> anyhow::Result<bool>;

    async fn ping(&self) -> anyhow::Result<()>;
}

/// Context recorded with a new session.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    pub device: Option<String>,
}

pub struct SessionStore {
    repository: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    absolute_ttl: Duration,
    idle_timeout: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        repository: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            clock,
            absolute_ttl: config.session_absolute_ttl(),
            idle_timeout: config.session_idle_timeout(),
        }
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Record a new login.
    ///
    /// # Errors
    /// Returns `Storage` if the row cannot be written.
    pub async fn create(
        &self,
        principal_id: &str,
        refresh_jti: &str,
        refresh_token: &str,
        context: SessionContext,
    ) -> Result<Uuid, AuthError> {
        let now = self.clock.now();
        let session = Session {
            session_id: Uuid::new_v4(),
            principal_id: principal_id.to_string(),
            refresh_jti: refresh_jti.to_string(),
            refresh_token: refresh_token.to_string(),
            device: context.device,
            issued_at: now,
            expires_at: saturating_add(now, self.absolute_ttl),
            last_activity: now,
            revoked: false,
        };

        self.repository.insert(&session).await?;
        info!(session_id = %session.session_id, %principal_id, "Session created");

        Ok(session.session_id)
    }

    /// Look up a non-revoked session by refresh token id.
    ///
    /// The row may still be past its absolute or idle deadline; callers check.
    ///
    /// # Errors
    /// `SessionNotFound` when no unrevoked row matches.
    pub async fn find_active(&self, refresh_jti: &str) -> Result<Session, AuthError> {
        match self.repository.find_by_refresh_jti(refresh_jti).await? {
            Some(session) if !session.revoked => Ok(session),
            Some(session) => {
                debug!(session_id = %session.session_id, "Session already revoked");
                Err(AuthError::SessionNotFound)
            }
            None => Err(AuthError::SessionNotFound),
        }
    }

    /// Record activity on a session, or revoke it if a deadline has passed.
    ///
    /// # Errors
    /// `SessionNotFound` when no row has this id.
    pub async fn touch_or_expire(&self, session_id: Uuid) -> Result<TouchOutcome, AuthError> {
        let now = self.clock.now();
        let outcome = self
            .repository
            .touch_or_expire(session_id, now, self.idle_timeout)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        if outcome == TouchOutcome::Expired {
            debug!(%session_id, "Session expired or revoked");
        }
        Ok(outcome)
    }

    /// Revoke the session holding `refresh_jti`. Unknown ids are ignored.
    ///
    /// # Errors
    /// Returns `Storage` if the backing store fails.
    pub async fn revoke(&self, refresh_jti: &str) -> Result<(), AuthError> {
        if self.repository.revoke_by_refresh_jti(refresh_jti).await? {
            info!(%refresh_jti, "Session revoked");
        } else {
            debug!(%refresh_jti, "Revoke ignored for unknown refresh token");
        }
        Ok(())
    }

    /// Replace the refresh token of a session.
    ///
    /// # Errors
    /// `SessionNotFound` if the session was revoked or rotated concurrently.
    pub async fn rotate_refresh(
        &self,
        session_id: Uuid,
        old_jti: &str,
        new_jti: &str,
        new_token: &str,
    ) -> Result<(), AuthError> {
        if self
            .repository
            .rotate_refresh(session_id, old_jti, new_jti, new_token)
            .await?
        {
            debug!(%session_id, "Refresh token rotated");
            Ok(())
        } else {
            Err(AuthError::SessionNotFound)
        }
    }

    /// # Errors
    /// Returns `Storage` if the backing store is unreachable.
    pub async fn ping(&self) -> Result<(), AuthError> {
        Ok(self.repository.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use chrono::TimeDelta;

    const IDLE: Duration = Duration::from_secs(120 * 60);

    fn store(clock: Arc<ManualClock>) -> SessionStore {
        SessionStore::new(
            &AuthConfig::new(),
            Arc::new(MemorySessionRepository::new()),
            clock,
        )
    }

    #[test]
    fn usability_requires_all_three_conditions() {
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4(),
            principal_id: "u-1".to_string(),
            refresh_jti: "j".to_string(),
            refresh_token: "t".to_string(),
            device: None,
            issued_at: now,
            expires_at: now + TimeDelta::days(15),
            last_activity: now,
            revoked: false,
        };

        assert!(session.is_usable_at(now, IDLE));
        assert!(!session.is_usable_at(now + TimeDelta::minutes(120), IDLE));
        assert!(!session.is_usable_at(now + TimeDelta::days(15), IDLE));
        assert!(
            !Session {
                revoked: true,
                ..session
            }
            .is_usable_at(now, IDLE)
        );
    }

    #[tokio::test]
    async fn create_then_find_active() -> Result<(), AuthError> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store(clock);
        let id = store
            .create(
                "u-1",
                "jti-1",
                "token",
                SessionContext {
                    device: Some("curl/8".to_string()),
                },
            )
            .await?;

        let session = store.find_active("jti-1").await?;
        assert_eq!(session.session_id, id);
        assert_eq!(session.device.as_deref(), Some("curl/8"));
        assert_eq!(session.expires_at - session.issued_at, TimeDelta::days(15));
        assert!(matches!(
            store.find_active("jti-2").await,
            Err(AuthError::SessionNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn idle_timeout_revokes_permanently() -> Result<(), AuthError> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store(clock.clone());
        let id = store
            .create("u-1", "jti-1", "token", SessionContext::default())
            .await?;

        clock.advance(TimeDelta::minutes(119));
        assert_eq!(store.touch_or_expire(id).await?, TouchOutcome::Fresh);

        // Activity moved the deadline.
        clock.advance(TimeDelta::minutes(119));
        assert_eq!(store.touch_or_expire(id).await?, TouchOutcome::Fresh);

        clock.advance(TimeDelta::minutes(121));
        assert_eq!(store.touch_or_expire(id).await?, TouchOutcome::Expired);

        // Going back in time cannot revive it.
        clock.advance(TimeDelta::minutes(-200));
        assert_eq!(store.touch_or_expire(id).await?, TouchOutcome::Expired);
        assert!(matches!(
            store.find_active("jti-1").await,
            Err(AuthError::SessionNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn absolute_expiry_revokes_even_when_active() -> Result<(), AuthError> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store(clock.clone());
        let id = store
            .create("u-1", "jti-1", "token", SessionContext::default())
            .await?;

        for _ in 0..(15 * 24) {
            clock.advance(TimeDelta::hours(1));
            if store.touch_or_expire(id).await? == TouchOutcome::Expired {
                break;
            }
        }
        assert!(matches!(
            store.find_active("jti-1").await,
            Err(AuthError::SessionNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_is_idempotent() -> Result<(), AuthError> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store(clock);
        let id = store
            .create("u-1", "jti-1", "token", SessionContext::default())
            .await?;

        store.revoke("jti-1").await?;
        store.revoke("jti-1").await?;
        store.revoke("never-issued").await?;

        assert_eq!(store.touch_or_expire(id).await?, TouchOutcome::Expired);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_session_touch_is_not_found() {
        let store = store(Arc::new(ManualClock::new(Utc::now())));
        assert!(matches!(
            store.touch_or_expire(Uuid::new_v4()).await,
            Err(AuthError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn rotation_swaps_join_key_once() -> Result<(), AuthError> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store(clock);
        let id = store
            .create("u-1", "jti-1", "token-1", SessionContext::default())
            .await?;

        store.rotate_refresh(id, "jti-1", "jti-2", "token-2").await?;
        assert!(matches!(
            store.rotate_refresh(id, "jti-1", "jti-3", "token-3").await,
            Err(AuthError::SessionNotFound)
        ));
        assert!(store.find_active("jti-1").await.is_err());
        assert_eq!(store.find_active("jti-2").await?.refresh_token, "token-2");
        Ok(())
    }
}
