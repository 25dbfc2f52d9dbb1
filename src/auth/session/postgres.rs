//! Postgres session repository over the `auth_sessions` table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::{Session, SessionRepository, TouchOutcome};

const SESSION_COLUMNS: &str = "session_id, principal_id, refresh_jti, refresh_token, device, issued_at, expires_at, last_activity, revoked";

// Every expression in SET reads the pre-update row, and the row lock taken by
// UPDATE serialises concurrent callers, so check and write are one step.
const TOUCH_OR_EXPIRE: &str = r"
    UPDATE auth_sessions
    SET revoked = revoked
            OR $2 >= expires_at
            OR $2 - last_activity >= $3 * INTERVAL '1 second',
        last_activity = CASE
            WHEN revoked
                OR $2 >= expires_at
                OR $2 - last_activity >= $3 * INTERVAL '1 second'
            THEN last_activity
            ELSE GREATEST(last_activity, $2)
        END
    WHERE session_id = $1
    RETURNING revoked
";

#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &PgRow) -> Session {
    Session {
        session_id: row.get("session_id"),
        principal_id: row.get("principal_id"),
        refresh_jti: row.get("refresh_jti"),
        refresh_token: row.get("refresh_token"),
        device: row.get("device"),
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
        last_activity: row.get("last_activity"),
        revoked: row.get("revoked"),
    }
}

fn duration_seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert(&self, session: &Session) -> Result<()> {
        let query = r"
            INSERT INTO auth_sessions
                (session_id, principal_id, refresh_jti, refresh_token, device,
                 issued_at, expires_at, last_activity, revoked)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session.session_id)
            .bind(&session.principal_id)
            .bind(&session.refresh_jti)
            .bind(&session.refresh_token)
            .bind(&session.device)
            .bind(session.issued_at)
            .bind(session.expires_at)
            .bind(session.last_activity)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn find_by_refresh_jti(&self, refresh_jti: &str) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM auth_sessions WHERE refresh_jti = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(refresh_jti)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session by refresh token id")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn find_by_id(&self, session_id: Uuid) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM auth_sessions WHERE session_id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn touch_or_expire(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
        idle_timeout: Duration,
    ) -> Result<Option<TouchOutcome>> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = TOUCH_OR_EXPIRE
        );
        let row = sqlx::query(TOUCH_OR_EXPIRE)
            .bind(session_id)
            .bind(now)
            .bind(duration_seconds(idle_timeout))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to touch session")?;

        Ok(row.map(|row| {
            if row.get::<bool, _>("revoked") {
                TouchOutcome::Expired
            } else {
                TouchOutcome::Fresh
            }
        }))
    }

    async fn revoke_by_refresh_jti(&self, refresh_jti: &str) -> Result<bool> {
        let query = "UPDATE auth_sessions SET revoked = TRUE WHERE refresh_jti = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(refresh_jti)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn rotate_refresh(
        &self,
        session_id: Uuid,
        old_jti: &str,
        new_jti: &str,
        new_token: &str,
    ) -> Result<bool> {
        let query = r"
            UPDATE auth_sessions
            SET refresh_jti = $3, refresh_token = $4
            WHERE session_id = $1 AND refresh_jti = $2 AND NOT revoked
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(session_id)
            .bind(old_jti)
            .bind(new_jti)
            .bind(new_token)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to rotate refresh token")?;
        Ok(result.rows_affected() == 1)
    }

    async fn ping(&self) -> Result<()> {
        let span = tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to ping database")?;
        Ok(())
    }
}
