//! In-process session repository.
//!
//! Each row sits behind its own mutex so `touch_or_expire` on one session
//! never waits on another. The outer lock only guards the id and jti indexes.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{Session, SessionRepository, TouchOutcome};

#[derive(Default)]
struct Indexes {
    rows: HashMap<Uuid, Arc<Mutex<Session>>>,
    by_jti: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemorySessionRepository {
    indexes: RwLock<Indexes>,
}

impl MemorySessionRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn row(&self, session_id: Uuid) -> Option<Arc<Mutex<Session>>> {
        self.indexes.read().await.rows.get(&session_id).cloned()
    }

    async fn row_by_jti(&self, refresh_jti: &str) -> Option<Arc<Mutex<Session>>> {
        let indexes = self.indexes.read().await;
        indexes
            .by_jti
            .get(refresh_jti)
            .and_then(|id| indexes.rows.get(id))
            .cloned()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn insert(&self, session: &Session) -> Result<()> {
        let mut indexes = self.indexes.write().await;
        if indexes.by_jti.contains_key(&session.refresh_jti) {
            bail!("refresh token id already bound to a session");
        }
        if indexes.rows.contains_key(&session.session_id) {
            bail!("session id collision");
        }
        indexes
            .by_jti
            .insert(session.refresh_jti.clone(), session.session_id);
        indexes
            .rows
            .insert(session.session_id, Arc::new(Mutex::new(session.clone())));
        Ok(())
    }

    async fn find_by_refresh_jti(&self, refresh_jti: &str) -> Result<Option<Session>> {
        match self.row_by_jti(refresh_jti).await {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, session_id: Uuid) -> Result<Option<Session>> {
        match self.row(session_id).await {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn touch_or_expire(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
        idle_timeout: Duration,
    ) -> Result<Option<TouchOutcome>> {
        let Some(row) = self.row(session_id).await else {
            return Ok(None);
        };

        let mut session = row.lock().await;
        if session.revoked {
            return Ok(Some(TouchOutcome::Expired));
        }
        if session.is_expired_at(now, idle_timeout) {
            session.revoked = true;
            return Ok(Some(TouchOutcome::Expired));
        }
        session.last_activity = session.last_activity.max(now);
        Ok(Some(TouchOutcome::Fresh))
    }

    async fn revoke_by_refresh_jti(&self, refresh_jti: &str) -> Result<bool> {
        match self.row_by_jti(refresh_jti).await {
            Some(row) => {
                row.lock().await.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rotate_refresh(
        &self,
        session_id: Uuid,
        old_jti: &str,
        new_jti: &str,
        new_token: &str,
    ) -> Result<bool> {
        let mut indexes = self.indexes.write().await;
        if indexes.by_jti.contains_key(new_jti) {
            bail!("refresh token id already bound to a session");
        }
        let Some(row) = indexes.rows.get(&session_id).cloned() else {
            return Ok(false);
        };

        let mut session = row.lock().await;
        if session.revoked || session.refresh_jti != old_jti {
            return Ok(false);
        }

        session.refresh_jti = new_jti.to_string();
        session.refresh_token = new_token.to_string();
        indexes.by_jti.remove(old_jti);
        indexes.by_jti.insert(new_jti.to_string(), session_id);
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
