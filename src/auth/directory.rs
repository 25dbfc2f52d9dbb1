//! User directory adapters.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};
use tracing::Instrument;

use super::credentials::{DirectoryRecord, UserDirectory, normalize_identifier};

const SELECT_COLUMNS: &str = "SELECT id::text AS id, username, display_name, password, role, status, email FROM users";

/// Postgres-backed directory reading the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> Result<Option<DirectoryRecord>> {
        let query = format!("{SELECT_COLUMNS} WHERE {column} = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup directory record")?;

        Ok(row.map(|row| record_from_row(&row)))
    }
}

fn record_from_row(row: &PgRow) -> DirectoryRecord {
    DirectoryRecord {
        id: row.get("id"),
        username: row.get("username"),
        display_name: row.get("display_name"),
        secret: row.get("password"),
        role: row.get("role"),
        status: row.get("status"),
        contact: row.get("email"),
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<DirectoryRecord>> {
        self.fetch_one_by("lower(username)", &normalize_identifier(username))
            .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<DirectoryRecord>> {
        self.fetch_one_by("id::text", id).await
    }
}

/// In-process directory, keyed by normalized username.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    records: RwLock<HashMap<String, DirectoryRecord>>,
}

impl MemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: DirectoryRecord) {
        let key = normalize_identifier(&record.username);
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, record);
    }

    pub fn set_status(&self, username: &str, status: &str) {
        if let Some(record) = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&normalize_identifier(username))
        {
            record.status = status.to_string();
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<DirectoryRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_identifier(username))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<DirectoryRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|record| record.id == id)
            .cloned())
    }
}
