//! Keyed storage with per-entry TTL.
//!
//! Challenges and verified markers live behind [`KeyValueStore`] so the backing
//! storage can be swapped. [`MemoryStore`] keeps entries in process and evicts
//! expired ones lazily on read and eagerly from [`spawn_sweeper`].

use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

#[async_trait]
pub trait KeyValueStore<V>: Send + Sync
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>>;

    /// Insert or overwrite.
    async fn put(&self, key: &str, value: V, ttl: Duration) -> Result<()>;

    /// Remove and return the live value, if any.
    async fn delete(&self, key: &str) -> Result<Option<V>>;

    /// Replace the value only if the live entry equals `expected`.
    ///
    /// `replacement = None` deletes the entry. Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &V,
        replacement: Option<(V, Duration)>,
    ) -> Result<bool>;

    /// Drop every expired entry and return how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Clone, Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
pub struct MemoryStore<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> MemoryStore<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for MemoryStore<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<Option<V>> {
        let now = Instant::now();
        let removed = self.entries.lock().await.remove(key);
        Ok(removed
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &V,
        replacement: Option<(V, Duration)>,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let matches = entries
            .get(key)
            .is_some_and(|entry| entry.is_live(now) && entry.value == *expected);
        if !matches {
            return Ok(false);
        }

        match replacement {
            Some((value, ttl)) => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value,
                        expires_at: now + ttl,
                    },
                );
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(true)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}

/// Periodically purge expired entries from `store`.
///
/// Aborting the returned handle at any point leaves the store consistent.
pub fn spawn_sweeper<V>(
    name: &'static str,
    store: Arc<dyn KeyValueStore<V>>,
    interval: Duration,
) -> JoinHandle<()>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(store = name, removed, "Purged expired entries"),
                Err(err) => warn!(store = name, "Failed to purge expired entries: {err:#}"),
            }
        }
    })
}
