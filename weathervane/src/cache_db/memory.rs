//! In-process implementation of the `CacheDb`
//!
//! Expiry is checked on read against the tokio clock, so paused-time tests
//! can move past a ttl without sleeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cache_db::{CacheDb, CacheDbError, DEFAULT_TTL};
use crate::city_key::CityKey;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// The `MemoryCache` keeps entries in a map, it can be switched off to act like a dead store.
#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
    ttl: Duration,
}

impl MemoryCache {
    /// simple constructor
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            ttl,
        }
    }

    /// while unavailable every primitive fails and `is_connected` is false
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// no live entry
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<(), CacheDbError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheDbError::Disconnect("memory cache switched off".to_string()))
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl CacheDb for MemoryCache {
    fn default_ttl(&self) -> Duration {
        self.ttl
    }

    async fn get_from_db(&self, key: &CityKey) -> Result<Option<String>, CacheDbError> {
        self.check_available()?;

        let mut entries = self.entries.lock().await;
        let key = key.format();

        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_in_db(
        &self,
        key: &CityKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheDbError> {
        self.check_available()?;

        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CacheDbError::Internal(format!("ttl {ttl:?} out of range")))?;

        let entry = Entry { value, expires_at };
        self.entries.lock().await.insert(key.format(), entry);

        Ok(())
    }

    async fn delete_in_db(&self, key: &CityKey) -> Result<(), CacheDbError> {
        self.check_available()?;

        self.entries.lock().await.remove(&key.format());

        Ok(())
    }

    async fn clear_db(&self) -> Result<(), CacheDbError> {
        self.check_available()?;

        self.entries.lock().await.clear();

        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
