//! the cache side of the cache-aside lookup
//!
//! A `CacheDb` only has to provide the raw primitives (`*_in_db`, `is_connected`).
//! The public operations are built on top of them and never fail loudly:
//! a broken backend reads as `CacheRead::Unavailable` and writes return `false`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::WeatherRecord;
use crate::city_key::CityKey;

pub mod memory;
#[cfg(feature = "cache-redis")]
pub mod redis;

/// one hour
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// one year, longer ttls are refused
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// what a read against the cache produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRead<T> {
    /// the key holds a value
    Found(T),
    /// the store answered, the key is not there (or expired)
    Absent,
    /// the store could not be reached
    Unavailable,
}

impl<T> CacheRead<T> {
    /// simple check
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// error returned by the backend primitives
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheDbError {
    /// no usable connection to the store
    #[error("data store disconnected `{0}`")]
    Disconnect(String),

    /// the store did not answer in time
    #[error("data store timed out after {0:?}")]
    Timeout(Duration),

    /// the store answered with an error
    #[error("internal `{0}`")]
    Internal(String),
}

/// ttl used for a write: an omitted or zero ttl falls back to the default one
#[must_use]
pub fn effective_ttl(ttl: Option<Duration>, default: Duration) -> Duration {
    ttl.filter(|ttl| !ttl.is_zero()).unwrap_or(default)
}

/// key-value store with expiry, used as the cache in front of the provider
#[async_trait]
pub trait CacheDb: Send + Sync {
    /// ttl applied when `set` is called without one
    fn default_ttl(&self) -> Duration;

    /// raw read
    async fn get_from_db(&self, key: &CityKey) -> Result<Option<String>, CacheDbError>;

    /// raw write, the entry must expire after `ttl`
    async fn set_in_db(&self, key: &CityKey, value: String, ttl: Duration)
    -> Result<(), CacheDbError>;

    /// raw delete, deleting a missing key is not an error
    async fn delete_in_db(&self, key: &CityKey) -> Result<(), CacheDbError>;

    /// raw flush of every entry
    async fn clear_db(&self) -> Result<(), CacheDbError>;

    /// liveness check, allowed to re-establish a lost connection
    async fn is_connected(&self) -> bool;

    /// read a key, backend errors are logged and reported as `Unavailable`
    async fn get(&self, key: &CityKey) -> CacheRead<String> {
        match self.get_from_db(key).await {
            Ok(Some(value)) => {
                debug!(key = %key, "cache hit");
                CacheRead::Found(value)
            }
            Ok(None) => {
                debug!(key = %key, "cache miss");
                CacheRead::Absent
            }
            Err(err) => {
                error!(operation = "get", key = %key, error = %err, "cache get error");
                CacheRead::Unavailable
            }
        }
    }

    /// write a key, returns `false` when the backend failed or the ttl is above `MAX_TTL`
    async fn set(&self, key: &CityKey, value: String, ttl: Option<Duration>) -> bool {
        let ttl = effective_ttl(ttl, self.default_ttl());
        if ttl > MAX_TTL {
            error!(operation = "set", key = %key, ttl = ttl.as_secs(), "cache ttl too long");
            return false;
        }

        match self.set_in_db(key, value, ttl).await {
            Ok(()) => {
                debug!(key = %key, ttl = ttl.as_secs(), "cache set");
                true
            }
            Err(err) => {
                error!(operation = "set", key = %key, error = %err, "cache set error");
                false
            }
        }
    }

    /// delete a key, returns `false` when the backend failed
    async fn delete(&self, key: &CityKey) -> bool {
        match self.delete_in_db(key).await {
            Ok(()) => {
                debug!(key = %key, "cache deleted");
                true
            }
            Err(err) => {
                error!(operation = "delete", key = %key, error = %err, "cache delete error");
                false
            }
        }
    }

    /// drop every entry, returns `false` when the backend failed
    async fn clear(&self) -> bool {
        match self.clear_db().await {
            Ok(()) => {
                info!("cache cleared");
                true
            }
            Err(err) => {
                error!(operation = "clear", error = %err, "cache clear error");
                false
            }
        }
    }

    /// typed read, an entry that does not parse is treated as absent
    async fn load(&self, key: &CityKey) -> CacheRead<WeatherRecord> {
        match self.get(key).await {
            CacheRead::Found(value) => match serde_json::from_str(&value) {
                Ok(record) => CacheRead::Found(record),
                Err(err) => {
                    warn!(operation = "load", key = %key, error = %err, "unreadable cache entry");
                    CacheRead::Absent
                }
            },
            CacheRead::Absent => CacheRead::Absent,
            CacheRead::Unavailable => CacheRead::Unavailable,
        }
    }

    /// typed write
    async fn store(&self, key: &CityKey, record: &WeatherRecord, ttl: Option<Duration>) -> bool {
        match serde_json::to_string(record) {
            Ok(value) => self.set(key, value, ttl).await,
            Err(err) => {
                error!(operation = "store", key = %key, error = %err, "cannot serialize record");
                false
            }
        }
    }
}

#[async_trait]
impl<T> CacheDb for Arc<T>
where
    T: CacheDb + ?Sized,
{
    fn default_ttl(&self) -> Duration {
        (**self).default_ttl()
    }

    async fn get_from_db(&self, key: &CityKey) -> Result<Option<String>, CacheDbError> {
        (**self).get_from_db(key).await
    }

    async fn set_in_db(
        &self,
        key: &CityKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheDbError> {
        (**self).set_in_db(key, value, ttl).await
    }

    async fn delete_in_db(&self, key: &CityKey) -> Result<(), CacheDbError> {
        (**self).delete_in_db(key).await
    }

    async fn clear_db(&self) -> Result<(), CacheDbError> {
        (**self).clear_db().await
    }

    async fn is_connected(&self) -> bool {
        (**self).is_connected().await
    }
}
