//! Redis implementation of the `CacheDb`
//!
//! The connection handle is optional: it is dropped as soon as the link looks broken
//! and re-opened on the next use or liveness check. Replacing it is a swap under a
//! short write lock, so two racing reconnects simply leave the last handle in place.
//! Every handle carries a generation, a failure only drops the handle it happened on.
//! After a failed attempt, cache operations wait `reconnect_backoff` before trying again;
//! the liveness check always tries.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{
    AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError,
    RedisResult,
};
use tokio::sync::RwLock;
use tokio::time::{Instant, timeout};
use tracing::{info, warn};

use crate::cache_db::{CacheDb, CacheDbError, DEFAULT_TTL};
use crate::city_key::CityKey;

/// bound on opening a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// bound on a single command round-trip
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
/// pause between two reconnect attempts made by cache operations
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// whether a handle is currently held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// a handle is held and was working last time it was used
    Connected,
    /// no handle, the next use will try to open one
    Disconnected,
}

/// tuning of the `RedisCache`
#[derive(Debug, Clone, Copy)]
pub struct RedisOptions {
    /// ttl applied when none is given
    pub ttl: Duration,
    /// bound on opening a connection
    pub connect_timeout: Duration,
    /// bound on a single command
    pub operation_timeout: Duration,
    /// cache operations do not reconnect sooner than this after a failed attempt
    pub reconnect_backoff: Duration,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

/// the held handle, tagged with the generation it was opened in
struct Slot<C> {
    connection: Option<(u64, C)>,
    generation: u64,
    failed_at: Option<Instant>,
}

impl<C: Clone> Slot<C> {
    const fn new() -> Self {
        Self {
            connection: None,
            generation: 0,
            failed_at: None,
        }
    }

    fn current(&self) -> Option<(u64, C)> {
        self.connection.clone()
    }

    fn adopt(&mut self, connection: C) -> u64 {
        self.generation += 1;
        self.connection = Some((self.generation, connection));
        self.failed_at = None;
        self.generation
    }

    fn failed(&mut self) {
        self.failed_at = Some(Instant::now());
    }

    fn backing_off(&self, backoff: Duration) -> bool {
        self.failed_at.is_some_and(|at| at.elapsed() < backoff)
    }

    /// only the handle of that generation is dropped
    fn release(&mut self, generation: u64) -> bool {
        if self
            .connection
            .as_ref()
            .is_some_and(|(current, _)| *current == generation)
        {
            self.connection = None;
            return true;
        }
        false
    }
}

/// The `RedisCache` is a container for the client and the current connection
pub struct RedisCache {
    client: Client,
    addr: String,
    slot: RwLock<Slot<MultiplexedConnection>>,
    options: RedisOptions,
}

impl RedisCache {
    /// no connection is opened here, the first use or check does it
    #[must_use]
    pub fn new(client: Client, options: RedisOptions) -> Self {
        let addr = client.get_connection_info().addr.to_string();
        Self {
            client,
            addr,
            slot: RwLock::new(Slot::new()),
            options,
        }
    }

    /// build the client from its parts
    ///
    /// # Errors
    ///
    /// Will return `Err` if the connection info is rejected by the client
    pub fn open(
        host: &str,
        port: u16,
        db: i64,
        password: Option<String>,
        options: RedisOptions,
    ) -> Result<Self, CacheDbError> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host.to_string(), port),
            redis: RedisConnectionInfo {
                db,
                password,
                ..RedisConnectionInfo::default()
            },
        };

        let client = Client::open(info).map_err(|e| CacheDbError::Internal(e.to_string()))?;

        Ok(Self::new(client, options))
    }

    /// current state, without checking
    pub async fn state(&self) -> ConnectionState {
        if self.slot.read().await.connection.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// host:port of the server
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn reconnect(&self) -> Result<(u64, MultiplexedConnection), CacheDbError> {
        info!(addr = %self.addr, "attempting redis reconnection");

        let opened = timeout(
            self.options.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await;

        let err = match opened {
            Ok(Ok(connection)) => {
                let generation = self.slot.write().await.adopt(connection.clone());
                info!(addr = %self.addr, generation, "redis reconnected successfully");
                return Ok((generation, connection));
            }
            Ok(Err(err)) => {
                if err.is_connection_refusal() {
                    warn!(addr = %self.addr, error = %err, "redis connection refused - ensure redis is running");
                } else {
                    warn!(addr = %self.addr, error_type = ?err.kind(), error = %err, "failed to reconnect to redis");
                }
                CacheDbError::Disconnect(err.to_string())
            }
            Err(_) => {
                warn!(addr = %self.addr, timeout = ?self.options.connect_timeout, "redis connection attempt timed out");
                CacheDbError::Timeout(self.options.connect_timeout)
            }
        };

        // a handle adopted meanwhile by another task is left in place
        self.slot.write().await.failed();
        Err(err)
    }

    async fn connection(&self, liveness: bool) -> Result<(u64, MultiplexedConnection), CacheDbError> {
        {
            let slot = self.slot.read().await;
            if let Some(current) = slot.current() {
                return Ok(current);
            }
            if !liveness && slot.backing_off(self.options.reconnect_backoff) {
                return Err(CacheDbError::Disconnect(RECONNECT_PENDING.to_string()));
            }
        }

        self.reconnect().await
    }

    async fn discard(&self, generation: u64, reason: &str) {
        if self.slot.write().await.release(generation) {
            warn!(addr = %self.addr, generation, reason, "redis connection lost");
        }
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, command: F) -> Result<T, CacheDbError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut + Send,
        Fut: Future<Output = RedisResult<T>> + Send,
        T: Send,
    {
        let (generation, connection) = self.connection(false).await?;

        match timeout(self.options.operation_timeout, command(connection)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if is_link_error(&err) => {
                self.discard(generation, operation).await;
                Err(CacheDbError::Disconnect(err.to_string()))
            }
            Ok(Err(err)) => Err(CacheDbError::Internal(err.to_string())),
            Err(_) => {
                self.discard(generation, operation).await;
                Err(CacheDbError::Timeout(self.options.operation_timeout))
            }
        }
    }
}

const RECONNECT_PENDING: &str = "waiting before the next reconnect attempt";

fn is_link_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

async fn ping(mut connection: MultiplexedConnection) -> RedisResult<()> {
    let _: String = redis::cmd("PING").query_async(&mut connection).await?;
    Ok(())
}

#[async_trait]
impl CacheDb for RedisCache {
    fn default_ttl(&self) -> Duration {
        self.options.ttl
    }

    async fn get_from_db(&self, key: &CityKey) -> Result<Option<String>, CacheDbError> {
        let key = key.format();

        self.run("get", move |mut connection| async move { connection.get(key).await })
            .await
    }

    async fn set_in_db(
        &self,
        key: &CityKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheDbError> {
        let key = key.format();
        let millis = i64::try_from(ttl.as_millis())
            .map_err(|_| CacheDbError::Internal(format!("ttl {ttl:?} out of range")))?;

        self.run("set", move |mut connection| async move {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis)
                .query_async(&mut connection)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete_in_db(&self, key: &CityKey) -> Result<(), CacheDbError> {
        let key = key.format();

        self.run("delete", move |mut connection| async move {
            let _: () = connection.del(key).await?;
            Ok(())
        })
        .await
    }

    async fn clear_db(&self) -> Result<(), CacheDbError> {
        self.run("clear", |mut connection| async move {
            let _: () = redis::cmd("FLUSHDB").query_async(&mut connection).await?;
            Ok(())
        })
        .await
    }

    async fn is_connected(&self) -> bool {
        let Ok((generation, connection)) = self.connection(true).await else {
            return false;
        };

        match timeout(self.options.operation_timeout, ping(connection)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(error_type = ?err.kind(), error = %err, "redis ping failed");
                self.discard(generation, "ping").await;
                false
            }
            Err(_) => {
                warn!(timeout = ?self.options.operation_timeout, "redis ping timed out");
                self.discard(generation, "ping").await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_db::MAX_TTL;

    #[test]
    fn test_default_options() {
        let options = RedisOptions::default();

        assert_eq!(options.ttl, Duration::from_secs(3600));
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.operation_timeout, Duration::from_secs(5));
        assert_eq!(options.reconnect_backoff, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let cache = RedisCache::open("127.0.0.1", 6379, 0, None, RedisOptions::default())
            .expect("cannot build redis client");

        assert_eq!(cache.state().await, ConnectionState::Disconnected);
        assert_eq!(cache.addr(), "127.0.0.1:6379");
        assert_eq!(cache.default_ttl(), DEFAULT_TTL);
    }

    /// nothing listens on port 1
    fn unreachable(reconnect_backoff: Duration) -> RedisCache {
        let options = RedisOptions {
            connect_timeout: Duration::from_millis(500),
            operation_timeout: Duration::from_millis(500),
            reconnect_backoff,
            ..RedisOptions::default()
        };

        RedisCache::open("127.0.0.1", 1, 0, None, options).expect("cannot build redis client")
    }

    #[tokio::test]
    async fn test_operations_back_off_after_a_failed_reconnect() {
        let cache = unreachable(Duration::from_secs(60));
        let key = CityKey::new("Tokyo");

        let first = cache.get_from_db(&key).await.unwrap_err();
        assert_ne!(first, CacheDbError::Disconnect(RECONNECT_PENDING.to_string()));

        let second = cache.get_from_db(&key).await.unwrap_err();
        assert_eq!(second, CacheDbError::Disconnect(RECONNECT_PENDING.to_string()));

        let write = cache
            .set_in_db(&key, "{}".to_string(), DEFAULT_TTL)
            .await
            .unwrap_err();
        assert_eq!(write, CacheDbError::Disconnect(RECONNECT_PENDING.to_string()));

        assert_eq!(cache.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_liveness_check_ignores_the_backoff() {
        let cache = unreachable(Duration::from_secs(60));
        let key = CityKey::new("Tokyo");

        assert!(!cache.is_connected().await);
        assert_eq!(
            cache.get_from_db(&key).await.unwrap_err(),
            CacheDbError::Disconnect(RECONNECT_PENDING.to_string())
        );

        // a second check attempts again and records a fresh failure
        let before = Instant::now();
        assert!(!cache.is_connected().await);
        let failed_at = cache.slot.read().await.failed_at.expect("failure recorded");
        assert!(failed_at >= before);
    }

    #[tokio::test]
    async fn test_no_backoff_retries_every_time() {
        let cache = unreachable(Duration::ZERO);
        let key = CityKey::new("Tokyo");

        for _ in 0..2 {
            let err = cache.get_from_db(&key).await.unwrap_err();
            assert_ne!(err, CacheDbError::Disconnect(RECONNECT_PENDING.to_string()));
        }
    }

    #[test]
    fn test_stale_release_keeps_the_newer_handle() {
        let mut slot = Slot::new();

        let old = slot.adopt("first");
        let new = slot.adopt("second");
        assert_ne!(old, new);

        assert!(!slot.release(old));
        assert_eq!(slot.current(), Some((new, "second")));

        assert!(slot.release(new));
        assert_eq!(slot.current(), None);
        assert!(!slot.release(new));
    }

    #[test]
    fn test_failure_keeps_the_held_handle() {
        let mut slot = Slot::new();
        let generation = slot.adopt("live");

        slot.failed();

        assert_eq!(slot.current(), Some((generation, "live")));
        assert!(slot.backing_off(Duration::from_secs(60)));
        assert!(!slot.backing_off(Duration::ZERO));

        slot.adopt("next");
        assert!(!slot.backing_off(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_failed_reconnect_adopts_nothing() {
        let cache = unreachable(Duration::ZERO);

        assert!(!cache.is_connected().await);
        cache.discard(0, "stale").await;

        let slot = cache.slot.read().await;
        assert_eq!(slot.generation, 0);
        assert!(slot.current().is_none());
        assert!(slot.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_ttl_out_of_range_is_refused_before_connecting() {
        let cache = unreachable(Duration::from_secs(60));
        let key = CityKey::new("Paris");

        let err = cache
            .set_in_db(&key, "{}".to_string(), Duration::from_secs(u64::MAX))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheDbError::Internal(_)));

        let too_long = MAX_TTL + Duration::from_secs(1);
        assert!(!cache.set(&key, "{}".to_string(), Some(too_long)).await);

        assert!(cache.slot.read().await.failed_at.is_none());
    }
}
