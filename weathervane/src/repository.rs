//! the repository mod is where the cache-aside decision happens
//! read the cache, call the provider on a miss, populate the cache ...

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::FetchOutcome;
use crate::cache_db::{CacheDb, CacheRead};
use crate::city_key::CityKey;
use crate::metrics::Metrics;
use crate::upstream::{Lookup, WeatherProvider};

/// the `WeatherRepository` is the central piece of the project
/// every weather request goes through `fetch`
#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct WeatherRepository<C, P>
where
    C: CacheDb,
    P: WeatherProvider,
{
    cache_db: C,
    provider: P,
    metrics: Arc<Metrics>,
}

impl<C, P> WeatherRepository<C, P>
where
    C: CacheDb,
    P: WeatherProvider,
{
    /// simple constructor
    pub const fn new(cache_db: C, provider: P, metrics: Arc<Metrics>) -> Self {
        Self {
            cache_db,
            provider,
            metrics,
        }
    }

    /// simple getter
    pub const fn cache_db(&self) -> &C {
        &self.cache_db
    }

    /// simple getter
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// simple getter
    pub const fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Serve the city from the cache, or from the provider on a miss.
    ///
    /// An unreachable cache is read as a miss and the write after a
    /// successful lookup is best-effort, so the cache being down never
    /// turns into a failed request. Missing cities and provider failures
    /// are not cached. There is no retry.
    pub async fn fetch(&self, city: &str) -> FetchOutcome {
        let key = CityKey::new(city);

        match self.cache_db.load(&key).await {
            CacheRead::Found(record) => {
                debug!(city, key = %key, "serving from cache");
                self.metrics.record_cache_hit(&key.format());
                return FetchOutcome::Hit(record);
            }
            CacheRead::Absent => {
                self.metrics.record_cache_miss(&key.format());
            }
            CacheRead::Unavailable => {
                warn!(city, key = %key, "cache unavailable, calling the provider directly");
                self.metrics.record_cache_miss(&key.format());
            }
        }

        let started = Instant::now();
        let lookup = self.provider.lookup(city).await;
        let elapsed = started.elapsed().as_secs_f64();

        let outcome = match lookup {
            Lookup::Found(record) => {
                if !self.cache_db.store(&key, &record, None).await {
                    warn!(city, key = %key, "weather fetched but not cached");
                }
                info!(city, elapsed, "weather fetched from the provider");
                FetchOutcome::MissThenFetched(record)
            }
            Lookup::NotFound => FetchOutcome::NotFound,
            Lookup::Failed(err) => FetchOutcome::UpstreamError(err),
        };

        self.metrics
            .record_upstream_call(city, outcome.label(), elapsed);

        outcome
    }
}
