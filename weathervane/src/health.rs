//! aggregate the liveness of the cache and of the provider

use std::sync::Arc;

use serde::Serialize;

use crate::cache_db::CacheDb;
use crate::metrics::Metrics;
use crate::upstream::WeatherProvider;

/// primary health view
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// the cache is connected
    Healthy,
    /// the cache is down, requests go straight to the provider
    Degraded,
}

/// diagnostic view
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// nothing to report
    Ok,
    /// at least one dependency needs attention
    Warning,
}

/// whether an api key was given
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// a real key is set
    Configured,
    /// empty or placeholder
    NotConfigured,
}

/// result of `HealthReporter::liveness`
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    /// last check of the cache
    pub cache_connected: bool,
    /// derived from `cache_connected`
    pub status: HealthStatus,
}

/// result of `HealthReporter::report`
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    /// last check of the cache
    pub cache_connected: bool,
    /// last check of the provider
    pub upstream_accessible: bool,
    /// api key state
    pub credential: CredentialStatus,
    /// aggregated status
    pub overall: OverallStatus,
}

/// Runs the checks, it never changes the cache content or calls the provider
/// for anything but its health check.
#[derive(Clone)]
pub struct HealthReporter<C, P>
where
    C: CacheDb,
    P: WeatherProvider,
{
    cache_db: C,
    provider: P,
    metrics: Arc<Metrics>,
    credential: CredentialStatus,
}

impl<C, P> HealthReporter<C, P>
where
    C: CacheDb,
    P: WeatherProvider,
{
    /// simple constructor
    pub const fn new(
        cache_db: C,
        provider: P,
        metrics: Arc<Metrics>,
        credential_configured: bool,
    ) -> Self {
        let credential = if credential_configured {
            CredentialStatus::Configured
        } else {
            CredentialStatus::NotConfigured
        };

        Self {
            cache_db,
            provider,
            metrics,
            credential,
        }
    }

    /// simple getter
    pub const fn credential(&self) -> CredentialStatus {
        self.credential
    }

    /// The service stays functional without the cache, so a missing cache
    /// only degrades it. Also updates the health gauge.
    pub async fn liveness(&self) -> Liveness {
        let cache_connected = self.cache_db.is_connected().await;
        self.metrics.set_health(cache_connected);

        let status = if cache_connected {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        Liveness {
            cache_connected,
            status,
        }
    }

    /// Both checks run concurrently.
    ///
    /// When no api key is configured the provider check cannot succeed,
    /// so it does not turn the report into a warning.
    pub async fn report(&self) -> HealthReport {
        let (cache_connected, upstream_accessible) =
            tokio::join!(self.cache_db.is_connected(), self.provider.health_check());

        let upstream_ok =
            upstream_accessible || self.credential == CredentialStatus::NotConfigured;

        let overall = if cache_connected && upstream_ok {
            OverallStatus::Ok
        } else {
            OverallStatus::Warning
        };

        HealthReport {
            cache_connected,
            upstream_accessible,
            credential: self.credential,
            overall,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::cache_db::memory::MemoryCache;
    use crate::upstream::Lookup;

    struct FixedProvider(bool);

    #[async_trait]
    impl WeatherProvider for FixedProvider {
        async fn lookup(&self, _city: &str) -> Lookup {
            Lookup::NotFound
        }

        async fn health_check(&self) -> bool {
            self.0
        }

        fn base_url(&self) -> &str {
            "fixed"
        }
    }

    fn reporter(
        cache_up: bool,
        upstream_up: bool,
        credential_configured: bool,
    ) -> HealthReporter<Arc<MemoryCache>, FixedProvider> {
        let cache = Arc::new(MemoryCache::default());
        cache.set_available(cache_up);

        HealthReporter::new(
            cache,
            FixedProvider(upstream_up),
            Arc::new(Metrics::new().unwrap()),
            credential_configured,
        )
    }

    #[tokio::test]
    async fn test_liveness() {
        let up = reporter(true, false, true);
        let liveness = up.liveness().await;
        assert_eq!(liveness.status, HealthStatus::Healthy);
        assert_eq!(up.metrics.api_health.get(), 1);

        let down = reporter(false, true, true);
        let liveness = down.liveness().await;
        assert!(!liveness.cache_connected);
        assert_eq!(liveness.status, HealthStatus::Degraded);
        assert_eq!(down.metrics.api_health.get(), 0);
    }

    #[tokio::test]
    async fn test_report() {
        let cases = [
            (true, true, true, OverallStatus::Ok),
            (true, false, true, OverallStatus::Warning),
            (false, true, true, OverallStatus::Warning),
            (true, false, false, OverallStatus::Ok),
            (false, false, false, OverallStatus::Warning),
        ];

        for (cache_up, upstream_up, configured, expected) in cases {
            let report = reporter(cache_up, upstream_up, configured).report().await;

            assert_eq!(report.cache_connected, cache_up);
            assert_eq!(report.upstream_accessible, upstream_up);
            assert_eq!(
                report.overall, expected,
                "cache {cache_up} upstream {upstream_up} key {configured}"
            );
        }
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(serde_json::to_value(HealthStatus::Degraded).unwrap(), "degraded");
        assert_eq!(serde_json::to_value(OverallStatus::Warning).unwrap(), "warning");
        assert_eq!(
            serde_json::to_value(CredentialStatus::NotConfigured).unwrap(),
            "not_configured"
        );
    }
}
