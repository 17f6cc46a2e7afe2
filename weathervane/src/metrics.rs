//! Prometheus metrics
//!
//! Every family lives in a `Registry` owned by `Metrics`, so two instances
//! (one per test, for instance) never collide.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

/// http request latency buckets (seconds)
const REQUEST_LATENCY_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// provider call latency buckets (seconds)
const UPSTREAM_LATENCY_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0];

/// error while building or encoding the metrics
#[derive(Error, Debug)]
pub enum MetricsError {
    /// from the prometheus crate
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// the text encoder produced invalid utf8
    #[error("metrics are not utf8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Container for every metric of the service.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// labels: method, endpoint, status
    pub requests_total: IntCounterVec,

    /// labels: method, endpoint
    pub request_duration_seconds: HistogramVec,

    /// labels: city, status (success / not_found / error)
    pub weather_api_calls_total: IntCounterVec,

    /// time spent waiting on the provider
    pub weather_api_call_duration_seconds: Histogram,

    /// labels: key
    pub cache_hits_total: IntCounterVec,

    /// labels: key
    pub cache_misses_total: IntCounterVec,

    /// 1 when the cache is connected, 0 otherwise
    pub api_health: IntGauge,
}

impl Metrics {
    /// Create and register every metric.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a metric definition is rejected by prometheus
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("weather_api_requests_total", "Total number of API requests"),
            &["method", "endpoint", "status"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "weather_api_request_duration_seconds",
                "Request duration in seconds",
            )
            .buckets(REQUEST_LATENCY_BUCKETS.to_vec()),
            &["method", "endpoint"],
        )?;
        let weather_api_calls_total = IntCounterVec::new(
            Opts::new("weather_api_calls_total", "Total number of weather API calls"),
            &["city", "status"],
        )?;
        let weather_api_call_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "weather_api_call_duration_seconds",
                "Weather API call duration in seconds",
            )
            .buckets(UPSTREAM_LATENCY_BUCKETS.to_vec()),
        )?;
        let cache_hits_total = IntCounterVec::new(
            Opts::new("cache_hits_total", "Total number of cache hits"),
            &["key"],
        )?;
        let cache_misses_total = IntCounterVec::new(
            Opts::new("cache_misses_total", "Total number of cache misses"),
            &["key"],
        )?;
        let api_health = IntGauge::new(
            "weather_api_health",
            "API health status (1=healthy, 0=unhealthy)",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(weather_api_calls_total.clone()))?;
        registry.register(Box::new(weather_api_call_duration_seconds.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(api_health.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            weather_api_calls_total,
            weather_api_call_duration_seconds,
            cache_hits_total,
            cache_misses_total,
            api_health,
        })
    }

    /// Record an HTTP request.
    pub fn record_request(&self, method: &str, endpoint: &str, status: u16, duration_secs: f64) {
        let status = status.to_string();
        self.requests_total
            .with_label_values(&[method, endpoint, status.as_str()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration_secs);
    }

    /// Record one provider call and how long it took.
    pub fn record_upstream_call(&self, city: &str, status: &str, duration_secs: f64) {
        self.weather_api_calls_total
            .with_label_values(&[city, status])
            .inc();
        self.weather_api_call_duration_seconds
            .observe(duration_secs);
    }

    /// simple counter
    pub fn record_cache_hit(&self, key: &str) {
        self.cache_hits_total.with_label_values(&[key]).inc();
    }

    /// simple counter
    pub fn record_cache_miss(&self, key: &str) {
        self.cache_misses_total.with_label_values(&[key]).inc();
    }

    /// 1 or 0
    pub fn set_health(&self, healthy: bool) {
        self.api_health.set(i64::from(healthy));
    }

    /// number of provider calls for a city and status
    #[must_use]
    pub fn upstream_calls(&self, city: &str, status: &str) -> u64 {
        self.weather_api_calls_total
            .with_label_values(&[city, status])
            .get()
    }

    /// Prometheus text exposition of every metric.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the encoder fails
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_instances_do_not_collide() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_upstream_call("Paris", "success", 0.2);

        assert_eq!(first.upstream_calls("Paris", "success"), 1);
        assert_eq!(second.upstream_calls("Paris", "success"), 0);
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("GET", "/weather", 200, 0.015);
        metrics.record_upstream_call("London", "error", 0.3);
        metrics.record_cache_hit("weather:paris");
        metrics.set_health(true);

        let text = metrics.render().unwrap();

        assert!(text.contains(r#"weather_api_requests_total{endpoint="/weather",method="GET",status="200"} 1"#));
        assert!(text.contains(r#"weather_api_calls_total{city="London",status="error"} 1"#));
        assert!(text.contains("weather_api_call_duration_seconds_count 1"));
        assert!(text.contains(r#"cache_hits_total{key="weather:paris"} 1"#));
        assert!(text.contains("weather_api_health 1"));
    }
}
