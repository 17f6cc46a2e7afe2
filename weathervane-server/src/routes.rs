//! http routes, the outcome of every operation is mapped to a status here

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use weathervane::FetchOutcome;
use weathervane::cache_db::CacheDb;
use weathervane::health::HealthReporter;
use weathervane::metrics::{Metrics, MetricsError};
use weathervane::repository::WeatherRepository;
use weathervane::upstream::{UpstreamError, WeatherProvider};

use crate::config::Settings;

/// any cache backend
pub type SharedCache = Arc<dyn CacheDb>;
/// any weather provider
pub type SharedProvider = Arc<dyn WeatherProvider>;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const DEGRADED_NOTE: &str =
    "Redis is disconnected. Start Redis to make status 'healthy'. API still functional.";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// loaded once at start-up
    pub settings: Arc<Settings>,
    /// cache-aside lookup
    pub repository: WeatherRepository<SharedCache, SharedProvider>,
    /// liveness and diagnostics
    pub health: HealthReporter<SharedCache, SharedProvider>,
    /// shared with the repository and the reporter
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// wire the repository and the reporter on the same handles
    #[must_use]
    pub fn new(
        settings: Settings,
        cache: SharedCache,
        provider: SharedProvider,
        metrics: Arc<Metrics>,
    ) -> Self {
        let health = HealthReporter::new(
            cache.clone(),
            provider.clone(),
            metrics.clone(),
            settings.credential_configured(),
        );
        let repository = WeatherRepository::new(cache, provider, metrics.clone());

        Self {
            settings: Arc::new(settings),
            repository,
            health,
            metrics,
        }
    }
}

/// error answered as `{"error": ..., "code": "HTTP_<status>"}`
#[derive(Error, Debug)]
pub enum ApiError {
    /// missing or blank `city`
    #[error("City name cannot be empty")]
    EmptyCity,

    /// the provider does not know the city
    #[error(
        "City '{0}' not found. Please check the city name and try again. Use format like 'London', 'New York', 'Tokyo', etc."
    )]
    CityNotFound(String),

    /// the provider could not be used
    #[error("Weather service unavailable ({})", .0.category())]
    Upstream(#[from] UpstreamError),

    /// `/metrics` while prometheus is disabled
    #[error("Metrics disabled")]
    MetricsDisabled,

    /// the metrics could not be encoded
    #[error("Failed to render metrics: {0}")]
    Metrics(#[from] MetricsError),

    /// the cache backend refused the flush
    #[error("Failed to clear cache")]
    CacheClear,
}

impl ApiError {
    /// status code of the answer
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::EmptyCity => StatusCode::BAD_REQUEST,
            Self::CityNotFound(_) | Self::MetricsDisabled => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Metrics(_) | Self::CacheClear => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        error!(status = status.as_u16(), error = %self, "http exception");

        let body = json!({
            "error": self.to_string(),
            "code": format!("HTTP_{}", status.as_u16()),
        });

        (status, Json(body)).into_response()
    }
}

/// Build the router with every route and layer.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/weather", get(weather))
        .route("/diagnostics", get(diagnostics))
        .route("/metrics", get(metrics))
        .route("/cache", delete(clear_cache));

    if state.settings.prometheus_enabled {
        router = router.layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ));
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed = started.elapsed().as_secs_f64();
    state
        .metrics
        .record_request(&method, &path, status, elapsed);
    debug!(%method, %path, status, elapsed, "request completed");

    response
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": state.settings.app_name,
        "version": state.settings.app_version,
        "health": "/health",
        "weather": "/weather?city=London",
        "diagnostics": "/diagnostics",
        "metrics": "/metrics",
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    debug!("health check requested");
    let liveness = state.health.liveness().await;
    let redis_status = if liveness.cache_connected {
        "connected"
    } else {
        "disconnected"
    };

    let mut body = json!({
        "status": liveness.status,
        "version": state.settings.app_version,
        "timestamp": Utc::now().to_rfc3339(),
        "dependencies": {
            "redis": {
                "status": redis_status,
                "host": state.settings.redis_host,
                "port": state.settings.redis_port,
            }
        }
    });

    if !liveness.cache_connected {
        body["note"] = json!(DEGRADED_NOTE);
    }

    Json(body)
}

#[derive(Deserialize)]
struct WeatherQuery {
    city: Option<String>,
}

async fn weather(
    State(state): State<AppState>,
    Query(query): Query<WeatherQuery>,
) -> Result<Response, ApiError> {
    let city = query.city.unwrap_or_default();
    if city.trim().is_empty() {
        warn!("empty city name provided");
        return Err(ApiError::EmptyCity);
    }

    info!(%city, "weather request");

    match state.repository.fetch(&city).await {
        FetchOutcome::Hit(record) | FetchOutcome::MissThenFetched(record) => {
            info!(%city, "weather retrieved");
            Ok(Json(record).into_response())
        }
        FetchOutcome::NotFound => {
            warn!(%city, "weather not found");
            Err(ApiError::CityNotFound(city))
        }
        FetchOutcome::UpstreamError(err) => Err(err.into()),
    }
}

async fn diagnostics(State(state): State<AppState>) -> Json<Value> {
    debug!("diagnostics requested");
    let report = state.health.report().await;
    let settings = &state.settings;

    Json(json!({
        "status": report.overall,
        "app": {
            "name": settings.app_name,
            "version": settings.app_version,
            "debug": settings.debug,
            "log_level": settings.log_level,
        },
        "dependencies": {
            "redis": {
                "connected": report.cache_connected,
                "host": settings.redis_host,
                "port": settings.redis_port,
            },
            "openweather_api": {
                "key_status": report.credential,
                "base_url": settings.openweather_base_url,
                "accessible": report.upstream_accessible,
            }
        },
        "cache": {
            "ttl_seconds": settings.redis_cache_ttl,
            "enabled": report.cache_connected,
        }
    }))
}

async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    if !state.settings.prometheus_enabled {
        return Err(ApiError::MetricsDisabled);
    }

    let text = state.metrics.render()?;

    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], text).into_response())
}

async fn clear_cache(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    info!("cache clear requested");

    if state.repository.cache_db().clear().await {
        Ok(Json(json!({"message": "Cache cleared successfully"})))
    } else {
        Err(ApiError::CacheClear)
    }
}
