use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use weathervane::cache_db::memory::MemoryCache;
use weathervane::cache_db::redis::{RedisCache, RedisOptions};
use weathervane::metrics::Metrics;
use weathervane::upstream::OpenWeatherClient;
use weathervane_server::config::{CacheBackend, Settings};
use weathervane_server::routes::{SharedCache, SharedProvider};
use weathervane_server::{AppState, logging, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    logging::init(&settings.log_level)?;

    info!(app_name = %settings.app_name, version = %settings.app_version, "starting");
    info!(debug = settings.debug, log_level = %settings.log_level, "settings loaded");

    let metrics = Arc::new(Metrics::new()?);

    let cache: SharedCache = match settings.cache_backend {
        CacheBackend::Redis => {
            let options = RedisOptions {
                ttl: settings.cache_ttl(),
                connect_timeout: settings.redis_connect_timeout(),
                ..RedisOptions::default()
            };
            Arc::new(RedisCache::open(
                &settings.redis_host,
                settings.redis_port,
                settings.redis_db,
                settings.redis_password.clone(),
                options,
            )?)
        }
        CacheBackend::Memory => Arc::new(MemoryCache::new(settings.cache_ttl())),
    };

    let provider: SharedProvider = Arc::new(OpenWeatherClient::new(
        &settings.openweather_base_url,
        settings.api_key(),
        settings.openweather_timeout(),
    )?);

    if !settings.credential_configured() {
        warn!("OPENWEATHER_API_KEY is not configured, every lookup will fail");
    }

    let addr = format!("{}:{}", settings.host, settings.port);
    let app_name = settings.app_name.clone();
    let state = AppState::new(settings, cache, provider, metrics);

    if state.health.liveness().await.cache_connected {
        info!("redis cache connected");
    } else {
        warn!("redis cache not available");
    }

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(%app_name, "shutting down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
