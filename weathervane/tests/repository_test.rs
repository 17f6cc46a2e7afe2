use std::sync::Arc;
use std::time::Duration;

use weathervane::FetchOutcome;
use weathervane::cache_db::memory::MemoryCache;
use weathervane::cache_db::redis::{ConnectionState, RedisCache, RedisOptions};
use weathervane::cache_db::{CacheDb, CacheRead};
use weathervane::city_key::CityKey;
use weathervane::metrics::Metrics;
use weathervane::repository::WeatherRepository;
use weathervane::upstream::UpstreamError;
use wiremock::{MockServer, ResponseTemplate};

use crate::openweather::{answer, client, current_weather};

mod openweather;

fn metrics() -> Arc<Metrics> {
    Arc::new(Metrics::new().unwrap())
}

/// nothing listens on port 1
fn dead_redis() -> RedisCache {
    let options = RedisOptions {
        connect_timeout: Duration::from_millis(500),
        operation_timeout: Duration::from_millis(500),
        ..RedisOptions::default()
    };

    RedisCache::open("127.0.0.1", 1, 0, None, options).unwrap()
}

#[tokio::test]
async fn cache_hit_does_not_call_the_provider() {
    let server = MockServer::start().await;
    answer(
        &server,
        "Paris",
        ResponseTemplate::new(200).set_body_json(current_weather("Paris")),
        0,
    )
    .await;

    let cache = Arc::new(MemoryCache::default());
    let record = {
        let seed = MockServer::start().await;
        answer(
            &seed,
            "Paris",
            ResponseTemplate::new(200).set_body_json(current_weather("Paris")),
            1,
        )
        .await;
        WeatherRepository::new(cache.clone(), client(&seed), metrics())
            .fetch("Paris")
            .await
            .into_record()
            .unwrap()
    };
    assert!(cache.get(&CityKey::new("paris")).await.is_found());

    let repository = WeatherRepository::new(cache, client(&server), metrics());
    let outcome = repository.fetch("Paris").await;

    assert!(matches!(outcome, FetchOutcome::Hit(_)));
    assert_eq!(outcome.record(), Some(&record));
    assert_eq!(repository.metrics().upstream_calls("Paris", "success"), 0);
}

#[tokio::test]
async fn missing_city_is_not_cached() {
    let server = MockServer::start().await;
    answer(&server, "Atlantis", ResponseTemplate::new(404), 2).await;

    let cache = Arc::new(MemoryCache::default());
    let repository = WeatherRepository::new(cache.clone(), client(&server), metrics());

    assert!(matches!(repository.fetch("Atlantis").await, FetchOutcome::NotFound));
    assert_eq!(
        cache.get(&CityKey::new("Atlantis")).await,
        CacheRead::Absent
    );
    assert!(matches!(repository.fetch("Atlantis").await, FetchOutcome::NotFound));

    assert_eq!(repository.metrics().upstream_calls("Atlantis", "not_found"), 2);
}

#[tokio::test]
async fn unauthorized_is_an_upstream_error() {
    let server = MockServer::start().await;
    answer(&server, "London", ResponseTemplate::new(401), 1).await;

    let cache = Arc::new(MemoryCache::default());
    let repository = WeatherRepository::new(cache.clone(), client(&server), metrics());

    let outcome = repository.fetch("London").await;

    assert!(matches!(
        outcome,
        FetchOutcome::UpstreamError(UpstreamError::Unauthorized)
    ));
    assert_eq!(repository.metrics().upstream_calls("London", "error"), 1);
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn disconnected_memory_cache_fails_open() {
    let server = MockServer::start().await;
    answer(
        &server,
        "Tokyo",
        ResponseTemplate::new(200).set_body_json(current_weather("Tokyo")),
        1,
    )
    .await;

    let cache = Arc::new(MemoryCache::default());
    cache.set_available(false);
    let repository = WeatherRepository::new(cache.clone(), client(&server), metrics());

    assert!(!cache.is_connected().await);

    let outcome = repository.fetch("Tokyo").await;
    assert!(matches!(outcome, FetchOutcome::MissThenFetched(_)));
    assert_eq!(outcome.record().map(|r| r.city()), Some("Tokyo"));

    cache.set_available(true);
    assert_eq!(cache.get(&CityKey::new("Tokyo")).await, CacheRead::Absent);
}

#[tokio::test]
async fn unreachable_redis_fails_open() {
    let server = MockServer::start().await;
    answer(
        &server,
        "Tokyo",
        ResponseTemplate::new(200).set_body_json(current_weather("Tokyo")),
        2,
    )
    .await;

    let cache = Arc::new(dead_redis());
    let repository = WeatherRepository::new(cache.clone(), client(&server), metrics());

    assert!(!cache.is_connected().await);
    assert_eq!(cache.state().await, ConnectionState::Disconnected);

    assert!(matches!(
        repository.fetch("Tokyo").await,
        FetchOutcome::MissThenFetched(_)
    ));
    assert!(matches!(
        repository.fetch("Tokyo").await,
        FetchOutcome::MissThenFetched(_)
    ));

    assert_eq!(
        cache.get(&CityKey::new("Tokyo")).await,
        CacheRead::Unavailable
    );
    assert!(!cache.clear().await);
}

#[tokio::test]
#[ignore = "needs a redis server on localhost:6379"]
async fn redis_entry_expires() {
    let cache = RedisCache::open("127.0.0.1", 6379, 0, None, RedisOptions::default()).unwrap();
    let key = CityKey::new("Weathervane-Test-Expiry");

    assert!(cache.is_connected().await);
    assert_eq!(cache.state().await, ConnectionState::Connected);

    assert!(
        cache
            .set(&key, "{}".to_string(), Some(Duration::from_secs(1)))
            .await
    );
    assert_eq!(cache.get(&key).await, CacheRead::Found("{}".to_string()));

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(cache.get(&key).await, CacheRead::Absent);
}

#[tokio::test]
#[ignore = "needs a redis server on localhost:6379"]
async fn redis_round_trip_through_repository() {
    let server = MockServer::start().await;
    answer(
        &server,
        "Lisbon",
        ResponseTemplate::new(200).set_body_json(current_weather("Lisbon")),
        1,
    )
    .await;

    let cache = Arc::new(
        RedisCache::open("127.0.0.1", 6379, 0, None, RedisOptions::default()).unwrap(),
    );
    let key = CityKey::new("Lisbon");
    cache.delete(&key).await;

    let repository = WeatherRepository::new(cache.clone(), client(&server), metrics());

    let first = repository.fetch("Lisbon").await;
    let second = repository.fetch("lisbon").await;

    assert!(matches!(first, FetchOutcome::MissThenFetched(_)));
    assert!(matches!(second, FetchOutcome::Hit(_)));
    assert_eq!(first.record(), second.record());

    assert!(cache.delete(&key).await);
}
