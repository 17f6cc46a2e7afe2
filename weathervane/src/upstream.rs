//! the provider side of the cache-aside lookup
//!
//! `OpenWeatherClient` asks OpenWeatherMap for the current conditions of a city and
//! turns the answer into a `WeatherRecord`. Every call ends in a `Lookup`,
//! a missing city is a normal outcome and not an error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, instrument, warn};

use crate::{Conditions, WeatherRecord};

/// public endpoint of the 2.5 api
pub const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
/// bound on a lookup
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// bound on the health check lookup
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
/// the city used to check the provider is reachable
pub const HEALTH_CHECK_CITY: &str = "London";

const BODY_SNIPPET_LEN: usize = 200;

/// why the provider could not be used
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// 401, the api key is wrong
    #[error("unauthorized access to the weather provider")]
    Unauthorized,

    /// 403, the api key lacks permission or quota
    #[error("api key forbidden by the weather provider")]
    Forbidden,

    /// any other non-2xx answer
    #[error("weather provider answered with status {0}")]
    Status(u16),

    /// dns, connect, or body transfer failure
    #[error("network error: {0}")]
    Network(reqwest::Error),

    /// no answer within the timeout
    #[error("weather provider timed out")]
    Timeout,

    /// a 2xx answer without the expected fields
    #[error("invalid response format: {0}")]
    MalformedPayload(String),

    /// the http client could not be built
    #[error("cannot build http client: {0}")]
    Client(reqwest::Error),
}

impl UpstreamError {
    /// short label for logs
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Unauthorized | Self::Forbidden => "auth",
            Self::Status(_) => "status",
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::MalformedPayload(_) => "payload",
            Self::Client(_) => "client",
        }
    }

    fn from_transport(err: reqwest::Error) -> Self {
        // the query string holds the api key
        let err = err.without_url();
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::MalformedPayload(err.to_string())
        } else {
            Self::Network(err)
        }
    }
}

/// the three possible ends of a provider call
#[derive(Debug)]
pub enum Lookup {
    /// the provider knows the city
    Found(WeatherRecord),
    /// the provider does not know the city
    NotFound,
    /// the provider could not be used
    Failed(UpstreamError),
}

/// source of truth for the current conditions
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// one request, no retry
    async fn lookup(&self, city: &str) -> Lookup;

    /// cheap reachability check, never fails loudly
    async fn health_check(&self) -> bool;

    /// where the provider lives, for diagnostics
    fn base_url(&self) -> &str;
}

#[async_trait]
impl<T> WeatherProvider for std::sync::Arc<T>
where
    T: WeatherProvider + ?Sized,
{
    async fn lookup(&self, city: &str) -> Lookup {
        (**self).lookup(city).await
    }

    async fn health_check(&self) -> bool {
        (**self).health_check().await
    }

    fn base_url(&self) -> &str {
        (**self).base_url()
    }
}

#[derive(Debug, Deserialize)]
struct CurrentWeatherResponse {
    name: Option<String>,
    main: MainBlock,
    weather: Vec<ConditionBlock>,
    wind: WindBlock,
    clouds: CloudsBlock,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f64,
    feels_like: f64,
    humidity: i64,
    pressure: i64,
}

#[derive(Debug, Deserialize)]
struct ConditionBlock {
    main: String,
}

#[derive(Debug, Deserialize)]
struct WindBlock {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct CloudsBlock {
    all: i64,
}

fn percent(value: i64, field: &str) -> Result<u8, UpstreamError> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| UpstreamError::MalformedPayload(format!("{field} out of range: {value}")))
}

impl CurrentWeatherResponse {
    fn into_record(self, requested_city: &str) -> Result<WeatherRecord, UpstreamError> {
        let description = self
            .weather
            .into_iter()
            .next()
            .map(|condition| condition.main)
            .ok_or_else(|| UpstreamError::MalformedPayload("empty weather list".to_string()))?;

        let pressure = u32::try_from(self.main.pressure).map_err(|_| {
            UpstreamError::MalformedPayload(format!("pressure out of range: {}", self.main.pressure))
        })?;

        let conditions = Conditions {
            temperature: self.main.temp,
            feels_like: self.main.feels_like,
            humidity: percent(self.main.humidity, "humidity")?,
            pressure,
            description,
            wind_speed: self.wind.speed,
            cloudiness: percent(self.clouds.all, "cloudiness")?,
        };

        let city = self
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| requested_city.to_string());

        Ok(WeatherRecord::new(city, conditions, Utc::now()))
    }
}

/// The `OpenWeatherClient` holds one http client for every lookup
#[derive(Clone)]
pub struct OpenWeatherClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    /// # Errors
    ///
    /// Will return `Err` if the http client cannot be built
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/weather", self.base_url)
    }

    async fn request(&self, city: &str) -> Result<Option<WeatherRecord>, UpstreamError> {
        let response = self
            .client
            .get(self.endpoint())
            .query(&[("q", city), ("appid", self.api_key.as_str()), ("units", "metric")])
            .send()
            .await
            .map_err(UpstreamError::from_transport)?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                error!("invalid api key: unauthorized access to the weather provider");
                return Err(UpstreamError::Unauthorized);
            }
            StatusCode::FORBIDDEN => {
                error!("api key forbidden: check api permissions and quota");
                return Err(UpstreamError::Forbidden);
            }
            StatusCode::NOT_FOUND => {
                warn!(city, "city not found by the weather provider");
                return Ok(None);
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
                error!(status_code = status.as_u16(), response = %snippet, "weather provider error");
                return Err(UpstreamError::Status(status.as_u16()));
            }
            _ => {}
        }

        let payload: CurrentWeatherResponse = response
            .json()
            .await
            .map_err(UpstreamError::from_transport)?;

        payload.into_record(city).map(Some)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    #[instrument(skip(self), level = "info")]
    async fn lookup(&self, city: &str) -> Lookup {
        match self.request(city).await {
            Ok(Some(record)) => Lookup::Found(record),
            Ok(None) => Lookup::NotFound,
            Err(err) => {
                error!(city, category = err.category(), error = %err, "weather lookup failed");
                Lookup::Failed(err)
            }
        }
    }

    async fn health_check(&self) -> bool {
        let sent = self
            .client
            .get(self.endpoint())
            .query(&[("q", HEALTH_CHECK_CITY), ("appid", self.api_key.as_str())])
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await;

        match sent {
            Ok(response) => response.status() == StatusCode::OK,
            Err(err) => {
                error!(error = %err.without_url(), "weather provider health check failed");
                false
            }
        }
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
