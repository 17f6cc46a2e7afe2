#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::upstream::UpstreamError;

pub mod cache_db;
pub mod city_key;
pub mod health;
pub mod metrics;
pub mod repository;
pub mod upstream;

/// str wrapper
pub type OutcomeLabel = &'static str;

/// the measured part of a `WeatherRecord`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Conditions {
    /// degrees Celsius
    pub temperature: f64,
    /// degrees Celsius
    pub feels_like: f64,
    /// percent, 0 to 100
    pub humidity: u8,
    /// hPa
    pub pressure: u32,
    /// short text like "Clouds" or "Rain"
    pub description: String,
    /// m/s
    pub wind_speed: f64,
    /// percent, 0 to 100
    pub cloudiness: u8,
}

/// `WeatherRecord` is the canonical current-conditions entry for a city.
///
/// It is built once by the upstream client and never modified afterward:
/// a cache hit hands back the exact record that was stored, capture time included.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WeatherRecord {
    city: String,
    #[serde(flatten)]
    conditions: Conditions,
    #[serde(rename = "lastUpdated")]
    captured_at: DateTime<Utc>,
}

impl WeatherRecord {
    /// straight forward constructor
    #[must_use]
    pub fn new(city: impl Into<String>, conditions: Conditions, captured_at: DateTime<Utc>) -> Self {
        Self {
            city: city.into(),
            conditions,
            captured_at,
        }
    }

    /// the city name as reported by the provider
    #[must_use]
    pub fn city(&self) -> &str {
        &self.city
    }

    /// simple getter
    #[must_use]
    pub const fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    /// the moment the provider was queried
    #[must_use]
    pub const fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// the result of one `WeatherRepository::fetch`
#[derive(Debug)]
pub enum FetchOutcome {
    /// served from the cache, the provider was not called
    Hit(WeatherRecord),
    /// the cache had nothing, the provider answered
    MissThenFetched(WeatherRecord),
    /// the provider does not know the city
    NotFound,
    /// the provider could not be used
    UpstreamError(UpstreamError),
}

impl FetchOutcome {
    /// the record, if the outcome carries one
    #[must_use]
    pub const fn record(&self) -> Option<&WeatherRecord> {
        match self {
            Self::Hit(record) | Self::MissThenFetched(record) => Some(record),
            Self::NotFound | Self::UpstreamError(_) => None,
        }
    }

    /// consume the outcome and keep only the record
    #[must_use]
    pub fn into_record(self) -> Option<WeatherRecord> {
        match self {
            Self::Hit(record) | Self::MissThenFetched(record) => Some(record),
            Self::NotFound | Self::UpstreamError(_) => None,
        }
    }

    /// short label used in logs and metrics
    #[must_use]
    pub const fn label(&self) -> OutcomeLabel {
        match self {
            Self::Hit(_) => "hit",
            Self::MissThenFetched(_) => "success",
            Self::NotFound => "not_found",
            Self::UpstreamError(_) => "error",
        }
    }
}
