//! settings of the service
//!
//! defaults, then `weathervane.toml`, then `.env`, then the process environment.

use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use tracing::level_filters::LevelFilter;
use weathervane::cache_db::MAX_TTL;

/// optional file read at start-up, in the working directory
pub const CONFIG_FILE: &str = "weathervane.toml";

/// value shipped in the sample `.env`, it counts as no key at all
pub const PLACEHOLDER_API_KEY: &str = "your_api_key_here";

/// error while loading the settings
#[derive(Error, Debug)]
pub enum ConfigError {
    /// the config file exists but cannot be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// file path
        path: String,
        /// io failure
        source: std::io::Error,
    },

    /// the config file is not valid toml for `Settings`
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// file path
        path: String,
        /// toml failure
        source: toml::de::Error,
    },

    /// every problem found, in one go
    #[error("invalid config:\n - {}", .0.join("\n - "))]
    Invalid(Vec<String>),
}

/// where the weather records are cached
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// a redis server, see the `redis_*` settings
    Redis,
    /// in process, lost on restart
    Memory,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("CACHE_BACKEND must be redis or memory, got `{other}`")),
        }
    }
}

/// settings of the service, immutable once loaded
#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// shown on `/` and in the logs
    pub app_name: String,
    /// shown on `/`, `/health` and `/diagnostics`
    pub app_version: String,
    /// reported on `/diagnostics`
    pub debug: bool,
    /// default log filter when `RUST_LOG` is not set
    pub log_level: String,

    /// bind address
    pub host: String,
    /// bind port
    pub port: u16,

    openweather_api_key: Option<String>,
    /// provider endpoint, without the `/weather` suffix
    pub openweather_base_url: String,
    /// seconds
    pub openweather_timeout: u64,

    /// which `CacheDb` to build
    pub cache_backend: CacheBackend,
    /// redis host
    pub redis_host: String,
    /// redis port
    pub redis_port: u16,
    /// redis logical database
    pub redis_db: i64,
    /// redis auth, if any
    pub redis_password: Option<String>,
    /// seconds
    pub redis_cache_ttl: u64,
    /// seconds
    pub redis_connect_timeout: u64,

    /// expose `/metrics` and record request metrics
    pub prometheus_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Weather Tracker API".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            debug: false,
            log_level: "INFO".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            openweather_api_key: None,
            openweather_base_url: weathervane::upstream::OPENWEATHER_BASE_URL.to_string(),
            openweather_timeout: 10,
            cache_backend: CacheBackend::Redis,
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_db: 0,
            redis_password: None,
            redis_cache_ttl: 3600,
            redis_connect_timeout: 5,
            prometheus_enabled: true,
        }
    }
}

impl Debug for Settings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("app_name", &self.app_name)
            .field("app_version", &self.app_version)
            .field("debug", &self.debug)
            .field("log_level", &self.log_level)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("openweather_api_key", &self.openweather_api_key.as_ref().map(|_| "***"))
            .field("openweather_base_url", &self.openweather_base_url)
            .field("openweather_timeout", &self.openweather_timeout)
            .field("cache_backend", &self.cache_backend)
            .field("redis_host", &self.redis_host)
            .field("redis_port", &self.redis_port)
            .field("redis_db", &self.redis_db)
            .field("redis_password", &self.redis_password.as_ref().map(|_| "***"))
            .field("redis_cache_ttl", &self.redis_cache_ttl)
            .field("redis_connect_timeout", &self.redis_connect_timeout)
            .field("prometheus_enabled", &self.prometheus_enabled)
            .finish()
    }
}

fn parse_bool(raw: &str, env_name: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("{env_name} must be a boolean, got `{raw}`")),
    }
}

fn parse_number<T: FromStr>(raw: &str, env_name: &str) -> Result<T, String> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("{env_name} must be a number, got `{raw}`"))
}

impl Settings {
    /// Load the settings of the running process.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the config file is broken or a value is invalid
    pub fn load() -> Result<Self, ConfigError> {
        // variables already set in the environment win over the file
        if let Err(e) = dotenvy::dotenv() {
            debug!("no .env file loaded: {e}");
        }

        Self::from_sources(Some(Path::new(CONFIG_FILE)), |name| std::env::var(name).ok())
    }

    /// Load the settings from an optional toml file and an environment lookup.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file is broken or a value is invalid
    pub fn from_sources<F>(file: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match file {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };

        let mut issues = settings.apply_env(env);
        issues.extend(settings.validate());

        if issues.is_empty() {
            Ok(settings)
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_env<F>(&mut self, env: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut issues = Vec::new();

        macro_rules! apply {
            ($name:literal, $field:expr, $parse:expr) => {
                if let Some(raw) = env($name) {
                    match $parse(raw.as_str(), $name) {
                        Ok(value) => $field = value,
                        Err(issue) => issues.push(issue),
                    }
                }
            };
        }

        let text = |raw: &str, _: &str| -> Result<String, String> { Ok(raw.to_string()) };
        let some_text = |raw: &str, _: &str| -> Result<Option<String>, String> {
            Ok(Some(raw.to_string()))
        };

        apply!("APP_NAME", self.app_name, text);
        apply!("APP_VERSION", self.app_version, text);
        apply!("DEBUG", self.debug, parse_bool);
        apply!("LOG_LEVEL", self.log_level, text);
        apply!("HOST", self.host, text);
        apply!("PORT", self.port, parse_number);
        apply!("OPENWEATHER_API_KEY", self.openweather_api_key, some_text);
        apply!("OPENWEATHER_BASE_URL", self.openweather_base_url, text);
        apply!("OPENWEATHER_TIMEOUT", self.openweather_timeout, parse_number);
        apply!("CACHE_BACKEND", self.cache_backend, |raw: &str, _: &str| raw
            .parse::<CacheBackend>());
        apply!("REDIS_HOST", self.redis_host, text);
        apply!("REDIS_PORT", self.redis_port, parse_number);
        apply!("REDIS_DB", self.redis_db, parse_number);
        apply!("REDIS_PASSWORD", self.redis_password, some_text);
        apply!("REDIS_CACHE_TTL", self.redis_cache_ttl, parse_number);
        apply!("REDIS_CONNECT_TIMEOUT", self.redis_connect_timeout, parse_number);
        apply!("PROMETHEUS_ENABLED", self.prometheus_enabled, parse_bool);

        issues
    }

    fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.openweather_api_key.is_none() {
            issues.push("OPENWEATHER_API_KEY is required".to_string());
        }
        if !(self.openweather_base_url.starts_with("http://")
            || self.openweather_base_url.starts_with("https://"))
        {
            issues.push("OPENWEATHER_BASE_URL must be an http(s) url".to_string());
        }
        if self.openweather_timeout == 0 {
            issues.push("OPENWEATHER_TIMEOUT must be > 0".to_string());
        }
        if self.redis_cache_ttl == 0 {
            issues.push("REDIS_CACHE_TTL must be > 0".to_string());
        }
        if self.redis_cache_ttl > MAX_TTL.as_secs() {
            issues.push(format!(
                "REDIS_CACHE_TTL must be <= {} (one year)",
                MAX_TTL.as_secs()
            ));
        }
        if self.redis_connect_timeout == 0 {
            issues.push("REDIS_CONNECT_TIMEOUT must be > 0".to_string());
        }
        if self.redis_db < 0 {
            issues.push("REDIS_DB must be >= 0".to_string());
        }
        if LevelFilter::from_str(&self.log_level).is_err() {
            issues.push(format!("LOG_LEVEL `{}` is not a log level", self.log_level));
        }

        issues
    }

    /// the key, empty when none was given
    #[must_use]
    pub fn api_key(&self) -> &str {
        self.openweather_api_key.as_deref().unwrap_or_default()
    }

    /// false for an empty key or the placeholder of the sample `.env`
    #[must_use]
    pub fn credential_configured(&self) -> bool {
        let key = self.api_key().trim();
        !key.is_empty() && key != PLACEHOLDER_API_KEY
    }

    /// simple getter
    #[must_use]
    pub const fn openweather_timeout(&self) -> Duration {
        Duration::from_secs(self.openweather_timeout)
    }

    /// simple getter
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.redis_cache_ttl)
    }

    /// simple getter
    #[must_use]
    pub const fn redis_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.redis_connect_timeout)
    }
}
