//! json logs on stdout

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// `RUST_LOG` when set and valid, the configured level otherwise
fn filter(log_level: &str, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(log_level.to_lowercase()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global subscriber, once per process.
///
/// # Errors
///
/// Will return `Err` if a global subscriber is already set
pub fn init(log_level: &str) -> Result<(), TryInitError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    tracing_subscriber::registry()
        .with(filter(log_level, rust_log.as_deref()))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true),
        )
        .try_init()
}
