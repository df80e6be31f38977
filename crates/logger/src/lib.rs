use std::env::var;
use std::str::FromStr;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Initialize tracing at INFO with the compact format.
pub fn init() {
    init_with(LevelFilter::INFO, LogFormat::Compact);
}

/// Initialize tracing from configuration values.
///
/// `RUST_LOG` takes precedence over `level`, `RUST_LOG_FORMAT` over `format`.
/// Calling this more than once is harmless: later calls keep the first subscriber.
pub fn init_with(level: LevelFilter, format: LogFormat) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let format = match var("RUST_LOG_FORMAT") {
        Ok(raw) => raw.parse().unwrap_or_else(|error| {
            eprintln!("Ignoring RUST_LOG_FORMAT: {error}");
            format
        }),
        Err(_) => format,
    };

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().pretty().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    };

    if tracing_subscriber::registry().with(log_layer).try_init().is_err() {
        warn!("Tracing subscriber already installed, keeping the existing one");
    }
}

/// Parse a level name, falling back to INFO for anything unrecognized.
pub fn parse_level(raw: &str) -> LevelFilter {
    raw.parse().unwrap_or(LevelFilter::INFO)
}
