//! Tracing Subscriber Setup
//!
//! Console logging through `tracing-subscriber`, either human-readable or
//! one JSON object per line.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (default adds `backtest_scheduler=info`)
//! - `LOG_FORMAT`: `pretty` (default) or `json`
//! - `LOG_SPANS`: set to `true` to log span close events with timings
//!
//! # Usage
//!
//! ```ignore
//! use backtest_scheduler::infrastructure::telemetry;
//!
//! telemetry::init();
//! tracing::info!("Scheduler starting");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// Newline-delimited JSON.
    Json,
}

impl LogFormat {
    /// Parse format from string, falling back to pretty.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Output format.
    pub format: LogFormat,
    /// Whether span close events are logged.
    pub log_spans: bool,
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let format = std::env::var("LOG_FORMAT")
            .map(|v| LogFormat::from_str_case_insensitive(&v))
            .unwrap_or_default();

        let log_spans = std::env::var("LOG_SPANS")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self { format, log_spans }
    }
}

/// Initialize logging with configuration from environment.
pub fn init() {
    init_with_config(&TelemetryConfig::from_env());
}

/// Initialize logging with custom configuration.
///
/// Does nothing if a global subscriber is already installed.
#[allow(clippy::expect_used)]
pub fn init_with_config(config: &TelemetryConfig) {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(
            "backtest_scheduler=info"
                .parse()
                .expect("static directive 'backtest_scheduler=info' is valid"),
        )
        .add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        );

    let span_events = if config.log_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_span_events(span_events),
            )
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Tracing subscriber already installed: {e}");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(!config.log_spans);
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::from_str_case_insensitive("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_case_insensitive("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str_case_insensitive("xml"), LogFormat::Pretty);
    }
}
