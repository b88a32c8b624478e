//! Logging initialization for canary-daemon.
//!
//! Builds the `tracing-subscriber` stack from the `[general]` section.
//! The MQTT and HTTP client crates log every packet and connection at
//! `debug`, which drowns out the run's own events, so they are capped at
//! `warn` unless the configured level is stricter still. `RUST_LOG`
//! replaces the whole filter.

use std::str::FromStr;

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use canary_core::config::GeneralConfig;

/// Client-side crates whose output is capped.
const NOISY_TARGETS: &[&str] = &["rumqttc", "hyper", "hyper_util", "reqwest", "h2", "rustls"];

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, fields flattened
    Json,
    /// Multi-line human-readable output
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                other
            )),
        }
    }
}

/// Filter directives for `level`: the level itself, plus a cap for
/// [`NOISY_TARGETS`].
pub fn default_directives(level: &str) -> Result<String> {
    let level = LevelFilter::from_str(level)
        .map_err(|e| anyhow::anyhow!("invalid log level '{}': {}", level, e))?;
    let capped = level.min(LevelFilter::WARN);

    let mut directives = vec![level.to_string().to_lowercase()];
    directives.extend(
        NOISY_TARGETS
            .iter()
            .map(|target| format!("{target}={}", capped.to_string().to_lowercase())),
    );
    Ok(directives.join(","))
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let format: LogFormat = config.log_format.parse()?;
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&config.log_level)?)
            .map_err(|e| anyhow::anyhow!("invalid log filter: {}", e))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let initialized = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };
    initialized.map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {}", e))?;

    tracing::debug!(?format, level = %config.log_level, "tracing initialized");
    Ok(())
}
