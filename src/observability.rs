//! Subscriber setup and the server's lifecycle events.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{non_empty_var, parse_bool, RollupConfig};

const COMPONENT: &str = "rollup_server";
const FALLBACK_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log format: {0}")]
pub struct UnknownLogFormat(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            _ => Err(UnknownLogFormat(raw.to_string())),
        }
    }
}

/// `level` is an `EnvFilter` directive, so per-target levels such as
/// `metrics_rollup=debug,tower=warn` work too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: FALLBACK_FILTER.to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// The configured filter, or `info` with a flag when the directive does
    /// not parse.
    fn env_filter(&self) -> (EnvFilter, bool) {
        match EnvFilter::try_new(&self.level) {
            Ok(filter) => (filter, false),
            Err(_) => (EnvFilter::new(FALLBACK_FILTER), true),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `ROLLUP_LOG_LEVEL`, `ROLLUP_LOG_FORMAT` and `ROLLUP_LOG_TARGET`.
/// Blank or unparseable values keep the defaults.
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();
    LoggingConfig {
        level: non_empty_var("ROLLUP_LOG_LEVEL").unwrap_or(defaults.level),
        format: non_empty_var("ROLLUP_LOG_FORMAT")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.format),
        include_target: non_empty_var("ROLLUP_LOG_TARGET")
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(defaults.include_target),
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let (filter, fell_back) = config.env_filter();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_target);

    match config.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(subscriber.with_ansi(false).json().finish())?
        }
        LogFormat::Pretty => tracing::subscriber::set_global_default(subscriber.pretty().finish())?,
    }

    if fell_back {
        warn!(
            component = COMPONENT,
            event = "logging.filter_invalid",
            directive = %config.level,
            fallback = FALLBACK_FILTER
        );
    }
    Ok(())
}

pub fn log_app_start(logging: &LoggingConfig, config: &RollupConfig) {
    info!(
        component = COMPONENT,
        event = "app.start",
        log_level = %logging.level,
        log_format = %logging.format,
        upstream_url = %config.upstream.base_url,
        upstream_timeout_ms = config.upstream.timeout_ms,
        upstream_max_retries = config.upstream.max_retries,
        exclude_incomplete_day = config.exclude_incomplete_day,
        top_chains = config.top_chains
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = COMPONENT,
        event = "app.bind",
        bind_addr = %bound_addr,
        routes = "/overview/{adapter_type}[/{chain}]"
    );
}

/// `reason` names what ended the serve loop, e.g. `ctrl_c`.
pub fn log_app_stop(reason: &str) {
    info!(component = COMPONENT, event = "app.stop", reason);
}

/// Where overview payloads come from: `http` or `file`.
pub fn log_payload_source(source: &str, location: &str) {
    info!(
        component = COMPONENT,
        event = "payload_source.selected",
        source,
        location
    );
}

/// `none` leaves chain-scoped requests ineligible, so it is logged as a
/// warning.
pub fn log_metadata_source(source: &str, location: Option<&str>, refresh_interval_ms: Option<u64>) {
    if location.is_none() {
        warn!(
            component = COMPONENT,
            event = "metadata_source.selected",
            source,
            chain_requests = "ineligible"
        );
        return;
    }
    info!(
        component = COMPONENT,
        event = "metadata_source.selected",
        source,
        location,
        refresh_interval_ms
    );
}
