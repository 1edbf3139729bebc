//! Server configuration from `ROLLUP_*` environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::overview::DEFAULT_TOP_CHAINS;
use crate::upstream::UpstreamConfig;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_METADATA_REFRESH_MS: u64 = 3_600_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address '{addr}': {source}")]
    InvalidBindAddr {
        addr: String,
        source: std::net::AddrParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupConfig {
    pub bind_addr: String,
    pub upstream: UpstreamConfig,
    /// Serve payloads from disk instead of the upstream API.
    pub payload_dir: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub metadata_base_url: Option<String>,
    pub metadata_refresh_ms: u64,
    pub exclude_incomplete_day: bool,
    pub top_chains: usize,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            upstream: UpstreamConfig::default(),
            payload_dir: None,
            metadata_path: None,
            metadata_base_url: None,
            metadata_refresh_ms: DEFAULT_METADATA_REFRESH_MS,
            exclude_incomplete_day: true,
            top_chains: DEFAULT_TOP_CHAINS,
        }
    }
}

impl RollupConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                addr: self.bind_addr.clone(),
                source,
            })
    }
}

/// Reads the environment over [`RollupConfig::default`]. Unparseable values
/// keep the default.
pub fn rollup_config_from_env() -> RollupConfig {
    let mut config = RollupConfig::default();

    if let Some(addr) = non_empty_var("ROLLUP_ADDR") {
        config.bind_addr = addr;
    }
    if let Some(url) = non_empty_var("ROLLUP_UPSTREAM_URL") {
        config.upstream.base_url = url;
    }
    if let Some(timeout_ms) = parsed_var::<u64>("ROLLUP_UPSTREAM_TIMEOUT_MS").filter(|v| *v > 0) {
        config.upstream.timeout_ms = timeout_ms;
    }
    if let Some(max_retries) = parsed_var::<u32>("ROLLUP_UPSTREAM_MAX_RETRIES") {
        config.upstream.max_retries = max_retries;
    }
    config.payload_dir = non_empty_var("ROLLUP_PAYLOAD_DIR").map(PathBuf::from);
    config.metadata_path = non_empty_var("ROLLUP_METADATA_PATH").map(PathBuf::from);
    config.metadata_base_url = non_empty_var("ROLLUP_METADATA_BASE_URL");
    if let Some(refresh_ms) = parsed_var::<u64>("ROLLUP_METADATA_REFRESH_MS").filter(|v| *v > 0) {
        config.metadata_refresh_ms = refresh_ms;
    }
    if let Some(exclude) = env::var("ROLLUP_EXCLUDE_INCOMPLETE_DAY")
        .ok()
        .and_then(|raw| parse_bool(&raw))
    {
        config.exclude_incomplete_day = exclude;
    }
    if let Some(top_chains) = parsed_var::<usize>("ROLLUP_TOP_CHAINS").filter(|v| *v > 0) {
        config.top_chains = top_chains;
    }

    config
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn non_empty_var(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    non_empty_var(key)?.parse().ok()
}
