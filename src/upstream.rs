//! Upstream overview payloads and the fetchers that produce them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metadata::{slugify, AdapterType, MetadataLookup};
use crate::normalize::RawSample;
use crate::record::ProtocolIdentity;
use crate::value::ValueNode;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.llama.fi";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("invalid upstream URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("payload decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no payload available for {0}")]
    Missing(String),
}

/// One adapter type's overview as served upstream. Missing or `null` fields
/// decode as empty.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewPayload {
    #[serde(default, deserialize_with = "lenient_samples")]
    pub total_data_chart: Vec<RawSample>,
    #[serde(default, deserialize_with = "lenient_samples")]
    pub total_data_chart_breakdown: Vec<RawSample>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub protocols: Vec<RawProtocol>,
}

impl OverviewPayload {
    pub fn is_empty(&self) -> bool {
        self.total_data_chart.is_empty()
            && self.total_data_chart_breakdown.is_empty()
            && self.protocols.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProtocol {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub defillama_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub parent_protocol: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub linked_protocols: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub chains: Vec<String>,
    #[serde(default, deserialize_with = "lenient_samples")]
    pub total_data_chart: Vec<RawSample>,
}

impl RawProtocol {
    pub fn slug(&self) -> String {
        self.slug
            .as_deref()
            .or(self.module.as_deref())
            .map(slugify)
            .unwrap_or_else(|| slugify(&self.name))
    }

    /// Identity with the display name taken from metadata when it knows the
    /// protocol.
    pub fn identity(&self, metadata: &dyn MetadataLookup) -> ProtocolIdentity {
        let slug = self.slug();
        let known = metadata.lookup_protocol(&slug);
        let display_name = known
            .as_ref()
            .map(|meta| meta.display_name.clone())
            .or_else(|| self.display_name.clone())
            .unwrap_or_else(|| self.name.clone());

        ProtocolIdentity {
            id: self
                .id
                .clone()
                .or_else(|| self.defillama_id.clone())
                .unwrap_or_else(|| slug.clone()),
            name: self.name.clone(),
            display_name,
            slug,
            logo: self.logo.clone(),
            category: self.category.clone(),
        }
    }

    /// Parent from the payload, else from metadata.
    pub fn parent_id(&self, metadata: &dyn MetadataLookup) -> Option<String> {
        self.parent_protocol
            .clone()
            .or_else(|| metadata.lookup_protocol(&self.slug())?.parent_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewQuery {
    pub adapter_type: AdapterType,
    pub chain: Option<String>,
    pub data_type: Option<String>,
}

impl OverviewQuery {
    pub fn new(adapter_type: AdapterType) -> Self {
        Self {
            adapter_type,
            chain: None,
            data_type: None,
        }
    }

    /// `{adapterType}` or `{adapterType}-{chain}`.
    pub fn payload_file_stem(&self) -> String {
        match &self.chain {
            Some(chain) => format!("{}-{}", self.adapter_type, slugify(chain)),
            None => self.adapter_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            timeout_ms: 10_000,
            max_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

pub fn overview_url(base_url: &str, query: &OverviewQuery) -> Result<String, UpstreamError> {
    let mut path = format!(
        "{}/overview/{}",
        base_url.trim_end_matches('/'),
        query.adapter_type
    );
    if let Some(chain) = &query.chain {
        path.push('/');
        path.push_str(&slugify(chain));
    }

    let mut params = vec![
        ("excludeTotalDataChart", "false"),
        ("excludeTotalDataChartBreakdown", "false"),
    ];
    if let Some(data_type) = &query.data_type {
        params.push(("dataType", data_type.as_str()));
    }

    reqwest::Url::parse_with_params(&path, &params)
        .map(String::from)
        .map_err(|err| UpstreamError::InvalidUrl {
            url: path,
            message: err.to_string(),
        })
}

pub trait PayloadFetcher: Send + Sync + 'static {
    fn fetch(&self, query: &OverviewQuery) -> Result<OverviewPayload, UpstreamError>;
}

pub struct HttpPayloadFetcher {
    client: reqwest::blocking::Client,
    config: UpstreamConfig,
}

impl HttpPayloadFetcher {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| UpstreamError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client, config })
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, UpstreamError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| UpstreamError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::HttpRequest {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| UpstreamError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

impl PayloadFetcher for HttpPayloadFetcher {
    fn fetch(&self, query: &OverviewQuery) -> Result<OverviewPayload, UpstreamError> {
        let url = overview_url(&self.config.base_url, query)?;
        let bytes = retry(&self.config, || self.get_bytes(&url))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Serves payloads saved as `{dir}/{adapterType}-{chain}.json`, falling back
/// to the chain-less `{dir}/{adapterType}.json`.
pub struct FilePayloadFetcher {
    dir: PathBuf,
}

impl FilePayloadFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl PayloadFetcher for FilePayloadFetcher {
    fn fetch(&self, query: &OverviewQuery) -> Result<OverviewPayload, UpstreamError> {
        let chain_path = self.dir.join(format!("{}.json", query.payload_file_stem()));
        let adapter_path = self.dir.join(format!("{}.json", query.adapter_type));

        let path = [chain_path, adapter_path]
            .into_iter()
            .find(|path| path.is_file())
            .ok_or_else(|| UpstreamError::Missing(query.payload_file_stem()))?;

        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Payloads held in memory, keyed like the file fetcher.
#[derive(Clone, Default)]
pub struct InMemoryPayloadFetcher {
    inner: Arc<RwLock<BTreeMap<String, OverviewPayload>>>,
}

impl InMemoryPayloadFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, query: &OverviewQuery, payload: OverviewPayload) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(query.payload_file_stem(), payload);
    }
}

impl PayloadFetcher for InMemoryPayloadFetcher {
    fn fetch(&self, query: &OverviewQuery) -> Result<OverviewPayload, UpstreamError> {
        let payloads = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        payloads
            .get(&query.payload_file_stem())
            .or_else(|| payloads.get(query.adapter_type.as_str()))
            .cloned()
            .ok_or_else(|| UpstreamError::Missing(query.payload_file_stem()))
    }
}

/// Fetches the payload, substituting an empty one when the fetch fails.
pub fn fetch_or_empty(fetcher: &dyn PayloadFetcher, query: &OverviewQuery) -> OverviewPayload {
    match fetcher.fetch(query) {
        Ok(payload) => {
            debug!(
                component = "upstream",
                event = "upstream.fetch.ok",
                adapter_type = %query.adapter_type,
                chain = query.chain.as_deref().unwrap_or("all"),
                protocols = payload.protocols.len()
            );
            payload
        }
        Err(err) => {
            warn!(
                component = "upstream",
                event = "upstream.fetch.failed",
                adapter_type = %query.adapter_type,
                chain = query.chain.as_deref().unwrap_or("all"),
                error = %err
            );
            OverviewPayload::default()
        }
    }
}

fn retry<T>(
    cfg: &UpstreamConfig,
    mut f: impl FnMut() -> Result<T, UpstreamError>,
) -> Result<T, UpstreamError> {
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= cfg.max_retries => return Err(err),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let shift = attempt.saturating_sub(1).min(10);
                let sleep_ms = cfg.retry_backoff_ms.saturating_mul(1u64 << shift);
                debug!(
                    component = "upstream",
                    event = "upstream.fetch.retry",
                    attempt,
                    sleep_ms,
                    error = %err
                );
                std::thread::sleep(std::time::Duration::from_millis(sleep_ms));
            }
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts string or numeric ids.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(text) if !text.trim().is_empty() => Some(text),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

/// Keeps every `[timestamp, value]` pair with a usable timestamp. Values go
/// through [`ValueNode::from_json`]; a missing value counts as zero.
fn lenient_samples<'de, D>(deserializer: D) -> Result<Vec<RawSample>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let timestamp = parse_timestamp(pair.first()?)?;
            let value = pair
                .get(1)
                .map(ValueNode::from_json)
                .unwrap_or_default();
            Some(RawSample::new(timestamp, value))
        })
        .collect())
}

fn parse_timestamp(raw: &serde_json::Value) -> Option<i64> {
    match raw {
        serde_json::Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.is_finite()).map(|v| v as i64)),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
