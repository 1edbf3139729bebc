//! Chain/protocol metadata: the read-only lookup the engine consumes, plus the
//! refreshing cache behind it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::record::ProtocolIdentity;

/// Lowercase, trimmed, inner whitespace collapsed to `-`.
pub fn slugify(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("unknown adapter type: {0}")]
    UnknownAdapterType(String),
    #[error("metadata parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterType {
    Fees,
    Dexs,
    Derivatives,
    Options,
    Aggregators,
    BridgeAggregators,
    AggregatorDerivatives,
}

impl AdapterType {
    pub const ALL: [AdapterType; 7] = [
        AdapterType::Fees,
        AdapterType::Dexs,
        AdapterType::Derivatives,
        AdapterType::Options,
        AdapterType::Aggregators,
        AdapterType::BridgeAggregators,
        AdapterType::AggregatorDerivatives,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AdapterType::Fees => "fees",
            AdapterType::Dexs => "dexs",
            AdapterType::Derivatives => "derivatives",
            AdapterType::Options => "options",
            AdapterType::Aggregators => "aggregators",
            AdapterType::BridgeAggregators => "bridge-aggregators",
            AdapterType::AggregatorDerivatives => "aggregator-derivatives",
        }
    }
}

impl FromStr for AdapterType {
    type Err = MetadataError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase();
        AdapterType::ALL
            .into_iter()
            .find(|adapter| adapter.as_str() == wanted)
            .ok_or_else(|| MetadataError::UnknownAdapterType(raw.to_string()))
    }
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMetadata {
    pub slug: String,
    pub display_name: String,
    pub adapter_types: BTreeSet<AdapterType>,
}

impl ChainMetadata {
    pub fn tracks(&self, adapter_type: AdapterType) -> bool {
        self.adapter_types.contains(&adapter_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMetadata {
    pub slug: String,
    pub display_name: String,
    pub parent_id: Option<String>,
}

/// Read-only view the engine resolves names and eligibility through.
pub trait MetadataLookup: Send + Sync {
    fn lookup_chain(&self, slug: &str) -> Option<ChainMetadata>;
    fn lookup_protocol(&self, slug: &str) -> Option<ProtocolMetadata>;
    fn lookup_parent(&self, parent_id: &str) -> Option<ProtocolIdentity>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainDocument {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    adapter_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolDocument {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    parent_protocol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParentDocument {
    id: String,
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    logo: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    chains: serde_json::Value,
    #[serde(default)]
    protocols: serde_json::Value,
    #[serde(default)]
    parents: serde_json::Value,
}

/// One consistent set of metadata. Chain and protocol keys are slugs; parents
/// are keyed by their full id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSnapshot {
    chains: BTreeMap<String, ChainMetadata>,
    protocols: BTreeMap<String, ProtocolMetadata>,
    parents: BTreeMap<String, ProtocolIdentity>,
}

impl MetadataSnapshot {
    /// Builds a snapshot from the chains, protocols and parent-protocols
    /// documents. A `null` document counts as empty; adapter types nobody
    /// knows are skipped.
    pub fn from_documents(
        chains: &serde_json::Value,
        protocols: &serde_json::Value,
        parents: &serde_json::Value,
    ) -> Result<Self, MetadataError> {
        let mut snapshot = Self::default();

        for doc in parse_list::<ChainDocument>(chains)? {
            let adapter_types = doc
                .adapter_types
                .iter()
                .filter_map(|raw| raw.parse::<AdapterType>().ok())
                .collect();
            snapshot.insert_chain(doc.display_name.as_deref().unwrap_or(&doc.name), adapter_types);
        }

        for doc in parse_list::<ProtocolDocument>(protocols)? {
            let slug = slugify(doc.slug.as_deref().unwrap_or(&doc.name));
            snapshot.protocols.insert(
                slug.clone(),
                ProtocolMetadata {
                    slug,
                    display_name: doc.display_name.unwrap_or(doc.name),
                    parent_id: doc.parent_protocol,
                },
            );
        }

        for doc in parse_list::<ParentDocument>(parents)? {
            snapshot.parents.insert(
                doc.id.clone(),
                ProtocolIdentity {
                    id: doc.id,
                    slug: slugify(&doc.name),
                    display_name: doc.display_name.unwrap_or_else(|| doc.name.clone()),
                    name: doc.name,
                    logo: doc.logo,
                    category: doc.category,
                },
            );
        }

        Ok(snapshot)
    }

    /// Reads a `{"chains": [...], "protocols": [...], "parents": [...]}` file.
    pub fn load_file(path: &Path) -> Result<Self, MetadataError> {
        let raw = std::fs::read(path)?;
        let file: SnapshotFile = serde_json::from_slice(&raw)?;
        Self::from_documents(&file.chains, &file.protocols, &file.parents)
    }

    pub fn insert_chain(&mut self, display_name: &str, adapter_types: BTreeSet<AdapterType>) {
        let slug = slugify(display_name);
        self.chains.insert(
            slug.clone(),
            ChainMetadata {
                slug,
                display_name: display_name.trim().to_string(),
                adapter_types,
            },
        );
    }

    pub fn insert_protocol(&mut self, display_name: &str, parent_id: Option<&str>) {
        let slug = slugify(display_name);
        self.protocols.insert(
            slug.clone(),
            ProtocolMetadata {
                slug,
                display_name: display_name.trim().to_string(),
                parent_id: parent_id.map(str::to_string),
            },
        );
    }

    pub fn insert_parent(&mut self, identity: ProtocolIdentity) {
        self.parents.insert(identity.id.clone(), identity);
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn protocol_count(&self) -> usize {
        self.protocols.len()
    }

    /// Keys present in `next` but not in `self`, and the reverse.
    pub fn reconcile(&self, next: &MetadataSnapshot) -> ReconcileReport {
        ReconcileReport {
            added_chains: key_difference(&next.chains, &self.chains),
            removed_chains: key_difference(&self.chains, &next.chains),
            added_protocols: key_difference(&next.protocols, &self.protocols),
            removed_protocols: key_difference(&self.protocols, &next.protocols),
        }
    }
}

impl MetadataLookup for MetadataSnapshot {
    fn lookup_chain(&self, slug: &str) -> Option<ChainMetadata> {
        self.chains.get(&slugify(slug)).cloned()
    }

    fn lookup_protocol(&self, slug: &str) -> Option<ProtocolMetadata> {
        self.protocols.get(&slugify(slug)).cloned()
    }

    fn lookup_parent(&self, parent_id: &str) -> Option<ProtocolIdentity> {
        self.parents.get(parent_id).cloned()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub added_chains: Vec<String>,
    pub removed_chains: Vec<String>,
    pub added_protocols: Vec<String>,
    pub removed_protocols: Vec<String>,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.added_chains.is_empty()
            && self.removed_chains.is_empty()
            && self.added_protocols.is_empty()
            && self.removed_protocols.is_empty()
    }
}

/// Process-wide shared metadata. Readers go through [`MetadataLookup`]; only
/// the refresh path writes.
#[derive(Debug, Clone, Default)]
pub struct MetadataCache {
    inner: Arc<RwLock<MetadataSnapshot>>,
}

impl MetadataCache {
    pub fn new(snapshot: MetadataSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> MetadataSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps in `next` and reports which keys came and went.
    pub fn refresh(&self, next: MetadataSnapshot) -> ReconcileReport {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let report = guard.reconcile(&next);
        *guard = next;
        report
    }
}

impl MetadataLookup for MetadataCache {
    fn lookup_chain(&self, slug: &str) -> Option<ChainMetadata> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup_chain(slug)
    }

    fn lookup_protocol(&self, slug: &str) -> Option<ProtocolMetadata> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup_protocol(slug)
    }

    fn lookup_parent(&self, parent_id: &str) -> Option<ProtocolIdentity> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup_parent(parent_id)
    }
}

pub trait MetadataFetcher: Send + Sync + 'static {
    fn fetch_snapshot(&self) -> Result<MetadataSnapshot, MetadataError>;
}

/// Fetches `{base}/chains.json`, `{base}/protocols.json` and
/// `{base}/parents.json`.
pub struct HttpMetadataFetcher {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpMetadataFetcher {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self, MetadataError> {
        let base_url = base_url.into();
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| MetadataError::Fetch {
                url: base_url.clone(),
                message: err.to_string(),
            })?;
        Ok(Self { client, base_url })
    }

    fn get_json(&self, document: &str) -> Result<serde_json::Value, MetadataError> {
        let url = format!("{}/{document}", self.base_url.trim_end_matches('/'));
        let fetch_error = |message: String| MetadataError::Fetch {
            url: url.clone(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| fetch_error(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("unexpected HTTP status {status}")));
        }
        let bytes = response.bytes().map_err(|err| fetch_error(err.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl MetadataFetcher for HttpMetadataFetcher {
    fn fetch_snapshot(&self) -> Result<MetadataSnapshot, MetadataError> {
        let chains = self.get_json("chains.json")?;
        let protocols = self.get_json("protocols.json")?;
        let parents = self.get_json("parents.json")?;
        MetadataSnapshot::from_documents(&chains, &protocols, &parents)
    }
}

/// Re-reads a snapshot file on every refresh.
pub struct FileMetadataFetcher {
    path: PathBuf,
}

impl FileMetadataFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MetadataFetcher for FileMetadataFetcher {
    fn fetch_snapshot(&self) -> Result<MetadataSnapshot, MetadataError> {
        MetadataSnapshot::load_file(&self.path)
    }
}

/// One refresh cycle. A failed fetch leaves the cache untouched.
pub fn refresh_once(
    cache: &MetadataCache,
    fetcher: &dyn MetadataFetcher,
) -> Result<ReconcileReport, MetadataError> {
    let next = fetcher.fetch_snapshot()?;
    let chains = next.chain_count();
    let protocols = next.protocol_count();
    let report = cache.refresh(next);

    info!(
        component = "metadata",
        event = "metadata.refresh.applied",
        chains,
        protocols,
        added_chains = report.added_chains.len(),
        removed_chains = report.removed_chains.len(),
        added_protocols = report.added_protocols.len(),
        removed_protocols = report.removed_protocols.len()
    );

    Ok(report)
}

/// Refreshes `cache` every `interval` on a dedicated thread for the life of
/// the process.
pub fn spawn_metadata_refresh(
    cache: MetadataCache,
    fetcher: Arc<dyn MetadataFetcher>,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("metadata-refresh".to_string())
        .spawn(move || loop {
            std::thread::sleep(interval);
            if let Err(err) = refresh_once(&cache, fetcher.as_ref()) {
                warn!(
                    component = "metadata",
                    event = "metadata.refresh.failed",
                    error = %err
                );
            }
        })
}

fn parse_list<T: serde::de::DeserializeOwned>(
    raw: &serde_json::Value,
) -> Result<Vec<T>, MetadataError> {
    if raw.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(raw.clone())?)
}

fn key_difference<V>(left: &BTreeMap<String, V>, right: &BTreeMap<String, V>) -> Vec<String> {
    left.keys()
        .filter(|key| !right.contains_key(*key))
        .cloned()
        .collect()
}
