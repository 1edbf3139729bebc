//! HTTP routes serving chain overviews as JSON.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::parse_bool;
use crate::hierarchy::VersionView;
use crate::metadata::{AdapterType, MetadataLookup};
use crate::overview::{build_chain_overview, OverviewRequest, DEFAULT_TOP_CHAINS};
use crate::ranking::SortMetric;
use crate::upstream::{fetch_or_empty, PayloadFetcher};
use crate::window::DayCutoff;

/// Server-wide defaults a request may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverviewSettings {
    pub exclude_incomplete_day: bool,
    pub top_chains: usize,
}

impl Default for OverviewSettings {
    fn default() -> Self {
        Self {
            exclude_incomplete_day: true,
            top_chains: DEFAULT_TOP_CHAINS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewParams {
    pub sort_by: Option<String>,
    pub data_type: Option<String>,
    pub versions: Option<String>,
    pub exclude_incomplete_day: Option<String>,
    pub as_of_day: Option<i64>,
}

#[derive(Clone)]
struct OverviewAppState {
    fetcher: Arc<dyn PayloadFetcher>,
    metadata: Arc<dyn MetadataLookup>,
    settings: OverviewSettings,
}

pub fn overview_router(
    fetcher: Arc<dyn PayloadFetcher>,
    metadata: Arc<dyn MetadataLookup>,
    settings: OverviewSettings,
) -> Router {
    Router::new()
        .route("/overview/{adapter_type}", get(get_overview))
        .route("/overview/{adapter_type}/{chain}", get(get_chain_overview))
        .with_state(OverviewAppState {
            fetcher,
            metadata,
            settings,
        })
}

/// Strong ETag over the serialized body.
pub fn overview_etag(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

/// Turns query parameters into a request, or the message for a 400.
pub fn parse_overview_request(
    adapter_type: AdapterType,
    chain: Option<String>,
    params: OverviewParams,
    settings: &OverviewSettings,
) -> Result<OverviewRequest, String> {
    let sort_by = match params.sort_by.as_deref() {
        Some(raw) => raw.parse::<SortMetric>().map_err(|err| err.to_string())?,
        None => SortMetric::default(),
    };
    let version_view = match params.versions.as_deref().map(str::trim) {
        None | Some("") | Some("separate") => VersionView::Separate,
        Some("combined") => VersionView::Combined,
        Some(other) => return Err(format!("unknown versions view: {other}")),
    };
    let exclude_incomplete_day = match params.exclude_incomplete_day.as_deref() {
        Some(raw) => parse_bool(raw)
            .ok_or_else(|| format!("invalid excludeIncompleteDay value: {raw}"))?,
        None => settings.exclude_incomplete_day,
    };
    let cutoff = match params.as_of_day {
        Some(as_of_day) => DayCutoff {
            as_of_day,
            exclude_incomplete_day,
        },
        None => DayCutoff::today(exclude_incomplete_day),
    };

    Ok(OverviewRequest {
        chain,
        data_type: params.data_type.filter(|raw| !raw.trim().is_empty()),
        sort_by,
        version_view,
        top_chains: settings.top_chains,
        ..OverviewRequest::new(adapter_type, cutoff)
    })
}

async fn get_overview(
    State(state): State<OverviewAppState>,
    Path(adapter_type): Path<String>,
    Query(params): Query<OverviewParams>,
    headers: HeaderMap,
) -> Response {
    serve_overview(state, adapter_type, None, params, &headers).await
}

async fn get_chain_overview(
    State(state): State<OverviewAppState>,
    Path((adapter_type, chain)): Path<(String, String)>,
    Query(params): Query<OverviewParams>,
    headers: HeaderMap,
) -> Response {
    serve_overview(state, adapter_type, Some(chain), params, &headers).await
}

async fn serve_overview(
    state: OverviewAppState,
    raw_adapter_type: String,
    chain: Option<String>,
    params: OverviewParams,
    headers: &HeaderMap,
) -> Response {
    let chain_label = chain.clone().unwrap_or_else(|| "all".to_string());

    let adapter_type = match raw_adapter_type.parse::<AdapterType>() {
        Ok(adapter_type) => adapter_type,
        Err(err) => {
            let message = err.to_string();
            return logged_error(StatusCode::NOT_FOUND, &raw_adapter_type, &chain_label, message);
        }
    };
    let request = match parse_overview_request(adapter_type, chain, params, &state.settings) {
        Ok(request) => request,
        Err(message) => {
            return logged_error(StatusCode::BAD_REQUEST, &raw_adapter_type, &chain_label, message);
        }
    };

    let fetcher = Arc::clone(&state.fetcher);
    let metadata = Arc::clone(&state.metadata);
    let built = tokio::task::spawn_blocking(move || {
        let payload = fetch_or_empty(fetcher.as_ref(), &request.query());
        build_chain_overview(&payload, &request, metadata.as_ref())
    })
    .await;

    let overview = match built {
        Ok(overview) => overview,
        Err(err) => {
            return logged_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &raw_adapter_type,
                &chain_label,
                format!("overview task failed: {err}"),
            )
        }
    };
    if overview.is_empty() {
        return logged_error(
            StatusCode::NOT_FOUND,
            &raw_adapter_type,
            &chain_label,
            format!("no protocols for {adapter_type} on {chain_label}"),
        );
    }

    let body = match serde_json::to_vec(&overview) {
        Ok(body) => body,
        Err(err) => {
            return logged_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &raw_adapter_type,
                &chain_label,
                err.to_string(),
            )
        }
    };
    let etag = overview_etag(&body);
    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.split(',').any(|tag| tag.trim() == etag));
    let status = if not_modified {
        StatusCode::NOT_MODIFIED
    } else {
        StatusCode::OK
    };

    info!(
        component = "http",
        event = "http.overview.request",
        adapter_type = %adapter_type,
        chain = %chain_label,
        status = status.as_u16(),
        protocols = overview.protocols.len()
    );

    if not_modified {
        return (status, [(header::ETAG, etag)]).into_response();
    }
    (
        status,
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::ETAG, etag),
        ],
        body,
    )
        .into_response()
}

fn logged_error(status: StatusCode, adapter_type: &str, chain: &str, message: String) -> Response {
    warn!(
        component = "http",
        event = "http.overview.request",
        adapter_type,
        chain,
        status = status.as_u16(),
        error = %message
    );
    (status, Json(json!({ "error": message }))).into_response()
}
