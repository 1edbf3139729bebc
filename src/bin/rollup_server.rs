use std::{error::Error, sync::Arc, time::Duration};

use metrics_rollup::{
    init_logging, log_app_bind, log_app_start, log_app_stop, log_metadata_source,
    log_payload_source, logging_config_from_env, overview_router, refresh_once,
    rollup_config_from_env, spawn_metadata_refresh, FileMetadataFetcher, FilePayloadFetcher,
    HttpMetadataFetcher, HttpPayloadFetcher, MetadataCache, MetadataFetcher, MetadataLookup,
    OverviewSettings, PayloadFetcher, RollupConfig,
};

fn main() -> Result<(), Box<dyn Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    let config = rollup_config_from_env();
    log_app_start(&logging_cfg, &config);

    let addr = config.socket_addr()?;
    let fetcher = payload_fetcher(&config)?;
    let metadata = metadata_cache(&config)?;

    let app = overview_router(
        fetcher,
        metadata,
        OverviewSettings {
            exclude_incomplete_day: config.exclude_incomplete_day,
            top_chains: config.top_chains,
        },
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        log_app_bind(bound_addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        log_app_stop("ctrl_c");
        Ok::<(), Box<dyn Error>>(())
    })
}

/// Resolves on Ctrl-C. Without a signal handler the server runs until killed.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            component = "rollup_server",
            event = "app.signal_unavailable",
            error = %err
        );
        std::future::pending::<()>().await;
    }
}

fn payload_fetcher(config: &RollupConfig) -> Result<Arc<dyn PayloadFetcher>, Box<dyn Error>> {
    match &config.payload_dir {
        Some(dir) => {
            log_payload_source("file", &dir.display().to_string());
            Ok(Arc::new(FilePayloadFetcher::new(dir)))
        }
        None => {
            log_payload_source("http", &config.upstream.base_url);
            Ok(Arc::new(HttpPayloadFetcher::new(config.upstream.clone())?))
        }
    }
}

/// Loads the first snapshot synchronously, then keeps it fresh in the
/// background. Without a metadata source every chain request is ineligible.
fn metadata_cache(config: &RollupConfig) -> Result<Arc<dyn MetadataLookup>, Box<dyn Error>> {
    let cache = MetadataCache::default();
    let interval = Duration::from_millis(config.metadata_refresh_ms);

    let source = (&config.metadata_path, &config.metadata_base_url);
    let fetcher: Arc<dyn MetadataFetcher> = match source {
        (Some(path), _) => {
            let location = path.display().to_string();
            log_metadata_source("file", Some(&location), Some(config.metadata_refresh_ms));
            Arc::new(FileMetadataFetcher::new(path))
        }
        (None, Some(base_url)) => {
            log_metadata_source(
                "http",
                Some(base_url.as_str()),
                Some(config.metadata_refresh_ms),
            );
            Arc::new(HttpMetadataFetcher::new(
                base_url.clone(),
                config.upstream.timeout_ms,
            )?)
        }
        (None, None) => {
            log_metadata_source("none", None, None);
            return Ok(Arc::new(cache));
        }
    };

    refresh_once(&cache, fetcher.as_ref())?;
    spawn_metadata_refresh(cache.clone(), fetcher, interval)?;
    Ok(Arc::new(cache))
}
