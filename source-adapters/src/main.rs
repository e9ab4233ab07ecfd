use anyhow::{Context, Result};
use geosource::api::{create_oauth_router, OAuthAppState};
use geosource::config::GeoSourceConfig;
use geosource::oauth::{run_state_cleanup, OAuthCoordinator, OAuthStateStore};
use geosource::source_config::SourceConfigStore;
use source_adapters::adapters::sheets::config::SheetsEndpoints;
use source_adapters::api::{create_router, ApiState};
use source_adapters::cache::RecordCache;
use source_adapters::rate_limit::ProviderRateLimiter;
use source_adapters::{AdapterFactory, SetupService};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "geosource=info,source_adapters=info".into()),
        )
        .init();

    info!("GeoSource server starting...");

    let config = GeoSourceConfig::load().context("Failed to load configuration")?;

    info!(
        port = config.server.port,
        database_path = %config.server.database_path,
        oauth_configured = config.oauth.require().is_ok(),
        encryption_configured = config.encryption_key.is_some(),
        "Configuration loaded"
    );

    let http = config.providers.http_client()?;

    let state_store = Arc::new(
        OAuthStateStore::new(&config.server.database_path, config.oauth.state_ttl_minutes)
            .context("Failed to initialize OAuth state store")?,
    );
    let config_store = Arc::new(
        SourceConfigStore::new(&config.server.database_path)
            .context("Failed to initialize source config store")?,
    );
    info!("Stores initialized");

    tokio::spawn(run_state_cleanup(
        Arc::clone(&state_store),
        config.oauth.state_cleanup_interval_seconds,
    ));

    let coordinator = Arc::new(OAuthCoordinator::new(
        config.oauth.clone(),
        config.encryption_key.clone(),
        config.providers.endpoints(),
        state_store,
        config_store,
        http,
    ));

    let factory = Arc::new(AdapterFactory::new(
        Arc::clone(&coordinator),
        SheetsEndpoints {
            sheets_base_url: config.providers.sheets_base_url.clone(),
            drive_base_url: config.providers.drive_base_url.clone(),
        },
        Arc::new(RecordCache::new(Duration::from_secs(config.cache.record_ttl_seconds))),
        Arc::new(ProviderRateLimiter::new(
            config.cache.rate_limit_requests,
            Duration::from_secs(config.cache.rate_limit_window_seconds),
        )),
    ));

    let router = create_oauth_router(OAuthAppState { coordinator }).merge(create_router(ApiState {
        setup: Arc::new(SetupService::new(factory)),
    }));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
        .await
        .context("Failed to bind server port")?;
    info!(port = config.server.port, "GeoSource API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    info!("GeoSource server stopped");
    Ok(())
}
