use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tally::analytics::{
    BotFilter, GeoIpService, IngestPipeline, QueryService, VisitorHasher,
};
use tally::api::{self, AppState};
use tally::auth::AuthService;
use tally::config::Config;
use tally::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing; RUST_LOG wins over LOG_LEVEL / ENVIRONMENT
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(environment = %config.environment, "Loaded configuration");

    // Bot signatures are required: refuse to start without them
    let bot_filter = Arc::new(
        BotFilter::from_config(&config.tracking).context("Failed to load bot signatures")?,
    );
    match config.tracking.bot_signatures_path.as_deref() {
        Some(path) => info!("Loaded bot signatures from {}", path),
        None => info!("Loaded embedded bot signatures"),
    }

    let geoip = GeoIpService::new(config.tracking.geoip_country_db_path.as_deref())?;
    if geoip.is_enabled() {
        info!("GeoIP country lookups enabled");
    }

    let store = storage::connect(&config.database).await?;
    info!("Database initialized successfully");

    let hasher = VisitorHasher::from_config(&config.tracking)?;
    let pipeline = IngestPipeline::new(Arc::clone(&store), bot_filter, hasher);
    let queries = QueryService::new(Arc::clone(&store));

    let track_url = config.track_url();
    let state = Arc::new(AppState::new(
        pipeline,
        queries,
        config.tracking.clone(),
        geoip,
        &track_url,
    )?);

    let auth_service = Arc::new(AuthService::new(config.auth.api_keys.clone()));
    if auth_service.is_enabled() {
        info!("🔐 Stats API requires an API key");
    } else {
        warn!("🔓 No API_KEY configured - stats are readable by anyone");
    }

    let router = api::create_router(state, auth_service);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Listening on http://{}", addr);
    info!("   - Tracking script at {}", track_url.replace("/track", "/analytics.js"));

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
