use sliding_limiter::{
    api::{create_router, AppState},
    config::Config,
    observability::{init_tracing, HealthChecker},
    rate_limit::{KeySchema, SlidingWindowRateLimiter},
    redis::create_client,
    store::{OrderedStore, RedisStore},
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.observability);

    tracing::info!("Starting sliding limiter service");
    tracing::info!("Configuration loaded: {:?}", config.rate_limit);

    // Create Redis connection
    let redis_manager = create_client(&config.redis).await?;
    let store: Arc<dyn OrderedStore> = Arc::new(RedisStore::new(redis_manager));
    tracing::info!("Redis connection established");

    let limiter = SlidingWindowRateLimiter::new(
        config.rate_limit.limiter(),
        store.clone(),
        KeySchema::new(config.rate_limit.key_prefix.clone()),
    )?
    .with_batch_mode(config.rate_limit.batch_mode());

    let state = AppState {
        limiter: Arc::new(limiter),
        health_checker: Arc::new(HealthChecker::new(store)),
        metrics_enabled: config.observability.metrics_enabled,
    };
    let app = create_router(state);

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server host {}: {}", config.server.host, e))?;
    let addr = SocketAddr::new(host, config.server.port);
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
