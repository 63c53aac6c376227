use crate::{
    api::{health, limits},
    observability::HealthChecker,
    rate_limit::RateLimiter,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn RateLimiter>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_enabled: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .nest("/v1", v1_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn v1_routes() -> Router<AppState> {
    Router::new()
        .route("/limits/:name", get(limits::window_count))
        .route("/limits/:name/hits", post(limits::record_hit))
}
