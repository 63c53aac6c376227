// Rate limiter endpoints

use axum::{
    extract::{Path, State},
    http::{header::HeaderName, HeaderMap, HeaderValue},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{api::routes::AppState, errors::Result, rate_limit::RateLimitResult};

/// Response for the window inspection endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct WindowCountResponse {
    pub name: String,
    pub current: u64,
}

/// POST /v1/limits/:name/hits
/// Records a hit; 429 once the window is full
#[tracing::instrument(skip(state))]
pub async fn record_hit(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    let result = state.limiter.hit(&name).await?;

    let mut headers = HeaderMap::new();
    add_rate_limit_headers(&mut headers, &result);

    Ok((headers, Json(result)))
}

/// GET /v1/limits/:name
/// Hits currently counted in the window, without recording one
#[tracing::instrument(skip(state))]
pub async fn window_count(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WindowCountResponse>> {
    let current = state.limiter.current_count(&name).await?;
    Ok(Json(WindowCountResponse { name, current }))
}

fn add_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    if let Ok(value) = HeaderValue::from_str(&result.limit.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-limit"), value);
    }

    if let Ok(value) = HeaderValue::from_str(&result.remaining.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-remaining"), value);
    }
}
