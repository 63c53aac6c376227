use crate::errors::Result;
use crate::rate_limit::sliding_window::{RateLimitResult, SlidingWindowRateLimiter};
use async_trait::async_trait;

/// A named, windowed quota whose state lives outside the process.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record a hit for `name` and fail with
    /// [`AppError::RateLimitExceeded`](crate::errors::AppError::RateLimitExceeded)
    /// when the quota is exhausted.
    async fn hit(&self, name: &str) -> Result<RateLimitResult>;

    /// Record a hit for `name` and report the outcome without failing on
    /// rejection.
    async fn evaluate(&self, name: &str) -> Result<RateLimitResult>;

    /// Hits currently counted against `name`.
    async fn current_count(&self, name: &str) -> Result<u64>;
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn hit(&self, name: &str) -> Result<RateLimitResult> {
        SlidingWindowRateLimiter::hit(self, name).await
    }

    async fn evaluate(&self, name: &str) -> Result<RateLimitResult> {
        SlidingWindowRateLimiter::evaluate(self, name).await
    }

    async fn current_count(&self, name: &str) -> Result<u64> {
        SlidingWindowRateLimiter::current_count(self, name).await
    }
}
