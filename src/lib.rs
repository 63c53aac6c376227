// Sliding Limiter Library

pub mod api;
pub mod config;
pub mod errors;
pub mod observability;
pub mod rate_limit;
pub mod redis;
pub mod store;

pub use config::Config;
pub use errors::{AppError, Result};
pub use rate_limit::{LimiterConfig, RateLimitResult, RateLimiter, SlidingWindowRateLimiter};
