use crate::errors::{AppError, Result};
use crate::rate_limit::LimiterConfig;
use crate::store::BatchMode;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub rate_limit: RateLimitConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Width of the sliding window in milliseconds
    pub window_size_ms: f64,
    /// Hits allowed inside one window; the next one is rejected
    pub max_hits: u64,
    /// Prefix for every store key the limiter writes
    pub key_prefix: String,
    /// Run each hit as a MULTI/EXEC transaction instead of a plain pipeline
    #[serde(default)]
    pub atomic: bool,
}

impl RateLimitConfig {
    pub fn limiter(&self) -> LimiterConfig {
        LimiterConfig {
            window_size_ms: self.window_size_ms,
            max_hits: self.max_hits,
        }
    }

    pub fn batch_mode(&self) -> BatchMode {
        if self.atomic {
            BatchMode::Atomic
        } else {
            BatchMode::Pipeline
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let environment =
            env::var("SLIDING_LIMITER_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(
                config::File::with_name(&format!("config/{}", environment)).required(false),
            )
            // e.g., SLIDING_LIMITER__RATE_LIMIT__MAX_HITS=100
            .add_source(
                config::Environment::with_prefix("SLIDING_LIMITER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AppError::Configuration("Invalid port number".to_string()));
        }

        if self.redis.url.is_empty() {
            return Err(AppError::Configuration("Redis URL is required".to_string()));
        }

        if self.rate_limit.key_prefix.is_empty() {
            return Err(AppError::Configuration(
                "Rate limit key prefix is required".to_string(),
            ));
        }

        self.rate_limit.limiter().validate()
    }
}
