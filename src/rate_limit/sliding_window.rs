use crate::errors::{AppError, Result};
use crate::observability::MetricsRecorder;
use crate::rate_limit::clock::{Clock, SystemClock};
use crate::rate_limit::key_schema::KeySchema;
use crate::store::{Batch, BatchMode, OrderedStore, StoreCommand};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Position of the cardinality reply in a hit batch.
const HIT_CARDINALITY_REPLY: usize = 2;
/// Position of the cardinality reply in a peek batch.
const PEEK_CARDINALITY_REPLY: usize = 1;

/// Immutable limiter parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    /// Width of the sliding window in milliseconds
    pub window_size_ms: f64,
    /// Hits allowed inside one window; a count above this is rejected
    pub max_hits: u64,
}

impl LimiterConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.window_size_ms.is_finite() || self.window_size_ms <= 0.0 {
            return Err(AppError::Configuration(format!(
                "window_size_ms must be a positive number, got {}",
                self.window_size_ms
            )));
        }

        if self.max_hits == 0 {
            return Err(AppError::Configuration(
                "max_hits must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Seconds of idle time after which the window key removes itself.
    pub fn ttl_seconds(&self) -> u64 {
        (self.window_size_ms / 1000.0).floor() as u64 + 1
    }
}

/// Sliding window rate limiter over a shared ordered store.
///
/// Every hit is a member of a sorted set scored by its timestamp. A call
/// records the hit, prunes everything at or before the trailing edge of the
/// window, counts what is left and refreshes the key's TTL, all in one batch.
/// The limiter holds no state of its own, so any number of instances
/// configured alike share one window.
pub struct SlidingWindowRateLimiter {
    config: LimiterConfig,
    store: Arc<dyn OrderedStore>,
    key_schema: KeySchema,
    clock: Arc<dyn Clock>,
    batch_mode: BatchMode,
}

impl SlidingWindowRateLimiter {
    /// Create a new sliding window rate limiter
    pub fn new(
        config: LimiterConfig,
        store: Arc<dyn OrderedStore>,
        key_schema: KeySchema,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            store,
            key_schema,
            clock: Arc::new(SystemClock),
            batch_mode: BatchMode::Pipeline,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Submit hits as plain pipelines (the default) or as transactions.
    ///
    /// Pipelines let concurrent callers interleave, so the window can admit
    /// a few extra hits under contention. Transactions close that gap at the
    /// cost of latency on the store.
    pub fn with_batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = mode;
        self
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn batch_mode(&self) -> BatchMode {
        self.batch_mode
    }

    /// Store key of the window for `name`.
    pub fn key(&self, name: &str) -> String {
        self.key_schema
            .sliding_window_key(name, self.config.window_size_ms, self.config.max_hits)
    }

    /// Record a hit and report the window state without rejecting.
    pub async fn evaluate(&self, name: &str) -> Result<RateLimitResult> {
        if name.is_empty() {
            return Err(AppError::Validation(
                "rate limiter name must not be empty".to_string(),
            ));
        }

        let key = self.key(name);
        let now = self.clock.now_ms();
        let nonce: u32 = rand::thread_rng().gen_range(1..=999);

        let mut batch = Batch::new(self.batch_mode);
        batch
            .push(StoreCommand::OrderedSetAdd {
                key: key.clone(),
                member: format!("{}-{}", now, nonce),
                score: now,
            })
            .push(StoreCommand::OrderedSetRemoveByScoreRange {
                key: key.clone(),
                min: 0.0,
                max: now - self.config.window_size_ms,
            })
            .push(StoreCommand::OrderedSetCardinality { key: key.clone() })
            .push(StoreCommand::ExpireKey {
                key: key.clone(),
                ttl_seconds: self.config.ttl_seconds(),
            });

        let replies = self.submit(&key, batch).await?;
        let current = cardinality(&replies, HIT_CARDINALITY_REPLY)?;

        let result = RateLimitResult::new(key, current, &self.config);

        tracing::debug!(
            key = %result.key,
            current = %result.current,
            limit = %result.limit,
            allowed = %result.allowed,
            "Sliding window evaluated"
        );

        MetricsRecorder::record_decision(result.allowed);

        Ok(result)
    }

    /// Record a hit, failing with [`AppError::RateLimitExceeded`] once the
    /// window holds more than `max_hits`. A rejected hit stays recorded.
    pub async fn hit(&self, name: &str) -> Result<RateLimitResult> {
        let result = self.evaluate(name).await?;

        if !result.allowed {
            tracing::warn!(
                key = %result.key,
                current = %result.current,
                limit = %result.limit,
                "Rate limit exceeded"
            );

            return Err(AppError::RateLimitExceeded {
                retry_after_secs: result.retry_after_secs().unwrap_or_default(),
                key: result.key,
                current: result.current,
                limit: result.limit,
            });
        }

        Ok(result)
    }

    /// Count the hits in the current window without recording one.
    pub async fn current_count(&self, name: &str) -> Result<u64> {
        let key = self.key(name);
        let now = self.clock.now_ms();

        let mut batch = Batch::new(self.batch_mode);
        batch
            .push(StoreCommand::OrderedSetRemoveByScoreRange {
                key: key.clone(),
                min: 0.0,
                max: now - self.config.window_size_ms,
            })
            .push(StoreCommand::OrderedSetCardinality { key: key.clone() });

        let replies = self.submit(&key, batch).await?;
        cardinality(&replies, PEEK_CARDINALITY_REPLY)
    }

    async fn submit(&self, key: &str, batch: Batch) -> Result<Vec<i64>> {
        let started = Instant::now();
        let outcome = self.store.execute(batch).await;
        MetricsRecorder::record_batch_duration(started.elapsed().as_secs_f64());

        outcome.map_err(|e| {
            tracing::error!(key = %key, error = %e, "Rate limiter store batch failed");
            MetricsRecorder::record_store_error();
            e
        })
    }
}

fn cardinality(replies: &[i64], index: usize) -> Result<u64> {
    replies
        .get(index)
        .map(|count| (*count).max(0) as u64)
        .ok_or_else(|| {
            AppError::Internal(format!(
                "store returned {} replies, expected at least {}",
                replies.len(),
                index + 1
            ))
        })
}

/// Outcome of one evaluation of the window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitResult {
    /// Store key of the window
    pub key: String,
    /// Whether the caller may proceed
    pub allowed: bool,
    /// The configured maximum number of hits
    pub limit: u64,
    /// Hits in the window, including the one just recorded
    pub current: u64,
    /// Hits left before the next one is rejected
    pub remaining: u64,
    /// Width of the window in milliseconds
    pub window_ms: f64,
}

impl RateLimitResult {
    fn new(key: String, current: u64, config: &LimiterConfig) -> Self {
        Self {
            key,
            allowed: current <= config.max_hits,
            limit: config.max_hits,
            current,
            remaining: config.max_hits.saturating_sub(current),
            window_ms: config.window_size_ms,
        }
    }

    /// Upper bound on the seconds until a rejected caller can succeed.
    pub fn retry_after_secs(&self) -> Option<u64> {
        if self.allowed {
            None
        } else {
            Some((self.window_ms / 1000.0).ceil() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    const T0: f64 = 1_700_000_000_000.0;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        limiter: SlidingWindowRateLimiter,
    }

    fn fixture(window_size_ms: f64, max_hits: u64) -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = SlidingWindowRateLimiter::new(
            LimiterConfig {
                window_size_ms,
                max_hits,
            },
            store.clone(),
            KeySchema::default(),
        )
        .unwrap()
        .with_clock(clock.clone());

        Fixture {
            clock,
            store,
            limiter,
        }
    }

    /// Captures submitted batches and answers every command with `reply`.
    struct RecordingStore {
        batches: Mutex<Vec<Batch>>,
        reply: i64,
    }

    #[async_trait]
    impl OrderedStore for RecordingStore {
        async fn execute(&self, batch: Batch) -> Result<Vec<i64>> {
            let replies = vec![self.reply; batch.len()];
            self.batches.lock().await.push(batch);
            Ok(replies)
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        let store: Arc<dyn OrderedStore> = Arc::new(MemoryStore::new());

        for (window_size_ms, max_hits) in [(0.0, 1), (-1.0, 1), (f64::NAN, 1), (1000.0, 0)] {
            let result = SlidingWindowRateLimiter::new(
                LimiterConfig {
                    window_size_ms,
                    max_hits,
                },
                store.clone(),
                KeySchema::default(),
            );
            assert!(matches!(result, Err(AppError::Configuration(_))));
        }
    }

    #[test]
    fn test_ttl_covers_window() {
        let ttl = |window_size_ms| {
            LimiterConfig {
                window_size_ms,
                max_hits: 1,
            }
            .ttl_seconds()
        };

        assert_eq!(ttl(1000.0), 2);
        assert_eq!(ttl(1500.0), 2);
        assert_eq!(ttl(999.0), 1);
        assert_eq!(ttl(60_000.0), 61);
    }

    #[tokio::test]
    async fn test_batch_layout() {
        let store = Arc::new(RecordingStore {
            batches: Mutex::new(Vec::new()),
            reply: 1,
        });
        let clock = Arc::new(ManualClock::new(T0));
        let limiter = SlidingWindowRateLimiter::new(
            LimiterConfig {
                window_size_ms: 1500.0,
                max_hits: 3,
            },
            store.clone(),
            KeySchema::new("test"),
        )
        .unwrap()
        .with_clock(clock)
        .with_batch_mode(BatchMode::Atomic);

        let result = assert_ok!(limiter.hit("alice").await);
        assert_eq!(result.current, 1);
        assert_eq!(result.remaining, 2);

        let batches = store.batches.lock().await;
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        let key = "test:limiter:sliding:alice:1500:3".to_string();

        assert_eq!(batch.mode, BatchMode::Atomic);
        assert_eq!(batch.len(), 4);

        match &batch.commands[0] {
            StoreCommand::OrderedSetAdd {
                key: k,
                member,
                score,
            } => {
                assert_eq!(k, &key);
                assert_eq!(*score, T0);
                let (stamp, nonce) = member.rsplit_once('-').unwrap();
                assert_eq!(stamp, T0.to_string());
                let nonce: u32 = nonce.parse().unwrap();
                assert!((1..=999).contains(&nonce));
            }
            other => panic!("unexpected first command: {:?}", other),
        }
        assert_eq!(
            batch.commands[1],
            StoreCommand::OrderedSetRemoveByScoreRange {
                key: key.clone(),
                min: 0.0,
                max: T0 - 1500.0,
            }
        );
        assert_eq!(
            batch.commands[2],
            StoreCommand::OrderedSetCardinality { key: key.clone() }
        );
        assert_eq!(
            batch.commands[3],
            StoreCommand::ExpireKey {
                key,
                ttl_seconds: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_burst_over_capacity_is_rejected() {
        let f = fixture(1000.0, 5);

        for i in 1..=5 {
            let result = assert_ok!(f.limiter.hit("burst").await);
            assert_eq!(result.current, i);
            f.clock.advance_ms(0.01);
        }

        let err = assert_err!(f.limiter.hit("burst").await);
        match err {
            AppError::RateLimitExceeded {
                current,
                limit,
                retry_after_secs,
                ..
            } => {
                assert_eq!(current, 6);
                assert_eq!(limit, 5);
                assert_eq!(retry_after_secs, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_hits_stay_recorded() {
        let f = fixture(1000.0, 1);
        let key = f.limiter.key("greedy");

        assert_ok!(f.limiter.hit("greedy").await);
        for _ in 0..3 {
            f.clock.advance_ms(100.0);
            assert_err!(f.limiter.hit("greedy").await);
        }

        assert_eq!(f.store.members(&key).await.len(), 4);

        // The first hit has left the window but the rejected ones keep it full.
        f.clock.advance_ms(750.0);
        let result = f.limiter.evaluate("greedy").await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.current, 4);
    }

    #[tokio::test]
    async fn test_window_scenario() {
        let f = fixture(1000.0, 2);
        let key = f.limiter.key("scenario");

        assert_ok!(f.limiter.hit("scenario").await);
        f.clock.set_ms(T0 + 100.0);
        assert_ok!(f.limiter.hit("scenario").await);
        f.clock.set_ms(T0 + 200.0);
        let err = assert_err!(f.limiter.hit("scenario").await);
        assert!(matches!(err, AppError::RateLimitExceeded { current: 3, .. }));
        assert_eq!(f.store.members(&key).await.len(), 3);

        // Trailing edge at T0+150 drops the hits at T0 and T0+100.
        f.clock.set_ms(T0 + 1150.0);
        let result = assert_ok!(f.limiter.hit("scenario").await);
        assert_eq!(result.current, 2);
        let scores: Vec<f64> = f.store.members(&key).await.into_iter().map(|m| m.1).collect();
        assert_eq!(scores, vec![T0 + 200.0, T0 + 1150.0]);

        // Trailing edge at T0+1100 drops T0+200 but not T0+1150.
        f.clock.set_ms(T0 + 2100.0);
        let result = assert_ok!(f.limiter.hit("scenario").await);
        assert_eq!(result.current, 2);
        let scores: Vec<f64> = f.store.members(&key).await.into_iter().map(|m| m.1).collect();
        assert_eq!(scores, vec![T0 + 1150.0, T0 + 2100.0]);
    }

    #[tokio::test]
    async fn test_hit_exactly_on_trailing_edge_is_pruned() {
        let f = fixture(1000.0, 10);

        assert_ok!(f.limiter.hit("edge").await);
        f.clock.advance_ms(1000.0);

        let result = assert_ok!(f.limiter.hit("edge").await);
        assert_eq!(result.current, 1);
    }

    #[tokio::test]
    async fn test_elapsed_window_always_counts_one() {
        let f = fixture(500.0, 1);

        for _ in 0..5 {
            let result = assert_ok!(f.limiter.hit("idle").await);
            assert_eq!(result.current, 1);
            f.clock.advance_ms(500.5);
        }
    }

    #[tokio::test]
    async fn test_names_are_isolated() {
        let f = fixture(1000.0, 2);

        assert_ok!(f.limiter.hit("a").await);
        f.clock.advance_ms(1.0);
        assert_ok!(f.limiter.hit("a").await);
        f.clock.advance_ms(1.0);
        assert_err!(f.limiter.hit("a").await);

        let result = assert_ok!(f.limiter.hit("b").await);
        assert_eq!(result.current, 1);
        assert_eq!(f.limiter.current_count("a").await.unwrap(), 3);
        assert_eq!(f.limiter.current_count("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_configuration_shares_window() {
        let f = fixture(1000.0, 2);
        let twin = SlidingWindowRateLimiter::new(
            *f.limiter.config(),
            f.store.clone(),
            KeySchema::default(),
        )
        .unwrap()
        .with_clock(f.clock.clone());
        let other = SlidingWindowRateLimiter::new(
            LimiterConfig {
                window_size_ms: 1000.0,
                max_hits: 3,
            },
            f.store.clone(),
            KeySchema::default(),
        )
        .unwrap()
        .with_clock(f.clock.clone());

        assert_ok!(f.limiter.hit("shared").await);
        f.clock.advance_ms(1.0);
        assert_ok!(twin.hit("shared").await);
        f.clock.advance_ms(1.0);
        assert_err!(f.limiter.hit("shared").await);

        let result = assert_ok!(other.hit("shared").await);
        assert_eq!(result.current, 1);
    }

    #[tokio::test]
    async fn test_key_expires_when_idle() {
        let f = fixture(1000.0, 5);
        let key = f.limiter.key("sleepy");

        assert_ok!(f.limiter.hit("sleepy").await);
        f.clock.advance_ms(1999.0);
        assert!(f.store.exists(&key).await);

        f.clock.advance_ms(1.0);
        assert!(!f.store.exists(&key).await);
        assert_eq!(f.limiter.current_count("sleepy").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_current_count_does_not_record() {
        let f = fixture(1000.0, 5);

        assert_ok!(f.limiter.hit("peek").await);
        for _ in 0..3 {
            assert_eq!(f.limiter.current_count("peek").await.unwrap(), 1);
        }

        f.clock.advance_ms(1000.0);
        assert_eq!(f.limiter.current_count("peek").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let f = fixture(1000.0, 5);
        f.store.set_unavailable(true);

        let err = assert_err!(f.limiter.hit("down").await);
        assert!(matches!(err, AppError::StoreUnavailable(_)));

        let err = assert_err!(f.limiter.current_count("down").await);
        assert!(err.is_store_error());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let f = fixture(1000.0, 5);
        let err = assert_err!(f.limiter.hit("").await);
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_short_reply_is_internal_error() {
        struct ShortStore;

        #[async_trait]
        impl OrderedStore for ShortStore {
            async fn execute(&self, _batch: Batch) -> Result<Vec<i64>> {
                Ok(vec![1])
            }

            async fn ping(&self) -> Result<()> {
                Ok(())
            }
        }

        let limiter = SlidingWindowRateLimiter::new(
            LimiterConfig {
                window_size_ms: 1000.0,
                max_hits: 1,
            },
            Arc::new(ShortStore),
            KeySchema::default(),
        )
        .unwrap();

        let err = assert_err!(limiter.hit("x").await);
        assert!(matches!(err, AppError::Internal(_)));
    }

    /// Moves forward a hundredth of a millisecond on every read.
    struct TickingClock(ManualClock);

    impl Clock for TickingClock {
        fn now_ms(&self) -> f64 {
            self.0.advance_ms(0.01);
            self.0.now_ms()
        }
    }

    #[tokio::test]
    async fn test_concurrent_hits_share_one_window() {
        let clock = Arc::new(TickingClock(ManualClock::new(T0)));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = Arc::new(
            SlidingWindowRateLimiter::new(
                LimiterConfig {
                    window_size_ms: 60_000.0,
                    max_hits: 5,
                },
                store.clone(),
                KeySchema::default(),
            )
            .unwrap()
            .with_clock(clock),
        );

        let calls = (0..20).map(|_| {
            let limiter = limiter.clone();
            async move { limiter.hit("crowd").await }
        });
        let outcomes = futures::future::join_all(calls).await;

        let allowed = outcomes.iter().filter(|o| o.is_ok()).count();
        let rejected = outcomes
            .iter()
            .filter(|o| matches!(o, Err(AppError::RateLimitExceeded { .. })))
            .count();

        // Each in-memory batch is applied under one lock, so the split is exact.
        assert_eq!(allowed, 5);
        assert_eq!(rejected, 15);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_sliding_window_against_redis() {
        let config = crate::config::RedisConfig {
            url: "redis://localhost:6379".to_string(),
        };
        let manager = crate::redis::create_client(&config).await.unwrap();
        let limiter = SlidingWindowRateLimiter::new(
            LimiterConfig {
                window_size_ms: 1000.0,
                max_hits: 3,
            },
            Arc::new(crate::store::RedisStore::new(manager)),
            KeySchema::new("test"),
        )
        .unwrap();

        // Let any window from a previous run expire.
        tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

        for i in 1..=3 {
            let result = limiter.hit("redis-basic").await.unwrap();
            assert_eq!(result.current, i);
        }
        assert!(matches!(
            limiter.hit("redis-basic").await,
            Err(AppError::RateLimitExceeded { current: 4, .. })
        ));
    }
}
