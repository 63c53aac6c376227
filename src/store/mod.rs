//! Ordered key-value store abstraction the limiter coordinates through.
//!
//! All limiter state lives behind [`OrderedStore`]. The Redis implementation
//! is what runs in production; the in-memory one honours the same contract
//! and backs the tests.

pub mod memory;
pub mod redis;

use crate::errors::Result;
use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// A single store operation. Each one produces exactly one integer reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    /// Insert `member` with `score`, or update the score of an existing
    /// member. Replies with the number of members newly added.
    OrderedSetAdd {
        key: String,
        member: String,
        score: f64,
    },
    /// Remove members whose score lies in `[min, max]`, both ends inclusive.
    /// Replies with the number removed.
    OrderedSetRemoveByScoreRange { key: String, min: f64, max: f64 },
    /// Replies with the member count, 0 for a missing key.
    OrderedSetCardinality { key: String },
    /// Set or replace the key's time-to-live. Replies 1 if the key exists.
    ExpireKey { key: String, ttl_seconds: u64 },
}

/// How a batch is submitted to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// One round trip, no isolation from other clients' batches.
    #[default]
    Pipeline,
    /// One round trip wrapped in a transaction (MULTI/EXEC).
    Atomic,
}

/// Commands submitted together, executed in order.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub commands: Vec<StoreCommand>,
    pub mode: BatchMode,
}

impl Batch {
    pub fn new(mode: BatchMode) -> Self {
        Self {
            commands: Vec::new(),
            mode,
        }
    }

    pub fn push(&mut self, command: StoreCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Capability set the rate limiter needs from its backing store.
#[async_trait]
pub trait OrderedStore: Send + Sync {
    /// Execute every command in the batch; replies come back in submission
    /// order. Connectivity failures surface unchanged.
    async fn execute(&self, batch: Batch) -> Result<Vec<i64>>;

    /// Round-trip check used by readiness probes.
    async fn ping(&self) -> Result<()>;
}
