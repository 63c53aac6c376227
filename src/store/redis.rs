use super::{Batch, BatchMode, OrderedStore, StoreCommand};
use crate::errors::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;

/// [`OrderedStore`] over Redis sorted sets.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

/// Translate a batch into a single Redis pipeline.
pub(crate) fn build_pipeline(batch: &Batch) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    if batch.mode == BatchMode::Atomic {
        pipe.atomic();
    }

    for command in &batch.commands {
        match command {
            StoreCommand::OrderedSetAdd { key, member, score } => {
                pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
            }
            StoreCommand::OrderedSetRemoveByScoreRange { key, min, max } => {
                pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg(*min).arg(*max);
            }
            StoreCommand::OrderedSetCardinality { key } => {
                pipe.cmd("ZCARD").arg(key);
            }
            StoreCommand::ExpireKey { key, ttl_seconds } => {
                pipe.cmd("EXPIRE").arg(key).arg(*ttl_seconds);
            }
        }
    }

    pipe
}

#[async_trait]
impl OrderedStore for RedisStore {
    async fn execute(&self, batch: Batch) -> Result<Vec<i64>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let pipe = build_pipeline(&batch);
        let mut conn = self.manager.clone();
        let replies: Vec<i64> = pipe.query_async(&mut conn).await?;
        Ok(replies)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        crate::redis::health_check(&mut conn).await
    }
}
