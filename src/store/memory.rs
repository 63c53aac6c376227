use super::{Batch, OrderedStore, StoreCommand};
use crate::errors::{AppError, Result};
use crate::rate_limit::clock::{Clock, SystemClock};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct SortedSet {
    members: BTreeMap<String, f64>,
    expires_at_ms: Option<f64>,
}

/// In-process [`OrderedStore`] with Redis sorted-set semantics.
///
/// Expiry is evaluated lazily against the injected clock, so a
/// [`ManualClock`](crate::rate_limit::clock::ManualClock) shared with the
/// limiter makes TTL behaviour deterministic. A batch is applied under a
/// single lock.
pub struct MemoryStore {
    keys: Mutex<HashMap<String, SortedSet>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether `key` currently exists (not expired, not emptied).
    pub async fn exists(&self, key: &str) -> bool {
        let mut keys = self.keys.lock().await;
        Self::evict_expired(&mut keys, key, self.clock.now_ms());
        keys.contains_key(key)
    }

    /// Members of `key` ordered by score.
    pub async fn members(&self, key: &str) -> Vec<(String, f64)> {
        let mut keys = self.keys.lock().await;
        Self::evict_expired(&mut keys, key, self.clock.now_ms());

        let mut members: Vec<(String, f64)> = keys
            .get(key)
            .map(|set| set.members.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }

    fn evict_expired(keys: &mut HashMap<String, SortedSet>, key: &str, now_ms: f64) {
        let expired = keys
            .get(key)
            .and_then(|set| set.expires_at_ms)
            .is_some_and(|deadline| deadline <= now_ms);
        if expired {
            keys.remove(key);
        }
    }

    fn apply(keys: &mut HashMap<String, SortedSet>, command: &StoreCommand, now_ms: f64) -> i64 {
        match command {
            StoreCommand::OrderedSetAdd { key, member, score } => {
                Self::evict_expired(keys, key, now_ms);
                let set = keys.entry(key.clone()).or_default();
                match set.members.insert(member.clone(), *score) {
                    Some(_) => 0,
                    None => 1,
                }
            }
            StoreCommand::OrderedSetRemoveByScoreRange { key, min, max } => {
                Self::evict_expired(keys, key, now_ms);
                let Some(set) = keys.get_mut(key) else {
                    return 0;
                };
                let before = set.members.len();
                set.members.retain(|_, score| *score < *min || *score > *max);
                let removed = before - set.members.len();
                if set.members.is_empty() {
                    keys.remove(key);
                }
                removed as i64
            }
            StoreCommand::OrderedSetCardinality { key } => {
                Self::evict_expired(keys, key, now_ms);
                keys.get(key).map_or(0, |set| set.members.len() as i64)
            }
            StoreCommand::ExpireKey { key, ttl_seconds } => {
                Self::evict_expired(keys, key, now_ms);
                match keys.get_mut(key) {
                    Some(set) => {
                        set.expires_at_ms = Some(now_ms + (*ttl_seconds as f64) * 1000.0);
                        1
                    }
                    None => 0,
                }
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderedStore for MemoryStore {
    async fn execute(&self, batch: Batch) -> Result<Vec<i64>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }

        let mut keys = self.keys.lock().await;
        let now_ms = self.clock.now_ms();

        Ok(batch
            .commands
            .iter()
            .map(|command| Self::apply(&mut keys, command, now_ms))
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}
