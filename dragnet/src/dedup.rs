use std::time::Duration;

use moka::future::Cache;
use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

/// Eviction policy and TTL knobs for the dedup tiers. These are tuning
/// parameters, not correctness invariants: an evicted key may be forwarded
/// again, a present key never is.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub local_capacity: u64,
    pub local_ttl: Duration,
    pub shared_ttl: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            local_capacity: 100_000,
            local_ttl: Duration::from_secs(6 * 3600),
            shared_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Compose the uniqueness scope for one result:
/// `duplicates:<task>:<stage discriminator>:<value>`.
pub fn dedup_key(task_id: &str, stage: &str, value: &str) -> String {
    format!("duplicates:{task_id}:{}:{value}", stage.to_ascii_lowercase())
}

/// Concurrent "have I seen this key" oracle.
///
/// Two tiers: a bounded in-process cache consulted first, and an optional
/// shared redis store that arbitrates across workers and restarts. The
/// local tier's atomic entry insert guarantees that of N concurrent callers
/// presenting the same key, exactly one observes "first seen".
pub struct DedupCache {
    local: Cache<String, ()>,
    shared: Option<ConnectionManager>,
    shared_ttl: Duration,
}

impl DedupCache {
    /// Local-tier-only cache (single-worker deployments and tests).
    pub fn new(config: DedupConfig) -> Self {
        Self {
            local: Cache::builder()
                .max_capacity(config.local_capacity)
                .time_to_live(config.local_ttl)
                .build(),
            shared: None,
            shared_ttl: config.shared_ttl,
        }
    }

    /// Cache backed by a shared redis store for cross-worker dedup.
    pub async fn with_shared(config: DedupConfig, redis_url: &str) -> anyhow::Result<Self> {
        info!(url = redis_url, "connecting shared dedup store");
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        let mut cache = Self::new(config);
        cache.shared = Some(conn);
        Ok(cache)
    }

    /// Returns `true` exactly once per key: "first time seen, forward it".
    /// Every other caller, concurrent or later, gets `false`.
    ///
    /// Shared-store errors degrade to the local decision; suppressing a
    /// cross-worker duplicate is not worth stalling the pipeline.
    pub async fn seen_or_mark(&self, key: &str) -> bool {
        let entry = self.local.entry_by_ref(key).or_insert(()).await;
        if !entry.is_fresh() {
            return false;
        }

        let Some(conn) = &self.shared else {
            return true;
        };

        let mut conn = conn.clone();
        let marked: Result<Option<String>, redis::RedisError> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.shared_ttl.as_secs())
            .query_async(&mut conn)
            .await;

        match marked {
            Ok(Some(_)) => true,
            Ok(None) => {
                debug!(key, "suppressed by shared dedup store");
                false
            }
            Err(e) => {
                warn!(key, error = %e, "shared dedup store unavailable, using local decision");
                true
            }
        }
    }
}
