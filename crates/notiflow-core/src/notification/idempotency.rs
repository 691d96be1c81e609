//! Event-id deduplication. A caller-supplied `event_id` that was admitted
//! inside the dedup TTL window is rejected on the next submission; outside the
//! window it's treated as new.

use crate::cache::{CacheNamespace, RedisPool};
use tracing::warn;

pub struct IdempotencyGate {
    pool: RedisPool,
    ttl_seconds: u64,
}

impl IdempotencyGate {
    pub fn new(pool: RedisPool, ttl_seconds: u64) -> Self {
        Self { pool, ttl_seconds }
    }

    /// Returns `true` if `event_id` is new (and is now marked seen), `false`
    /// if it was already seen within the TTL window. Fails open: if Redis is
    /// unreachable the event is treated as new rather than blocking ingestion.
    pub async fn check_and_set(&self, event_id: &str) -> bool {
        let key = CacheNamespace::Idempotency.key(event_id);

        let conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(event_id, error = %e, "idempotency gate: redis unreachable, failing open");
                return true;
            }
        };

        let mut conn = conn;
        match conn.set_nx_ex(&key, b"1", self.ttl_seconds).await {
            Ok(created) => created,
            Err(e) => {
                warn!(event_id, error = %e, "idempotency gate: SET NX EX failed, failing open");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RedisConfig;

    #[tokio::test]
    async fn test_duplicate_rejected_within_ttl() {
        if let Ok(pool) = RedisPool::new(RedisConfig::development()).await {
            let gate = IdempotencyGate::new(pool, 60);
            let event_id = format!("evt-{}", uuid::Uuid::new_v4());

            assert!(gate.check_and_set(&event_id).await);
            assert!(!gate.check_and_set(&event_id).await);
        }
    }
}
