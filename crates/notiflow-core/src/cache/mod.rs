//! Redis-backed primitives shared by the rate limiter, idempotency gate, and
//! queue publisher: connection pooling, atomic admission checks, and list
//! operations for the partitioned per-channel logs.

pub mod config;
pub mod connection;

pub use config::RedisConfig;
pub use connection::{RedisConnection, RedisPool};

/// Cache result type alias
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    ConnectionError(String),

    #[error("Operation failed: {0}")]
    OperationError(String),

    #[error("Pool exhausted")]
    PoolExhausted,

    #[error("Timeout waiting for connection")]
    Timeout,
}

impl From<CacheError> for crate::Error {
    fn from(err: CacheError) -> Self {
        crate::Error::Cache(err.to_string())
    }
}

/// Cache namespace for the different key families this crate writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    /// Per-(user, channel) admission counters.
    RateLimit,
    /// Per-channel partitioned notification queues.
    MessageQueue,
    /// Event-id idempotency markers.
    Idempotency,
}

impl CacheNamespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheNamespace::RateLimit => "rate:limit",
            CacheNamespace::MessageQueue => "notif:queue",
            CacheNamespace::Idempotency => "idem",
        }
    }

    pub fn key(&self, key: impl AsRef<str>) -> String {
        format!("{}:{}", self.prefix(), key.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_namespace() {
        assert_eq!(
            CacheNamespace::RateLimit.key("u123:email"),
            "rate:limit:u123:email"
        );
        assert_eq!(
            CacheNamespace::MessageQueue.key("email:0"),
            "notif:queue:email:0"
        );
    }
}
