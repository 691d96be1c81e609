//! Fixed-window per-(user, channel) rate limiting.
//!
//! The window bucket is `now - (now % window_seconds)`, so every caller in
//! the same window computes the same key without coordination. Admission is
//! `SET key 0 NX EX {window_seconds}` (creates the bucket exactly once, with
//! its expiry attached atomically) followed by `INCR` — two round trips, but
//! only the first is conditional, so a crash between them never leaves a
//! counter key with no TTL.

use crate::cache::{CacheNamespace, RedisPool};
use crate::config::RateLimitSettings;
use crate::notification::model::NotificationChannel;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Admit,
    Reject { retry_after_secs: u64 },
}

pub struct RateLimiter {
    pool: RedisPool,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(pool: RedisPool, settings: RateLimitSettings) -> Self {
        Self { pool, settings }
    }

    fn limit_for(&self, channel: NotificationChannel) -> u32 {
        match channel {
            NotificationChannel::Email => self.settings.email,
            NotificationChannel::Sms => self.settings.sms,
            NotificationChannel::Push => self.settings.push,
            NotificationChannel::InApp => self.settings.in_app,
        }
    }

    fn window_bucket(&self, now_secs: u64) -> u64 {
        Self::bucket_for(now_secs, self.settings.window_seconds)
    }

    fn bucket_for(now_secs: u64, window_seconds: u64) -> u64 {
        now_secs - (now_secs % window_seconds)
    }

    /// Admit or reject a send attempt for `(user_id, channel)`. Fails open on
    /// store-unreachable: an inability to count is not grounds to block a
    /// notification outright.
    pub async fn admit(&self, user_id: &str, channel: NotificationChannel) -> RateLimitDecision {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs();
        let bucket = self.window_bucket(now_secs);
        let key = CacheNamespace::RateLimit.key(format!("{}:{}:{}", user_id, channel.as_str(), bucket));

        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(user_id, channel = channel.as_str(), error = %e, "rate limiter: redis unreachable, failing open");
                return RateLimitDecision::Admit;
            }
        };

        if let Err(e) = conn.set_nx_ex(&key, b"0", self.settings.window_seconds).await {
            warn!(user_id, channel = channel.as_str(), error = %e, "rate limiter: SET NX EX failed, failing open");
            return RateLimitDecision::Admit;
        }

        let current = match conn.incr(&key).await {
            Ok(v) => v,
            Err(e) => {
                warn!(user_id, channel = channel.as_str(), error = %e, "rate limiter: INCR failed, failing open");
                return RateLimitDecision::Admit;
            }
        };

        let limit = self.limit_for(channel) as i64;
        if current <= limit {
            RateLimitDecision::Admit
        } else {
            let retry_after_secs = bucket + self.settings.window_seconds - now_secs;
            RateLimitDecision::Reject { retry_after_secs }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RedisConfig;

    fn settings_with_limit(limit: u32) -> RateLimitSettings {
        RateLimitSettings {
            email: limit,
            sms: limit,
            push: limit,
            in_app: limit,
            window_seconds: 3600,
        }
    }

    #[test]
    fn test_window_bucket_is_stable_within_window() {
        let a = RateLimiter::bucket_for(3600, 3600);
        let b = RateLimiter::bucket_for(3659, 3600);
        let c = RateLimiter::bucket_for(7200, 3600);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_admits_up_to_limit_then_rejects() {
        if let Ok(pool) = RedisPool::new(RedisConfig::development()).await {
            let limiter = RateLimiter::new(pool, settings_with_limit(2));
            let user_id = format!("user-{}", uuid::Uuid::new_v4());

            assert_eq!(
                limiter.admit(&user_id, NotificationChannel::Email).await,
                RateLimitDecision::Admit
            );
            assert_eq!(
                limiter.admit(&user_id, NotificationChannel::Email).await,
                RateLimitDecision::Admit
            );
            match limiter.admit(&user_id, NotificationChannel::Email).await {
                RateLimitDecision::Reject { retry_after_secs } => assert!(retry_after_secs > 0),
                RateLimitDecision::Admit => panic!("expected rejection on third attempt"),
            }
        }
    }
}
