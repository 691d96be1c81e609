//! Redis connection management with pooling

use crate::cache::{CacheError, CacheResult, RedisConfig};
use redis::{aio::ConnectionManager, Client as RedisClient, Cmd, Pipeline, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Redis connection pool
#[derive(Clone)]
pub struct RedisPool {
    client: Arc<RedisClient>,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
    config: Arc<RedisConfig>,
    state: Arc<RwLock<ConnectionState>>,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    Reconnecting,
    Failed,
}

impl RedisPool {
    /// Create a new Redis connection pool
    pub async fn new(config: RedisConfig) -> CacheResult<Self> {
        let client = RedisClient::open(&config.url[..])
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        let pool = Self {
            client: Arc::new(client),
            manager: Arc::new(RwLock::new(None)),
            config: Arc::new(config),
            state: Arc::new(RwLock::new(ConnectionState::Failed)),
        };

        pool.reconnect().await?;

        info!("Redis pool created: url={}", pool.config.url);

        Ok(pool)
    }

    /// Get a connection from the pool
    pub async fn get(&self) -> CacheResult<RedisConnection> {
        let state = *self.state.read().await;

        match state {
            ConnectionState::Connected => {
                let manager_opt = self.manager.read().await;
                if let Some(manager) = manager_opt.as_ref() {
                    Ok(RedisConnection {
                        manager: manager.clone(),
                        config: self.config.clone(),
                    })
                } else {
                    drop(manager_opt);
                    self.reconnect().await?;

                    let manager_opt = self.manager.read().await;
                    if let Some(manager) = manager_opt.as_ref() {
                        Ok(RedisConnection {
                            manager: manager.clone(),
                            config: self.config.clone(),
                        })
                    } else {
                        Err(CacheError::ConnectionError(
                            "No connection available".to_string(),
                        ))
                    }
                }
            }
            ConnectionState::Reconnecting => {
                tokio::time::sleep(self.config.retry_delay()).await;
                Box::pin(self.get()).await
            }
            ConnectionState::Failed => {
                self.reconnect().await?;
                Box::pin(self.get()).await
            }
        }
    }

    /// Reconnect to Redis, retrying up to `config.max_retries` times.
    pub async fn reconnect(&self) -> CacheResult<()> {
        *self.state.write().await = ConnectionState::Reconnecting;

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("Redis reconnect attempt: {}", attempt);

            match self.attempt_connect().await {
                Ok(manager) => {
                    *self.manager.write().await = Some(manager);
                    *self.state.write().await = ConnectionState::Connected;
                    info!("Redis reconnected successfully after {} attempts", attempt);
                    return Ok(());
                }
                Err(e) => {
                    error!("Redis connection attempt {} failed: {}", attempt, e);

                    if attempt >= self.config.max_retries {
                        *self.state.write().await = ConnectionState::Failed;
                        return Err(CacheError::ConnectionError(format!(
                            "Failed to connect after {} attempts: {}",
                            attempt, e
                        )));
                    }

                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    async fn attempt_connect(&self) -> CacheResult<ConnectionManager> {
        let manager = ConnectionManager::new((*self.client).clone())
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        let result: String = redis::cmd("PING")
            .query_async(&mut manager.clone())
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        if result != "PONG" {
            return Err(CacheError::ConnectionError("Redis PING failed".to_string()));
        }

        Ok(manager)
    }

    /// Check if the pool currently holds a live connection.
    pub async fn health_check(&self) -> CacheResult<bool> {
        let state = *self.state.read().await;

        match state {
            ConnectionState::Connected => match self.get().await {
                Ok(_) => Ok(true),
                Err(_) => {
                    *self.state.write().await = ConnectionState::Failed;
                    Ok(false)
                }
            },
            _ => Ok(false),
        }
    }

    /// Get pool statistics
    pub async fn stats(&self) -> PoolStats {
        let state = *self.state.read().await;
        let manager_count = if self.manager.read().await.is_some() { 1 } else { 0 };

        PoolStats {
            connected: state == ConnectionState::Connected,
            active_connections: manager_count,
            max_connections: self.config.pool_size,
            url: self.config.url.clone(),
        }
    }

    /// Close the pool and cleanup
    pub async fn close(&self) -> CacheResult<()> {
        info!("Closing Redis pool");

        *self.state.write().await = ConnectionState::Failed;
        *self.manager.write().await = None;

        Ok(())
    }
}

impl Drop for RedisPool {
    fn drop(&mut self) {
        debug!("RedisPool dropped");
    }
}

/// Single Redis connection wrapper
pub struct RedisConnection {
    manager: ConnectionManager,
    config: Arc<RedisConfig>,
}

impl RedisConnection {
    /// Execute an arbitrary Redis command
    pub async fn execute(&mut self, cmd: Cmd) -> CacheResult<Value> {
        cmd.query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))
    }

    /// Execute a Redis pipeline
    pub async fn execute_pipeline(&mut self, pipeline: Pipeline) -> CacheResult<Vec<Value>> {
        pipeline
            .query_async(&mut self.manager)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))
    }

    /// Set a key with TTL
    pub async fn setex(&mut self, key: &str, ttl_secs: u64, value: &[u8]) -> CacheResult<()> {
        let mut cmd = Cmd::new();
        cmd.arg("SETEX").arg(key).arg(ttl_secs).arg(value);

        let result: String = redis::from_redis_value(&self.execute(cmd).await?)
            .map_err(|e| CacheError::OperationError(e.to_string()))?;

        if result != "OK" {
            return Err(CacheError::OperationError("SETEX failed".to_string()));
        }

        Ok(())
    }

    /// `SET key value NX EX ttl_secs` — the one Redis primitive that creates and
    /// expires a key as a single atomic step. Returns `true` if the key was
    /// created by this call, `false` if it already existed.
    ///
    /// This exists because `INCR` followed by a conditional `EXPIRE` is two
    /// round trips: a process can crash or the connection can drop between
    /// them, leaving a counter key with no TTL that never resets.
    pub async fn set_nx_ex(&mut self, key: &str, value: &[u8], ttl_secs: u64) -> CacheResult<bool> {
        let mut cmd = Cmd::new();
        cmd.arg("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs);

        let result = self.execute(cmd).await?;

        Ok(!matches!(result, redis::Value::Nil))
    }

    /// Get a key
    pub async fn get(&mut self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut cmd = Cmd::new();
        cmd.arg("GET").arg(key);

        let result = self.execute(cmd).await?;

        match result {
            redis::Value::Nil => Ok(None),
            redis::Value::BulkString(data) => Ok(Some(data)),
            _ => {
                let data: Vec<u8> = redis::from_redis_value(&result)
                    .map_err(|e| CacheError::OperationError(e.to_string()))?;
                Ok(Some(data))
            }
        }
    }

    /// Delete a key
    pub async fn del(&mut self, key: &str) -> CacheResult<bool> {
        let mut cmd = Cmd::new();
        cmd.arg("DEL").arg(key);

        let result: i64 = redis::from_redis_value(&self.execute(cmd).await?)
            .map_err(|e| CacheError::OperationError(e.to_string()))?;

        Ok(result > 0)
    }

    /// Check if key exists
    pub async fn exists(&mut self, key: &str) -> CacheResult<bool> {
        let mut cmd = Cmd::new();
        cmd.arg("EXISTS").arg(key);

        let result: i64 = redis::from_redis_value(&self.execute(cmd).await?)
            .map_err(|e| CacheError::OperationError(e.to_string()))?;

        Ok(result > 0)
    }

    /// Increment a counter
    pub async fn incr(&mut self, key: &str) -> CacheResult<i64> {
        let mut cmd = Cmd::new();
        cmd.arg("INCR").arg(key);

        redis::from_redis_value(&self.execute(cmd).await?)
            .map_err(|e| CacheError::OperationError(e.to_string()))
    }

    /// Set key expiration
    pub async fn expire(&mut self, key: &str, ttl_secs: u64) -> CacheResult<bool> {
        let mut cmd = Cmd::new();
        cmd.arg("EXPIRE").arg(key).arg(ttl_secs);

        let result: i64 = redis::from_redis_value(&self.execute(cmd).await?)
            .map_err(|e| CacheError::OperationError(e.to_string()))?;

        Ok(result > 0)
    }

    /// Get TTL for a key
    pub async fn ttl(&mut self, key: &str) -> CacheResult<i64> {
        let mut cmd = Cmd::new();
        cmd.arg("TTL").arg(key);

        redis::from_redis_value(&self.execute(cmd).await?)
            .map_err(|e| CacheError::OperationError(e.to_string()))
    }

    /// Publish a message to a pub/sub channel
    pub async fn publish(&mut self, channel: &str, message: &[u8]) -> CacheResult<u64> {
        let mut cmd = Cmd::new();
        cmd.arg("PUBLISH").arg(channel).arg(message);

        redis::from_redis_value(&self.execute(cmd).await?)
            .map_err(|e| CacheError::OperationError(e.to_string()))
    }

    /// Push a value onto the head of a list. Used to enqueue a notification id
    /// onto its channel/partition log.
    pub async fn lpush(&mut self, key: &str, value: &[u8]) -> CacheResult<i64> {
        let mut cmd = Cmd::new();
        cmd.arg("LPUSH").arg(key).arg(value);

        redis::from_redis_value(&self.execute(cmd).await?)
            .map_err(|e| CacheError::OperationError(e.to_string()))
    }

    /// Pop a value off the tail of a list, FIFO with `lpush`. Returns `None`
    /// when the list is empty rather than blocking.
    pub async fn rpop(&mut self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut cmd = Cmd::new();
        cmd.arg("RPOP").arg(key);

        match self.execute(cmd).await? {
            redis::Value::Nil => Ok(None),
            redis::Value::BulkString(data) => Ok(Some(data)),
            other => {
                let data: Vec<u8> = redis::from_redis_value(&other)
                    .map_err(|e| CacheError::OperationError(e.to_string()))?;
                Ok(Some(data))
            }
        }
    }

    /// Number of elements currently queued in a list.
    pub async fn llen(&mut self, key: &str) -> CacheResult<i64> {
        let mut cmd = Cmd::new();
        cmd.arg("LLEN").arg(key);

        redis::from_redis_value(&self.execute(cmd).await?)
            .map_err(|e| CacheError::OperationError(e.to_string()))
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub connected: bool,
    pub active_connections: usize,
    pub max_connections: usize,
    pub url: String,
}

impl PoolStats {
    pub fn format(&self) -> String {
        format!(
            "RedisPool[url={}, connected={}, connections={}/{}]",
            self.url, self.connected, self.active_connections, self.max_connections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RedisConfig;

    #[tokio::test]
    async fn test_redis_pool_creation() {
        let config = RedisConfig::development();
        let pool = RedisPool::new(config).await;

        // May fail if Redis isn't running locally; both outcomes are a valid test result.
        match pool {
            Ok(p) => {
                let stats = p.stats().await;
                assert!(stats.connected);
            }
            Err(_) => {}
        }
    }

    #[tokio::test]
    async fn test_nx_ex_and_list_ops() {
        let config = RedisConfig::development();

        if let Ok(pool) = RedisPool::new(config).await {
            let mut conn = pool.get().await.unwrap();
            let key = "test:notiflow:nx_ex_probe";
            let _ = conn.del(key).await;

            let created = conn.set_nx_ex(key, b"1", 5).await.unwrap();
            assert!(created);

            let created_again = conn.set_nx_ex(key, b"1", 5).await.unwrap();
            assert!(!created_again);

            let _ = conn.del(key).await;

            let list_key = "test:notiflow:list_probe";
            let _ = conn.del(list_key).await;
            conn.lpush(list_key, b"id-1").await.unwrap();
            conn.lpush(list_key, b"id-2").await.unwrap();

            let popped = conn.rpop(list_key).await.unwrap();
            assert_eq!(popped, Some(b"id-1".to_vec()));

            let _ = conn.del(list_key).await;
        }
    }
}
