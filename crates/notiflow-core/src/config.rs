use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for the notification dispatch service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            cache: CacheConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables, falling back to the
    /// default search paths, then to built-in defaults.
    pub fn from_env() -> Result<Self, crate::Error> {
        if let Ok(config_path) = std::env::var("NOTIFLOW_CONFIG") {
            return Self::load(&config_path);
        }

        let default_paths = [
            "./config/default.toml",
            "./config/production.toml",
            "/etc/notiflow/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Validate configuration, run once at startup.
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }

        if self.database.pool_size == 0 {
            return Err(Error::Config("Database pool size must be > 0".to_string()));
        }

        if self.notifications.retry.multiplier <= 1.0 {
            return Err(Error::Config("retry.multiplier must be > 1.0".to_string()));
        }

        for (channel, partitions) in self.notifications.topic_partitions() {
            if partitions == 0 {
                return Err(Error::Config(format!(
                    "topic.{}.partitions must be > 0",
                    channel
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_graceful_shutdown")]
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_graceful_shutdown() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_name")]
    pub database: String,

    #[serde(default = "default_db_user")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            database: default_db_name(),
            username: default_db_user(),
            password: "password".to_string(),
            pool_size: default_pool_size(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "notiflow".to_string()
}

fn default_db_user() -> String {
    "notiflow".to_string()
}

fn default_pool_size() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub redis: crate::cache::RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis: crate::cache::RedisConfig::default(),
        }
    }
}

/// Everything governing the notification pipeline: rate limits, dedup,
/// retry/backoff, sweeper cadence, per-channel handler timeouts, and the
/// queue's topic/partition/worker shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub dedup: DedupSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub sweeper: SweeperSettings,

    #[serde(default)]
    pub handler: HandlerSettings,

    #[serde(default)]
    pub topic: TopicSettings,

    #[serde(default)]
    pub consumer: ConsumerSettings,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitSettings::default(),
            dedup: DedupSettings::default(),
            retry: RetrySettings::default(),
            sweeper: SweeperSettings::default(),
            handler: HandlerSettings::default(),
            topic: TopicSettings::default(),
            consumer: ConsumerSettings::default(),
        }
    }
}

impl NotificationsConfig {
    /// Partition count per channel, paired with its name, for validation.
    pub fn topic_partitions(&self) -> Vec<(&'static str, u32)> {
        vec![
            ("email", self.topic.email),
            ("sms", self.topic.sms),
            ("push", self.topic.push),
            ("in_app", self.topic.in_app),
        ]
    }

    /// Partition count configured for a single channel's topic.
    pub fn partitions_for(&self, channel: crate::notification::model::NotificationChannel) -> u32 {
        use crate::notification::model::NotificationChannel::*;
        match channel {
            Email => self.topic.email,
            Sms => self.topic.sms,
            Push => self.topic.push,
            InApp => self.topic.in_app,
        }
    }

    /// Configured worker count for a channel's consumer pool, clamped to its
    /// own partition count (extra workers beyond partitions would idle).
    pub fn workers_for(&self, channel: crate::notification::model::NotificationChannel) -> u32 {
        use crate::notification::model::NotificationChannel::*;
        let workers = match channel {
            Email => self.consumer.email_workers,
            Sms => self.consumer.sms_workers,
            Push => self.consumer.push_workers,
            InApp => self.consumer.in_app_workers,
        };
        workers.min(self.partitions_for(channel)).max(1)
    }

    /// Configured per-call handler timeout for a channel.
    pub fn timeout_for(&self, channel: crate::notification::model::NotificationChannel) -> std::time::Duration {
        use crate::notification::model::NotificationChannel::*;
        let secs = match channel {
            Email => self.handler.email_timeout_secs,
            Sms => self.handler.sms_timeout_secs,
            Push => self.handler.push_timeout_secs,
            InApp => self.handler.in_app_timeout_secs,
        };
        std::time::Duration::from_secs(secs)
    }
}

/// Per-channel admission cap for the fixed-window `RateLimiter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_rl_email")]
    pub email: u32,
    #[serde(default = "default_rl_sms")]
    pub sms: u32,
    #[serde(default = "default_rl_push")]
    pub push: u32,
    #[serde(default = "default_rl_in_app")]
    pub in_app: u32,
    #[serde(default = "default_rl_window")]
    pub window_seconds: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            email: default_rl_email(),
            sms: default_rl_sms(),
            push: default_rl_push(),
            in_app: default_rl_in_app(),
            window_seconds: default_rl_window(),
        }
    }
}

fn default_rl_email() -> u32 {
    10
}
fn default_rl_sms() -> u32 {
    5
}
fn default_rl_push() -> u32 {
    20
}
fn default_rl_in_app() -> u32 {
    100
}
fn default_rl_window() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSettings {
    #[serde(default = "default_dedup_ttl")]
    pub ttl_seconds: u64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: default_dedup_ttl(),
        }
    }
}

fn default_dedup_ttl() -> u64 {
    86400
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_base")]
    pub base_delay_secs: u64,
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts_default: i32,
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_secs: default_retry_base(),
            multiplier: default_retry_multiplier(),
            max_attempts_default: default_max_attempts(),
            jitter_percent: default_jitter_percent(),
        }
    }
}

fn default_retry_base() -> u64 {
    60
}
fn default_retry_multiplier() -> f64 {
    5.0
}
fn default_max_attempts() -> i32 {
    3
}
fn default_jitter_percent() -> f64 {
    10.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSettings {
    #[serde(default = "default_sweeper_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold_secs: u64,
    #[serde(default = "default_sweeper_batch")]
    pub batch_limit: i64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_sweeper_interval(),
            stuck_threshold_secs: default_stuck_threshold(),
            batch_limit: default_sweeper_batch(),
        }
    }
}

fn default_sweeper_interval() -> u64 {
    60
}
fn default_stuck_threshold() -> u64 {
    600
}
fn default_sweeper_batch() -> i64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSettings {
    #[serde(default = "default_handler_timeout")]
    pub email_timeout_secs: u64,
    #[serde(default = "default_handler_timeout")]
    pub sms_timeout_secs: u64,
    #[serde(default = "default_handler_timeout")]
    pub push_timeout_secs: u64,
    #[serde(default = "default_handler_timeout")]
    pub in_app_timeout_secs: u64,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            email_timeout_secs: default_handler_timeout(),
            sms_timeout_secs: default_handler_timeout(),
            push_timeout_secs: default_handler_timeout(),
            in_app_timeout_secs: default_handler_timeout(),
        }
    }
}

fn default_handler_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSettings {
    #[serde(default = "default_partitions")]
    pub email: u32,
    #[serde(default = "default_partitions")]
    pub sms: u32,
    #[serde(default = "default_partitions")]
    pub push: u32,
    #[serde(default = "default_partitions")]
    pub in_app: u32,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            email: default_partitions(),
            sms: default_partitions(),
            push: default_partitions(),
            in_app: default_partitions(),
        }
    }
}

fn default_partitions() -> u32 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSettings {
    #[serde(default = "default_partitions")]
    pub email_workers: u32,
    #[serde(default = "default_partitions")]
    pub sms_workers: u32,
    #[serde(default = "default_partitions")]
    pub push_workers: u32,
    #[serde(default = "default_partitions")]
    pub in_app_workers: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            email_workers: default_partitions(),
            sms_workers: default_partitions(),
            push_workers: default_partitions(),
            in_app_workers: default_partitions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.pool_size, 20);
        assert_eq!(config.notifications.rate_limit.email, 10);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        config.server.port = 8080;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_multiplier_must_exceed_one() {
        let mut config = Config::default();
        config.notifications.retry.multiplier = 1.0;
        assert!(config.validate().is_err());
    }
}
