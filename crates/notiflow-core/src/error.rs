//! Centralized error type for notiflow-core
//!
//! Every fallible operation in this crate returns `crate::Result<T>`. HTTP-facing
//! code maps an `Error` to a status code and machine-readable category via
//! `status_code()`/`category()` so `notiflow-api` doesn't need to know about our
//! internals.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Request failed validation (bad shape, missing required field, unknown channel).
    Validation(String),
    /// Referenced entity (user, template, notification) does not exist.
    NotFound(String),
    /// Caller exceeded the per-user/channel rate limit. Carries retry-after seconds.
    RateLimited { retry_after_secs: u64 },
    /// The event id was already seen inside the dedup window.
    DuplicateEvent,
    /// Durable store, key/value store, or message log unreachable.
    Infrastructure(String),
    /// Database-specific failure, kept distinct from generic infra errors for logging.
    Database(sqlx::Error),
    /// Redis-specific failure.
    Cache(String),
    /// Config file missing, malformed, or failed validation.
    Config(String),
    /// Notification-pipeline-specific failure (template render, handler dispatch).
    Notification(String),
    /// Catch-all for errors with no dedicated variant.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {}s", retry_after_secs)
            }
            Error::DuplicateEvent => write!(f, "duplicate event"),
            Error::Infrastructure(msg) => write!(f, "infrastructure error: {}", msg),
            Error::Database(e) => write!(f, "database error: {}", e),
            Error::Cache(msg) => write!(f, "cache error: {}", msg),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Notification(msg) => write!(f, "notification error: {}", msg),
            Error::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn notification_error(msg: impl Into<String>) -> Self {
        Error::Notification(msg.into())
    }

    /// HTTP status code this error maps to. `notiflow-api` uses this to build
    /// its response envelope instead of duplicating the mapping per route.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::RateLimited { .. } => 429,
            Error::DuplicateEvent => 200,
            Error::Infrastructure(_) | Error::Database(_) | Error::Cache(_) => 503,
            Error::Config(_) => 500,
            Error::Notification(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Machine-readable category for the JSON error body / log field.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::DuplicateEvent => "DUPLICATE_EVENT",
            Error::Infrastructure(_) => "TRANSIENT_INFRA",
            Error::Database(_) => "TRANSIENT_INFRA",
            Error::Cache(_) => "TRANSIENT_INFRA",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Notification(_) => "NOTIFICATION_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::validation("missing field");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_rate_limited_status() {
        let err = Error::RateLimited { retry_after_secs: 42 };
        assert_eq!(err.status_code(), 429);
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_duplicate_event_is_200() {
        let err = Error::DuplicateEvent;
        assert_eq!(err.status_code(), 200);
        assert_eq!(err.category(), "DUPLICATE_EVENT");
    }
}
