pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod notification;
pub mod repository;

pub use config::Config;
pub use error::{Error, Result};

/// Current version of notiflow-core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_creation() {
        let err = Error::validation("test validation error");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "VALIDATION_ERROR");
    }
}
