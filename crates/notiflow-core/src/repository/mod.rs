//! Repository layer: durable persistence for notifications, users, and templates.

pub mod notifications;
pub mod templates;
pub mod users;

pub use notifications::{NotificationStore, PostgresNotificationStore};
pub use templates::{PostgresTemplateRepository, TemplateRepository};
pub use users::{PostgresUserRepository, UserRepository};
