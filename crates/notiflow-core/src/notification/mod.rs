//! The notification pipeline: ingestion, the rate limiter and dedup gate it
//! composes, the queue hand-off, the per-channel handlers and dispatcher, and
//! the two long-running drivers (`ConsumerPool`, `RetrySweeper`) that turn
//! queued ids into terminal-or-retried store rows.

pub mod consumer;
pub mod dispatcher;
pub mod handlers;
pub mod idempotency;
pub mod model;
pub mod queue;
pub mod rate_limiter;
pub mod retry;
pub mod service;
pub mod sweeper;
pub mod template_renderer;

pub use consumer::ConsumerPool;
pub use dispatcher::{ChannelDispatcher, ChannelHandler, HandlerOutcome};
pub use idempotency::IdempotencyGate;
pub use model::{Notification, NotificationChannel, NotificationStatus, Priority, Template, User, UserPreference};
pub use queue::QueuePublisher;
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use service::{BulkFailure, BulkResult, NotificationService, Receipt, SubmitRequest};
pub use sweeper::RetrySweeper;
pub use template_renderer::TemplateRenderer;
