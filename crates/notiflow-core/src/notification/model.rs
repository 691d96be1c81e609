//! Notification domain model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Defines `sqlx::Type`/`Encode`/`Decode` for an enum stored as a plain
/// VARCHAR column, round-tripping through its `Display`/`FromStr` impls.
macro_rules! text_backed_sqlx_type {
    ($ty:ty) => {
        impl Type<Postgres> for $ty {
            fn type_info() -> PgTypeInfo {
                <String as Type<Postgres>>::type_info()
            }
        }

        impl<'r> Decode<'r, Postgres> for $ty {
            fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <String as Decode<Postgres>>::decode(value)?;
                Ok(s.parse()?)
            }
        }

        impl<'q> Encode<'q, Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                <String as Encode<Postgres>>::encode(self.to_string(), buf)
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationChannel {
    Email,
    Sms,
    Push,
    #[serde(rename = "IN_APP")]
    InApp,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "EMAIL",
            NotificationChannel::Sms => "SMS",
            NotificationChannel::Push => "PUSH",
            NotificationChannel::InApp => "IN_APP",
        }
    }

    pub fn all() -> [NotificationChannel; 4] {
        [
            NotificationChannel::Email,
            NotificationChannel::Sms,
            NotificationChannel::Push,
            NotificationChannel::InApp,
        ]
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NotificationChannel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EMAIL" => Ok(NotificationChannel::Email),
            "SMS" => Ok(NotificationChannel::Sms),
            "PUSH" => Ok(NotificationChannel::Push),
            "IN_APP" | "IN-APP" | "INAPP" => Ok(NotificationChannel::InApp),
            other => Err(crate::Error::validation(format!("unknown channel: {}", other))),
        }
    }
}

text_backed_sqlx_type!(NotificationChannel);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Processing => "PROCESSING",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Delivered => "DELIVERED",
            NotificationStatus::Read => "READ",
            NotificationStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(NotificationStatus::Pending),
            "PROCESSING" => Ok(NotificationStatus::Processing),
            "SENT" => Ok(NotificationStatus::Sent),
            "DELIVERED" => Ok(NotificationStatus::Delivered),
            "READ" => Ok(NotificationStatus::Read),
            "FAILED" => Ok(NotificationStatus::Failed),
            other => Err(crate::Error::validation(format!("unknown status: {}", other))),
        }
    }
}

text_backed_sqlx_type!(NotificationStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            "CRITICAL" => Ok(Priority::Critical),
            other => Err(crate::Error::validation(format!("unknown priority: {}", other))),
        }
    }
}

text_backed_sqlx_type!(Priority);

/// A single notification, the unit the whole pipeline moves through its
/// states. `version` is the optimistic-concurrency token: every state
/// transition that crosses the store is conditioned on `(id, version)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub channel: NotificationChannel,
    pub status: NotificationStatus,
    pub priority: Priority,
    pub subject: Option<String>,
    pub content: String,
    pub template_name: Option<String>,
    pub template_variables: serde_json::Value,
    pub event_id: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// `PENDING -> PROCESSING`, taken by a consumer worker leasing the row.
    pub fn mark_processing(&mut self) -> crate::Result<()> {
        self.require_status(NotificationStatus::Pending, "mark_processing")?;
        self.status = NotificationStatus::Processing;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `PROCESSING -> SENT`, the handler succeeded.
    pub fn mark_sent(&mut self) -> crate::Result<()> {
        self.require_status(NotificationStatus::Processing, "mark_sent")?;
        self.status = NotificationStatus::Sent;
        self.sent_at = Some(Utc::now());
        self.error_message = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `PROCESSING -> FAILED`, terminal: handler declined, permanent provider
    /// failure, or the retry budget is exhausted.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> crate::Result<()> {
        self.require_status(NotificationStatus::Processing, "mark_failed")?;
        self.status = NotificationStatus::Failed;
        self.error_message = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `PROCESSING -> PENDING` with a scheduled retry, after a transient
    /// handler failure under the retry budget. Does not touch `retry_count`;
    /// callers increment it as part of applying the retry policy.
    pub fn schedule_retry(&mut self, next_retry_at: DateTime<Utc>, reason: impl Into<String>) -> crate::Result<()> {
        self.require_status(NotificationStatus::Processing, "schedule_retry")?;
        self.status = NotificationStatus::Pending;
        self.next_retry_at = Some(next_retry_at);
        self.error_message = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `PROCESSING -> PENDING` via the sweeper reclaiming a stuck row. No
    /// retry_count increment — this isn't a handler failure.
    pub fn reclaim(&mut self) -> crate::Result<()> {
        self.require_status(NotificationStatus::Processing, "reclaim")?;
        self.status = NotificationStatus::Pending;
        self.next_retry_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `SENT -> DELIVERED`, an external delivery-confirmation webhook.
    pub fn mark_delivered(&mut self) -> crate::Result<()> {
        self.require_status(NotificationStatus::Sent, "mark_delivered")?;
        self.status = NotificationStatus::Delivered;
        self.delivered_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `DELIVERED -> READ`, a user acknowledgement (IN_APP channel).
    pub fn mark_read(&mut self) -> crate::Result<()> {
        self.require_status(NotificationStatus::Delivered, "mark_read")?;
        self.status = NotificationStatus::Read;
        self.read_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Ok(())
    }

    fn require_status(&self, expected: NotificationStatus, transition: &str) -> crate::Result<()> {
        if self.status != expected {
            return Err(crate::Error::notification_error(format!(
                "invalid transition {} from status {} (expected {})",
                transition, self.status, expected
            )));
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, NotificationStatus::Failed)
            || (self.status == NotificationStatus::Sent && self.channel != NotificationChannel::InApp)
    }
}

/// Template variables attached to a notification, as a flat string map.
pub type TemplateVariables = HashMap<String, String>;

/// A user the pipeline can notify, with the contact points each channel needs.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub device_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-(user, channel) opt-in/opt-out preference.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserPreference {
    pub id: Uuid,
    pub user_id: Uuid,
    pub channel: NotificationChannel,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reusable notification template: one `{{var}}`-templated subject/content
/// pair per named template, scoped to a single channel.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub channel: NotificationChannel,
    pub subject: Option<String>,
    pub content: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_notification() -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            channel: NotificationChannel::Email,
            status: NotificationStatus::Pending,
            priority: Priority::Medium,
            subject: Some("hi".to_string()),
            content: "hello {{name}}".to_string(),
            template_name: None,
            template_variables: serde_json::json!({}),
            event_id: None,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            error_message: None,
            version: 0,
            created_at: now,
            updated_at: now,
            sent_at: None,
            delivered_at: None,
            read_at: None,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut n = fresh_notification();
        n.mark_processing().unwrap();
        assert_eq!(n.status, NotificationStatus::Processing);
        n.mark_sent().unwrap();
        assert_eq!(n.status, NotificationStatus::Sent);
        assert!(n.sent_at.is_some());
        n.mark_delivered().unwrap();
        assert_eq!(n.status, NotificationStatus::Delivered);
        n.mark_read().unwrap();
        assert_eq!(n.status, NotificationStatus::Read);
    }

    #[test]
    fn test_retry_then_failed() {
        let mut n = fresh_notification();
        n.mark_processing().unwrap();
        n.schedule_retry(Utc::now(), "timeout").unwrap();
        assert_eq!(n.status, NotificationStatus::Pending);
        assert_eq!(n.error_message.as_deref(), Some("timeout"));

        n.mark_processing().unwrap();
        n.mark_failed("exhausted retries").unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut n = fresh_notification();
        assert!(n.mark_sent().is_err());
        assert!(n.mark_delivered().is_err());
    }

    #[test]
    fn test_reclaim_does_not_touch_retry_count() {
        let mut n = fresh_notification();
        n.retry_count = 1;
        n.mark_processing().unwrap();
        n.reclaim().unwrap();
        assert_eq!(n.status, NotificationStatus::Pending);
        assert_eq!(n.retry_count, 1);
        assert!(n.next_retry_at.is_none());
    }

    #[test]
    fn test_channel_roundtrip() {
        for c in NotificationChannel::all() {
            let s = c.as_str();
            let parsed: NotificationChannel = s.parse().unwrap();
            assert_eq!(parsed, c);
        }
    }
}
