//! The per-channel consumer pool: one `tokio` task per partition,
//! reading ids off the channel's queue, leasing the row, dispatching to the
//! channel handler under a timeout, and applying the retry policy on
//! failure. Acknowledgement is implicit in reaching a terminal-for-this-
//! attempt store write; nothing is ever pushed back onto the queue except a
//! version-conflict redelivery or the sweeper's stuck reclaim.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{NotificationsConfig, RetrySettings};
use crate::notification::dispatcher::{ChannelDispatcher, HandlerOutcome};
use crate::notification::model::{Notification, NotificationChannel, NotificationStatus};
use crate::notification::queue::QueuePublisher;
use crate::notification::retry::{self, RetryDecision};
use crate::repository::{NotificationStore, UserRepository};

/// How long an idle partition worker sleeps before polling again. Avoids a
/// tight busy-loop against an empty Redis list.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct ConsumerPool {
    channel: NotificationChannel,
    store: Arc<dyn NotificationStore>,
    users: Arc<dyn UserRepository>,
    dispatcher: Arc<ChannelDispatcher>,
    queue: Arc<QueuePublisher>,
    partitions: u32,
    workers: u32,
    retry_settings: RetrySettings,
    handler_timeout: Duration,
    cancellation: CancellationToken,
}

impl ConsumerPool {
    pub fn new(
        channel: NotificationChannel,
        store: Arc<dyn NotificationStore>,
        users: Arc<dyn UserRepository>,
        dispatcher: Arc<ChannelDispatcher>,
        queue: Arc<QueuePublisher>,
        config: &NotificationsConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            channel,
            store,
            users,
            dispatcher,
            queue,
            partitions: config.partitions_for(channel),
            workers: config.workers_for(channel),
            retry_settings: config.retry.clone(),
            handler_timeout: config.timeout_for(channel),
            cancellation,
        }
    }

    /// Spawn one task per worker. Worker `i` owns partitions `i, i+workers,
    /// i+2*workers, ...`; with the default one-worker-per-partition
    /// configuration each worker owns exactly one.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|worker_index| {
                let pool = self.clone();
                tokio::spawn(async move { pool.run_worker(worker_index).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker_index: u32) {
        let owned_partitions: Vec<u32> = (worker_index..self.partitions)
            .step_by(self.workers.max(1) as usize)
            .collect();

        info!(
            channel = self.channel.as_str(),
            worker = worker_index,
            partitions = ?owned_partitions,
            "consumer worker starting"
        );

        loop {
            if self.cancellation.is_cancelled() {
                break;
            }

            let mut did_work = false;
            for &partition in &owned_partitions {
                if self.cancellation.is_cancelled() {
                    break;
                }

                match self.queue.pop(self.channel, partition).await {
                    Ok(Some(id)) => {
                        did_work = true;
                        self.process_message(id, partition).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(channel = self.channel.as_str(), partition, error = %e, "queue pop failed");
                    }
                }
            }

            if !did_work {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                    _ = self.cancellation.cancelled() => break,
                }
            }
        }

        info!(channel = self.channel.as_str(), worker = worker_index, "consumer worker stopped");
    }

    /// Lease, dispatch, and resolve a single popped id end to end.
    async fn process_message(&self, id: Uuid, partition: u32) {
        let notification = match self.store.find_by_id(id).await {
            Ok(Some(n)) => n,
            Ok(None) => {
                warn!(notification_id = %id, "orphan message: no matching notification row, acknowledging");
                return;
            }
            Err(e) => {
                error!(notification_id = %id, error = %e, "store lookup failed, leaving message unacknowledged for redelivery");
                self.republish(id, partition).await;
                return;
            }
        };

        if notification.status != NotificationStatus::Pending {
            debug!(notification_id = %id, status = %notification.status, "duplicate delivery, skipping");
            return;
        }

        let mut leased = notification.clone();
        if let Err(e) = leased.mark_processing() {
            error!(notification_id = %id, error = %e, "invalid state transition to PROCESSING");
            return;
        }

        let leased = match self.store.update(&leased).await {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                // Version conflict: someone else (another worker, the sweeper)
                // already moved this row. Re-read and decide.
                match self.store.find_by_id(id).await {
                    Ok(Some(current)) if current.status == NotificationStatus::Pending => {
                        self.republish(id, partition).await;
                    }
                    _ => {}
                }
                return;
            }
            Err(e) => {
                error!(notification_id = %id, error = %e, "failed to persist PROCESSING lease");
                return;
            }
        };

        let user = match self.users.find_by_id(leased.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.finish_with_permanent_failure(leased, "referenced user no longer exists").await;
                return;
            }
            Err(e) => {
                error!(notification_id = %id, error = %e, "user lookup failed, leaving row in PROCESSING for sweeper reclaim");
                return;
            }
        };

        let handler = match self.dispatcher.handler_for(self.channel) {
            Some(handler) => handler,
            None => {
                error!(notification_id = %id, channel = self.channel.as_str(), "no handler registered for channel");
                return;
            }
        };

        if !handler.can_handle(&leased, &user) {
            self.finish_with_permanent_failure(leased, "handler preconditions not met (missing contact point)")
                .await;
            return;
        }

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.handler_timeout, handler.send(&leased, &user)).await {
            Ok(outcome) => outcome,
            Err(_) => HandlerOutcome::TransientFailure(format!(
                "handler timed out after {:?}",
                self.handler_timeout
            )),
        };
        let elapsed = started.elapsed();

        match outcome {
            HandlerOutcome::Success => {
                self.finish_with_success(leased, elapsed).await;
            }
            HandlerOutcome::PermanentFailure(reason) => {
                self.finish_with_permanent_failure(leased, reason).await;
            }
            HandlerOutcome::TransientFailure(reason) => {
                self.finish_with_transient_failure(leased, reason).await;
            }
        }
    }

    async fn finish_with_success(&self, mut notification: Notification, elapsed: Duration) {
        let id = notification.id;
        if let Err(e) = notification.mark_sent() {
            error!(notification_id = %id, error = %e, "invalid transition to SENT");
            return;
        }
        info!(notification_id = %id, channel = self.channel.as_str(), elapsed_ms = elapsed.as_millis() as u64, "notification sent");
        if let Err(e) = self.store.update(&notification).await {
            error!(notification_id = %id, error = %e, "failed to persist SENT");
        }
    }

    async fn finish_with_permanent_failure(&self, mut notification: Notification, reason: impl Into<String>) {
        let id = notification.id;
        let reason = reason.into();
        if let Err(e) = notification.mark_failed(reason.clone()) {
            error!(notification_id = %id, error = %e, "invalid transition to FAILED");
            return;
        }
        warn!(notification_id = %id, channel = self.channel.as_str(), reason = %reason, "notification permanently failed");
        if let Err(e) = self.store.update(&notification).await {
            error!(notification_id = %id, error = %e, "failed to persist FAILED");
        }
    }

    async fn finish_with_transient_failure(&self, mut notification: Notification, reason: String) {
        let id = notification.id;
        let pre_count = notification.retry_count;
        let decision = retry::apply(
            &self.retry_settings,
            &HandlerOutcome::TransientFailure(reason.clone()),
            pre_count,
            notification.max_retries,
        );

        notification.retry_count = pre_count + 1;

        let result = match decision {
            RetryDecision::Retry { next_retry_at, reason } => {
                debug!(notification_id = %id, next_retry_at = %next_retry_at, "scheduling retry");
                notification.schedule_retry(next_retry_at, reason)
            }
            RetryDecision::Fail { reason } => {
                warn!(notification_id = %id, retry_count = notification.retry_count, "retry budget exhausted");
                notification.mark_failed(reason)
            }
        };

        if let Err(e) = result {
            error!(notification_id = %id, error = %e, "invalid state transition applying retry policy");
            return;
        }

        if let Err(e) = self.store.update(&notification).await {
            error!(notification_id = %id, error = %e, "failed to persist retry decision");
        }
    }

    async fn republish(&self, id: Uuid, partition: u32) {
        if let Err(e) = self.queue.republish_to_partition(&id, self.channel, partition).await {
            error!(notification_id = %id, error = %e, "failed to republish after version conflict");
        }
    }

    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::dispatcher::ChannelHandler;
    use crate::notification::model::User;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct InMemoryStore {
        rows: Mutex<HashMap<Uuid, Notification>>,
    }

    #[async_trait]
    impl NotificationStore for InMemoryStore {
        async fn insert(&self, notification: &Notification) -> crate::Result<Notification> {
            self.rows.lock().unwrap().insert(notification.id, notification.clone());
            Ok(notification.clone())
        }

        async fn find_by_id(&self, id: Uuid) -> crate::Result<Option<Notification>> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn update(&self, notification: &Notification) -> crate::Result<Option<Notification>> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get(&notification.id) {
                Some(current) if current.version == notification.version => {
                    let mut updated = notification.clone();
                    updated.version += 1;
                    rows.insert(updated.id, updated.clone());
                    Ok(Some(updated))
                }
                _ => Ok(None),
            }
        }

        async fn list_for_user(
            &self,
            _user_id: Uuid,
            _status: Option<NotificationStatus>,
            _offset: i64,
            _limit: i64,
        ) -> crate::Result<Vec<Notification>> {
            Ok(vec![])
        }

        async fn find_ready_for_retry(&self, _now: chrono::DateTime<Utc>, _limit: i64) -> crate::Result<Vec<Notification>> {
            Ok(vec![])
        }

        async fn find_stuck_processing(&self, _older_than: chrono::DateTime<Utc>, _limit: i64) -> crate::Result<Vec<Notification>> {
            Ok(vec![])
        }
    }

    struct InMemoryUsers(HashMap<Uuid, User>);

    #[async_trait]
    impl UserRepository for InMemoryUsers {
        async fn find_by_id(&self, id: Uuid) -> crate::Result<Option<User>> {
            Ok(self.0.get(&id).cloned())
        }
        async fn find_by_email(&self, email: &str) -> crate::Result<Option<User>> {
            Ok(self.0.values().find(|u| u.email.as_deref() == Some(email)).cloned())
        }
        async fn find_by_phone(&self, phone: &str) -> crate::Result<Option<User>> {
            Ok(self.0.values().find(|u| u.phone.as_deref() == Some(phone)).cloned())
        }
        async fn create(&self, user: &User) -> crate::Result<User> {
            Ok(user.clone())
        }
        async fn is_channel_enabled(&self, _user_id: Uuid, _channel: NotificationChannel) -> crate::Result<bool> {
            Ok(true)
        }
        async fn set_preference(
            &self,
            _user_id: Uuid,
            _channel: NotificationChannel,
            _enabled: bool,
        ) -> crate::Result<crate::notification::model::UserPreference> {
            unreachable!()
        }
        async fn list_preferences(&self, _user_id: Uuid) -> crate::Result<Vec<crate::notification::model::UserPreference>> {
            Ok(vec![])
        }
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl ChannelHandler for AlwaysSucceeds {
        fn channel(&self) -> NotificationChannel {
            NotificationChannel::InApp
        }
        fn can_handle(&self, _n: &Notification, _u: &User) -> bool {
            true
        }
        async fn send(&self, _n: &Notification, _u: &User) -> HandlerOutcome {
            HandlerOutcome::Success
        }
    }

    fn fresh_notification(user_id: Uuid) -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::new_v4(),
            user_id,
            channel: NotificationChannel::InApp,
            status: NotificationStatus::Pending,
            priority: crate::notification::model::Priority::Medium,
            subject: None,
            content: "hi".to_string(),
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

    async fn queue() -> Option<Arc<QueuePublisher>> {
        use crate::cache::RedisConfig;
        let pool = crate::cache::RedisPool::new(RedisConfig::development()).await.ok()?;
        Some(Arc::new(QueuePublisher::new(pool)))
    }

    #[tokio::test]
    async fn test_processes_pending_notification_to_sent() {
        let Some(queue) = queue().await else { return };

        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let user = User {
            id: user_id,
            email: None,
            phone: None,
            device_token: None,
            created_at: now,
            updated_at: now,
        };

        let notification = fresh_notification(user_id);
        let id = notification.id;

        let store = Arc::new(InMemoryStore {
            rows: Mutex::new(HashMap::from([(id, notification)])),
        });

        let mut dispatcher = ChannelDispatcher::new();
        dispatcher.register(Arc::new(AlwaysSucceeds));

        let pool = ConsumerPool::new(
            NotificationChannel::InApp,
            store.clone(),
            Arc::new(InMemoryUsers(HashMap::from([(user_id, user)]))),
            Arc::new(dispatcher),
            queue,
            &NotificationsConfig::default(),
            CancellationToken::new(),
        );

        pool.process_message(id, 0).await;

        let updated = store.rows.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(updated.status, NotificationStatus::Sent);
        assert!(updated.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_skips_already_processed_notification() {
        let Some(queue) = queue().await else { return };

        let user_id = Uuid::new_v4();
        let mut notification = fresh_notification(user_id);
        notification.status = NotificationStatus::Sent;
        let id = notification.id;

        let store = Arc::new(InMemoryStore {
            rows: Mutex::new(HashMap::from([(id, notification)])),
        });

        let pool = ConsumerPool::new(
            NotificationChannel::InApp,
            store.clone(),
            Arc::new(InMemoryUsers(HashMap::new())),
            Arc::new(ChannelDispatcher::new()),
            queue,
            &NotificationsConfig::default(),
            CancellationToken::new(),
        );

        pool.process_message(id, 0).await;

        let unchanged = store.rows.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(unchanged.status, NotificationStatus::Sent);
        assert_eq!(unchanged.version, 0);
    }
}
