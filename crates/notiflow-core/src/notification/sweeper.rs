//! The retry sweeper: a single periodic task that replays rows whose
//! `next_retry_at` has elapsed and reclaims rows stuck in PROCESSING past a
//! staleness threshold (a worker died mid-delivery). Runs independently of
//! the consumer pools; it never talks to a channel handler directly, only to
//! the store and the queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SweeperSettings;
use crate::notification::model::NotificationChannel;
use crate::notification::queue::QueuePublisher;
use crate::repository::NotificationStore;

pub struct RetrySweeper {
    store: Arc<dyn NotificationStore>,
    queue: Arc<QueuePublisher>,
    settings: SweeperSettings,
    partitions_for: Arc<dyn Fn(NotificationChannel) -> u32 + Send + Sync>,
    cancellation: CancellationToken,
}

impl RetrySweeper {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        queue: Arc<QueuePublisher>,
        settings: SweeperSettings,
        partitions_for: Arc<dyn Fn(NotificationChannel) -> u32 + Send + Sync>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            settings,
            partitions_for,
            cancellation,
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        info!(interval_secs = self.settings.interval_secs, "retry sweeper starting");

        loop {
            self.sweep_once().await;

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.settings.interval_secs)) => {}
                _ = self.cancellation.cancelled() => break,
            }
        }

        info!("retry sweeper stopped");
    }

    /// One pass: replay due retries, then reclaim stuck PROCESSING rows.
    /// Exposed directly so tests (and an operator-triggered "sweep now") can
    /// drive a single pass without waiting on the timer.
    pub async fn sweep_once(&self) {
        self.replay_due_retries().await;
        self.reclaim_stuck_processing().await;
    }

    async fn replay_due_retries(&self) {
        let now = Utc::now();
        let due = match self.store.find_ready_for_retry(now, self.settings.batch_limit).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "sweeper: failed to query ready-for-retry rows");
                return;
            }
        };

        if due.is_empty() {
            return;
        }

        debug!(count = due.len(), "sweeper replaying due retries");

        for notification in due {
            let partitions = (self.partitions_for)(notification.channel);
            let partition = QueuePublisher::partition_for(&notification.id, partitions);
            if let Err(e) = self
                .queue
                .republish_to_partition(&notification.id, notification.channel, partition)
                .await
            {
                error!(notification_id = %notification.id, error = %e, "sweeper: failed to republish due retry");
            }
        }
    }

    async fn reclaim_stuck_processing(&self) {
        let threshold = Utc::now() - chrono::Duration::seconds(self.settings.stuck_threshold_secs as i64);
        let stuck = match self.store.find_stuck_processing(threshold, self.settings.batch_limit).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "sweeper: failed to query stuck PROCESSING rows");
                return;
            }
        };

        if stuck.is_empty() {
            return;
        }

        warn!(count = stuck.len(), "sweeper reclaiming stuck PROCESSING rows");

        for mut notification in stuck {
            let id = notification.id;
            if let Err(e) = notification.reclaim() {
                error!(notification_id = %id, error = %e, "sweeper: invalid reclaim transition");
                continue;
            }

            let updated = match self.store.update(&notification).await {
                Ok(Some(updated)) => updated,
                Ok(None) => {
                    // Another worker or sweeper pass already moved it on; leave it.
                    continue;
                }
                Err(e) => {
                    error!(notification_id = %id, error = %e, "sweeper: failed to persist reclaim");
                    continue;
                }
            };

            let partitions = (self.partitions_for)(updated.channel);
            let partition = QueuePublisher::partition_for(&updated.id, partitions);
            if let Err(e) = self.queue.republish_to_partition(&updated.id, updated.channel, partition).await {
                error!(notification_id = %id, error = %e, "sweeper: failed to republish reclaimed row");
            }
        }
    }

    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::model::{Notification, NotificationStatus, Priority};
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct InMemoryStore {
        rows: Mutex<HashMap<Uuid, Notification>>,
    }

    #[async_trait::async_trait]
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

        async fn find_ready_for_retry(&self, now: chrono::DateTime<Utc>, limit: i64) -> crate::Result<Vec<Notification>> {
            let rows = self.rows.lock().unwrap();
            let mut due: Vec<Notification> = rows
                .values()
                .filter(|n| n.status == NotificationStatus::Pending)
                .filter(|n| n.next_retry_at.map(|t| t <= now).unwrap_or(true))
                .cloned()
                .collect();
            due.truncate(limit as usize);
            Ok(due)
        }

        async fn find_stuck_processing(&self, older_than: chrono::DateTime<Utc>, limit: i64) -> crate::Result<Vec<Notification>> {
            let rows = self.rows.lock().unwrap();
            let mut stuck: Vec<Notification> = rows
                .values()
                .filter(|n| n.status == NotificationStatus::Processing)
                .filter(|n| n.updated_at <= older_than)
                .cloned()
                .collect();
            stuck.truncate(limit as usize);
            Ok(stuck)
        }
    }

    fn fresh(status: NotificationStatus, updated_at: chrono::DateTime<Utc>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            channel: NotificationChannel::InApp,
            status,
            priority: Priority::Medium,
            subject: None,
            content: "hi".to_string(),
            template_name: None,
            template_variables: serde_json::json!({}),
            event_id: None,
            retry_count: 1,
            max_retries: 3,
            next_retry_at: None,
            error_message: None,
            version: 0,
            created_at: updated_at,
            updated_at,
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
    async fn test_reclaims_stuck_processing_row() {
        let Some(queue) = queue().await else { return };

        let stale = Utc::now() - ChronoDuration::seconds(3600);
        let notification = fresh(NotificationStatus::Processing, stale);
        let id = notification.id;

        let store = Arc::new(InMemoryStore {
            rows: Mutex::new(HashMap::from([(id, notification)])),
        });

        let sweeper = RetrySweeper::new(
            store.clone(),
            queue,
            SweeperSettings::default(),
            Arc::new(|_channel| 4),
            CancellationToken::new(),
        );

        sweeper.sweep_once().await;

        let updated = store.rows.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(updated.status, NotificationStatus::Pending);
        assert_eq!(updated.retry_count, 1);
    }

    #[tokio::test]
    async fn test_leaves_fresh_processing_row_alone() {
        let Some(queue) = queue().await else { return };

        let notification = fresh(NotificationStatus::Processing, Utc::now());
        let id = notification.id;

        let store = Arc::new(InMemoryStore {
            rows: Mutex::new(HashMap::from([(id, notification)])),
        });

        let sweeper = RetrySweeper::new(
            store.clone(),
            queue,
            SweeperSettings::default(),
            Arc::new(|_channel| 4),
            CancellationToken::new(),
        );

        sweeper.sweep_once().await;

        let unchanged = store.rows.lock().unwrap().get(&id).cloned().unwrap();
        assert_eq!(unchanged.status, NotificationStatus::Processing);
    }
}
