//! Append-only activity log with retrying writes and a live feed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::DatabaseError;
use crate::store::OnboardingStore;

use super::model::{ActivityRecord, NewActivity};

/// Capacity of the live activity feed.
const FEED_CAPACITY: usize = 256;

/// Writes activity entries to the store and publishes them to subscribers.
pub struct ActivityLog {
    store: Arc<dyn OnboardingStore>,
    feed: broadcast::Sender<ActivityRecord>,
    attempts: u32,
    backoff: Duration,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn OnboardingStore>, attempts: u32, backoff: Duration) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            store,
            feed,
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(store: Arc<dyn OnboardingStore>, config: &EngineConfig) -> Self {
        Self::new(
            store,
            config.activity_append_attempts,
            config.activity_retry_backoff,
        )
    }

    /// Append an entry, retrying store failures up to the configured
    /// number of attempts.
    pub async fn append(&self, entry: NewActivity) -> Result<ActivityRecord, DatabaseError> {
        let mut attempt = 1;
        loop {
            match self.store.append_activity(&entry).await {
                Ok(stored) => {
                    debug!(
                        record_id = %stored.record_id,
                        sequence = stored.sequence,
                        action = %stored.action,
                        outcome = stored.outcome.kind(),
                        correlation_id = %stored.correlation_id,
                        "Activity appended"
                    );
                    // No subscribers is fine.
                    let _ = self.feed.send(stored.clone());
                    return Ok(stored);
                }
                Err(e) if attempt < self.attempts => {
                    warn!(
                        record_id = %entry.record_id,
                        attempt,
                        error = %e,
                        "Activity append failed; retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    error!(
                        record_id = %entry.record_id,
                        action = %entry.action,
                        attempts = self.attempts,
                        error = %e,
                        "Activity append failed permanently"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Subscribe to entries appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityRecord> {
        self.feed.subscribe()
    }

    /// Full trail of a record, oldest first.
    pub async fn history(&self, record_id: Uuid) -> Result<Vec<ActivityRecord>, DatabaseError> {
        self.store.list_activity(record_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::activity::{ActivityAction, ActivityOutcome};
    use crate::context::RequestContext;
    use crate::record::{ExternalMirror, OnboardingRecord, PartialUpdate, Stage};
    use crate::store::MemoryStore;
    use crate::translation::ReferenceRow;

    /// Store whose activity appends fail a fixed number of times.
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl OnboardingStore for FlakyStore {
        async fn insert_record(&self, record: &OnboardingRecord) -> Result<(), DatabaseError> {
            self.inner.insert_record(record).await
        }
        async fn get_record(&self, id: Uuid) -> Result<Option<OnboardingRecord>, DatabaseError> {
            self.inner.get_record(id).await
        }
        async fn apply_partial_update(
            &self,
            id: Uuid,
            expected: Stage,
            update: &PartialUpdate,
        ) -> Result<OnboardingRecord, DatabaseError> {
            self.inner.apply_partial_update(id, expected, update).await
        }
        async fn update_details(
            &self,
            record: &OnboardingRecord,
            expected: Stage,
            mirror: Option<&ExternalMirror>,
        ) -> Result<OnboardingRecord, DatabaseError> {
            self.inner.update_details(record, expected, mirror).await
        }
        async fn records_in_stage(
            &self,
            stage: Stage,
        ) -> Result<Vec<OnboardingRecord>, DatabaseError> {
            self.inner.records_in_stage(stage).await
        }
        async fn append_activity(
            &self,
            entry: &NewActivity,
        ) -> Result<ActivityRecord, DatabaseError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(DatabaseError::Query("append_activity: disk full".into()));
            }
            self.inner.append_activity(entry).await
        }
        async fn list_activity(&self, record_id: Uuid) -> Result<Vec<ActivityRecord>, DatabaseError> {
            self.inner.list_activity(record_id).await
        }
        async fn load_reference_rows(&self) -> Result<Vec<ReferenceRow>, DatabaseError> {
            self.inner.load_reference_rows().await
        }
        async fn insert_reference_row(&self, row: &ReferenceRow) -> Result<(), DatabaseError> {
            self.inner.insert_reference_row(row).await
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
        })
    }

    fn entry(record_id: Uuid) -> NewActivity {
        NewActivity::new(
            record_id,
            ActivityAction::Submit,
            ActivityOutcome::Created {
                stage: Stage::Captured,
            },
            &RequestContext::new("tester"),
        )
    }

    #[tokio::test]
    async fn append_retries_transient_failures() {
        let store = flaky(2);
        let log = ActivityLog::new(store.clone(), 3, Duration::from_millis(1));
        let id = Uuid::new_v4();

        let stored = log.append(entry(id)).await.unwrap();
        assert_eq!(stored.sequence, 1);
        assert_eq!(log.history(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_gives_up_after_attempts() {
        let store = flaky(5);
        let log = ActivityLog::new(store.clone(), 3, Duration::from_millis(1));
        let id = Uuid::new_v4();

        assert!(log.append(entry(id)).await.is_err());
        assert!(log.history(id).await.unwrap().is_empty());
        assert_eq!(store.failures_left.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscribers_see_appended_entries() {
        let log = ActivityLog::new(Arc::new(MemoryStore::new()), 1, Duration::ZERO);
        let mut rx = log.subscribe();
        let id = Uuid::new_v4();

        log.append(entry(id)).await.unwrap();
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.record_id, id);
        assert_eq!(seen.action, ActivityAction::Submit);
    }

    #[tokio::test]
    async fn sequences_increase_per_record() {
        let log = ActivityLog::new(Arc::new(MemoryStore::new()), 1, Duration::ZERO);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        log.append(entry(a)).await.unwrap();
        log.append(entry(a)).await.unwrap();
        let first_b = log.append(entry(b)).await.unwrap();

        let seqs: Vec<_> = log.history(a).await.unwrap().iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(first_b.sequence, 1);
    }
}
