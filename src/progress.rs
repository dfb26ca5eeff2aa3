//! Per-recipient progress of campaign runs
//!
//! The tracker writes one row per recipient to the store and keeps the counts
//! of the runs it saw in memory, so the totals stay right when the store
//! misses a write.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::SystemTime,
};

use crate::{
    model::{DeliveryStatus, ProgressRecord},
    store::{self, CampaignStore},
    transport::smtp,
};

/// Aggregate counts of a campaign run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Progress {
    /// Recipients sent the message
    pub sent: usize,
    /// Recipients whose delivery failed
    pub failed: usize,
    /// Recipients not attempted yet
    pub pending: usize,
}

impl Progress {
    /// Recipients with a terminal row
    pub fn done(&self) -> usize {
        self.sent + self.failed
    }

    /// Every recipient of the run
    pub fn total(&self) -> usize {
        self.done() + self.pending
    }
}

/// Records delivery outcomes and answers progress queries
pub struct ProgressTracker {
    store: Arc<dyn CampaignStore>,
    runs: Mutex<HashMap<String, Progress>>,
}

impl ProgressTracker {
    /// Creates a tracker writing to `store`
    pub fn new(store: Arc<dyn CampaignStore>) -> ProgressTracker {
        ProgressTracker {
            store,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a `pending` row for every recipient, before the first batch
    pub async fn initialize(&self, campaign_id: &str, recipients: &[String]) {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                campaign_id.to_owned(),
                Progress {
                    pending: recipients.len(),
                    ..Default::default()
                },
            );

        for recipient in recipients {
            let record = ProgressRecord::pending(campaign_id, recipient.as_str());
            if let Err(err) = self.store.upsert_progress(&record).await {
                tracing::warn!(campaign_id, recipient = %recipient, "could not create progress row: {err}");
            }
        }
    }

    /// Turns the row of `recipient` into `sent` or `failed`
    pub async fn record(
        &self,
        campaign_id: &str,
        recipient: &str,
        result: &Result<smtp::Response, smtp::Error>,
    ) {
        let mut record = ProgressRecord::pending(campaign_id, recipient);
        match result {
            Ok(_) => {
                record.status = DeliveryStatus::Sent;
                record.sent_at = Some(SystemTime::now());
            }
            Err(err) => {
                record.status = DeliveryStatus::Failed;
                record.error_message = Some(err.to_string());
            }
        }

        {
            let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
            let progress = runs.entry(campaign_id.to_owned()).or_default();
            progress.pending = progress.pending.saturating_sub(1);
            match record.status {
                DeliveryStatus::Sent => progress.sent += 1,
                _ => progress.failed += 1,
            }
        }

        if let Err(err) = self.store.upsert_progress(&record).await {
            tracing::warn!(campaign_id, recipient, "could not record delivery: {err}");
        }
    }

    /// Sent, failed and pending counts of the latest run of a campaign
    ///
    /// Runs this tracker did not see are counted from the stored rows.
    pub async fn aggregate(&self, campaign_id: &str) -> Result<Progress, store::Error> {
        let known = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(campaign_id)
            .copied();
        if let Some(progress) = known {
            return Ok(progress);
        }

        let rows = self.store.progress(campaign_id).await?;
        Ok(rows
            .iter()
            .fold(Progress::default(), |mut progress, row| {
                match row.status {
                    DeliveryStatus::Pending => progress.pending += 1,
                    DeliveryStatus::Sent => progress.sent += 1,
                    DeliveryStatus::Failed => progress.failed += 1,
                }
                progress
            }))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        store::MemoryStore,
        transport::smtp::response::{Category, Code, Detail, Response, Severity},
    };

    fn accepted() -> Result<Response, smtp::Error> {
        Ok(Response::new(
            Code::new(
                Severity::PositiveCompletion,
                Category::MailSystem,
                Detail::Zero,
            ),
            vec!["Ok".to_owned()],
        ))
    }

    fn rejected() -> Result<Response, smtp::Error> {
        Err(smtp::error::code(
            Code::new(
                Severity::PermanentNegativeCompletion,
                Category::MailSystem,
                Detail::Zero,
            ),
            Some("no such user".to_owned()),
        ))
    }

    fn recipients(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("r{i}@example.org")).collect()
    }

    #[tokio::test]
    async fn test_initialize_and_record() {
        let store = MemoryStore::new();
        let tracker = ProgressTracker::new(Arc::new(store.clone()));
        let recipients = recipients(3);

        tracker.initialize("c1", &recipients).await;
        assert_eq!(
            tracker.aggregate("c1").await.unwrap(),
            Progress {
                sent: 0,
                failed: 0,
                pending: 3
            }
        );

        tracker.record("c1", &recipients[0], &accepted()).await;
        tracker.record("c1", &recipients[1], &rejected()).await;

        let progress = tracker.aggregate("c1").await.unwrap();
        assert_eq!(
            progress,
            Progress {
                sent: 1,
                failed: 1,
                pending: 1
            }
        );
        assert_eq!(progress.total(), 3);

        let rows = store.progress("c1").await.unwrap();
        assert_eq!(rows[0].status, DeliveryStatus::Sent);
        assert!(rows[0].sent_at.is_some());
        assert_eq!(rows[1].status, DeliveryStatus::Failed);
        assert_eq!(
            rows[1].error_message.as_deref(),
            Some("permanent error (550): no such user")
        );
        assert_eq!(rows[2].status, DeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn test_aggregate_from_store() {
        let store = MemoryStore::new();
        let writer = ProgressTracker::new(Arc::new(store.clone()));
        let recipients = recipients(2);
        writer.initialize("c1", &recipients).await;
        writer.record("c1", &recipients[0], &accepted()).await;

        let reader = ProgressTracker::new(Arc::new(store));
        assert_eq!(
            reader.aggregate("c1").await.unwrap(),
            Progress {
                sent: 1,
                failed: 0,
                pending: 1
            }
        );
    }

    #[tokio::test]
    async fn test_write_failures_keep_counts() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let tracker = ProgressTracker::new(Arc::new(store.clone()));
        let recipients = recipients(2);

        tracker.initialize("c1", &recipients).await;
        tracker.record("c1", &recipients[0], &accepted()).await;
        tracker.record("c1", &recipients[1], &accepted()).await;

        assert_eq!(tracker.aggregate("c1").await.unwrap().sent, 2);
        store.fail_writes(false);
        assert!(store.progress("c1").await.unwrap().is_empty());
    }
}
