//! Batch scheduler
//!
//! A run walks the recipient list in order, in consecutive batches of the
//! campaign batch size. After each batch the sent counter is flushed to the
//! campaign, then the run sleeps for the campaign interval unless it just
//! sent the last batch. Inside a batch, deliveries go through a worker pool
//! which never holds more connections than the configured concurrency, and
//! every delivery of a batch resolves before the counter flush.
//!
//! The run ends as `completed` when every recipient was sent the message, and
//! as `failed` as soon as one of them was not.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::Duration,
};

use futures_util::{stream, StreamExt};

use crate::{
    config::DispatchConfig,
    message::Message,
    model::{Campaign, CampaignStatus, CampaignUpdate, SmtpConfig, StatusGuard},
    progress::ProgressTracker,
    store::CampaignStore,
    transport::Mailer,
};

/// Attempts at writing the terminal status of a run
pub const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_secs(1);

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RunStatus {
    /// Every recipient was sent the message
    Completed,
    /// At least one recipient was not
    Failed,
    /// The campaign was paused, the remaining recipients are still pending
    Paused,
}

impl From<RunStatus> for CampaignStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => CampaignStatus::Completed,
            RunStatus::Failed => CampaignStatus::Failed,
            RunStatus::Paused => CampaignStatus::Paused,
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&CampaignStatus::from(*self), f)
    }
}

/// Result of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunOutcome {
    /// How the run ended
    pub status: RunStatus,
    /// Recipients that were sent the message
    pub sent: usize,
    /// Recipients whose delivery failed
    pub failed: usize,
}

/// Number of batches needed for `total` recipients
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    total.div_ceil(batch_size.max(1))
}

/// Sends a campaign batch after batch
pub struct Scheduler {
    store: Arc<dyn CampaignStore>,
    mailer: Arc<dyn Mailer>,
    tracker: Arc<ProgressTracker>,
    config: DispatchConfig,
}

impl Scheduler {
    /// Creates a scheduler
    pub fn new(
        store: Arc<dyn CampaignStore>,
        mailer: Arc<dyn Mailer>,
        tracker: Arc<ProgressTracker>,
        config: DispatchConfig,
    ) -> Scheduler {
        Scheduler {
            store,
            mailer,
            tracker,
            config,
        }
    }

    /// Delivers the campaign to `recipients` and writes its terminal status
    ///
    /// Store failures are logged and never stop the run.
    pub async fn run(
        &self,
        campaign: &Campaign,
        recipients: &[String],
        smtp: &SmtpConfig,
    ) -> RunOutcome {
        let batch_size = self.config.batch_size(campaign.batch_size);
        let concurrency = self.config.concurrency(batch_size);
        let batches = batch_count(recipients.len(), batch_size);
        let interval = campaign.interval();
        let message = campaign.message();

        tracing::info!(
            campaign_id = %campaign.id,
            recipients = recipients.len(),
            batch_size,
            batches,
            concurrency,
            "campaign run started"
        );

        let mut sent = 0;
        let mut failed = 0;

        for (index, batch) in recipients.chunks(batch_size).enumerate() {
            if self.config.check_pause() && self.is_paused(campaign).await {
                tracing::info!(
                    campaign_id = %campaign.id,
                    sent,
                    failed,
                    pending = recipients.len() - sent - failed,
                    "campaign paused, run stopped"
                );
                self.flush(&campaign.id, CampaignUpdate::sent_count(sent))
                    .await;
                return RunOutcome {
                    status: RunStatus::Paused,
                    sent,
                    failed,
                };
            }

            let batch_sent = self
                .send_batch(&campaign.id, batch, &message, smtp, concurrency)
                .await;
            sent += batch_sent;
            failed += batch.len() - batch_sent;

            tracing::info!(
                campaign_id = %campaign.id,
                batch = index + 1,
                of = batches,
                size = batch.len(),
                sent,
                failed,
                "batch done"
            );
            self.flush(&campaign.id, CampaignUpdate::sent_count(sent))
                .await;

            if index + 1 < batches && !interval.is_zero() {
                tracing::debug!(campaign_id = %campaign.id, "waiting {interval:?} before next batch");
                tokio::time::sleep(interval).await;
            }
        }

        let status = if failed == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.finish(&campaign.id, status, sent).await;

        tracing::info!(campaign_id = %campaign.id, %status, sent, failed, "campaign run finished");
        RunOutcome {
            status,
            sent,
            failed,
        }
    }

    /// Delivers one batch, returns how many recipients were sent the message
    async fn send_batch(
        &self,
        campaign_id: &str,
        batch: &[String],
        message: &Message,
        smtp: &SmtpConfig,
        concurrency: usize,
    ) -> usize {
        let mailer = &*self.mailer;
        let tracker = &*self.tracker;

        stream::iter(batch.iter().cloned())
            .map(|recipient: String| async move {
                let result = mailer.deliver(&recipient, message, smtp).await;
                if let Err(ref err) = result {
                    tracing::warn!(campaign_id, recipient = %recipient, "delivery failed: {err}");
                }
                tracker.record(campaign_id, &recipient, &result).await;
                result.is_ok()
            })
            .buffer_unordered(concurrency)
            .fold(0, |sent, delivered| {
                std::future::ready(sent + usize::from(delivered))
            })
            .await
    }

    async fn is_paused(&self, campaign: &Campaign) -> bool {
        match self.store.campaign(&campaign.id, &campaign.owner_id).await {
            Ok(Some(current)) => current.status == CampaignStatus::Paused,
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(campaign_id = %campaign.id, "could not read campaign status: {err}");
                false
            }
        }
    }

    async fn flush(&self, campaign_id: &str, update: CampaignUpdate) {
        if let Err(err) = self.store.update_campaign(campaign_id, update).await {
            tracing::warn!(campaign_id, "could not update campaign: {err}");
        }
    }

    /// Writes the terminal status
    ///
    /// With pause checks on, a campaign paused during the last batch keeps
    /// its `paused` status and only gets its counter. A failed write is
    /// retried [`TERMINAL_WRITE_ATTEMPTS`] times in all, with a doubling
    /// delay. If every attempt fails the campaign stays `sending` until
    /// [`Orchestrator::start`](crate::Orchestrator::start) settles it.
    async fn finish(&self, campaign_id: &str, status: RunStatus, sent: usize) {
        let update = CampaignUpdate {
            status: Some(status.into()),
            sent_count: Some(sent),
            total_emails: None,
        };

        let mut delay = TERMINAL_WRITE_BACKOFF;
        for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
            let written = if self.config.check_pause() {
                self.store
                    .transition(campaign_id, StatusGuard::Is(CampaignStatus::Sending), update)
                    .await
            } else {
                self.store
                    .update_campaign(campaign_id, update)
                    .await
                    .map(|()| true)
            };

            match written {
                Ok(true) => return,
                Ok(false) => {
                    tracing::info!(campaign_id, "campaign left the sending status during the run");
                    self.flush(campaign_id, CampaignUpdate::sent_count(sent))
                        .await;
                    return;
                }
                Err(err) if attempt < TERMINAL_WRITE_ATTEMPTS => {
                    tracing::warn!(
                        campaign_id,
                        attempt,
                        "could not write terminal status, retrying in {delay:?}: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    tracing::error!(campaign_id, attempt, "could not write terminal status: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        model::{DeliveryStatus, EmailList},
        store::MemoryStore,
        transport::stub::StubMailer,
    };

    fn recipients(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("r{i}@example.org")).collect()
    }

    fn smtp() -> SmtpConfig {
        SmtpConfig::new("smtp.example.com", 587, "news@example.com", "secret")
    }

    async fn setup(
        batch_size: usize,
        batch_interval: u64,
        mailer: Arc<StubMailer>,
        config: DispatchConfig,
    ) -> (MemoryStore, Arc<ProgressTracker>, Scheduler, Campaign) {
        let store = MemoryStore::new();
        let mut campaign = Campaign::new("c1", "u1", "l1", "Hello", "<p>Hi</p>");
        campaign.batch_size = batch_size;
        campaign.batch_interval = batch_interval;
        campaign.status = CampaignStatus::Sending;
        store.insert_campaign(campaign.clone()).await;
        store
            .insert_list(EmailList::new("l1", "u1", Vec::<String>::new()))
            .await;

        let shared: Arc<dyn CampaignStore> = Arc::new(store.clone());
        let tracker = Arc::new(ProgressTracker::new(shared.clone()));
        let scheduler = Scheduler::new(shared, mailer, tracker.clone(), config);
        (store, tracker, scheduler, campaign)
    }

    #[test]
    fn test_batch_count() {
        for total in 0..40 {
            for size in 1..12 {
                let items = recipients(total);
                let sizes: Vec<usize> = items.chunks(size).map(<[String]>::len).collect();
                let count = batch_count(total, size);

                assert_eq!(sizes.len(), count);
                if count > 0 {
                    assert_eq!(sizes[count - 1], total - size * (count - 1));
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_paced() {
        let mailer = Arc::new(StubMailer::new());
        let (store, _, scheduler, campaign) =
            setup(5, 1, mailer.clone(), DispatchConfig::default()).await;
        let list = recipients(12);

        let run = {
            let list = list.clone();
            tokio::spawn(async move { scheduler.run(&campaign, &list, &smtp()).await })
        };

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mailer.attempts().len(), 5);
        assert_eq!(store.campaign("c1", "u1").await.unwrap().unwrap().sent_count, 5);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(mailer.attempts().len(), 10);
        assert_eq!(store.campaign("c1", "u1").await.unwrap().unwrap().sent_count, 10);

        let outcome = run.await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome {
                status: RunStatus::Completed,
                sent: 12,
                failed: 0
            }
        );
        assert_eq!(mailer.attempts(), list);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_last_batch() {
        let mailer = Arc::new(StubMailer::new());
        let (_, _, scheduler, campaign) =
            setup(2, 10, mailer, DispatchConfig::default()).await;

        let start = tokio::time::Instant::now();
        let outcome = scheduler.run(&campaign, &recipients(4), &smtp()).await;

        assert_eq!(outcome.status, RunStatus::Completed);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(600));
        assert!(elapsed < Duration::from_secs(1200));
    }

    #[tokio::test]
    async fn test_one_failure_fails_the_run() {
        let list = recipients(3);
        let mailer = Arc::new(StubMailer::new().failing(list[1].clone(), "550 no such user"));
        let (store, tracker, scheduler, campaign) =
            setup(10, 0, mailer, DispatchConfig::default()).await;
        tracker.initialize("c1", &list).await;

        let outcome = scheduler.run(&campaign, &list, &smtp()).await;
        assert_eq!(
            outcome,
            RunOutcome {
                status: RunStatus::Failed,
                sent: 2,
                failed: 1
            }
        );

        let stored = store.campaign("c1", "u1").await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Failed);
        assert_eq!(stored.sent_count, 2);

        let rows = store.progress("c1").await.unwrap();
        let failed: Vec<_> = rows
            .iter()
            .filter(|row| row.status == DeliveryStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].email, list[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_is_bounded() {
        let mailer = Arc::new(StubMailer::new().with_latency(Duration::from_millis(100)));
        let config = DispatchConfig::builder().concurrency(3).build();
        let (_, _, scheduler, campaign) = setup(4, 0, mailer.clone(), config).await;

        let outcome = scheduler.run(&campaign, &recipients(10), &smtp()).await;

        assert_eq!(outcome.sent, 10);
        assert_eq!(mailer.max_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_before_next_batch() {
        let mailer = Arc::new(StubMailer::new());
        let (store, tracker, scheduler, campaign) =
            setup(2, 1, mailer.clone(), DispatchConfig::default()).await;
        let list = recipients(6);
        tracker.initialize("c1", &list).await;

        let run = {
            let list = list.clone();
            tokio::spawn(async move { scheduler.run(&campaign, &list, &smtp()).await })
        };

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store
            .transition(
                "c1",
                StatusGuard::Is(CampaignStatus::Sending),
                CampaignUpdate::status(CampaignStatus::Paused),
            )
            .await
            .unwrap());

        let outcome = run.await.unwrap();
        assert_eq!(outcome.status, RunStatus::Paused);
        assert_eq!(outcome.sent, 2);
        assert_eq!(mailer.attempts().len(), 2);

        let stored = store.campaign("c1", "u1").await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Paused);
        assert_eq!(stored.sent_count, 2);
        assert_eq!(tracker.aggregate("c1").await.unwrap().pending, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_write_failures_are_tolerated() {
        let mailer = Arc::new(StubMailer::new());
        let (store, _, scheduler, campaign) =
            setup(2, 0, mailer.clone(), DispatchConfig::default()).await;
        store.fail_writes(true);

        let outcome = scheduler.run(&campaign, &recipients(5), &smtp()).await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.sent, 5);
        assert_eq!(mailer.attempts().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_write_is_retried() {
        let mailer = Arc::new(StubMailer::new());
        let (store, _, scheduler, campaign) =
            setup(2, 0, mailer, DispatchConfig::default()).await;
        store.fail_writes(true);

        let run = tokio::spawn(async move {
            scheduler.run(&campaign, &recipients(2), &smtp()).await
        });

        // the first attempt failed, the run now waits before the second
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!run.is_finished());
        store.fail_writes(false);

        let outcome = run.await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);

        let stored = store.campaign("c1", "u1").await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert_eq!(stored.sent_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_write_gives_up() {
        let mailer = Arc::new(StubMailer::new());
        let (store, _, scheduler, campaign) =
            setup(2, 0, mailer, DispatchConfig::default()).await;
        store.fail_writes(true);

        let start = tokio::time::Instant::now();
        let outcome = scheduler.run(&campaign, &recipients(2), &smtp()).await;
        assert_eq!(outcome.status, RunStatus::Completed);
        // 1s then 2s between the three attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));

        store.fail_writes(false);
        let stored = store.campaign("c1", "u1").await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Sending);
    }
}
