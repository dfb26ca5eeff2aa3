//! Campaign orchestrator
//!
//! The entry point of the engine. [`Orchestrator::start`] checks that a
//! campaign can be sent, moves it to `sending`, creates its progress rows and
//! spawns the run on the tokio runtime. It returns as soon as the run is
//! scheduled; the caller never waits for the delivery to end.

use std::{collections::HashMap, sync::Arc};

use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    config::DispatchConfig,
    error::Error,
    model::{CampaignStatus, CampaignUpdate, StatusGuard},
    progress::{Progress, ProgressTracker},
    scheduler::{RunOutcome, Scheduler},
    store::CampaignStore,
    transport::{smtp::SmtpMailer, Mailer},
};

/// A start request that was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Accepted {
    /// Size of the list when the run started
    pub total_emails: usize,
}

/// Starts, pauses and supervises campaign runs
pub struct Orchestrator {
    store: Arc<dyn CampaignStore>,
    tracker: Arc<ProgressTracker>,
    scheduler: Arc<Scheduler>,
    runs: Mutex<HashMap<String, Run>>,
}

/// Latest run of a campaign
#[derive(Debug)]
enum Run {
    Active(JoinHandle<RunOutcome>),
    Finished(RunOutcome),
}

impl Run {
    fn is_active(&self) -> bool {
        matches!(self, Run::Active(handle) if !handle.is_finished())
    }

    /// Outcome of a run that has ended
    async fn outcome(self, campaign_id: &str) -> Option<RunOutcome> {
        match self {
            Run::Finished(outcome) => Some(outcome),
            Run::Active(handle) => match handle.await {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    tracing::error!(campaign_id, "campaign run did not finish: {err}");
                    None
                }
            },
        }
    }
}

impl Orchestrator {
    /// Creates an orchestrator delivering through `mailer`
    pub fn new(
        store: Arc<dyn CampaignStore>,
        mailer: Arc<dyn Mailer>,
        config: DispatchConfig,
    ) -> Orchestrator {
        let tracker = Arc::new(ProgressTracker::new(store.clone()));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            mailer,
            tracker.clone(),
            config,
        ));

        Orchestrator {
            store,
            tracker,
            scheduler,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an orchestrator delivering over SMTP
    pub fn smtp(store: Arc<dyn CampaignStore>, config: DispatchConfig) -> Orchestrator {
        let mailer = Arc::new(SmtpMailer::new(&config));
        Self::new(store, mailer, config)
    }

    /// Starts a run of `campaign_id` on behalf of `owner_id`
    ///
    /// Checks, in order, that the campaign exists and belongs to the caller,
    /// that it is not being sent, that its list exists and that the caller has
    /// SMTP settings. The first failing check rejects the request and nothing
    /// is written.
    ///
    /// A campaign left `sending` by a run of this orchestrator that has ended
    /// without writing its terminal status is not being sent, and can be
    /// started again.
    pub async fn start(&self, campaign_id: &str, owner_id: &str) -> Result<Accepted, Error> {
        // one start at a time, so a stale run is taken over once
        let mut runs = self.runs.lock().await;

        let mut campaign = self
            .store
            .campaign(campaign_id, owner_id)
            .await?
            .ok_or(Error::CampaignNotFound)?;

        let latest = runs.get(campaign_id);
        if latest.is_some_and(Run::is_active) {
            return Err(Error::AlreadySending);
        }
        let stale = campaign.status == CampaignStatus::Sending;
        if stale && latest.is_none() {
            return Err(Error::AlreadySending);
        }

        let list = self
            .store
            .email_list(&campaign.email_list_id, owner_id)
            .await?
            .ok_or(Error::ListNotFound)?;

        let smtp = self
            .store
            .smtp_config(owner_id)
            .await?
            .ok_or(Error::SmtpConfigMissing)?;

        let total_emails = list.emails.len();
        let update = CampaignUpdate {
            status: Some(CampaignStatus::Sending),
            sent_count: Some(0),
            total_emails: Some(total_emails),
        };
        let guard = if stale {
            StatusGuard::Is(CampaignStatus::Sending)
        } else {
            StatusGuard::IsNot(CampaignStatus::Sending)
        };
        let applied = self.store.transition(campaign_id, guard, update).await?;
        if !applied {
            return Err(Error::AlreadySending);
        }
        if stale {
            if let Some(previous) = runs.remove(campaign_id) {
                let previous = previous.outcome(campaign_id).await;
                tracing::warn!(
                    campaign_id,
                    ?previous,
                    "previous run ended without writing its status, taking over"
                );
            }
        }
        update.apply(&mut campaign);

        self.tracker.initialize(campaign_id, &list.emails).await;

        let scheduler = self.scheduler.clone();
        let recipients = list.emails;
        let handle = tokio::spawn(async move {
            scheduler.run(&campaign, &recipients, &smtp).await
        });
        runs.insert(campaign_id.to_owned(), Run::Active(handle));

        tracing::info!(campaign_id, owner_id, total_emails, "Campaign started successfully");
        Ok(Accepted { total_emails })
    }

    /// Asks the run of `campaign_id` to stop before its next batch
    pub async fn pause(&self, campaign_id: &str, owner_id: &str) -> Result<(), Error> {
        self.store
            .campaign(campaign_id, owner_id)
            .await?
            .ok_or(Error::CampaignNotFound)?;

        let applied = self
            .store
            .transition(
                campaign_id,
                StatusGuard::Is(CampaignStatus::Sending),
                CampaignUpdate::status(CampaignStatus::Paused),
            )
            .await?;
        if !applied {
            return Err(Error::NotSending);
        }

        tracing::info!(campaign_id, owner_id, "campaign paused");
        Ok(())
    }

    /// Waits for the latest run of `campaign_id`
    ///
    /// Returns `None` when no run was started by this orchestrator, or when
    /// the run did not finish normally.
    pub async fn join(&self, campaign_id: &str) -> Option<RunOutcome> {
        let run = self.runs.lock().await.remove(campaign_id)?;
        let outcome = run.outcome(campaign_id).await?;
        self.runs
            .lock()
            .await
            .entry(campaign_id.to_owned())
            .or_insert(Run::Finished(outcome));
        Some(outcome)
    }

    /// Sent, failed and pending counts of the latest run
    pub async fn progress(&self, campaign_id: &str, owner_id: &str) -> Result<Progress, Error> {
        self.store
            .campaign(campaign_id, owner_id)
            .await?
            .ok_or(Error::CampaignNotFound)?;

        Ok(self.tracker.aggregate(campaign_id).await?)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        model::{Campaign, DeliveryStatus, EmailList, SmtpConfig},
        scheduler::RunStatus,
        store::MemoryStore,
        transport::stub::StubMailer,
    };

    fn recipients(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("r{i}@example.org")).collect()
    }

    async fn seeded(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        let mut campaign = Campaign::new("c1", "u1", "l1", "Hello", "<p>Hi</p>");
        campaign.batch_size = 2;
        campaign.batch_interval = 1;
        store.insert_campaign(campaign).await;
        store
            .insert_list(EmailList::new("l1", "u1", recipients(n)))
            .await;
        store
            .insert_smtp_config(
                "u1",
                SmtpConfig::new("smtp.example.org", 587, "news@example.org", "secret"),
            )
            .await;
        store
    }

    fn orchestrator(store: &MemoryStore, mailer: StubMailer) -> Orchestrator {
        Orchestrator::new(
            Arc::new(store.clone()),
            Arc::new(mailer),
            DispatchConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_in_background() {
        let store = seeded(5).await;
        let orchestrator = orchestrator(&store, StubMailer::new());

        let accepted = orchestrator.start("c1", "u1").await.unwrap();
        assert_eq!(accepted, Accepted { total_emails: 5 });

        let campaign = store.campaign("c1", "u1").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Sending);
        assert_eq!(campaign.total_emails, 5);
        assert_eq!(campaign.sent_count, 0);

        let outcome = orchestrator.join("c1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.sent, 5);

        let campaign = store.campaign("c1", "u1").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.sent_count, 5);
        assert!(store
            .progress("c1")
            .await
            .unwrap()
            .iter()
            .all(|row| row.status == DeliveryStatus::Sent));
    }

    #[tokio::test]
    async fn test_start_checks_in_order() {
        let store = MemoryStore::new();
        let orchestrator = orchestrator(&store, StubMailer::new());
        assert!(matches!(
            orchestrator.start("c1", "u1").await,
            Err(Error::CampaignNotFound)
        ));

        let mut campaign = Campaign::new("c1", "u1", "l1", "Hello", "<p>Hi</p>");
        store.insert_campaign(campaign.clone()).await;
        assert!(matches!(
            orchestrator.start("c1", "u2").await,
            Err(Error::CampaignNotFound)
        ));
        assert!(matches!(
            orchestrator.start("c1", "u1").await,
            Err(Error::ListNotFound)
        ));

        store
            .insert_list(EmailList::new("l1", "u1", recipients(1)))
            .await;
        assert!(matches!(
            orchestrator.start("c1", "u1").await,
            Err(Error::SmtpConfigMissing)
        ));

        campaign.status = CampaignStatus::Sending;
        store.insert_campaign(campaign).await;
        assert!(matches!(
            orchestrator.start("c1", "u1").await,
            Err(Error::AlreadySending)
        ));
        assert!(store.progress("c1").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let store = seeded(4).await;
        let orchestrator = orchestrator(&store, StubMailer::new());

        orchestrator.start("c1", "u1").await.unwrap();
        assert!(matches!(
            orchestrator.start("c1", "u1").await,
            Err(Error::AlreadySending)
        ));

        let outcome = orchestrator.join("c1").await.unwrap();
        assert_eq!(outcome.sent, 4);
    }

    #[tokio::test]
    async fn test_store_read_failure() {
        let store = seeded(1).await;
        store.fail_reads(true);
        let orchestrator = orchestrator(&store, StubMailer::new());

        assert!(matches!(
            orchestrator.start("c1", "u1").await,
            Err(Error::Store(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_progress() {
        let store = seeded(6).await;
        let mailer = StubMailer::new().with_latency(Duration::from_secs(1));
        let orchestrator = orchestrator(&store, mailer);

        assert!(matches!(
            orchestrator.pause("c1", "u1").await,
            Err(Error::NotSending)
        ));

        orchestrator.start("c1", "u1").await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        orchestrator.pause("c1", "u1").await.unwrap();

        let outcome = orchestrator.join("c1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Paused);
        assert_eq!(outcome.sent, 2);

        let progress = orchestrator.progress("c1", "u1").await.unwrap();
        assert_eq!(
            progress,
            Progress {
                sent: 2,
                failed: 0,
                pending: 4
            }
        );
        assert!(matches!(
            orchestrator.progress("c1", "u2").await,
            Err(Error::CampaignNotFound)
        ));

        let campaign = store.campaign("c1", "u1").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Paused);
        assert_eq!(campaign.sent_count, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_on_multi_thread_runtime() {
        let store = seeded(5).await;
        let mut campaign = store.campaign("c1", "u1").await.unwrap().unwrap();
        campaign.batch_interval = 0;
        store.insert_campaign(campaign).await;
        let orchestrator = orchestrator(&store, StubMailer::new());

        orchestrator.start("c1", "u1").await.unwrap();
        let outcome = orchestrator.join("c1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.sent, 5);

        let campaign = store.campaign("c1", "u1").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_lost_terminal_write() {
        let store = seeded(4).await;
        let orchestrator = orchestrator(&store, StubMailer::new());

        orchestrator.start("c1", "u1").await.unwrap();
        store.fail_writes(true);
        // two batches one minute apart, then the retries of the terminal write
        tokio::time::sleep(Duration::from_secs(600)).await;
        store.fail_writes(false);

        let campaign = store.campaign("c1", "u1").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Sending);

        let accepted = orchestrator.start("c1", "u1").await.unwrap();
        assert_eq!(accepted.total_emails, 4);
        let outcome = orchestrator.join("c1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.sent, 4);

        let campaign = store.campaign("c1", "u1").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.sent_count, 4);
    }

    #[tokio::test]
    async fn test_join_twice() {
        let store = seeded(2).await;
        let orchestrator = orchestrator(&store, StubMailer::new());

        orchestrator.start("c1", "u1").await.unwrap();
        let first = orchestrator.join("c1").await.unwrap();
        assert_eq!(orchestrator.join("c1").await, Some(first));
    }

    #[tokio::test]
    async fn test_join_without_run() {
        let store = MemoryStore::new();
        let orchestrator = orchestrator(&store, StubMailer::new());
        assert_eq!(orchestrator.join("c1").await, None);
    }
}
