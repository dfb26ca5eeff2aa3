//! In-memory store
//!
//! Keeps every record in process memory. It backs tests and embedders that
//! have no datastore of their own.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CampaignStore, Error};
use crate::model::{
    Campaign, CampaignUpdate, EmailList, ProgressRecord, SmtpConfig, StatusGuard,
};

#[derive(Debug, Default)]
struct Tables {
    campaigns: HashMap<String, Campaign>,
    lists: HashMap<String, EmailList>,
    smtp_configs: HashMap<String, SmtpConfig>,
    /// Rows per campaign, in insertion order
    progress: HashMap<String, Vec<ProgressRecord>>,
}

/// Store keeping its records in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_writes: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a campaign
    pub async fn insert_campaign(&self, campaign: Campaign) {
        let mut tables = self.tables.lock().await;
        tables.campaigns.insert(campaign.id.clone(), campaign);
    }

    /// Adds or replaces a list
    pub async fn insert_list(&self, list: EmailList) {
        let mut tables = self.tables.lock().await;
        tables.lists.insert(list.id.clone(), list);
    }

    /// Sets the SMTP settings of `owner_id`
    pub async fn insert_smtp_config(&self, owner_id: impl Into<String>, config: SmtpConfig) {
        let mut tables = self.tables.lock().await;
        tables.smtp_configs.insert(owner_id.into(), config);
    }

    /// Makes every write fail until switched off again
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every read fail until switched off again
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::new("store is not accepting writes"));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), Error> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::new("store is not accepting reads"));
        }
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn campaign(&self, id: &str, owner_id: &str) -> Result<Option<Campaign>, Error> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .campaigns
            .get(id)
            .filter(|campaign| campaign.owner_id == owner_id)
            .cloned())
    }

    async fn email_list(&self, id: &str, owner_id: &str) -> Result<Option<EmailList>, Error> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .lists
            .get(id)
            .filter(|list| list.owner_id == owner_id)
            .cloned())
    }

    async fn smtp_config(&self, owner_id: &str) -> Result<Option<SmtpConfig>, Error> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables.smtp_configs.get(owner_id).cloned())
    }

    async fn update_campaign(&self, id: &str, update: CampaignUpdate) -> Result<(), Error> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        let campaign = tables
            .campaigns
            .get_mut(id)
            .ok_or_else(|| Error::new(format!("no campaign {id}")))?;
        update.apply(campaign);
        Ok(())
    }

    async fn transition(
        &self,
        id: &str,
        guard: StatusGuard,
        update: CampaignUpdate,
    ) -> Result<bool, Error> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        let campaign = tables
            .campaigns
            .get_mut(id)
            .ok_or_else(|| Error::new(format!("no campaign {id}")))?;
        if !guard.allows(campaign.status) {
            return Ok(false);
        }
        update.apply(campaign);
        Ok(true)
    }

    async fn upsert_progress(&self, record: &ProgressRecord) -> Result<(), Error> {
        self.check_write()?;
        let mut tables = self.tables.lock().await;
        let rows = tables
            .progress
            .entry(record.campaign_id.clone())
            .or_default();
        match rows.iter_mut().find(|row| row.email == record.email) {
            Some(row) => *row = record.clone(),
            None => rows.push(record.clone()),
        }
        Ok(())
    }

    async fn progress(&self, campaign_id: &str) -> Result<Vec<ProgressRecord>, Error> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        Ok(tables.progress.get(campaign_id).cloned().unwrap_or_default())
    }
}
