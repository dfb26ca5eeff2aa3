//! The campaign store boundary
//!
//! Campaigns, lists, SMTP settings and progress rows live in a store owned by
//! the surrounding application. The engine only reaches them through
//! [`CampaignStore`].

use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
};

use async_trait::async_trait;

pub use self::memory::MemoryStore;
use crate::{
    model::{Campaign, CampaignUpdate, EmailList, ProgressRecord, SmtpConfig, StatusGuard},
    BoxError,
};

mod memory;

/// Failure to read from or write to the store
pub struct Error {
    inner: BoxError,
}

impl Error {
    /// Wraps the error of a store implementation
    pub fn new<E: Into<BoxError>>(err: E) -> Error {
        Error { inner: err.into() }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("mailcast::store::Error")
            .field(&self.inner)
            .finish()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.inner)
    }
}

/// Narrow access to the records the engine reads and writes
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// The campaign `id`, if it belongs to `owner_id`
    async fn campaign(&self, id: &str, owner_id: &str) -> Result<Option<Campaign>, Error>;

    /// The list `id`, if it belongs to `owner_id`
    async fn email_list(&self, id: &str, owner_id: &str) -> Result<Option<EmailList>, Error>;

    /// The SMTP settings of `owner_id`
    async fn smtp_config(&self, owner_id: &str) -> Result<Option<SmtpConfig>, Error>;

    /// Overwrites the fields set in `update`
    async fn update_campaign(&self, id: &str, update: CampaignUpdate) -> Result<(), Error>;

    /// Applies `update` only if the current status satisfies `guard`
    ///
    /// Returns whether the update was applied. The check and the write must be
    /// atomic with respect to other calls of this method.
    async fn transition(
        &self,
        id: &str,
        guard: StatusGuard,
        update: CampaignUpdate,
    ) -> Result<bool, Error>;

    /// Inserts the row, or replaces the one with the same campaign and address
    async fn upsert_progress(&self, record: &ProgressRecord) -> Result<(), Error>;

    /// Every row of a campaign
    async fn progress(&self, campaign_id: &str) -> Result<Vec<ProgressRecord>, Error>;
}
