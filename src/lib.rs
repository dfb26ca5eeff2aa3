//! Mailcast sends email campaigns to their recipient lists in paced batches.
//!
//! A campaign names a list of recipients, a subject and an HTML body. Starting
//! it through the [`Orchestrator`] checks that it can be sent, flips it to
//! `sending` and spawns a background run. The run splits the list into batches
//! of the campaign's size, delivers each batch through a bounded pool of SMTP
//! sessions, records a progress row per recipient and sleeps the campaign's
//! interval between batches.
//!
//! ## Delivery
//!
//! Every recipient gets its own SMTP session: greeting, `EHLO`, optionally
//! `STARTTLS` or implicit TLS, `AUTH`, then a single `MAIL FROM`, `RCPT TO` and
//! `DATA` transaction. See [`transport::smtp`].
//!
//! ## Storage
//!
//! Campaigns, lists, SMTP settings and progress rows are reached through the
//! [`CampaignStore`] trait. [`MemoryStore`] keeps them in process memory.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mailcast::{
//!     model::{Campaign, EmailList, SmtpConfig},
//!     DispatchConfig, MemoryStore, Orchestrator,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), mailcast::Error> {
//! let store = MemoryStore::new();
//! store
//!     .insert_campaign(Campaign::new("c1", "u1", "l1", "Hello", "<p>Hi</p>"))
//!     .await;
//! store
//!     .insert_list(EmailList::new("l1", "u1", vec!["ann@example.org".to_owned()]))
//!     .await;
//! store
//!     .insert_smtp_config(
//!         "u1",
//!         SmtpConfig::new("smtp.example.org", 587, "news@example.org", "secret"),
//!     )
//!     .await;
//!
//! let orchestrator = Orchestrator::smtp(Arc::new(store), DispatchConfig::default());
//! let accepted = orchestrator.start("c1", "u1").await?;
//! assert_eq!(accepted.total_emails, 1);
//!
//! let outcome = orchestrator.join("c1").await;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
mod error;
pub mod message;
pub mod model;
mod orchestrator;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod transport;

pub use crate::{
    config::DispatchConfig,
    error::Error,
    message::Message,
    orchestrator::{Accepted, Orchestrator},
    progress::{Progress, ProgressTracker},
    scheduler::{RunOutcome, RunStatus},
    store::{CampaignStore, MemoryStore},
    transport::Mailer,
};

/// Boxed error returned by store implementations
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
