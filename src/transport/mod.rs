//! ### Delivering Messages
//!
//! A [`Mailer`] delivers one campaign message to one recipient, using the
//! SMTP settings of the campaign owner.
//!
//! The following mailers are available:
//!
//! * The [`SmtpMailer`](smtp::SmtpMailer) speaks SMTP to the configured server, opening a
//!   fresh connection for every recipient.
//! * The [`StubMailer`](stub::StubMailer) records delivery attempts and answers with
//!   configured replies. It is useful for testing purposes.

use async_trait::async_trait;

use crate::{message::Message, model::SmtpConfig};

pub mod smtp;
pub mod stub;

/// Delivers a message to a single recipient
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Runs one complete delivery, returning the reply to the end of data
    ///
    /// A failure carries the offending reply or the i/o error, along with the
    /// last state the conversation reached.
    async fn deliver(
        &self,
        recipient: &str,
        message: &Message,
        config: &SmtpConfig,
    ) -> Result<smtp::Response, smtp::Error>;
}
