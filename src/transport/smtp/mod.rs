//! The SMTP transport delivers one message to one recipient per connection,
//! speaking the protocol directly to the mail server configured by the
//! campaign owner.
//!
//! It implements the following extensions:
//!
//! * 8BITMIME ([RFC 6152](https://tools.ietf.org/html/rfc6152))
//! * AUTH ([RFC 4954](https://tools.ietf.org/html/rfc4954)) with LOGIN and PLAIN mechanisms
//! * STARTTLS ([RFC 2487](https://tools.ietf.org/html/rfc2487))
//!
//! Every step of the conversation reads the server reply and checks its code
//! before going on. A conversation moves through the states of
//! [`SessionState`], and a failure remembers the last one it reached:
//!
//! ```text
//! Connected → Greeted → EhloAcknowledged → [TlsNegotiating → TlsEstablished]
//!   → Authenticated → SenderAccepted → RecipientAccepted → DataAccepted
//!   → MessageSent → Closed
//! ```
//!
//! `QUIT` is always attempted before the stream is shut down, and its outcome
//! never changes the delivery result.

use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use async_trait::async_trait;

pub use self::{
    error::Error,
    response::{Code, Response},
};
use self::{
    authentication::Mechanism,
    client::{SmtpConnection, TlsParameters},
    extension::ClientId,
};
use crate::{
    config::DispatchConfig,
    message::Message,
    model::{SmtpConfig, TlsPolicy},
    transport::Mailer,
};

pub mod authentication;
pub mod client;
pub mod commands;
pub(crate) mod error;
pub mod extension;
pub mod response;

/// Default smtp port
pub const SMTP_PORT: u16 = 25;
/// Default submission port
pub const SUBMISSION_PORT: u16 = 587;
/// Default submission over TLS port
///
/// Defined in [RFC8314](https://tools.ietf.org/html/rfc8314)
pub const SUBMISSIONS_PORT: u16 = 465;

/// Default timeout
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Steps of a single delivery conversation
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// The transport connection is open
    Connected,
    /// The server sent a 2xx greeting
    Greeted,
    /// EHLO got a 2xx reply
    EhloAcknowledged,
    /// STARTTLS got a 2xx reply, the handshake is running
    TlsNegotiating,
    /// The handshake completed
    TlsEstablished,
    /// The credentials were accepted
    Authenticated,
    /// `MAIL FROM` got a 2xx reply
    SenderAccepted,
    /// `RCPT TO` got a 2xx reply
    RecipientAccepted,
    /// `DATA` got a 3xx reply
    DataAccepted,
    /// The payload got a 2xx reply
    MessageSent,
    /// The stream was shut down
    Closed,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            SessionState::Connected => "connected",
            SessionState::Greeted => "greeted",
            SessionState::EhloAcknowledged => "ehlo acknowledged",
            SessionState::TlsNegotiating => "tls negotiating",
            SessionState::TlsEstablished => "tls established",
            SessionState::Authenticated => "authenticated",
            SessionState::SenderAccepted => "sender accepted",
            SessionState::RecipientAccepted => "recipient accepted",
            SessionState::DataAccepted => "data accepted",
            SessionState::MessageSent => "message sent",
            SessionState::Closed => "closed",
        })
    }
}

/// Delivers messages over a fresh SMTP connection per recipient
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    /// Name sent during EHLO
    hello_name: ClientId,
    /// Connect and per-reply deadline
    timeout: Option<Duration>,
    /// Mechanism used to authenticate
    mechanism: Mechanism,
}

impl Default for SmtpMailer {
    fn default() -> Self {
        SmtpMailer {
            hello_name: ClientId::default(),
            timeout: Some(DEFAULT_TIMEOUT),
            mechanism: Mechanism::default(),
        }
    }
}

impl SmtpMailer {
    /// Creates a mailer using the session settings of `config`
    pub fn new(config: &DispatchConfig) -> SmtpMailer {
        SmtpMailer {
            hello_name: config.hello_name().clone(),
            timeout: config.timeout(),
            mechanism: config.auth_mechanism(),
        }
    }

    async fn converse(
        &self,
        conn: &mut SmtpConnection,
        config: &SmtpConfig,
        recipient: &str,
        email: &[u8],
    ) -> Result<Response, Error> {
        conn.greeting().await?;
        conn.ehlo(&self.hello_name).await?;

        if config.tls_policy() == TlsPolicy::StartTls {
            let tls_parameters =
                TlsParameters::new(config.host.clone()).map_err(|e| e.at(conn.state()))?;
            conn.starttls(tls_parameters, &self.hello_name).await?;
        }

        conn.auth(self.mechanism, &config.credentials()).await?;
        conn.send(config.sender(), recipient, email).await
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(
        &self,
        recipient: &str,
        message: &Message,
        config: &SmtpConfig,
    ) -> Result<Response, Error> {
        let email = message.formatted(config.sender(), recipient);

        let tls_parameters = match config.tls_policy() {
            TlsPolicy::Implicit => Some(TlsParameters::new(config.host.clone())?),
            TlsPolicy::StartTls | TlsPolicy::None => None,
        };

        tracing::debug!(
            host = %config.host,
            port = config.port,
            recipient,
            "opening smtp session"
        );
        let mut conn =
            SmtpConnection::connect(&config.host, config.port, self.timeout, tls_parameters)
                .await?;

        let result = self.converse(&mut conn, config, recipient, &email).await;
        conn.close().await;

        if let Ok(ref response) = result {
            tracing::debug!(recipient, "message accepted: {}", response.text());
        }
        result
    }
}
