//! The stub mailer never opens a connection. It records every delivery attempt
//! and answers with a positive reply, or with the failure configured for the
//! recipient. It can be useful for testing purposes.
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use mailcast::{
//!     message::Message,
//!     model::SmtpConfig,
//!     transport::{stub::StubMailer, Mailer},
//! };
//!
//! let mailer = StubMailer::new().failing("nobody@example.org", "550 5.1.1 no such user");
//! let message = Message::new("Hello", "<p>Hi there</p>");
//! let config = SmtpConfig::new("smtp.example.com", 587, "news@example.com", "secret");
//!
//! assert!(mailer.deliver("reader@example.org", &message, &config).await.is_ok());
//! assert!(mailer.deliver("nobody@example.org", &message, &config).await.is_err());
//! assert_eq!(mailer.attempts(), ["reader@example.org", "nobody@example.org"]);
//! # }
//! ```

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    message::Message,
    model::SmtpConfig,
    transport::{
        smtp::{
            error::{self, Error},
            response::{Category, Code, Detail, Response, Severity},
            SessionState,
        },
        Mailer,
    },
};

/// This mailer records the recipients and returns the configured replies
#[derive(Debug, Default)]
pub struct StubMailer {
    failures: HashMap<String, Response>,
    latency: Option<Duration>,
    attempts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubMailer {
    /// Creates a mailer accepting every recipient
    pub fn new() -> StubMailer {
        StubMailer::default()
    }

    /// Rejects `recipient` at `RCPT TO` with the given reply, for instance
    /// `"550 5.1.1 no such user"`
    ///
    /// A reply which does not parse is replaced by a generic `550`.
    pub fn failing(mut self, recipient: impl Into<String>, reply: &str) -> StubMailer {
        let response = format!("{}\r\n", reply.trim_end())
            .parse::<Response>()
            .unwrap_or_else(|_| {
                Response::new(
                    Code::new(
                        Severity::PermanentNegativeCompletion,
                        Category::MailSystem,
                        Detail::Zero,
                    ),
                    vec!["recipient rejected".to_owned()],
                )
            });
        self.failures.insert(recipient.into(), response);
        self
    }

    /// Makes every delivery take `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> StubMailer {
        self.latency = Some(latency);
        self
    }

    /// Recipients of every delivery attempt, in the order they were made
    pub fn attempts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .map(|attempts| attempts.clone())
            .unwrap_or_default()
    }

    /// The highest number of deliveries that ran at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for StubMailer {
    async fn deliver(
        &self,
        recipient: &str,
        message: &Message,
        _config: &SmtpConfig,
    ) -> Result<Response, Error> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(recipient.to_owned());
        }
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        tracing::debug!(recipient, subject = message.subject(), "stub delivery");
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.failures.get(recipient) {
            Some(reply) => Err(error::code(reply.code(), Some(reply.text()))
                .at(SessionState::SenderAccepted)),
            None => Ok(Response::new(
                Code::new(
                    Severity::PositiveCompletion,
                    Category::MailSystem,
                    Detail::Zero,
                ),
                vec!["2.0.0 Ok: queued".to_owned()],
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn config() -> SmtpConfig {
        SmtpConfig::new("smtp.example.com", 587, "news@example.com", "secret")
    }

    #[tokio::test]
    async fn test_configured_failure() {
        let mailer = StubMailer::new().failing("nobody@example.org", "550 5.1.1 no such user");
        let message = Message::new("Hello", "<p>Hi</p>");

        let err = mailer
            .deliver("nobody@example.org", &message, &config())
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(
            err.to_string(),
            "permanent error (550): 5.1.1 no such user (session reached sender accepted)"
        );
    }

    #[tokio::test]
    async fn test_unparsable_reply_falls_back() {
        let mailer = StubMailer::new().failing("nobody@example.org", "nope");
        let message = Message::new("Hello", "<p>Hi</p>");

        let err = mailer
            .deliver("nobody@example.org", &message, &config())
            .await
            .unwrap_err();
        assert_eq!(u16::from(err.status().unwrap()), 550);
    }

    #[tokio::test]
    async fn test_records_attempts_in_order() {
        let mailer = StubMailer::new();
        let message = Message::new("Hello", "<p>Hi</p>");

        for recipient in ["a@example.org", "b@example.org", "a@example.org"] {
            let response = mailer.deliver(recipient, &message, &config()).await.unwrap();
            assert!(response.has_code(250));
        }
        assert_eq!(
            mailer.attempts(),
            ["a@example.org", "b@example.org", "a@example.org"]
        );
        assert_eq!(mailer.max_in_flight(), 1);
    }
}
