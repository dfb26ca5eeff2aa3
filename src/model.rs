//! Records read from and written to the campaign store

use std::{
    fmt::{self, Debug, Display, Formatter},
    time::{Duration, SystemTime},
};

use crate::{
    message::Message,
    transport::smtp::{authentication::Credentials, SUBMISSIONS_PORT},
};

/// Lifecycle of a campaign
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CampaignStatus {
    /// Being edited
    #[default]
    Draft,
    /// Waiting to be started
    Scheduled,
    /// A run is in progress
    Sending,
    /// Every recipient was sent the message
    Completed,
    /// The run ended with at least one failed recipient
    Failed,
    /// The owner asked the run to stop
    Paused,
}

impl Display for CampaignStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Paused => "paused",
        })
    }
}

/// One email-sending job: a message, a target list and pacing parameters
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Campaign {
    /// Unique identifier
    pub id: String,
    /// Account the campaign belongs to
    pub owner_id: String,
    /// Display name
    pub name: String,
    /// Subject line of the message
    pub subject: String,
    /// Opaque HTML payload
    pub body: String,
    /// List the campaign is sent to
    pub email_list_id: String,
    /// Recipients per batch, `0` falls back to the configured default
    pub batch_size: usize,
    /// Minutes to wait between two batches, `0` means no wait
    pub batch_interval: u64,
    /// Where the campaign stands in its lifecycle
    pub status: CampaignStatus,
    /// Recipients sent the message by the latest run
    pub sent_count: usize,
    /// Size of the list when the latest run started
    pub total_emails: usize,
}

impl Campaign {
    /// A draft campaign with the default pacing of one batch of 10 every 5 minutes
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        email_list_id: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Campaign {
        Campaign {
            id: id.into(),
            owner_id: owner_id.into(),
            name: String::new(),
            subject: subject.into(),
            body: body.into(),
            email_list_id: email_list_id.into(),
            batch_size: 10,
            batch_interval: 5,
            status: CampaignStatus::Draft,
            sent_count: 0,
            total_emails: 0,
        }
    }

    /// The message sent to every recipient
    pub fn message(&self) -> Message {
        Message::new(self.subject.clone(), self.body.clone())
    }

    /// Delay between two batches
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval.saturating_mul(60))
    }
}

/// An ordered list of recipient addresses
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmailList {
    /// Unique identifier
    pub id: String,
    /// Account the list belongs to
    pub owner_id: String,
    /// Display name
    pub name: String,
    /// Recipient addresses, in sending order
    pub emails: Vec<String>,
}

impl EmailList {
    /// Creates a list
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        emails: impl IntoIterator<Item = impl Into<String>>,
    ) -> EmailList {
        EmailList {
            id: id.into(),
            owner_id: owner_id.into(),
            name: String::new(),
            emails: emails.into_iter().map(Into::into).collect(),
        }
    }
}

/// How the connection to the mail server is secured
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum TlsPolicy {
    /// Cleartext for the whole conversation
    None,
    /// TLS from the first byte
    Implicit,
    /// Upgrade with `STARTTLS` after the first EHLO
    StartTls,
}

/// SMTP settings of an account
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SmtpConfig {
    /// Server hostname
    pub host: String,
    /// Server port, `465` means implicit TLS
    pub port: u16,
    /// Login for `AUTH`
    pub username: String,
    /// Secret for `AUTH`, never logged
    pub password: String,
    /// Whether the connection is encrypted
    pub use_tls: bool,
    /// Envelope sender and `From` header, the username when unset
    pub from_address: Option<String>,
}

impl SmtpConfig {
    /// Settings using TLS, with the username as sender
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> SmtpConfig {
        SmtpConfig {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            use_tls: true,
            from_address: None,
        }
    }

    /// Implicit TLS on the submissions port, `STARTTLS` elsewhere
    pub fn tls_policy(&self) -> TlsPolicy {
        match (self.use_tls, self.port) {
            (false, _) => TlsPolicy::None,
            (true, SUBMISSIONS_PORT) => TlsPolicy::Implicit,
            (true, _) => TlsPolicy::StartTls,
        }
    }

    /// The address the messages are sent from
    pub fn sender(&self) -> &str {
        self.from_address.as_deref().unwrap_or(&self.username)
    }

    pub(crate) fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }
}

impl Debug for SmtpConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("use_tls", &self.use_tls)
            .field("from_address", &self.from_address)
            .finish_non_exhaustive()
    }
}

/// Delivery state of one recipient
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeliveryStatus {
    /// Not attempted yet
    Pending,
    /// Accepted by the server
    Sent,
    /// Refused, or the session broke down
    Failed,
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        })
    }
}

/// Per recipient outcome of a campaign run, keyed by campaign and address
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressRecord {
    /// Campaign of the row
    pub campaign_id: String,
    /// Recipient address
    pub email: String,
    /// Delivery state
    pub status: DeliveryStatus,
    /// When the server accepted the message
    pub sent_at: Option<SystemTime>,
    /// Why the delivery failed
    pub error_message: Option<String>,
}

impl ProgressRecord {
    /// A row waiting for its delivery attempt
    pub fn pending(campaign_id: impl Into<String>, email: impl Into<String>) -> ProgressRecord {
        ProgressRecord {
            campaign_id: campaign_id.into(),
            email: email.into(),
            status: DeliveryStatus::Pending,
            sent_at: None,
            error_message: None,
        }
    }
}

/// Fields of a campaign to overwrite, `None` leaves a field untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CampaignUpdate {
    /// New status
    pub status: Option<CampaignStatus>,
    /// New sent counter
    pub sent_count: Option<usize>,
    /// New list size
    pub total_emails: Option<usize>,
}

impl CampaignUpdate {
    /// Only changes the status
    pub fn status(status: CampaignStatus) -> CampaignUpdate {
        CampaignUpdate {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Only changes the sent counter
    pub fn sent_count(sent_count: usize) -> CampaignUpdate {
        CampaignUpdate {
            sent_count: Some(sent_count),
            ..Default::default()
        }
    }

    /// Applies the update to `campaign`
    pub fn apply(&self, campaign: &mut Campaign) {
        if let Some(status) = self.status {
            campaign.status = status;
        }
        if let Some(sent_count) = self.sent_count {
            campaign.sent_count = sent_count;
        }
        if let Some(total_emails) = self.total_emails {
            campaign.total_emails = total_emails;
        }
    }
}

/// Condition on the current status for a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusGuard {
    /// The status must be this one
    Is(CampaignStatus),
    /// The status must be anything but this one
    IsNot(CampaignStatus),
}

impl StatusGuard {
    /// Tells if `status` satisfies the guard
    pub fn allows(self, status: CampaignStatus) -> bool {
        match self {
            StatusGuard::Is(expected) => status == expected,
            StatusGuard::IsNot(excluded) => status != excluded,
        }
    }
}
