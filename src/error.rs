//! Error type for the dispatch engine

use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
};

use crate::store;

/// Reasons a start or a pause request is rejected
///
/// Nothing is written to the store when one of these is returned.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The campaign does not exist or belongs to someone else
    CampaignNotFound,
    /// A run is already in progress for the campaign
    AlreadySending,
    /// The campaign has no run in progress
    NotSending,
    /// The target list does not exist or belongs to someone else
    ListNotFound,
    /// The owner has no SMTP settings
    SmtpConfigMissing,
    /// The store could not be read
    Store(store::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Error::CampaignNotFound => f.write_str("Campaign not found or access denied"),
            Error::AlreadySending => f.write_str("Campaign is already being sent"),
            Error::NotSending => f.write_str("Campaign is not being sent"),
            Error::ListNotFound => f.write_str("Email list not found"),
            Error::SmtpConfigMissing => f.write_str(
                "Email configuration not found. Please configure your SMTP settings first.",
            ),
            Error::Store(ref err) => write!(f, "store error: {err}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::Store(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        Error::Store(err)
    }
}
