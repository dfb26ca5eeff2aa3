//! SMTP commands

use std::fmt::{self, Debug, Display, Formatter};

use crate::transport::smtp::{
    authentication::{self, Credentials, Mechanism},
    extension::{ClientId, MailParameter},
};

/// EHLO command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Ehlo {
    client_id: ClientId,
}

impl Display for Ehlo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        #[allow(clippy::write_with_newline)]
        write!(f, "EHLO {}\r\n", self.client_id)
    }
}

impl Ehlo {
    /// Creates a EHLO command
    pub fn new(client_id: ClientId) -> Ehlo {
        Ehlo { client_id }
    }
}

/// STARTTLS command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct Starttls;

impl Display for Starttls {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("STARTTLS\r\n")
    }
}

/// MAIL command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Mail {
    sender: String,
    parameters: Vec<MailParameter>,
}

impl Display for Mail {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MAIL FROM:<{}>", self.sender)?;
        for parameter in &self.parameters {
            write!(f, " {parameter}")?;
        }
        f.write_str("\r\n")
    }
}

impl Mail {
    /// Creates a MAIL command
    pub fn new(sender: impl Into<String>, parameters: Vec<MailParameter>) -> Mail {
        Mail {
            sender: sender.into(),
            parameters,
        }
    }
}

/// RCPT command
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Rcpt {
    recipient: String,
}

impl Display for Rcpt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        #[allow(clippy::write_with_newline)]
        write!(f, "RCPT TO:<{}>\r\n", self.recipient)
    }
}

impl Rcpt {
    /// Creates an RCPT command
    pub fn new(recipient: impl Into<String>) -> Rcpt {
        Rcpt {
            recipient: recipient.into(),
        }
    }
}

/// DATA command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct Data;

impl Display for Data {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("DATA\r\n")
    }
}

/// QUIT command
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct Quit;

impl Display for Quit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("QUIT\r\n")
    }
}

/// AUTH command
#[derive(PartialEq, Eq, Clone)]
pub struct Auth {
    mechanism: Mechanism,
    initial_response: Option<String>,
}

impl Display for Auth {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AUTH {}", self.mechanism)?;
        if let Some(ref response) = self.initial_response {
            write!(f, " {response}")?;
        }
        f.write_str("\r\n")
    }
}

impl Debug for Auth {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("mechanism", &self.mechanism)
            .finish()
    }
}

impl Auth {
    /// Creates an AUTH command, carrying the initial response when the
    /// mechanism has one
    pub fn new(mechanism: Mechanism, credentials: &Credentials) -> Auth {
        Auth {
            mechanism,
            initial_response: mechanism.initial_response(credentials),
        }
    }
}

/// A base64 line answering a `334` challenge
#[derive(PartialEq, Eq, Clone)]
pub struct AuthResponse {
    encoded: String,
}

impl Display for AuthResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        #[allow(clippy::write_with_newline)]
        write!(f, "{}\r\n", self.encoded)
    }
}

impl Debug for AuthResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse").finish()
    }
}

impl AuthResponse {
    /// Encodes a raw challenge answer
    pub fn new(value: &str) -> AuthResponse {
        AuthResponse {
            encoded: authentication::encode(value),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transport::smtp::extension::MailBodyParameter;

    #[test]
    fn test_display() {
        let id = ClientId::Domain("localhost".to_owned());
        assert_eq!(format!("{}", Ehlo::new(id)), "EHLO localhost\r\n");
        assert_eq!(format!("{Starttls}"), "STARTTLS\r\n");
        assert_eq!(
            format!("{}", Mail::new("news@example.com", vec![])),
            "MAIL FROM:<news@example.com>\r\n"
        );
        assert_eq!(
            format!(
                "{}",
                Mail::new(
                    "news@example.com",
                    vec![MailParameter::Body(MailBodyParameter::EightBitMime)],
                )
            ),
            "MAIL FROM:<news@example.com> BODY=8BITMIME\r\n"
        );
        assert_eq!(
            format!("{}", Rcpt::new("reader@example.org")),
            "RCPT TO:<reader@example.org>\r\n"
        );
        assert_eq!(format!("{Data}"), "DATA\r\n");
        assert_eq!(format!("{Quit}"), "QUIT\r\n");
    }

    #[test]
    fn test_auth_display() {
        let credentials = Credentials::new("user".to_owned(), "password".to_owned());
        assert_eq!(
            format!("{}", Auth::new(Mechanism::Plain, &credentials)),
            "AUTH PLAIN AHVzZXIAcGFzc3dvcmQ=\r\n"
        );
        assert_eq!(
            format!("{}", Auth::new(Mechanism::Login, &credentials)),
            "AUTH LOGIN\r\n"
        );
        assert_eq!(format!("{}", AuthResponse::new("user")), "dXNlcg==\r\n");
        assert_eq!(format!("{:?}", AuthResponse::new("user")), "AuthResponse");
    }
}
