//! Provides limited SASL authentication mechanisms

use std::fmt::{self, Debug, Display, Formatter};

use base64::{engine::general_purpose::STANDARD, Engine};

/// Contains user credentials
#[derive(PartialEq, Eq, Clone, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Credentials {
    authentication_identity: String,
    secret: String,
}

impl Credentials {
    /// Create a `Credentials` struct from username and password
    pub fn new(username: String, password: String) -> Credentials {
        Credentials {
            authentication_identity: username,
            secret: password,
        }
    }

    pub(crate) fn identity(&self) -> &str {
        &self.authentication_identity
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl<S, T> From<(S, T)> for Credentials
where
    S: Into<String>,
    T: Into<String>,
{
    fn from((username, password): (S, T)) -> Self {
        Credentials::new(username.into(), password.into())
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish()
    }
}

/// Represents authentication mechanisms
#[derive(PartialEq, Eq, Copy, Clone, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mechanism {
    /// PLAIN authentication mechanism, defined in
    /// [RFC 4616](https://tools.ietf.org/html/rfc4616)
    Plain,
    /// LOGIN authentication mechanism
    ///
    /// The identity and the secret travel as two separate base64 lines, each
    /// one answering a `334` challenge.
    ///
    /// Defined in [draft-murchison-sasl-login-00](https://www.ietf.org/archive/id/draft-murchison-sasl-login-00.txt).
    #[default]
    Login,
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
        })
    }
}

impl Mechanism {
    /// Does the mechanism supports initial response
    pub fn supports_initial_response(self) -> bool {
        match self {
            Mechanism::Plain => true,
            Mechanism::Login => false,
        }
    }

    /// Returns the base64 encoded initial response, for mechanisms which have one
    pub fn initial_response(self, credentials: &Credentials) -> Option<String> {
        match self {
            Mechanism::Plain => Some(encode(&format!(
                "\u{0}{}\u{0}{}",
                credentials.authentication_identity, credentials.secret
            ))),
            Mechanism::Login => None,
        }
    }
}

/// Base64 encoding used on the wire by every mechanism
pub(crate) fn encode(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{encode, Credentials, Mechanism};

    #[test]
    fn test_plain() {
        let mechanism = Mechanism::Plain;

        let credentials = Credentials::new("user".to_owned(), "password".to_owned());

        assert_eq!(
            mechanism.initial_response(&credentials).unwrap(),
            "AHVzZXIAcGFzc3dvcmQ="
        );
    }

    #[test]
    fn test_login() {
        let credentials = Credentials::new("alice".to_owned(), "wonderland".to_owned());

        assert!(!Mechanism::Login.supports_initial_response());
        assert_eq!(Mechanism::Login.initial_response(&credentials), None);
        assert_eq!(encode(credentials.identity()), "YWxpY2U=");
        assert_eq!(encode(credentials.secret()), "d29uZGVybGFuZA==");
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let credentials = Credentials::from(("alice", "wonderland"));
        assert_eq!(format!("{credentials:?}"), "Credentials");
    }

    #[test]
    fn test_from_user_pass_for_credentials() {
        assert_eq!(
            Credentials::new("alice".to_owned(), "wonderland".to_owned()),
            Credentials::from(("alice", "wonderland"))
        );
    }
}
