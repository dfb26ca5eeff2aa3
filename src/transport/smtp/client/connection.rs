use std::{fmt::Display, future::Future, io, time::Duration};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{escape_crlf, AsyncTokioStream, ClientCodec, NetworkStream, TlsParameters};
use crate::transport::smtp::{
    authentication::{Credentials, Mechanism},
    commands::{Auth, AuthResponse, Data, Ehlo, Mail, Quit, Rcpt, Starttls},
    error::{self, Error},
    extension::{ClientId, Extension, MailBodyParameter, MailParameter, ServerInfo},
    response::{parse_response, Response, Severity},
    SessionState,
};

/// Structure that implements the SMTP client
pub struct SmtpConnection {
    /// Stream between client and server
    stream: BufReader<NetworkStream>,
    /// Deadline applied to every read and write
    timeout: Option<Duration>,
    /// Where the conversation stands
    state: SessionState,
    /// Whether the stream can still carry a command
    broken: bool,
    /// Information about the server
    server_info: ServerInfo,
}

impl SmtpConnection {
    /// Wraps an opened network stream, nothing is exchanged yet
    pub fn new(stream: NetworkStream, timeout: Option<Duration>) -> SmtpConnection {
        SmtpConnection {
            stream: BufReader::new(stream),
            timeout,
            state: SessionState::Connected,
            broken: false,
            server_info: ServerInfo::default(),
        }
    }

    /// Connects to the server, using implicit TLS when `tls_parameters` is `Some`
    pub async fn connect(
        hostname: &str,
        port: u16,
        timeout: Option<Duration>,
        tls_parameters: Option<TlsParameters>,
    ) -> Result<SmtpConnection, Error> {
        let stream = NetworkStream::connect(hostname, port, timeout, tls_parameters).await?;
        Ok(Self::new(stream, timeout))
    }

    /// Runs the conversation over an existing stream
    pub fn with_transport(
        stream: Box<dyn AsyncTokioStream>,
        timeout: Option<Duration>,
    ) -> SmtpConnection {
        Self::new(NetworkStream::use_existing(stream), timeout)
    }

    /// Get information about the server
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// The last state reached by the conversation
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Tells if the underlying stream is currently encrypted
    pub fn is_encrypted(&self) -> bool {
        self.stream.get_ref().is_encrypted()
    }

    /// Reads the server greeting
    pub async fn greeting(&mut self) -> Result<Response, Error> {
        let response = self.expect(Severity::PositiveCompletion).await?;
        self.state = SessionState::Greeted;
        Ok(response)
    }

    /// Send EHLO and update server info
    pub async fn ehlo(&mut self, hello_name: &ClientId) -> Result<(), Error> {
        let ehlo_response = self
            .command(Ehlo::new(hello_name.clone()), Severity::PositiveCompletion)
            .await?;
        self.server_info = ServerInfo::from_response(&ehlo_response).map_err(|e| self.fail(e))?;
        if self.state == SessionState::Greeted {
            self.state = SessionState::EhloAcknowledged;
        }

        tracing::debug!("server {}", self.server_info);
        Ok(())
    }

    /// Upgrade the connection using `STARTTLS`, then greet the server again
    ///
    /// The server must advertise the extension, the conversation never goes
    /// on in cleartext when the upgrade was asked for.
    pub async fn starttls(
        &mut self,
        tls_parameters: TlsParameters,
        hello_name: &ClientId,
    ) -> Result<(), Error> {
        if !self.server_info.supports_feature(Extension::StartTls) {
            return Err(self.fail(error::client("STARTTLS is not supported on this server")));
        }

        self.command(Starttls, Severity::PositiveCompletion).await?;
        // anything already buffered arrived in cleartext
        if !self.stream.buffer().is_empty() {
            self.broken = true;
            return Err(self.fail(error::client("unexpected data before the TLS handshake")));
        }
        self.state = SessionState::TlsNegotiating;

        let upgrade = self.stream.get_mut().upgrade_tls(tls_parameters).await;
        if let Err(err) = upgrade {
            self.broken = true;
            return Err(self.fail(err));
        }
        self.state = SessionState::TlsEstablished;
        tracing::debug!("connection encrypted");

        self.ehlo(hello_name).await
    }

    /// Authenticates with the given mechanism
    ///
    /// The server must advertise the mechanism in its `EHLO` reply. `LOGIN`
    /// sends the identity and the secret as two separate lines, each one
    /// answering a `334` challenge.
    pub async fn auth(
        &mut self,
        mechanism: Mechanism,
        credentials: &Credentials,
    ) -> Result<Response, Error> {
        if !self.server_info.supports_auth_mechanism(mechanism) {
            return Err(self.fail(error::client(format!(
                "AUTH {mechanism} is not supported on this server"
            ))));
        }

        let response = match mechanism {
            Mechanism::Plain => {
                self.redacted(Auth::new(mechanism, credentials), Severity::PositiveCompletion)
                    .await?
            }
            Mechanism::Login => {
                self.command(Auth::new(mechanism, credentials), Severity::PositiveIntermediate)
                    .await?;
                self.redacted(
                    AuthResponse::new(credentials.identity()),
                    Severity::PositiveIntermediate,
                )
                .await?;
                self.redacted(
                    AuthResponse::new(credentials.secret()),
                    Severity::PositiveCompletion,
                )
                .await?
            }
        };
        self.state = SessionState::Authenticated;
        Ok(response)
    }

    /// Sends one message to one recipient: `MAIL`, `RCPT`, `DATA` and the
    /// payload
    pub async fn send(
        &mut self,
        sender: &str,
        recipient: &str,
        email: &[u8],
    ) -> Result<Response, Error> {
        check_address(sender).map_err(|e| self.fail(e))?;
        check_address(recipient).map_err(|e| self.fail(e))?;

        let mut mail_options = vec![];

        // 8BITMIME: https://tools.ietf.org/html/rfc6152
        if !email.is_ascii() && self.server_info.supports_feature(Extension::EightBitMime) {
            mail_options.push(MailParameter::Body(MailBodyParameter::EightBitMime));
        }

        self.command(Mail::new(sender, mail_options), Severity::PositiveCompletion)
            .await?;
        self.state = SessionState::SenderAccepted;

        self.command(Rcpt::new(recipient), Severity::PositiveCompletion)
            .await?;
        self.state = SessionState::RecipientAccepted;

        self.command(Data, Severity::PositiveIntermediate).await?;
        self.state = SessionState::DataAccepted;

        let response = self.message(email).await?;
        self.state = SessionState::MessageSent;
        Ok(response)
    }

    /// Sends the message content, dot-stuffed and followed by the end-of-data line
    pub async fn message(&mut self, message: &[u8]) -> Result<Response, Error> {
        let mut out_buf: Vec<u8> = Vec::with_capacity(message.len() + 5);
        let mut codec = ClientCodec::new();
        codec.encode(message, &mut out_buf);
        codec.finish(&mut out_buf);

        self.write(&out_buf).await?;
        tracing::debug!("Wrote message body ({} bytes)", out_buf.len());
        self.expect(Severity::PositiveCompletion).await
    }

    /// Sends `QUIT`, whatever the state of the conversation
    pub async fn quit(&mut self) -> Result<Response, Error> {
        self.command(Quit, Severity::PositiveCompletion).await
    }

    /// Ends the conversation on any path: attempts `QUIT` while the stream
    /// is usable, ignores its outcome, then shuts the stream down
    pub async fn close(&mut self) {
        if !self.broken {
            let state = self.state;
            if let Err(err) = self.quit().await {
                tracing::debug!("QUIT failed: {err}");
            }
            self.state = state;
        }

        if let Err(err) = self.stream.get_mut().shutdown().await {
            tracing::debug!("shutdown failed: {err}");
        }
        self.broken = true;
        self.state = SessionState::Closed;
    }

    /// Sends an SMTP command and checks the reply class
    pub async fn command<C: Display>(
        &mut self,
        command: C,
        expected: Severity,
    ) -> Result<Response, Error> {
        let line = command.to_string();
        self.write(line.as_bytes()).await?;
        tracing::debug!("Wrote: {}", escape_crlf(&line));
        self.expect(expected).await
    }

    /// Same as `command`, but the line carries credentials and is never logged
    async fn redacted<C: Display>(
        &mut self,
        command: C,
        expected: Severity,
    ) -> Result<Response, Error> {
        self.write(command.to_string().as_bytes()).await?;
        tracing::debug!("Wrote: <redacted><CRLF>");
        self.expect(expected).await
    }

    /// Reads a reply and fails unless its first digit is the expected one
    async fn expect(&mut self, expected: Severity) -> Result<Response, Error> {
        let response = self.read_response().await?;
        if response.has_severity(expected) {
            Ok(response)
        } else {
            Err(self.fail(error::code(response.code(), Some(response.text()))))
        }
    }

    /// Writes a string to the server
    async fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let timeout = self.timeout;
        let stream = self.stream.get_mut();
        let written = with_timeout(timeout, async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await;

        written.map_err(|e| {
            self.broken = true;
            self.fail(error::network(e))
        })
    }

    /// Gets the SMTP response
    pub async fn read_response(&mut self) -> Result<Response, Error> {
        let mut buffer = String::with_capacity(100);

        loop {
            let timeout = self.timeout;
            let stream = &mut self.stream;
            let read = with_timeout(timeout, stream.read_line(&mut buffer)).await;

            match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    self.broken = true;
                    return Err(self.fail(error::network(err)));
                }
            }

            tracing::debug!("<< {}", escape_crlf(&buffer));
            match parse_response(&buffer) {
                Ok((_remaining, response)) => return Ok(response),
                Err(nom::Err::Incomplete(_)) => { /* read more */ }
                Err(nom::Err::Failure(e)) | Err(nom::Err::Error(e)) => {
                    self.broken = true;
                    return Err(self.fail(error::response(e.to_string())));
                }
            }
        }

        self.broken = true;
        Err(self.fail(error::response("incomplete response")))
    }

    fn fail(&self, err: Error) -> Error {
        err.at(self.state)
    }
}

/// Envelope addresses are written as is inside `<>`
fn check_address(address: &str) -> Result<(), Error> {
    if address
        .chars()
        .any(|c| c.is_control() || c == '<' || c == '>')
    {
        return Err(error::client(format!("invalid envelope address {address:?}")));
    }
    Ok(())
}

async fn with_timeout<T, F>(timeout: Option<Duration>, future: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, future)
            .await
            .unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no reply from the server in time",
                ))
            }),
        None => future.await,
    }
}
