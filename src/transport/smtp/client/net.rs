use std::{
    io, mem,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{client::TlsStream, TlsConnector};

use super::TlsParameters;
use crate::transport::smtp::{error, Error};

/// A stream the SMTP client can run over in place of a TCP connection
pub trait AsyncTokioStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncTokioStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A network stream
pub struct NetworkStream {
    inner: InnerNetworkStream,
}

/// Represents the different types of underlying network streams
#[allow(clippy::large_enum_variant)]
enum InnerNetworkStream {
    /// Plain TCP stream
    Tcp(TcpStream),
    /// Encrypted TCP stream
    Tls(Box<TlsStream<TcpStream>>),
    /// Caller provided stream
    Existing(Box<dyn AsyncTokioStream>),
    /// Left behind by a failed upgrade, behaves as a closed stream
    None,
}

impl NetworkStream {
    fn new(inner: InnerNetworkStream) -> Self {
        if let InnerNetworkStream::None = inner {
            debug_assert!(false, "InnerNetworkStream::None must never be built");
        }

        NetworkStream { inner }
    }

    /// Wraps an already established stream
    pub fn use_existing(stream: Box<dyn AsyncTokioStream>) -> Self {
        NetworkStream::new(InnerNetworkStream::Existing(stream))
    }

    /// Opens a TCP connection, wrapping it in TLS right away when
    /// `tls_parameters` is `Some`
    pub async fn connect(
        hostname: &str,
        port: u16,
        timeout: Option<Duration>,
        tls_parameters: Option<TlsParameters>,
    ) -> Result<NetworkStream, Error> {
        let connect = TcpStream::connect((hostname, port));
        let tcp_stream = match timeout {
            Some(duration) => tokio::time::timeout(duration, connect)
                .await
                .map_err(|_| {
                    error::connection(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connection timed out",
                    ))
                })?,
            None => connect.await,
        }
        .map_err(error::connection)?;

        let mut stream = NetworkStream::new(InnerNetworkStream::Tcp(tcp_stream));
        if let Some(tls_parameters) = tls_parameters {
            stream.upgrade_tls(tls_parameters).await?;
        }
        Ok(stream)
    }

    /// Runs the TLS handshake over the current plain TCP stream
    pub async fn upgrade_tls(&mut self, tls_parameters: TlsParameters) -> Result<(), Error> {
        match mem::replace(&mut self.inner, InnerNetworkStream::None) {
            InnerNetworkStream::Tcp(tcp_stream) => {
                let connector = TlsConnector::from(tls_parameters.connector);
                let stream = connector
                    .connect(tls_parameters.server_name, tcp_stream)
                    .await
                    .map_err(error::tls)?;
                self.inner = InnerNetworkStream::Tls(Box::new(stream));
                Ok(())
            }
            other => {
                self.inner = other;
                Err(error::client("only a plain TCP stream can be upgraded"))
            }
        }
    }

    /// Tells if the stream is encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(self.inner, InnerNetworkStream::Tls(_))
    }
}

impl AsyncRead for NetworkStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.inner {
            InnerNetworkStream::Tcp(ref mut s) => Pin::new(s).poll_read(cx, buf),
            InnerNetworkStream::Tls(ref mut s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            InnerNetworkStream::Existing(ref mut s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            InnerNetworkStream::None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for NetworkStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.inner {
            InnerNetworkStream::Tcp(ref mut s) => Pin::new(s).poll_write(cx, buf),
            InnerNetworkStream::Tls(ref mut s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            InnerNetworkStream::Existing(ref mut s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            InnerNetworkStream::None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner {
            InnerNetworkStream::Tcp(ref mut s) => Pin::new(s).poll_flush(cx),
            InnerNetworkStream::Tls(ref mut s) => Pin::new(s.as_mut()).poll_flush(cx),
            InnerNetworkStream::Existing(ref mut s) => Pin::new(s.as_mut()).poll_flush(cx),
            InnerNetworkStream::None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner {
            InnerNetworkStream::Tcp(ref mut s) => Pin::new(s).poll_shutdown(cx),
            InnerNetworkStream::Tls(ref mut s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            InnerNetworkStream::Existing(ref mut s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            InnerNetworkStream::None => Poll::Ready(Ok(())),
        }
    }
}
