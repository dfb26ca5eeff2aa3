//! SMTP client
//!
//! `SmtpConnection` drives a single SMTP conversation over a `NetworkStream`,
//! checking the reply code of every step against the class the step expects.

mod connection;
mod net;
mod tls;

pub use self::{
    connection::SmtpConnection,
    net::{AsyncTokioStream, NetworkStream},
    tls::TlsParameters,
};

/// The codec used for transparency
///
/// Every line of the payload starting with a `.` gets an extra `.` in front of
/// it, including the very first line.
#[derive(Clone, Copy, Debug)]
pub struct ClientCodec {
    status: CodecStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CodecStatus {
    /// Somewhere inside a line
    Inside,
    /// Just after a `\r`
    CarriageReturn,
    /// At the beginning of a line
    LineStart,
}

impl Default for ClientCodec {
    fn default() -> Self {
        ClientCodec {
            status: CodecStatus::LineStart,
        }
    }
}

impl ClientCodec {
    /// Creates a new client codec
    pub fn new() -> Self {
        ClientCodec::default()
    }

    /// Adds transparency
    pub fn encode(&mut self, frame: &[u8], buf: &mut Vec<u8>) {
        let mut start = 0;
        for (idx, &byte) in frame.iter().enumerate() {
            if self.status == CodecStatus::LineStart && byte == b'.' {
                buf.extend_from_slice(&frame[start..idx]);
                buf.push(b'.');
                start = idx;
            }
            self.status = match (self.status, byte) {
                (_, b'\r') => CodecStatus::CarriageReturn,
                (CodecStatus::CarriageReturn, b'\n') => CodecStatus::LineStart,
                _ => CodecStatus::Inside,
            };
        }
        buf.extend_from_slice(&frame[start..]);
    }

    /// Writes the end-of-data marker, closing the current line first if needed
    pub fn finish(&mut self, buf: &mut Vec<u8>) {
        if self.status != CodecStatus::LineStart {
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b".\r\n");
        self.status = CodecStatus::LineStart;
    }
}

/// Returns the string replacing all the CRLF with "\<CRLF\>"
///
/// Used for debug displays
pub(super) fn escape_crlf(string: &str) -> String {
    string.replace("\r\n", "<CRLF>")
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_codec() {
        let mut codec = ClientCodec::new();
        let mut buf: Vec<u8> = vec![];

        codec.encode(b".\r\n", &mut buf);
        codec.encode(b"test\r\n", &mut buf);
        codec.encode(b"\r\ntest", &mut buf);
        codec.encode(b"te\r\n.\r\nst", &mut buf);
        codec.encode(b"test", &mut buf);
        codec.encode(b"test.", &mut buf);
        codec.encode(b"test\r", &mut buf);
        codec.encode(b"\n.test\r\n", &mut buf);
        codec.encode(b"..", &mut buf);
        codec.finish(&mut buf);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "..\r\ntest\r\n\r\ntestte\r\n..\r\nsttesttest.test\r\n..test\r\n...\r\n.\r\n"
        );
    }

    #[test]
    fn test_codec_finish_after_line_end() {
        let mut codec = ClientCodec::new();
        let mut buf: Vec<u8> = vec![];

        codec.encode(b"hello\r\n", &mut buf);
        codec.finish(&mut buf);
        assert_eq!(buf, b"hello\r\n.\r\n");
    }

    #[test]
    fn test_escape_crlf() {
        assert_eq!(escape_crlf("\r\n"), "<CRLF>");
        assert_eq!(escape_crlf("EHLO my_name\r\n"), "EHLO my_name<CRLF>");
        assert_eq!(
            escape_crlf("EHLO my_name\r\nSIZE 42\r\n"),
            "EHLO my_name<CRLF>SIZE 42<CRLF>"
        );
    }
}
