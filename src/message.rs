//! The campaign message and its wire format
//!
//! A campaign carries a subject and an opaque HTML body. For every recipient
//! the pair is turned into a complete RFC 5322 message:
//!
//! ```text
//! From: news@example.com
//! To: reader@example.org
//! Subject: Monthly news
//! Date: Tue, 15 Nov 1994 08:12:31 -0000
//! Message-ID: <8d3c5e9a-...@mail.example.com>
//! MIME-Version: 1.0
//! Content-Type: text/html; charset=UTF-8
//!
//! <p>Hello</p>
//! ```
//!
//! Line endings of the body are normalized to CRLF. Dot-stuffing is left to
//! the SMTP client.
//!
//! A non-ASCII subject is sent as RFC 2047 encoded words, folded so that no
//! header line gets longer than 76 characters. Body lines are not wrapped:
//! RFC 5321 limits a line to 998 octets before the CRLF, and servers may
//! refuse a message with a longer line.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD, Engine};
use httpdate::HttpDate;
use uuid::Uuid;

const DEFAULT_MESSAGE_ID_DOMAIN: &str = "localhost";
/// Input bytes per encoded word, keeps every `Subject` line within 76 characters
const ENCODED_WORD_INPUT: usize = 39;

/// Subject and body of a campaign
///
/// The body is sent line by line as written, each line should stay within
/// 998 octets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    subject: String,
    body: String,
}

impl Message {
    /// Creates a message from a subject and an HTML body
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Message {
        Message {
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// The subject line, as written by the campaign author
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The HTML body
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Renders the message for `to`, dated now and with a fresh `Message-ID`
    pub fn formatted(&self, from: &str, to: &str) -> Vec<u8> {
        self.formatted_with(from, to, SystemTime::now(), &message_id())
    }

    /// Renders the message with a fixed date and `Message-ID`
    pub fn formatted_with(
        &self,
        from: &str,
        to: &str,
        date: SystemTime,
        message_id: &str,
    ) -> Vec<u8> {
        let mut out = String::with_capacity(self.body.len() + 256);

        push_header(&mut out, "From", &unfolded(from));
        push_header(&mut out, "To", &unfolded(to));
        push_header(&mut out, "Subject", &encode_header(&unfolded(&self.subject)));
        push_header(&mut out, "Date", &format_date(date));
        push_header(&mut out, "Message-ID", &unfolded(message_id));
        push_header(&mut out, "MIME-Version", "1.0");
        push_header(&mut out, "Content-Type", "text/html; charset=UTF-8");
        out.push_str("\r\n");

        let mut lines = self.body.split('\n').peekable();
        while let Some(line) = lines.next() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if lines.peek().is_none() && line.is_empty() {
                break;
            }
            out.push_str(line);
            out.push_str("\r\n");
        }

        out.into_bytes()
    }
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

/// A header value only spans lines where it is folded on purpose
fn unfolded(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

// https://tools.ietf.org/html/rfc2047
fn encode_header(s: &str) -> String {
    if s.is_ascii() {
        return s.into();
    }

    let mut words = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let mut end = rest.len().min(ENCODED_WORD_INPUT);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (chunk, tail) = rest.split_at(end);
        words.push(format!("=?utf-8?b?{}?=", STANDARD.encode(chunk)));
        rest = tail;
    }
    words.join("\r\n ")
}

fn format_date(date: SystemTime) -> String {
    let mut s = HttpDate::from(date).to_string();
    if s.ends_with(" GMT") {
        // The httpdate crate always appends ` GMT` to the end of the string,
        // but this is considered an obsolete date format for email
        // https://tools.ietf.org/html/rfc2822#appendix-A.6.2,
        // so we replace `GMT` with `-0000`
        s.truncate(s.len() - "GMT".len());
        s.push_str("-0000");
    }
    s
}

// https://tools.ietf.org/html/rfc5322#section-3.6.4
fn message_id() -> String {
    let hostname = hostname::get()
        .map_err(|_| ())
        .and_then(|s| s.into_string().map_err(|_| ()))
        .unwrap_or_else(|_| DEFAULT_MESSAGE_ID_DOMAIN.to_owned());
    format!("<{}@{}>", Uuid::new_v4(), hostname)
}
