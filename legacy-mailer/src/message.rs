use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset};
use md5::{Digest, Md5};

use crate::config::Config;

const RULE: &str = "===================";

/// RFC 5322 date, with the day of month always on two digits
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// One mail as handed to the relay: envelope addresses plus the already
/// tagged subject and branded body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from_name: String,
    pub from_address: String,
    pub to: String,
    pub reply_to: String,
    pub subject: String,
    pub body: String,
}

impl OutboundMessage {
    pub fn new(cfg: &Config, to: &str, subject: &str, message: &str) -> OutboundMessage {
        let sender = &cfg.sender;
        let mut body = String::new();
        // Writing to a String cannot fail
        let _ = write!(
            body,
            "{name} Platform\n{rule}\n\n{message}\n\n{rule}\n{tag} - {tagline}\n\
             If you have questions, contact us at {reply_to}\nWebsite: {website}\n",
            name = sender.name,
            rule = RULE,
            message = message,
            tag = sender.subject_tag,
            tagline = sender.tagline,
            reply_to = sender.reply_to,
            website = sender.website,
        );
        OutboundMessage {
            from_name: header_value(&sender.name),
            from_address: header_value(cfg.sender_address()),
            to: header_value(to),
            reply_to: header_value(&sender.reply_to),
            subject: header_value(&format!("[{}] {}", sender.subject_tag, subject)),
            body,
        }
    }

    /// Renders the `DATA` payload: headers, blank line and a single
    /// `text/plain` part inside a `multipart/alternative` envelope.
    ///
    /// The body is not checked against the boundary. A body containing the
    /// boundary line is sent verbatim and will confuse MIME parsers.
    pub fn to_multipart(&self, date: DateTime<FixedOffset>) -> Vec<u8> {
        let boundary = boundary_for(date.timestamp());
        let mut res = String::new();
        let _ = write!(
            res,
            "MIME-Version: 1.0\n\
             Content-Type: multipart/alternative; boundary=\"{boundary}\"\n\
             From: {from_name} <{from_address}>\n\
             To: {to}\n\
             Subject: {subject}\n\
             Reply-To: {reply_to}\n\
             Date: {date}\n\
             \n\
             --{boundary}\n\
             Content-Type: text/plain; charset=UTF-8\n\
             Content-Transfer-Encoding: 8bit\n\
             \n\
             {body}\
             --{boundary}--\n",
            boundary = boundary,
            from_name = self.from_name,
            from_address = self.from_address,
            to = self.to,
            subject = self.subject,
            reply_to = self.reply_to,
            date = date.format(DATE_FORMAT),
            body = self.body,
        );
        to_crlf(&res)
    }

    /// Renders a plain `text/plain` message with local (LF) line endings,
    /// for handing to a sendmail-compatible command.
    pub fn to_plain(&self, date: DateTime<FixedOffset>) -> Vec<u8> {
        format!(
            "From: {} <{}>\nTo: {}\nSubject: {}\nReply-To: {}\nDate: {}\nMIME-Version: 1.0\n\
             Content-Type: text/plain; charset=UTF-8\nX-Mailer: {}/{}\n\n{}",
            self.from_name,
            self.from_address,
            self.to,
            self.subject,
            self.reply_to,
            date.format(DATE_FORMAT),
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            self.body.replace("\r\n", "\n"),
        )
        .into_bytes()
    }
}

/// Folds any line break out of a header field value, so that user-supplied
/// text can never start a header of its own.
fn header_value(s: &str) -> String {
    s.replace(|c| c == '\r' || c == '\n', " ")
}

/// MIME boundary for a message sent at `timestamp`: the hex MD5 of its
/// decimal representation. Two messages rendered within the same second
/// share a boundary.
pub fn boundary_for(timestamp: i64) -> String {
    format!("{:x}", Md5::digest(timestamp.to_string().as_bytes()))
}

/// Normalizes every line ending (LF, CRLF or lone CR) to CRLF.
pub fn to_crlf(s: &str) -> Vec<u8> {
    let mut res = Vec::with_capacity(s.len() + s.len() / 16);
    let mut bytes = s.bytes().peekable();
    while let Some(b) = bytes.next() {
        match b {
            b'\r' => {
                if bytes.peek() == Some(&b'\n') {
                    bytes.next();
                }
                res.extend_from_slice(b"\r\n");
            }
            b'\n' => res.extend_from_slice(b"\r\n"),
            b => res.push(b),
        }
    }
    res
}
