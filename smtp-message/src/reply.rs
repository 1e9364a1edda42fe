use std::{convert::TryInto, fmt, str};

use lazy_static::lazy_static;
use nom::{
    branch::alt,
    bytes::streaming::tag,
    combinator::{map, map_res, peek, value},
    sequence::{terminated, tuple},
    IResult,
};
use regex_automata::{Regex, RegexBuilder};

use crate::misc::apply_regex;

lazy_static! {
    static ref REPLY_CODE: Regex = RegexBuilder::new()
        .anchored(true)
        .build(r#"[2-5][0-9][0-9]"#)
        .unwrap();
    static ref REPLY_TEXT: Regex = RegexBuilder::new()
        .anchored(true)
        .build(r#"[\t -~[:^ascii:]]*"#)
        .unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyCode(pub [u8; 3]);

#[rustfmt::skip]
impl ReplyCode {
    pub const SERVICE_READY: ReplyCode = ReplyCode(*b"220");
    pub const AUTH_SUCCEEDED: ReplyCode = ReplyCode(*b"235");
    pub const OKAY: ReplyCode = ReplyCode(*b"250");
    pub const AUTH_CHALLENGE: ReplyCode = ReplyCode(*b"334");
    pub const START_MAIL_INPUT: ReplyCode = ReplyCode(*b"354");
    pub const TRANSACTION_FAILED: ReplyCode = ReplyCode(*b"554");
}

impl ReplyCode {
    #[inline]
    pub fn parse(buf: &[u8]) -> IResult<&[u8], ReplyCode> {
        map(apply_regex(&REPLY_CODE), |b: &[u8]| {
            // The below unwrap is OK, as the regex already validated
            // that there are exactly 3 characters
            ReplyCode(b.try_into().unwrap())
        })(buf)
    }

    #[inline]
    pub fn code(&self) -> u16 {
        self.0[0] as u16 * 100 + self.0[1] as u16 * 10 + self.0[2] as u16 - b'0' as u16 * 111
    }
}

impl fmt::Display for ReplyCode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Parses the end of a reply line. Relays are supposed to send CRLF, but a
/// bare LF is accepted too.
fn line_end(buf: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((tag(b"\r\n"), tag(b"\n")))(buf)
}

/// One line of a (possibly multi-line) reply.
///
/// `last` is set iff the code is followed by a space (or directly by the end
/// of the line) rather than by a hyphen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyLine<S = String> {
    pub code: ReplyCode,
    pub last: bool,
    pub text: S,
}

impl<S> ReplyLine<S> {
    pub fn parse<'a>(buf: &'a [u8]) -> IResult<&'a [u8], ReplyLine<S>>
    where
        S: From<&'a str>,
    {
        map(
            tuple((
                ReplyCode::parse,
                alt((
                    value(false, tag(b"-")),
                    value(true, tag(b" ")),
                    value(true, peek(line_end)),
                )),
                map_res(terminated(apply_regex(&REPLY_TEXT), line_end), str::from_utf8),
            )),
            |(code, last, text)| ReplyLine {
                code,
                last,
                text: text.into(),
            },
        )(buf)
    }
}

/// A complete reply: the code of its final line, and the text of all its
/// lines in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reply<S = String> {
    pub code: ReplyCode,
    pub text: Vec<S>,
}

impl<S> Reply<S> {
    /// Assembles a reply from lines already read off the wire. Returns `None`
    /// unless exactly the last line is marked as such.
    pub fn from_lines(lines: Vec<ReplyLine<S>>) -> Option<Reply<S>> {
        let (last, beg) = lines.split_last()?;
        if !last.last || beg.iter().any(|l| l.last) {
            return None;
        }
        let code = last.code;
        Some(Reply {
            code,
            text: lines.into_iter().map(|l| l.text).collect(),
        })
    }
}

impl<S> fmt::Display for Reply<S>
where
    S: AsRef<str>,
{
    /// Single-line rendering meant for logs: `250 first / second`
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        for (i, l) in self.text.iter().enumerate() {
            let sep = if i == 0 { " " } else { " / " };
            write!(f, "{}{}", sep, l.as_ref())?;
        }
        Ok(())
    }
}
