use std::{fmt, io::IoSlice, iter};

/// The client-side commands of a submission session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<S = String> {
    /// EHLO <hostname> <CRLF>
    Ehlo { hostname: S },

    /// STARTTLS <CRLF>
    Starttls,

    /// AUTH LOGIN <CRLF>
    AuthLogin,

    /// A base64-encoded answer to a `334` challenge
    AuthResponse { encoded: S },

    /// MAIL FROM:<from> <CRLF>
    Mail { from: S },

    /// RCPT TO:<to> <CRLF>
    Rcpt { to: S },

    /// DATA <CRLF>
    Data,

    /// QUIT <CRLF>
    Quit,
}

impl<S> Command<S>
where
    S: AsRef<str>,
{
    #[inline]
    pub fn as_io_slices(&self) -> impl Iterator<Item = IoSlice<'_>> {
        let (verb, arg, close): (&[u8], &[u8], &[u8]) = match self {
            Command::Ehlo { hostname } => (b"EHLO ", hostname.as_ref().as_bytes(), b""),
            Command::Starttls => (b"STARTTLS", b"", b""),
            Command::AuthLogin => (b"AUTH LOGIN", b"", b""),
            Command::AuthResponse { encoded } => (b"", encoded.as_ref().as_bytes(), b""),
            Command::Mail { from } => (b"MAIL FROM:<", from.as_ref().as_bytes(), b">"),
            Command::Rcpt { to } => (b"RCPT TO:<", to.as_ref().as_bytes(), b">"),
            Command::Data => (b"DATA", b"", b""),
            Command::Quit => (b"QUIT", b"", b""),
        };
        iter::once(verb)
            .chain(iter::once(arg))
            .chain(iter::once(close))
            .chain(iter::once(&b"\r\n"[..]))
            .filter(|s| !s.is_empty())
            .map(IoSlice::new)
    }
}

/// Renders the command as sent, minus the CRLF. Authentication responses are
/// never rendered, as they carry credentials.
impl<S> fmt::Display for Command<S>
where
    S: AsRef<str>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AuthResponse { .. } => write!(f, "<credentials redacted>"),
            cmd => {
                for s in cmd.as_io_slices() {
                    let s = String::from_utf8_lossy(&s);
                    write!(f, "{}", s.trim_end_matches("\r\n"))?;
                }
                Ok(())
            }
        }
    }
}
