use std::{fmt, io};

use smtp_message::{Reply, ReplyCode};

use crate::SessionState;

/// The named points at which a session can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Connect,
    Greeting,
    Ehlo,
    Starttls,
    TlsHandshake,
    SecureEhlo,
    AuthLogin,
    AuthUsername,
    AuthPassword,
    MailFrom,
    RcptTo,
    DataInit,
    DataBody,
    DataEnd,
    Quit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Connect => "connect",
            Step::Greeting => "greeting",
            Step::Ehlo => "EHLO",
            Step::Starttls => "STARTTLS",
            Step::TlsHandshake => "TLS handshake",
            Step::SecureEhlo => "EHLO after STARTTLS",
            Step::AuthLogin => "AUTH LOGIN",
            Step::AuthUsername => "AUTH LOGIN username",
            Step::AuthPassword => "AUTH LOGIN password",
            Step::MailFrom => "MAIL FROM",
            Step::RcptTo => "RCPT TO",
            Step::DataInit => "DATA",
            Step::DataBody => "message transfer",
            Step::DataEnd => "end of data",
            Step::Quit => "QUIT",
        })
    }
}

/// Coarse classification of a failed delivery attempt. Callers treat all of
/// them as "the mail was not delivered".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The socket could not be opened
    ConnectFailure,
    /// The relay answered something else than what the protocol step requires
    ProtocolFailure,
    /// The encryption upgrade was refused or failed
    TlsFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed connecting to relay {destination}")]
    Connect {
        destination: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out during {step}")]
    Timeout { step: Step },

    #[error("I/O error during {step}")]
    Io {
        step: Step,
        #[source]
        source: io::Error,
    },

    #[error("relay closed the connection during {step}")]
    ConnectionClosed { step: Step },

    #[error("relay sent a malformed reply during {step}: {line:?}")]
    Syntax { step: Step, line: String },

    #[error("{step} failed: expected {expected}, relay replied ‘{reply}’")]
    UnexpectedReply {
        step: Step,
        expected: ReplyCode,
        reply: Reply,
    },

    #[error("relay sent data before the TLS handshake")]
    PipelinedBeforeTls,

    #[error("TLS handshake with the relay failed")]
    Tls(#[source] io::Error),

    #[error("session is {0:?} and cannot be used anymore")]
    SessionClosed(SessionState),
}

impl TransportError {
    /// The step that failed. `None` for attempts to reuse a finished session,
    /// which never reach the wire.
    pub fn step(&self) -> Option<Step> {
        match self {
            TransportError::Connect { .. } => Some(Step::Connect),
            TransportError::Timeout { step }
            | TransportError::Io { step, .. }
            | TransportError::ConnectionClosed { step }
            | TransportError::Syntax { step, .. }
            | TransportError::UnexpectedReply { step, .. } => Some(*step),
            TransportError::PipelinedBeforeTls | TransportError::Tls(_) => {
                Some(Step::TlsHandshake)
            }
            TransportError::SessionClosed(_) => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Connect { .. } => ErrorKind::ConnectFailure,
            TransportError::PipelinedBeforeTls | TransportError::Tls(_) => ErrorKind::TlsFailure,
            _ => ErrorKind::ProtocolFailure,
        }
    }

    /// The reply that made the step fail, if the relay sent one
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            TransportError::UnexpectedReply { reply, .. } => Some(reply),
            _ => None,
        }
    }
}
