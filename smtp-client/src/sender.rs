use std::{mem, sync::Arc};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::{io::BufReader, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use smtp_message::{Command, EscapingDataWriter, Reply, ReplyCode, ReplyLine};

use crate::{
    into_dyn_read_write, with_timeout, Config, Credentials, DynAsyncReadWrite, Step,
    TransportError,
};

// RFC 5321 allows 512 bytes per reply line; leave room for sloppy relays
const MAX_REPLY_LINE_LEN: u64 = 4096;

/// Where a session stands. `Completed` and `Aborted` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Greeted,
    EhloSent,
    TlsNegotiating,
    SecureEhloSent,
    Authenticating,
    MailFrom,
    RcptTo,
    DataHeader,
    DataBody,
    Completed,
    Aborted,
}

impl SessionState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

/// Reads one reply, following continuation lines until the one whose code is
/// followed by a space.
pub(crate) async fn read_reply<R>(io: &mut R, step: Step) -> Result<Reply, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let mut buf = Vec::new();
        let n = (&mut *io)
            .take(MAX_REPLY_LINE_LEN)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|source| TransportError::Io { step, source })?;
        if n == 0 {
            return Err(TransportError::ConnectionClosed { step });
        }
        let line = match ReplyLine::<&str>::parse(&buf) {
            Ok((rest, line)) if rest.is_empty() => line,
            _ => {
                return Err(TransportError::Syntax {
                    step,
                    line: String::from_utf8_lossy(&buf).into_owned(),
                })
            }
        };
        trace!(%step, "S: {}{}{}", line.code, if line.last { ' ' } else { '-' }, line.text);
        let last = line.last;
        lines.push(ReplyLine {
            code: line.code,
            last,
            text: line.text.to_owned(),
        });
        if last {
            break;
        }
    }
    // Only the line that ended the loop is marked as last
    Reply::from_lines(lines).ok_or(TransportError::ConnectionClosed { step })
}

fn detached_io() -> DynAsyncReadWrite {
    into_dyn_read_write(futures::io::Cursor::new(Vec::new()))
}

/// One single-use session with a relay. Built by `Client::connect`, which
/// leaves it encrypted and ready to authenticate.
///
/// Any unexpected reply closes the connection and moves the session to
/// `Aborted`; it then refuses to do anything else.
pub struct Sender<Cfg> {
    io: BufReader<DynAsyncReadWrite>,
    host: String,
    cfg: Arc<Cfg>,
    state: SessionState,
    extensions: Vec<String>,
}

impl<Cfg> Sender<Cfg>
where
    Cfg: Config,
{
    pub(crate) fn new(io: BufReader<DynAsyncReadWrite>, host: String, cfg: Arc<Cfg>) -> Self {
        Sender {
            io,
            host,
            cfg,
            state: SessionState::Connecting,
            extensions: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Capabilities the relay advertised after `STARTTLS`
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn transition(&mut self, state: SessionState) {
        debug!(from = ?self.state, to = ?state, "SMTP session state change");
        self.state = state;
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.state.is_terminal() {
            return Err(TransportError::SessionClosed(self.state));
        }
        Ok(())
    }

    async fn send_command(&mut self, step: Step, cmd: Command<&str>) -> Result<(), TransportError> {
        trace!(%step, "C: {}", cmd);
        let bytes = cmd
            .as_io_slices()
            .flat_map(|s| s.to_vec())
            .collect::<Vec<u8>>();
        let io = &mut self.io;
        let written = with_timeout(self.cfg.command_write_timeout(), async move {
            io.write_all(&bytes).await?;
            io.flush().await
        })
        .await;
        match written {
            None => Err(TransportError::Timeout { step }),
            Some(Err(source)) => Err(TransportError::Io { step, source }),
            Some(Ok(())) => Ok(()),
        }
    }

    async fn expect(
        &mut self,
        step: Step,
        expected: ReplyCode,
        timeout: chrono::Duration,
    ) -> Result<Reply, TransportError> {
        let reply = with_timeout(timeout, read_reply(&mut self.io, step))
            .await
            .ok_or(TransportError::Timeout { step })??;
        if reply.code != expected {
            return Err(TransportError::UnexpectedReply {
                step,
                expected,
                reply,
            });
        }
        debug!(%step, %reply, "Relay accepted");
        Ok(reply)
    }

    /// Logs the failure, closes the connection and marks the session as
    /// aborted. No further command is sent.
    async fn abort(&mut self, err: TransportError) -> TransportError {
        match err.reply() {
            Some(reply) => warn!(step = ?err.step(), %reply, error = %err, "Aborting SMTP session"),
            None => warn!(step = ?err.step(), error = %err, "Aborting SMTP session"),
        }
        self.transition(SessionState::Aborted);
        let _ = with_timeout(self.cfg.command_write_timeout(), self.io.close()).await;
        err
    }

    /// Sends `QUIT` without waiting for the reply, then closes the connection.
    async fn quit(&mut self) {
        if let Err(e) = self.send_command(Step::Quit, Command::Quit).await {
            debug!(error = %e, "Failed sending QUIT");
        }
        let _ = with_timeout(self.cfg.command_write_timeout(), self.io.close()).await;
    }

    pub(crate) async fn handshake(&mut self) -> Result<(), TransportError> {
        match self.do_handshake().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.abort(e).await),
        }
    }

    async fn do_handshake(&mut self) -> Result<(), TransportError> {
        let cfg = self.cfg.clone();

        self.expect(
            Step::Greeting,
            ReplyCode::SERVICE_READY,
            cfg.banner_read_timeout(),
        )
        .await?;
        self.transition(SessionState::Greeted);

        let hostname = cfg.ehlo_hostname();
        self.send_command(Step::Ehlo, Command::Ehlo { hostname })
            .await?;
        self.transition(SessionState::EhloSent);
        self.expect(Step::Ehlo, ReplyCode::OKAY, cfg.ehlo_reply_timeout())
            .await?;

        self.send_command(Step::Starttls, Command::Starttls).await?;
        self.expect(
            Step::Starttls,
            ReplyCode::SERVICE_READY,
            cfg.starttls_reply_timeout(),
        )
        .await?;
        self.transition(SessionState::TlsNegotiating);

        // Anything already buffered was sent in plaintext, and would be
        // mistaken for a reply received over TLS
        if !self.io.buffer().is_empty() {
            return Err(TransportError::PipelinedBeforeTls);
        }
        let plain = mem::replace(&mut self.io, BufReader::new(detached_io())).into_inner();
        let secure = with_timeout(
            cfg.tls_handshake_timeout(),
            cfg.tls_connect(&self.host, plain),
        )
        .await
        .ok_or(TransportError::Timeout {
            step: Step::TlsHandshake,
        })?
        .map_err(TransportError::Tls)?;
        self.io = BufReader::new(secure);

        self.send_command(Step::SecureEhlo, Command::Ehlo { hostname })
            .await?;
        let reply = self
            .expect(Step::SecureEhlo, ReplyCode::OKAY, cfg.ehlo_reply_timeout())
            .await?;
        self.extensions = reply.text.into_iter().skip(1).collect();
        self.transition(SessionState::SecureEhloSent);
        Ok(())
    }

    /// `AUTH LOGIN` with base64-encoded username and password. A rejection
    /// at any of the three exchanges is fatal.
    pub async fn authenticate(&mut self, creds: &Credentials) -> Result<(), TransportError> {
        self.check_open()?;
        match self.do_authenticate(creds).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.abort(e).await),
        }
    }

    async fn do_authenticate(&mut self, creds: &Credentials) -> Result<(), TransportError> {
        let timeout = self.cfg.auth_reply_timeout();
        self.transition(SessionState::Authenticating);

        self.send_command(Step::AuthLogin, Command::AuthLogin)
            .await?;
        self.expect(Step::AuthLogin, ReplyCode::AUTH_CHALLENGE, timeout)
            .await?;

        let username = BASE64.encode(creds.username());
        self.send_command(Step::AuthUsername, Command::AuthResponse {
            encoded: &username,
        })
        .await?;
        self.expect(Step::AuthUsername, ReplyCode::AUTH_CHALLENGE, timeout)
            .await?;

        let password = BASE64.encode(creds.password());
        self.send_command(Step::AuthPassword, Command::AuthResponse {
            encoded: &password,
        })
        .await?;
        self.expect(Step::AuthPassword, ReplyCode::AUTH_SUCCEEDED, timeout)
            .await?;

        info!(username = %creds.username(), "Authenticated with relay");
        Ok(())
    }

    /// Sends one mail, then ends the session.
    ///
    /// `data` is the full message (headers, blank line, body) with CRLF line
    /// endings; it is dot-escaped on the wire. Once the message has been
    /// transferred, `QUIT` is sent whatever the final reply was. A failure
    /// at any earlier point closes the connection without `QUIT`.
    pub async fn send(&mut self, from: &str, to: &str, data: &[u8]) -> Result<(), TransportError> {
        self.check_open()?;
        match self.do_send(from, to, data).await {
            Ok(()) => {
                self.quit().await;
                self.transition(SessionState::Completed);
                info!(%to, "Relay accepted the message");
                Ok(())
            }
            Err(e) if e.step() == Some(Step::DataEnd) => {
                warn!(error = %e, "Relay did not accept the message");
                self.quit().await;
                self.transition(SessionState::Aborted);
                Err(e)
            }
            Err(e) => Err(self.abort(e).await),
        }
    }

    async fn do_send(&mut self, from: &str, to: &str, data: &[u8]) -> Result<(), TransportError> {
        let cfg = self.cfg.clone();

        self.transition(SessionState::MailFrom);
        self.send_command(Step::MailFrom, Command::Mail { from })
            .await?;
        self.expect(Step::MailFrom, ReplyCode::OKAY, cfg.mail_reply_timeout())
            .await?;

        self.transition(SessionState::RcptTo);
        self.send_command(Step::RcptTo, Command::Rcpt { to }).await?;
        self.expect(Step::RcptTo, ReplyCode::OKAY, cfg.rcpt_reply_timeout())
            .await?;

        self.transition(SessionState::DataHeader);
        self.send_command(Step::DataInit, Command::Data).await?;
        self.expect(
            Step::DataInit,
            ReplyCode::START_MAIL_INPUT,
            cfg.data_init_reply_timeout(),
        )
        .await?;

        self.transition(SessionState::DataBody);
        let io = &mut self.io;
        let written = with_timeout(cfg.data_block_write_timeout(), async move {
            let mut writer = EscapingDataWriter::new(&mut *io);
            writer.write_all(data).await?;
            writer.finish().await?;
            io.flush().await
        })
        .await;
        match written {
            None => {
                return Err(TransportError::Timeout {
                    step: Step::DataBody,
                })
            }
            Some(Err(source)) => {
                return Err(TransportError::Io {
                    step: Step::DataBody,
                    source,
                })
            }
            Some(Ok(())) => trace!(bytes = data.len(), "Message transferred"),
        }

        self.expect(Step::DataEnd, ReplyCode::OKAY, cfg.data_end_reply_timeout())
            .await?;
        Ok(())
    }
}
