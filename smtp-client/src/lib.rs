use std::{fmt, io, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{io::BufReader, AsyncRead, AsyncReadExt, AsyncWrite, Future};
use smol::{future::FutureExt, net::TcpStream, Timer};
use tracing::info;

mod error;
mod sender;

pub use error::{ErrorKind, Step, TransportError};
pub use sender::{Sender, SessionState};

pub type DynAsyncReadWrite =
    duplexify::Duplex<Pin<Box<dyn Send + AsyncRead>>, Pin<Box<dyn Send + AsyncWrite>>>;

/// Type-erases a bidirectional stream so that the plaintext and the TLS
/// halves of a session have the same type.
pub fn into_dyn_read_write<IO>(io: IO) -> DynAsyncReadWrite
where
    IO: 'static + Send + AsyncRead + AsyncWrite,
{
    let (r, w) = io.split();
    duplexify::Duplex::new(
        Box::pin(r) as Pin<Box<dyn Send + AsyncRead>>,
        Box::pin(w) as Pin<Box<dyn Send + AsyncWrite>>,
    )
}

#[async_trait]
pub trait Config: Send + Sync {
    /// Identifier sent with `EHLO`
    fn ehlo_hostname(&self) -> &str;

    /// Upgrades the connection once the relay accepted `STARTTLS`. `sni` is
    /// the host name the session was opened to.
    async fn tls_connect<IO>(&self, sni: &str, io: IO) -> io::Result<DynAsyncReadWrite>
    where
        IO: 'static + Unpin + Send + AsyncRead + AsyncWrite;

    fn connect_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(30)
    }

    fn banner_read_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    fn command_write_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    fn ehlo_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    fn starttls_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(2)
    }

    fn tls_handshake_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(2)
    }

    fn auth_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(2)
    }

    fn mail_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    fn rcpt_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(5)
    }

    fn data_init_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(2)
    }

    fn data_block_write_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(3)
    }

    fn data_end_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(10)
    }
}

/// The relay a session is opened to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// `AUTH LOGIN` credentials. The password never shows up in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new<U, P>(username: U, password: P) -> Credentials
    where
        U: Into<String>,
        P: Into<String>,
    {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolves to `None` if `fut` did not complete within `dur`.
pub(crate) async fn with_timeout<F>(dur: chrono::Duration, fut: F) -> Option<F::Output>
where
    F: Future,
{
    let dur = dur.to_std().unwrap_or_else(|_| Duration::from_secs(0));
    async { Some(fut.await) }
        .or(async {
            Timer::after(dur).await;
            None
        })
        .await
}

pub struct Client<Cfg> {
    cfg: Arc<Cfg>,
}

impl<Cfg> Client<Cfg>
where
    Cfg: Config,
{
    pub fn new(cfg: Arc<Cfg>) -> Client<Cfg> {
        Client { cfg }
    }

    /// Opens a new session to `dest`, and brings it up to the point where it
    /// is encrypted and ready to authenticate: greeting, `EHLO`, `STARTTLS`,
    /// TLS handshake and `EHLO` again.
    ///
    /// Every call opens its own connection; sessions are never shared.
    pub async fn connect(&self, dest: &Destination) -> Result<Sender<Cfg>, TransportError> {
        info!(destination = %dest, "Connecting to relay");
        let connect_err = |source: io::Error| TransportError::Connect {
            destination: dest.to_string(),
            source,
        };
        let io = with_timeout(
            self.cfg.connect_timeout(),
            TcpStream::connect((dest.host.as_str(), dest.port)),
        )
        .await
        .ok_or_else(|| {
            connect_err(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out connecting to the relay",
            ))
        })?
        .map_err(connect_err)?;

        let io = BufReader::new(into_dyn_read_write(io));
        let mut sender = Sender::new(io, dest.host.clone(), self.cfg.clone());
        sender.handshake().await?;
        Ok(sender)
    }
}
