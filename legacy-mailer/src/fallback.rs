use std::{
    io,
    path::{Path, PathBuf},
    process::ExitStatus,
};

use futures::AsyncWriteExt;
use smol::process::{Command, Stdio};
use tracing::{debug, info};

use crate::message::OutboundMessage;

#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("spawning ‘{}’", .command.display())]
    Spawn {
        command: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("writing the message to the sendmail command")]
    Write(#[source] io::Error),

    #[error("waiting for the sendmail command")]
    Wait(#[source] io::Error),

    #[error("sendmail command failed with {0}")]
    Exit(ExitStatus),
}

/// Local submission through a sendmail-compatible command, used when the
/// relay could not be reached.
#[derive(Clone, Debug)]
pub struct Sendmail {
    command: PathBuf,
}

impl Sendmail {
    pub fn new<P: Into<PathBuf>>(command: P) -> Sendmail {
        Sendmail {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &Path {
        &self.command
    }

    /// Runs `<command> -i -f <from> <to>` with `data` on its standard input.
    /// Succeeds iff the command exits with status 0.
    pub async fn submit(&self, from: &str, to: &str, data: &[u8]) -> Result<(), FallbackError> {
        debug!(command = %self.command.display(), %from, %to, "Spawning sendmail");
        let mut child = Command::new(&self.command)
            .arg("-i")
            .arg("-f")
            .arg(from)
            .arg(to)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| FallbackError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(data).await.map_err(FallbackError::Write)?;
            stdin.close().await.map_err(FallbackError::Write)?;
        }

        let status = child.status().await.map_err(FallbackError::Wait)?;
        if !status.success() {
            return Err(FallbackError::Exit(status));
        }
        info!(%to, "Message handed to sendmail");
        Ok(())
    }

    pub async fn send(&self, msg: &OutboundMessage) -> Result<(), FallbackError> {
        let data = msg.to_plain(chrono::Local::now().into());
        self.submit(&msg.from_address, &msg.to, &data).await
    }
}
