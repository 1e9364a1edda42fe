use std::sync::Arc;

use smtp_client::{Client, TransportError};
use tracing::{debug, error, info, warn};

use crate::{client_config::ClientConfig, config::Config, fallback::Sendmail, message::OutboundMessage};

/// Sends branded transactional mail through the configured relay.
///
/// Every call opens its own session; nothing is shared between calls, so a
/// `Mailer` can be used from concurrent tasks.
pub struct Mailer<Cfg = ClientConfig> {
    cfg: Config,
    client: Client<Cfg>,
    fallback: Option<Sendmail>,
}

impl Mailer<ClientConfig> {
    pub fn new(cfg: Config) -> Mailer<ClientConfig> {
        let client_cfg = ClientConfig::new(&cfg.relay);
        Mailer::with_client_config(cfg, client_cfg)
    }
}

impl<Cfg> Mailer<Cfg>
where
    Cfg: smtp_client::Config,
{
    pub fn with_client_config(cfg: Config, client_cfg: Cfg) -> Mailer<Cfg> {
        let fallback = if cfg.fallback.enabled {
            Some(Sendmail::new(cfg.fallback.sendmail_command.clone()))
        } else {
            None
        };
        Mailer {
            client: Client::new(Arc::new(client_cfg)),
            cfg,
            fallback,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Delivers one mail to `to`. Returns whether it was accepted, either by
    /// the relay or by the local fallback when that is enabled.
    ///
    /// Never fails otherwise: the reason of a failure is logged, and it is up
    /// to the caller to decide whether a lost mail matters.
    pub async fn send_email(&self, to: &str, subject: &str, body: &str) -> bool {
        let msg = OutboundMessage::new(&self.cfg, to, subject, body);
        let err = match self.attempt(&msg).await {
            Ok(()) => return true,
            Err(e) => e,
        };
        warn!(
            %to,
            step = ?err.step(),
            kind = ?err.kind(),
            error = %err,
            "Direct SMTP delivery failed"
        );

        let sendmail = match &self.fallback {
            Some(sendmail) => sendmail,
            None => return false,
        };
        info!(%to, command = %sendmail.command().display(), "Falling back to local submission");
        match sendmail.send(&msg).await {
            Ok(()) => true,
            Err(e) => {
                error!(%to, error = ?anyhow::Error::new(e), "Local submission failed too");
                false
            }
        }
    }

    /// One direct session with the relay, from connection to `QUIT`.
    async fn attempt(&self, msg: &OutboundMessage) -> Result<(), TransportError> {
        let mut sender = self.client.connect(&self.cfg.destination()).await?;
        debug!(extensions = ?sender.extensions(), "Relay capabilities");
        sender.authenticate(&self.cfg.credentials()).await?;
        let data = msg.to_multipart(chrono::Local::now().into());
        sender.send(&msg.from_address, &msg.to, &data).await
    }
}
