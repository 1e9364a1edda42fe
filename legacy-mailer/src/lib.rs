mod client_config;
mod config;
mod fallback;
mod mailer;
mod message;
mod notify;

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

pub use client_config::ClientConfig;
pub use config::{
    AdminCfg, Config, ConfigError, CredentialsCfg, FallbackCfg, RelayCfg, SenderCfg, PASSWORD_ENV,
    USERNAME_ENV,
};
pub use fallback::{FallbackError, Sendmail};
pub use mailer::Mailer;
pub use message::{boundary_for, to_crlf, OutboundMessage};
pub use notify::{
    contact_alert, generate_code, login_code, resend_verification, signup_verification,
    ContactForm, Delivery, Notification, Notifier,
};

#[derive(structopt::StructOpt)]
#[structopt(
    name = "legacy-mailer",
    about = "Sends Legacy Donation notifications through an SMTP relay."
)]
pub struct Opt {
    /// Path to the TOML configuration file
    #[structopt(
        short,
        long,
        parse(from_os_str),
        default_value = "/etc/legacy-mailer/mailer.toml"
    )]
    pub config: PathBuf,

    #[structopt(subcommand)]
    pub cmd: Cmd,
}

#[derive(structopt::StructOpt)]
pub enum Cmd {
    /// Send one branded mail
    Send {
        to: String,
        subject: String,
        body: String,
    },

    /// Generate a signup verification code, mail it and print it
    Verify { to: String },
}

/// Runs one command. Returns whether the mail was delivered.
pub fn run(opt: &Opt) -> anyhow::Result<bool> {
    info!("Legacy mailer starting up");
    let cfg = Config::load(&opt.config)
        .with_context(|| format!("Loading configuration from ‘{}’", opt.config.display()))?;
    let notifier = Notifier::new(Mailer::new(cfg));

    smol::block_on(async {
        match &opt.cmd {
            Cmd::Send { to, subject, body } => {
                Ok(notifier.mailer().send_email(to, subject, body).await)
            }
            Cmd::Verify { to } => {
                let delivery = notifier.signup_verification(to).await;
                println!("{}", delivery.code);
                Ok(delivery.sent)
            }
        }
    })
}
