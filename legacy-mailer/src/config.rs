use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use smtp_client::{Credentials, Destination};
use tracing::debug;

pub const USERNAME_ENV: &str = "LEGACY_MAILER_SMTP_USERNAME";
pub const PASSWORD_ENV: &str = "LEGACY_MAILER_SMTP_PASSWORD";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading configuration file ‘{}’", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing configuration as toml")]
    Parse(#[from] toml::de::Error),

    #[error("no relay credentials configured: set [credentials] or LEGACY_MAILER_SMTP_USERNAME and LEGACY_MAILER_SMTP_PASSWORD")]
    MissingCredentials,

    #[error("relay port must not be 0")]
    InvalidPort,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub relay: RelayCfg,
    pub credentials: CredentialsCfg,
    pub sender: SenderCfg,
    pub fallback: FallbackCfg,
    pub admin: AdminCfg,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayCfg {
    pub host: String,
    pub port: u16,
    pub ehlo_hostname: String,
    /// Skips certificate verification during the TLS upgrade
    pub accept_invalid_certs: bool,
    pub connect_timeout_secs: u64,
    /// Bound on each reply and write once connected
    pub reply_timeout_secs: u64,
}

impl Default for RelayCfg {
    fn default() -> RelayCfg {
        RelayCfg {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            ehlo_hostname: "localhost".to_string(),
            accept_invalid_certs: false,
            connect_timeout_secs: 30,
            reply_timeout_secs: 300,
        }
    }
}

#[derive(Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsCfg {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for CredentialsCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsCfg")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SenderCfg {
    pub name: String,
    /// Envelope and `From` address; the relay username when unset
    pub address: Option<String>,
    pub reply_to: String,
    pub subject_tag: String,
    pub website: String,
    pub tagline: String,
}

impl Default for SenderCfg {
    fn default() -> SenderCfg {
        SenderCfg {
            name: "Legacy Donation".to_string(),
            address: None,
            reply_to: "support@legacy-donation.com".to_string(),
            subject_tag: "Legacy Donation".to_string(),
            website: "https://legacy-donation.com".to_string(),
            tagline: "Supporting families in times of need".to_string(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackCfg {
    pub enabled: bool,
    pub sendmail_command: PathBuf,
}

impl Default for FallbackCfg {
    fn default() -> FallbackCfg {
        FallbackCfg {
            enabled: false,
            sendmail_command: PathBuf::from("/usr/sbin/sendmail"),
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminCfg {
    /// Recipient of contact-form alerts; the sender address when unset
    pub address: Option<String>,
}

impl Config {
    /// Reads the file at `path`, then applies the environment overrides.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        debug!(path = %path.display(), "Reading configuration file");
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Config::from_toml(&contents)?;
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Credentials from the environment win over the file, so that the file
    /// can be committed without them.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(username) = lookup(USERNAME_ENV).filter(|u| !u.is_empty()) {
            debug!(%username, "Relay username taken from the environment");
            self.credentials.username = username;
        }
        if let Some(password) = lookup(PASSWORD_ENV).filter(|p| !p.is_empty()) {
            debug!("Relay password taken from the environment");
            self.credentials.password = password;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        if self.relay.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }

    pub fn destination(&self) -> Destination {
        Destination {
            host: self.relay.host.clone(),
            port: self.relay.port,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.credentials.username.clone(),
            self.credentials.password.clone(),
        )
    }

    pub fn sender_address(&self) -> &str {
        self.sender
            .address
            .as_deref()
            .unwrap_or(&self.credentials.username)
    }

    pub fn admin_address(&self) -> &str {
        self.admin
            .address
            .as_deref()
            .unwrap_or_else(|| self.sender_address())
    }
}
