use std::{io, pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, warn};

use smtp_client::DynAsyncReadWrite;

use crate::config::RelayCfg;

struct NoCertVerifier;

impl rustls::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _roots: &rustls::RootCertStore,
        _presented_certs: &[rustls::Certificate],
        _dns_name: webpki::DNSNameRef,
        _ocsp_response: &[u8],
    ) -> Result<rustls::ServerCertVerified, rustls::TLSError> {
        Ok(rustls::ServerCertVerified::assertion())
    }
}

/// Session parameters handed to `smtp_client`, built once from `[relay]`.
pub struct ClientConfig {
    connector: async_tls::TlsConnector,
    ehlo_hostname: String,
    connect_timeout: chrono::Duration,
    reply_timeout: chrono::Duration,
}

impl ClientConfig {
    pub fn new(relay: &RelayCfg) -> ClientConfig {
        debug!("Preparing the client TLS configuration");
        let mut tls_client_cfg = rustls::ClientConfig::with_ciphersuites(&rustls::ALL_CIPHERSUITES);
        tls_client_cfg
            .root_store
            .add_server_trust_anchors(&webpki_roots::TLS_SERVER_ROOTS);
        if relay.accept_invalid_certs {
            warn!(host = %relay.host, "Relay certificates will not be verified");
            tls_client_cfg
                .dangerous()
                .set_certificate_verifier(Arc::new(NoCertVerifier));
        }
        ClientConfig {
            connector: async_tls::TlsConnector::from(tls_client_cfg),
            ehlo_hostname: relay.ehlo_hostname.clone(),
            connect_timeout: secs(relay.connect_timeout_secs),
            reply_timeout: secs(relay.reply_timeout_secs),
        }
    }
}

// chrono::Duration is capped at i64::MAX milliseconds
const MAX_TIMEOUT_SECS: u64 = i64::MAX as u64 / 1000;

fn secs(s: u64) -> chrono::Duration {
    chrono::Duration::seconds(s.min(MAX_TIMEOUT_SECS) as i64)
}

#[async_trait]
impl smtp_client::Config for ClientConfig {
    fn ehlo_hostname(&self) -> &str {
        &self.ehlo_hostname
    }

    async fn tls_connect<IO>(&self, sni: &str, io: IO) -> io::Result<DynAsyncReadWrite>
    where
        IO: 'static + Unpin + Send + AsyncRead + AsyncWrite,
    {
        let io = self.connector.connect(sni, io).await?;
        let (r, w) = io.split();
        let io = duplexify::Duplex::new(
            Box::pin(r) as Pin<Box<dyn Send + AsyncRead>>,
            Box::pin(w) as Pin<Box<dyn Send + AsyncWrite>>,
        );
        Ok(io)
    }

    fn connect_timeout(&self) -> chrono::Duration {
        self.connect_timeout
    }

    fn banner_read_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }

    fn command_write_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }

    fn ehlo_reply_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }

    fn starttls_reply_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }

    fn tls_handshake_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }

    fn auth_reply_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }

    fn mail_reply_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }

    fn rcpt_reply_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }

    fn data_init_reply_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }

    fn data_block_write_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }

    fn data_end_reply_timeout(&self) -> chrono::Duration {
        self.reply_timeout
    }
}
