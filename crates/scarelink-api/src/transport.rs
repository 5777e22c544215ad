// Shared transport configuration for building reqwest::Client instances.
//
// The status client, the probe, and the cloud document store share TLS and
// timeout settings through this module.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

const USER_AGENT: &str = concat!("scarelink/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the bundled webpki roots.
    #[default]
    System,
    /// Trust an extra CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-signed relays on a lab network).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
    pub connect_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(10),
            connect_timeout: None,
        }
    }
}

impl TransportConfig {
    /// Transport tuned for on-device endpoints: short timeouts, plain HTTP.
    pub fn local(timeout: Duration) -> Self {
        Self {
            tls: TlsMode::System,
            timeout,
            connect_timeout: Some(timeout),
        }
    }

    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        self.builder()?
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Build a client with no overall request timeout.
    ///
    /// Used for long-lived event streams, where a total timeout would cut
    /// the subscription off mid-stream.
    pub fn build_streaming_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        builder = apply_tls(builder, &self.tls)?;
        builder = builder.connect_timeout(self.connect_timeout.unwrap_or(self.timeout));
        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    fn builder(&self) -> Result<reqwest::ClientBuilder, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);
        if let Some(connect) = self.connect_timeout {
            builder = builder.connect_timeout(connect);
        }
        apply_tls(builder, &self.tls)
    }
}

fn apply_tls(
    builder: reqwest::ClientBuilder,
    tls: &TlsMode,
) -> Result<reqwest::ClientBuilder, Error> {
    match tls {
        TlsMode::System => Ok(builder),
        TlsMode::CustomCa(path) => {
            let cert_pem = std::fs::read(path)
                .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&cert_pem)
                .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
            Ok(builder.add_root_certificate(cert))
        }
        TlsMode::DangerAcceptInvalid => Ok(builder.danger_accept_invalid_certs(true)),
    }
}
