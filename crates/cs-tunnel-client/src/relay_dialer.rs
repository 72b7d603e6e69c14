use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dialer::{DuplexStream, StreamDialer};
use crate::error::ClientError;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Dials the relay over TCP and upgrades to TLS, the transport the Tunnel
/// Client actually runs on in production. `insecure` mirrors the
/// dev-mode escape hatch: skip certificate verification against a relay
/// that terminates TLS with a self-signed certificate.
pub struct RelayDialer {
    host: String,
    port: u16,
    insecure: bool,
}

impl RelayDialer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            insecure: false,
        }
    }

    pub fn insecure(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            insecure: true,
        }
    }

    fn connector(&self) -> Result<TlsConnector, ClientError> {
        ensure_crypto_provider();

        let config = if self.insecure {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipVerification::new())
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        Ok(TlsConnector::from(Arc::new(config)))
    }
}

#[async_trait]
impl StreamDialer for RelayDialer {
    async fn dial(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DuplexStream>, ClientError> {
        let addr = format!("{}:{}", self.host, self.port);

        let tcp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Canceled),
            result = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr)) => {
                match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(source)) => {
                        return Err(ClientError::DialFailed {
                            host: self.host.clone(),
                            port: self.port,
                            source,
                        })
                    }
                    Err(_) => return Err(ClientError::Timeout("relay dial")),
                }
            }
        };
        tcp.set_nodelay(true).map_err(ClientError::Io)?;

        let dns_name = ServerName::try_from(self.host.clone())
            .map_err(|_| ClientError::InvalidAddress(self.host.clone()))?;

        let connector = self.connector()?;
        let tls = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Canceled),
            result = connector.connect(dns_name, tcp) => {
                result.map_err(|e| ClientError::Tls(e.to_string()))?
            }
        };

        debug!(host = %self.host, port = self.port, insecure = self.insecure, "dialed relay");
        Ok(Box::new(tls))
    }
}

static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insecure_dialer_is_marked_insecure() {
        let dialer = RelayDialer::insecure("relay.example.com", 443);
        assert!(dialer.insecure);
    }

    #[test]
    fn secure_dialer_defaults_to_verified() {
        let dialer = RelayDialer::new("relay.example.com", 443);
        assert!(!dialer.insecure);
    }
}
