//! TLS transport implementation
//!
//! Wraps the connection to the remote proxy in TLS using rustls. Trust roots
//! come from a PEM bundle when one is configured, otherwise from the system
//! store.

use crate::config::{KeyStoreInfo, TlsConfig};
use crate::error::{BridgeError, Result};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// TLS stream type alias
pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// TLS connector bound to one remote proxy
///
/// Built once from [`TlsConfig`] and reused for every upstream connection.
#[derive(Clone)]
pub struct TlsTransport {
    /// TLS connector
    connector: TlsConnector,
    /// Server name presented and verified during the handshake
    server_name: ServerName<'static>,
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl TlsTransport {
    /// Create a TLS transport for the proxy at `proxy_host`
    ///
    /// `config.server_name` overrides `proxy_host` for verification.
    pub fn with_config(config: &TlsConfig, proxy_host: &str) -> Result<Self> {
        let builder = if config.skip_verify {
            warn!("TLS certificate verification is disabled for {}", proxy_host);
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
        } else {
            ClientConfig::builder().with_root_certificates(load_root_store(config)?)
        };

        let tls_config = match &config.key_store {
            Some(store) => {
                let certs = load_certs(&store.path)?;
                let key = load_private_key(store)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| BridgeError::Tls(format!("Invalid client certificate: {}", e)))?
            }
            None => builder.with_no_client_auth(),
        };

        let hostname = config.server_name.as_deref().unwrap_or(proxy_host);
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|e| BridgeError::Tls(format!("Invalid hostname {}: {}", hostname, e)))?;

        Ok(TlsTransport {
            connector: TlsConnector::from(Arc::new(tls_config)),
            server_name,
        })
    }

    /// Perform the TLS handshake over an established TCP connection
    pub async fn connect(&self, tcp_stream: TcpStream) -> Result<TlsStream> {
        let tls_stream = self
            .connector
            .connect(self.server_name.clone(), tcp_stream)
            .await
            .map_err(|e| {
                BridgeError::Tls(format!(
                    "TLS handshake failed with {:?}: {}",
                    self.server_name, e
                ))
            })?;

        debug!("TLS connection established to {:?}", self.server_name);
        Ok(tls_stream)
    }
}

/// Trusted roots from the configured PEM bundle, or the system store
fn load_root_store(config: &TlsConfig) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();

    match &config.trust_store {
        Some(store) => {
            for cert in load_certs(&store.path)? {
                root_store
                    .add(cert)
                    .map_err(|e| BridgeError::Tls(format!("Failed to add certificate: {}", e)))?;
            }
        }
        None => {
            let native_certs = rustls_native_certs::load_native_certs();
            for err in &native_certs.errors {
                debug!("Skipping system certificate: {}", err);
            }
            let (added, ignored) = root_store.add_parsable_certificates(native_certs.certs);
            debug!("Loaded {} system root certificates ({} ignored)", added, ignored);
        }
    }

    Ok(root_store)
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| BridgeError::Tls(format!("Failed to open certificate file {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            BridgeError::Tls(format!("Failed to parse certificates from {}: {}", path, e))
        })?;

    if certs.is_empty() {
        return Err(BridgeError::Tls(format!("No certificates found in {}", path)));
    }
    Ok(certs)
}

fn load_private_key(store: &KeyStoreInfo) -> Result<PrivateKeyDer<'static>> {
    let path = store.private_key_path();
    let file = File::open(path)
        .map_err(|e| BridgeError::Tls(format!("Failed to open key file {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| BridgeError::Tls(format!("Failed to parse private key from {}: {}", path, e)))?
        .ok_or_else(|| BridgeError::Tls(format!("No private key found in {}", path)))
}

/// Certificate verifier that accepts all certificates (dangerous!)
#[derive(Debug)]
struct NoVerifier;

impl tokio_rustls::rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: tokio_rustls::rustls::pki_types::UnixTime,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::ServerCertVerified,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<tokio_rustls::rustls::SignatureScheme> {
        vec![
            tokio_rustls::rustls::SignatureScheme::RSA_PKCS1_SHA256,
            tokio_rustls::rustls::SignatureScheme::RSA_PKCS1_SHA384,
            tokio_rustls::rustls::SignatureScheme::RSA_PKCS1_SHA512,
            tokio_rustls::rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            tokio_rustls::rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            tokio_rustls::rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            tokio_rustls::rustls::SignatureScheme::RSA_PSS_SHA256,
            tokio_rustls::rustls::SignatureScheme::RSA_PSS_SHA384,
            tokio_rustls::rustls::SignatureScheme::RSA_PSS_SHA512,
            tokio_rustls::rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_tls_transport_skip_verify() {
        let config = TlsConfig {
            skip_verify: true,
            ..Default::default()
        };

        let transport = TlsTransport::with_config(&config, "proxy.example.com").unwrap();
        assert_eq!(
            transport.server_name,
            ServerName::try_from("proxy.example.com").unwrap()
        );
    }

    #[test]
    fn test_tls_transport_server_name_override() {
        let config = TlsConfig {
            server_name: Some("socks.internal".to_string()),
            skip_verify: true,
            ..Default::default()
        };

        let transport = TlsTransport::with_config(&config, "10.0.0.5").unwrap();
        assert_eq!(
            transport.server_name,
            ServerName::try_from("socks.internal").unwrap()
        );
    }

    #[test]
    fn test_tls_transport_ip_server_name() {
        let config = TlsConfig {
            skip_verify: true,
            ..Default::default()
        };
        assert!(TlsTransport::with_config(&config, "127.0.0.1").is_ok());
    }

    #[test]
    fn test_tls_transport_invalid_hostname() {
        let config = TlsConfig {
            skip_verify: true,
            ..Default::default()
        };
        let err = TlsTransport::with_config(&config, "not a hostname").unwrap_err();
        assert!(matches!(err, BridgeError::Tls(_)));
    }

    #[test]
    fn test_tls_transport_missing_trust_store() {
        let config = TlsConfig {
            trust_store: Some(KeyStoreInfo::new("/nonexistent/roots.pem")),
            ..Default::default()
        };
        let err = TlsTransport::with_config(&config, "proxy.example.com").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/roots.pem"));
    }

    #[test]
    fn test_tls_transport_empty_trust_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();

        let config = TlsConfig {
            trust_store: Some(KeyStoreInfo::new(file.path().to_string_lossy())),
            ..Default::default()
        };
        let err = TlsTransport::with_config(&config, "proxy.example.com").unwrap_err();
        assert!(err.to_string().contains("No certificates found"));
    }
}
