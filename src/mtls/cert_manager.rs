//! Certificate loading and rustls server config building.
//!
//! All certificate, key and CRL files are expected in **PEM format**, which is
//! what Connect CAs hand out (`RootCert`, `CertPEM`, `PrivateKeyPEM`).

use std::fs;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use tracing::debug;

use crate::mtls::config::TlsConfig;
use crate::{Error, Result};

/// Crypto provider used for every TLS object the gateway builds.
#[must_use]
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Build the `rustls::ServerConfig` for the client-facing listener.
///
/// Client certificates are verified against `ca_cert`. Whether a client may
/// complete the handshake without one is controlled by
/// `require_client_cert`.
///
/// # Errors
///
/// Returns `Error::Tls` if any file cannot be read or parsed, or if the
/// certificate and key do not match.
pub fn build_tls_config(config: &TlsConfig) -> Result<ServerConfig> {
    let server_certs = load_certs(&config.server_cert)?;
    let server_key = load_private_key(&config.server_key)?;
    let ca_certs = load_certs(&config.ca_cert)?;

    let mut root_store = rustls::RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert)
            .map_err(|e| Error::Tls(format!("Failed to add CA cert to trust store: {e}")))?;
    }

    let provider = crypto_provider();
    let client_verifier = build_client_verifier(config, root_store, Arc::clone(&provider))?;

    let tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("Unsupported protocol versions: {e}")))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Tls(format!("TLS config error (cert/key mismatch?): {e}")))?;

    debug!(
        server_cert = %config.server_cert,
        ca_cert = %config.ca_cert,
        require_client_cert = config.require_client_cert,
        "TLS listener config built"
    );

    Ok(tls_cfg)
}

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no certificate.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs = rustls_pemfile::certs(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certs from '{path}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in '{path}'")));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file (PKCS#8, PKCS#1 or SEC1).
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no private key.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| Error::Tls(format!("Failed to parse private key from '{path}': {e}")))?
        .ok_or_else(|| Error::Tls(format!("No private key found in '{path}'")))
}

/// Load CRLs from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_crls(path: &str) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::crls(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse CRL from '{path}': {e}")))
}

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Tls(format!("Cannot read '{path}': {e}")))
}

fn build_client_verifier(
    config: &TlsConfig,
    root_store: rustls::RootCertStore,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
    let builder = WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider);

    let builder = match config.crl_path {
        Some(ref crl_path) => builder.with_crls(load_crls(crl_path)?),
        None => builder,
    };

    // Certificate-less clients must reach the filter to be counted as denied
    let builder = if config.require_client_cert {
        builder
    } else {
        builder.allow_unauthenticated()
    };

    builder
        .build()
        .map_err(|e| Error::Tls(format!("Failed to build client verifier: {e}")))
}
