//! Mutual TLS: listener configuration and client identity extraction.
//!
//! ```text
//! TCP connection
//!   → TLS handshake  (rustls verifies any client cert against the CA bundle)
//!   → ClientIdentity extracted from the peer leaf certificate
//!   → Authorize request {Target, ClientCertURI, ClientCertSerial}
//! ```
//!
//! - [`config`]: YAML configuration (`TlsConfig`)
//! - [`identity`]: URI SAN and colon-hex serial extraction (`ClientIdentity`)
//! - [`cert_manager`]: PEM loading and rustls config building

pub mod cert_manager;
pub mod config;
pub mod identity;

pub use cert_manager::{build_tls_config, crypto_provider, load_certs, load_crls, load_private_key};
pub use config::TlsConfig;
pub use identity::{ClientIdentity, IdentityError, encode_serial};
