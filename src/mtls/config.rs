//! TLS listener configuration types.
//!
//! # Example YAML
//!
//! ```yaml
//! tls:
//!   server_cert: "/etc/connect-authz/tls/server.crt"
//!   server_key:  "/etc/connect-authz/tls/server.key"
//!   ca_cert:     "/etc/connect-authz/tls/ca.crt"
//!   require_client_cert: false
//! ```

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Server certificate, client trust store and client-certificate policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to the PEM-encoded server certificate chain.
    pub server_cert: String,

    /// Path to the PEM-encoded server private key.
    pub server_key: String,

    /// Path to the PEM-encoded CA bundle used to verify client certificates.
    pub ca_cert: String,

    /// When `false` (default) a client certificate is requested but not
    /// required. Certificate-less connections then complete the handshake and
    /// are denied and counted by the connection filter.
    ///
    /// When `true` they are rejected during the handshake and never reach the
    /// filter.
    pub require_client_cert: bool,

    /// Optional path to a PEM-encoded Certificate Revocation List.
    pub crl_path: Option<String>,
}

impl TlsConfig {
    /// Check that every required path is set.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("tls.server_cert", &self.server_cert),
            ("tls.server_key", &self.server_key),
            ("tls.ca_cert", &self.ca_cert),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{field} must be set")));
            }
        }
        Ok(())
    }
}
