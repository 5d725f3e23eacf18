//! Client identity extraction.
//!
//! Turns the peer certificate presented during the TLS handshake into the
//! `(uri, serial)` pair sent to the Authorize endpoint.
//!
//! - `uri` is the certificate's single URI SAN (a SPIFFE ID for Connect).
//!   Zero or several URI SANs make the identity ambiguous and are rejected.
//! - `serial` is the serial number's big-endian magnitude, rendered as
//!   lowercase colon-separated hex octets (`01:04`). The DER sign octet is
//!   not part of the value, so serial 200 is `c8`, not `00:c8`.

use rustls::pki_types::CertificateDer;
use thiserror::Error;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

/// Why no identity could be extracted from a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The client completed the handshake without a certificate.
    #[error("no client certificate presented")]
    NoClientCertificate,

    /// The certificate does not carry exactly one usable identity.
    #[error("malformed client identity: {0}")]
    MalformedIdentity(String),
}

/// Identity asserted by a client certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    /// The certificate's URI SAN.
    pub uri: String,
    /// Colon-hex serial number.
    pub serial: String,
}

impl ClientIdentity {
    /// Extract the identity from the leaf certificate of a peer chain.
    ///
    /// # Errors
    ///
    /// `NoClientCertificate` when `peer` is `None`; `MalformedIdentity` when
    /// the certificate cannot be parsed, has an empty serial, or does not
    /// carry exactly one URI SAN.
    pub fn extract(peer: Option<&CertificateDer<'_>>) -> Result<Self, IdentityError> {
        let der = peer.ok_or(IdentityError::NoClientCertificate)?;
        Self::from_der(der.as_ref())
    }

    /// Extract the identity from a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// See [`ClientIdentity::extract`].
    pub fn from_der(der: &[u8]) -> Result<Self, IdentityError> {
        let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
            IdentityError::MalformedIdentity(format!("unparsable certificate: {e}"))
        })?;

        let uri = single_uri_san(&cert)?;

        if cert.raw_serial().is_empty() {
            return Err(IdentityError::MalformedIdentity("empty serial number".into()));
        }

        Ok(Self {
            uri,
            serial: encode_serial(&cert.serial.to_bytes_be()),
        })
    }
}

/// Render serial bytes as lowercase colon-separated hex octets.
///
/// `[0x01, 0x04]` becomes `"01:04"`. The empty slice renders as `""`.
#[must_use]
pub fn encode_serial(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn single_uri_san(cert: &X509Certificate<'_>) -> Result<String, IdentityError> {
    let san = cert
        .subject_alternative_name()
        .map_err(|e| IdentityError::MalformedIdentity(format!("invalid SAN extension: {e}")))?;

    let mut uris = san
        .iter()
        .flat_map(|ext| ext.value.general_names.iter())
        .filter_map(|name| match name {
            GeneralName::URI(uri) => Some(*uri),
            _ => None,
        });

    match (uris.next(), uris.next()) {
        (Some(uri), None) if !uri.is_empty() => Ok(uri.to_owned()),
        (Some(_), None) => Err(IdentityError::MalformedIdentity("empty URI SAN".into())),
        (None, _) => Err(IdentityError::MalformedIdentity("no URI SAN".into())),
        (Some(_), Some(_)) => Err(IdentityError::MalformedIdentity(
            "more than one URI SAN".into(),
        )),
    }
}
