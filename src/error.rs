//! Error types for the Connect authorization gateway

use std::io;

use thiserror::Error;

use crate::authorize::AuthorizeError;
use crate::mtls::IdentityError;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS setup or handshake error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Client identity could not be extracted
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// The Authorize endpoint call failed
    #[error("Authorize error: {0}")]
    Authorize(#[from] AuthorizeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error should stop the process at startup.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Tls(_) | Self::Io(_) | Self::Http(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        assert!(Error::Config("bad endpoint".into()).is_fatal());
        assert!(Error::Tls("bad cert".into()).is_fatal());
    }

    #[test]
    fn per_connection_errors_are_not_fatal() {
        assert!(!Error::Identity(IdentityError::NoClientCertificate).is_fatal());
        assert!(!Error::Authorize(AuthorizeError::Unreachable("refused".into())).is_fatal());
    }

    #[test]
    fn serde_and_authorize_errors_convert() {
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(Error::from(json), Error::Json(_)));

        let err: Error = AuthorizeError::UnexpectedStatus(503).into();
        assert_eq!(err.to_string(), "Authorize error: authorize endpoint returned HTTP 503");
        assert!(!err.is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::Config("target must not be empty".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: target must not be empty"
        );
    }
}
