//! Authorization decisions.
//!
//! The connection filter never talks HTTP directly. It asks an
//! [`Authorizer`] for a verdict and treats every error as a deny.
//!
//! - [`client`]: `HttpAuthorizer`, the production implementation calling
//!   the Authorize endpoint
//! - [`cache`]: optional short-lived verdict cache

pub mod cache;
pub mod client;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use authz_protocol::{AUTHORIZE_PATH, AuthorizationRequest, AuthorizationVerdict};
pub use cache::DecisionCache;
pub use client::HttpAuthorizer;

/// Why no verdict could be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizeError {
    /// Connection refused, reset or otherwise failed below HTTP.
    #[error("authorize endpoint unreachable: {0}")]
    Unreachable(String),

    /// No verdict arrived within the deadline.
    #[error("authorize call timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint answered with something other than 200.
    #[error("authorize endpoint returned HTTP {0}")]
    UnexpectedStatus(u16),

    /// The 200 body was not a valid verdict.
    #[error("malformed authorize response: {0}")]
    MalformedResponse(String),
}

impl AuthorizeError {
    /// Transient failures worth another attempt inside the deadline.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::UnexpectedStatus(status) => *status >= 500,
            Self::Timeout(_) | Self::MalformedResponse(_) => false,
        }
    }
}

/// Source of authorization verdicts.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decide whether `request.client_cert_uri` may reach `request.target`.
    ///
    /// # Errors
    ///
    /// Any failure to obtain a well-formed verdict. Callers deny on error.
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationVerdict, AuthorizeError>;
}
