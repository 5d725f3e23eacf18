//! Per-connection authorization filter.
//!
//! Runs once for every accepted TLS connection:
//!
//! ```text
//! AwaitingCertificate → Extracting → Authorizing → Permitted
//!                            │             │
//!                            └─────────────┴──────→ Denied
//! ```
//!
//! Exactly one of `allowed` / `denied` is incremented when a terminal state
//! is reached. An attempt dropped before that (the client went away while
//! the decision was pending) increments neither, and dropping the future
//! also cancels the in-flight Authorize call.

use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::authorize::{
    AuthorizationRequest, AuthorizationVerdict, AuthorizeError, Authorizer, DecisionCache,
};
use crate::config::GatewayConfig;
use crate::mtls::{ClientIdentity, IdentityError};
use crate::stats::{Outcome, StatsRegistry};

/// Where a connection attempt is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake finished, peer certificate not yet inspected
    AwaitingCertificate,
    /// Reading URI SAN and serial
    Extracting,
    /// Waiting for a verdict
    Authorizing,
    /// Traffic may flow to the upstream
    Permitted,
    /// Connection will be closed
    Denied,
}

impl ConnectionState {
    /// Whether the attempt has been counted
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Permitted | Self::Denied)
    }
}

/// Why a connection was denied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenyReason {
    /// No usable identity in the client certificate
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The Authorize endpoint said no
    #[error("not authorized")]
    NotAuthorized,

    /// No verdict could be obtained
    #[error(transparent)]
    Authorize(#[from] AuthorizeError),
}

/// Outcome of [`ConnectionFilter::evaluate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Pass the connection through
    Permitted {
        /// Identity that was authorized
        identity: ClientIdentity,
        /// Reason given by the Authorize endpoint
        reason: Option<String>,
    },
    /// Close the connection
    Denied(DenyReason),
}

impl Decision {
    /// Whether traffic may flow
    #[must_use]
    pub fn is_permitted(&self) -> bool {
        matches!(self, Self::Permitted { .. })
    }

    /// Terminal state this decision corresponds to
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match self {
            Self::Permitted { .. } => ConnectionState::Permitted,
            Self::Denied(_) => ConnectionState::Denied,
        }
    }
}

/// Decides, once per connection, whether the client may reach the target.
pub struct ConnectionFilter {
    config: Arc<GatewayConfig>,
    authorizer: Arc<dyn Authorizer>,
    cache: Option<Arc<DecisionCache>>,
    stats: Arc<StatsRegistry>,
}

impl ConnectionFilter {
    /// Create a filter without a decision cache
    #[must_use]
    pub fn new(
        config: Arc<GatewayConfig>,
        authorizer: Arc<dyn Authorizer>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            config,
            authorizer,
            cache: None,
            stats,
        }
    }

    /// Reuse verdicts from `cache`
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<DecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Shared counters
    #[must_use]
    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    /// Decide on a connection whose TLS handshake just completed.
    ///
    /// `peer` is the leaf certificate presented by the client, if any.
    /// Every failure denies. Dropping the returned future before it resolves
    /// leaves the counters untouched.
    pub async fn evaluate(&self, peer: Option<&CertificateDer<'_>>) -> Decision {
        let mut attempt = ConnectionAttempt::new(&self.stats);

        attempt.advance(ConnectionState::Extracting);
        let identity = match ClientIdentity::extract(peer) {
            Ok(identity) => identity,
            Err(err) => {
                match err {
                    IdentityError::NoClientCertificate => {
                        info!("Connection denied: no client certificate");
                    }
                    IdentityError::MalformedIdentity(ref detail) => {
                        warn!(detail = %detail, "Connection denied: malformed client identity");
                    }
                }
                return attempt.deny(err.into());
            }
        };

        attempt.advance(ConnectionState::Authorizing);
        match self.verdict(&identity).await {
            Ok(verdict) if verdict.authorized => {
                debug!(
                    client = %identity.uri,
                    serial = %identity.serial,
                    target = %self.config.target,
                    reason = verdict.reason.as_deref().unwrap_or(""),
                    "Connection authorized"
                );
                attempt.permit(identity, verdict.reason)
            }
            Ok(_) => {
                info!(
                    client = %identity.uri,
                    serial = %identity.serial,
                    target = %self.config.target,
                    "Connection denied: not authorized"
                );
                attempt.deny(DenyReason::NotAuthorized)
            }
            Err(err) => {
                warn!(
                    client = %identity.uri,
                    target = %self.config.target,
                    error = %err,
                    "Connection denied: authorize call failed"
                );
                attempt.deny(err.into())
            }
        }
    }

    async fn verdict(
        &self,
        identity: &ClientIdentity,
    ) -> Result<AuthorizationVerdict, AuthorizeError> {
        if let Some(cache) = &self.cache {
            let cached = cache.get(identity, &self.config.target);
            self.stats.record_cache_lookup(cached.is_some());
            if let Some(verdict) = cached {
                trace!(client = %identity.uri, "Verdict served from cache");
                return Ok(verdict);
            }
        }

        let request =
            AuthorizationRequest::new(&self.config.target, &identity.uri, &identity.serial);
        let timeout = self.config.request_timeout;
        let verdict = tokio::time::timeout(timeout, self.authorizer.authorize(&request))
            .await
            .map_err(|_| AuthorizeError::Timeout(timeout))??;

        if let Some(cache) = &self.cache {
            if !cache.insert(identity, &self.config.target, verdict.clone()) {
                debug!(client = %identity.uri, "Decision cache full, verdict not cached");
            }
        }

        Ok(verdict)
    }
}

/// Tracks one attempt and guarantees it is counted at most once.
struct ConnectionAttempt<'a> {
    stats: &'a StatsRegistry,
    state: ConnectionState,
}

impl<'a> ConnectionAttempt<'a> {
    fn new(stats: &'a StatsRegistry) -> Self {
        Self {
            stats,
            state: ConnectionState::AwaitingCertificate,
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        trace!(from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }

    fn permit(mut self, identity: ClientIdentity, reason: Option<String>) -> Decision {
        self.advance(ConnectionState::Permitted);
        self.stats.increment(Outcome::Allowed);
        Decision::Permitted { identity, reason }
    }

    fn deny(mut self, reason: DenyReason) -> Decision {
        self.advance(ConnectionState::Denied);
        self.stats.increment(Outcome::Denied);
        Decision::Denied(reason)
    }
}

impl Drop for ConnectionAttempt<'_> {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            debug!(state = ?self.state, "Connection closed before a decision, not counted");
        }
    }
}
