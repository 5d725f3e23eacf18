//! Connect Authorization Gateway Library
//!
//! A mutual-TLS front door for a single protected service. Every accepted
//! connection is authorized once, right after the handshake:
//!
//! - **Identity**: URI SAN and colon-hex serial from the client certificate
//! - **Authorize**: `POST /v1/agent/connect/authorize` with
//!   `{Target, ClientCertURI, ClientCertSerial}`
//! - **Fail closed**: unreachable endpoint, timeout, non-200 or malformed
//!   response all deny
//! - **Accounting**: `allowed` / `denied` counters, exactly one per decided
//!   connection, served on the admin `/stats` endpoint

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authorize;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mtls;
pub mod stats;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns `Error::Internal` if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
