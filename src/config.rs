//! Configuration management

use std::{net::SocketAddr, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::mtls::TlsConfig;
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "CONNECT_AUTHZ_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Client-facing TLS listener
    pub listener: ListenerConfig,
    /// Server certificate and client trust store
    pub tls: TlsConfig,
    /// Protected upstream that permitted connections are forwarded to
    pub upstream: UpstreamConfig,
    /// Authorize endpoint settings
    pub authorize: AuthorizeConfig,
    /// Decision cache
    pub cache: CacheConfig,
    /// Admin (stats) listener
    pub admin: AdminConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (CONNECT_AUTHZ_ prefix, nested with __)
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate every section. Any failure here is fatal at startup.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.listener.socket_addr()?;
        self.upstream.socket_addr()?;
        if self.admin.enabled {
            self.admin.socket_addr()?;
        }
        self.tls.validate()?;
        self.gateway_config()?;
        if self.cache.enabled && self.cache.ttl.is_zero() {
            return Err(Error::Config("cache.ttl must be greater than zero".into()));
        }
        Ok(())
    }

    /// Resolve the read-only settings used by the connection filter.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty target, a non-HTTP endpoint or a
    /// zero request timeout.
    pub fn gateway_config(&self) -> Result<GatewayConfig> {
        GatewayConfig::from_config(&self.authorize)
    }
}

/// Client-facing listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address to accept TLS connections on
    pub address: String,
    /// Upper bound for the TLS handshake
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:10000".to_string(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ListenerConfig {
    /// Parsed listen address
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the address is not `host:port`.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        parse_addr("listener.address", &self.address)
    }
}

/// Upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Address of the protected service
    pub address: String,
    /// Upper bound for connecting to the upstream
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:4222".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl UpstreamConfig {
    /// Parsed upstream address
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the address is not `host:port`.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        parse_addr("upstream.address", &self.address)
    }
}

/// Authorize endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizeConfig {
    /// Service name sent as `Target`
    pub target: String,
    /// Base URL of the decision service
    pub endpoint: String,
    /// Absolute path of the Authorize endpoint
    pub path: String,
    /// Optional `Host` header override
    pub hostname: Option<String>,
    /// Deadline for one authorization decision, retries included
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Retry policy inside the deadline
    pub retry: RetryConfig,
}

impl Default for AuthorizeConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            endpoint: "http://127.0.0.1:8500".to_string(),
            path: authz_protocol::AUTHORIZE_PATH.to_string(),
            hostname: None,
            request_timeout: Duration::from_millis(1000),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first one (0 = single attempt)
    pub max_retries: usize,
    /// Initial backoff duration
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

/// Decision cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable verdict caching
    pub enabled: bool,
    /// How long a verdict may be reused
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum number of cached verdicts
    pub max_entries: usize,
    /// Key on the certificate serial as well as URI and target
    pub include_serial: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(10),
            max_entries: 10_000,
            include_serial: false,
        }
    }
}

/// Admin listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve `/stats` and `/health`
    pub enabled: bool,
    /// Address of the admin listener
    pub address: String,
    /// Prefix of every published stat name
    pub stat_prefix: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1:19000".to_string(),
            stat_prefix: "connect_authz".to_string(),
        }
    }
}

impl AdminConfig {
    /// Parsed admin address
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the address is not `host:port`.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        parse_addr("admin.address", &self.address)
    }
}

/// Validated, read-only settings shared by every connection filter.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Service name sent as `Target`
    pub target: String,
    /// Full URL of the Authorize endpoint
    pub authorize_url: Url,
    /// Optional `Host` header override
    pub authorize_hostname: Option<String>,
    /// Deadline for one authorization decision
    pub request_timeout: Duration,
    /// Retry policy inside the deadline
    pub retry: RetryConfig,
}

impl GatewayConfig {
    /// Build from the `authorize` section.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty target, a non-HTTP endpoint, a
    /// relative path or a zero request timeout.
    pub fn from_config(config: &AuthorizeConfig) -> Result<Self> {
        if config.target.trim().is_empty() {
            return Err(Error::Config("authorize.target must not be empty".into()));
        }
        if config.request_timeout.is_zero() {
            return Err(Error::Config(
                "authorize.request_timeout must be greater than zero".into(),
            ));
        }
        if !config.path.starts_with('/') {
            return Err(Error::Config(format!(
                "authorize.path must be absolute, got '{}'",
                config.path
            )));
        }

        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            Error::Config(format!(
                "authorize.endpoint '{}' is not a valid URL: {e}",
                config.endpoint
            ))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.host_str().is_none() {
            return Err(Error::Config(format!(
                "authorize.endpoint must be an http(s) URL with a host, got '{}'",
                config.endpoint
            )));
        }
        let authorize_url = endpoint
            .join(&config.path)
            .map_err(|e| Error::Config(format!("Invalid authorize.path: {e}")))?;

        Ok(Self {
            target: config.target.clone(),
            authorize_url,
            authorize_hostname: config.hostname.clone().filter(|h| !h.is_empty()),
            request_timeout: config.request_timeout,
            retry: config.retry.clone(),
        })
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("{field} '{value}' is not a socket address: {e}")))
}

/// Human-readable `Duration` (de)serialisation: `"500ms"`, `"2s"`, `"1m"`.
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration as milliseconds (e.g., "1500ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `"<n>ms"`, `"<n>s"`, `"<n>m"` or a bare number of seconds.
    ///
    /// # Errors
    ///
    /// Returns the integer parse error for malformed input.
    pub fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
