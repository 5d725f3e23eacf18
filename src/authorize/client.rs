//! HTTP client for the Authorize endpoint.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode, header};
use tracing::{debug, trace};
use url::Url;

use super::{AuthorizationRequest, AuthorizationVerdict, AuthorizeError, Authorizer};
use crate::config::{GatewayConfig, RetryConfig};
use crate::Result;

/// Calls `POST <endpoint><path>` once per decision, with bounded retries.
#[derive(Debug, Clone)]
pub struct HttpAuthorizer {
    client: Client,
    url: Url,
    hostname: Option<String>,
    request_timeout: Duration,
    retry: RetryConfig,
}

impl HttpAuthorizer {
    /// Build a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the HTTP client cannot be constructed.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            url: config.authorize_url.clone(),
            hostname: config.authorize_hostname.clone(),
            request_timeout: config.request_timeout,
            retry: config.retry.clone(),
        })
    }

    /// Endpoint URL requests are sent to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send_once(
        &self,
        request: &AuthorizationRequest,
    ) -> std::result::Result<AuthorizationVerdict, AuthorizeError> {
        let mut builder = self.client.post(self.url.clone()).json(request);
        if let Some(hostname) = &self.hostname {
            builder = builder.header(header::HOST, hostname.as_str());
        }

        let response = builder.send().await.map_err(|e| self.classify(&e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AuthorizeError::UnexpectedStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.classify(&e))?;
        trace!(body = %String::from_utf8_lossy(&body), "Authorize response");

        AuthorizationVerdict::from_json(&body)
            .map_err(|e| AuthorizeError::MalformedResponse(e.to_string()))
    }

    fn classify(&self, err: &reqwest::Error) -> AuthorizeError {
        if err.is_timeout() {
            AuthorizeError::Timeout(self.request_timeout)
        } else {
            AuthorizeError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl Authorizer for HttpAuthorizer {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> std::result::Result<AuthorizationVerdict, AuthorizeError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry.initial_backoff)
            .with_max_times(self.retry.max_retries);

        let attempt = (|| self.send_once(request))
            .retry(backoff)
            .when(AuthorizeError::is_retryable)
            .notify(|err: &AuthorizeError, delay: Duration| {
                debug!(error = %err, delay_ms = delay.as_millis(), "Retrying authorize call");
            });

        // The whole decision, retries included, shares one deadline
        match tokio::time::timeout(self.request_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(AuthorizeError::Timeout(self.request_timeout)),
        }
    }
}
