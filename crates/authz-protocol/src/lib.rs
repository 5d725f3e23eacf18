//! Wire types for the Connect Authorize endpoint.
//!
//! The gateway asks an external decision service whether a client identity
//! may reach a target service:
//!
//! ```text
//! POST /v1/agent/connect/authorize
//! {"Target": "db", "ClientCertURI": "spiffe://…/svc/web", "ClientCertSerial": "01:04"}
//!
//! 200 OK
//! {"Authorized": true, "Reason": "Matched intention: web => db (allow)"}
//! ```
//!
//! Both directions are parsed strictly: unknown fields and missing required
//! fields are rejected rather than defaulted.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};

/// Default path of the Authorize endpoint.
pub const AUTHORIZE_PATH: &str = "/v1/agent/connect/authorize";

/// Payload sent to the Authorize endpoint for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorizationRequest {
    /// Name of the protected service the client is trying to reach.
    #[serde(rename = "Target")]
    pub target: String,

    /// URI SAN of the client certificate.
    #[serde(rename = "ClientCertURI")]
    pub client_cert_uri: String,

    /// Colon-hex serial number of the client certificate.
    #[serde(rename = "ClientCertSerial")]
    pub client_cert_serial: String,
}

impl AuthorizationRequest {
    /// Build a request payload.
    #[must_use]
    pub fn new(
        target: impl Into<String>,
        client_cert_uri: impl Into<String>,
        client_cert_serial: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            client_cert_uri: client_cert_uri.into(),
            client_cert_serial: client_cert_serial.into(),
        }
    }

    /// Last path segment of the client URI (the service name for SPIFFE IDs).
    #[must_use]
    pub fn client_service(&self) -> &str {
        self.client_cert_uri
            .rsplit('/')
            .next()
            .unwrap_or(&self.client_cert_uri)
    }
}

/// Decision returned by the Authorize endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorizationVerdict {
    /// Whether the connection may proceed.
    #[serde(rename = "Authorized")]
    pub authorized: bool,

    /// Human-readable explanation. Usually only present on allow.
    #[serde(rename = "Reason", default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuthorizationVerdict {
    /// An allow verdict with a reason.
    #[must_use]
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            authorized: true,
            reason: Some(reason.into()),
        }
    }

    /// A deny verdict without a reason.
    #[must_use]
    pub fn deny() -> Self {
        Self {
            authorized: false,
            reason: None,
        }
    }

    /// Parse a response body.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the body is not a JSON object with
    /// a boolean `Authorized` field and nothing but an optional string
    /// `Reason` besides it.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB_URI: &str =
        "spiffe://dc1-7e567ac2-551d-463f-8497-f78972856fc1.consul/ns/default/dc/dc1/svc/web";

    #[test]
    fn request_uses_connect_field_names() {
        let request = AuthorizationRequest::new("db", WEB_URI, "04:00:00:00:00:01:15:4b:5a:c3:94");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Target": "db",
                "ClientCertURI": WEB_URI,
                "ClientCertSerial": "04:00:00:00:00:01:15:4b:5a:c3:94",
            })
        );
    }

    #[test]
    fn request_rejects_unknown_fields() {
        let body = r#"{"Target":"db","ClientCertURI":"u","ClientCertSerial":"01","Extra":1}"#;
        assert!(serde_json::from_str::<AuthorizationRequest>(body).is_err());
    }

    #[test]
    fn client_service_is_last_uri_segment() {
        let request = AuthorizationRequest::new("db", WEB_URI, "01");
        assert_eq!(request.client_service(), "web");
    }

    #[test]
    fn verdict_with_reason_round_trips_angle_brackets() {
        let verdict = AuthorizationVerdict::allow("Matched intention: web => db (allow)");
        let json = serde_json::to_string(&verdict).unwrap();
        assert_eq!(
            json,
            r#"{"Authorized":true,"Reason":"Matched intention: web => db (allow)"}"#
        );
    }

    #[test]
    fn deny_verdict_omits_reason() {
        let json = serde_json::to_string(&AuthorizationVerdict::deny()).unwrap();
        assert_eq!(json, r#"{"Authorized":false}"#);
    }

    #[test]
    fn verdict_requires_authorized_field() {
        assert!(AuthorizationVerdict::from_json(br#"{"Reason":"x"}"#).is_err());
        assert!(AuthorizationVerdict::from_json(b"{}").is_err());
    }

    #[test]
    fn verdict_rejects_non_boolean_authorized() {
        assert!(AuthorizationVerdict::from_json(br#"{"Authorized":"true"}"#).is_err());
        assert!(AuthorizationVerdict::from_json(br#"{"Authorized":1}"#).is_err());
    }

    #[test]
    fn verdict_rejects_unknown_shape() {
        assert!(AuthorizationVerdict::from_json(br#"{"Authorized":true,"Cached":true}"#).is_err());
        assert!(AuthorizationVerdict::from_json(b"[true]").is_err());
        assert!(AuthorizationVerdict::from_json(b"not json").is_err());
    }

    #[test]
    fn verdict_without_reason_parses() {
        let verdict = AuthorizationVerdict::from_json(br#"{"Authorized":false}"#).unwrap();
        assert_eq!(verdict, AuthorizationVerdict::deny());
    }
}
