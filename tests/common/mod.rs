//! Shared fixtures: a throwaway PKI, a fake Authorize service and an echo
//! upstream.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyPair, SanType, SerialNumber,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::net::TcpListener;

use connect_authz_gateway::authorize::{AUTHORIZE_PATH, AuthorizationRequest, AuthorizationVerdict};

pub const TRUST_DOMAIN: &str = "11111111-2222-3333-4444-555555555555.consul";

/// SPIFFE ID of a service in the default namespace of dc1
pub fn service_uri(service: &str) -> String {
    format!("spiffe://{TRUST_DOMAIN}/ns/default/dc/dc1/svc/{service}")
}

// ============================================================================
// PKI
// ============================================================================

/// A CA plus a `localhost` server certificate, written to a temp dir
pub struct TestPki {
    pub dir: tempfile::TempDir,
    ca_cert: Certificate,
    ca_key: KeyPair,
    pub ca_pem: String,
}

/// A client certificate and its key
pub struct ClientCert {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
}

impl TestPki {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Test Connect CA");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = params.self_signed(&ca_key).unwrap();
        let ca_pem = ca_cert.pem();

        let server_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server_cert = params.signed_by(&server_key, &ca_cert, &ca_key).unwrap();

        std::fs::write(dir.path().join("ca.crt"), &ca_pem).unwrap();
        std::fs::write(dir.path().join("server.crt"), server_cert.pem()).unwrap();
        std::fs::write(dir.path().join("server.key"), server_key.serialize_pem()).unwrap();

        Self {
            dir,
            ca_cert,
            ca_key,
            ca_pem,
        }
    }

    pub fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    pub fn ca_der(&self) -> CertificateDer<'static> {
        self.ca_cert.der().clone()
    }

    /// Client certificate for `service` with the given DER serial bytes
    pub fn client_cert(&self, service: &str, serial: &[u8]) -> ClientCert {
        self.client_cert_with_sans(
            vec![SanType::URI(Ia5String::try_from(service_uri(service)).unwrap())],
            serial,
        )
    }

    pub fn client_cert_with_sans(&self, sans: Vec<SanType>, serial: &[u8]) -> ClientCert {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.subject_alt_names = sans;
        params.serial_number = Some(SerialNumber::from_slice(serial));
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();

        ClientCert {
            cert: cert.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        }
    }
}

// ============================================================================
// Fake Authorize service
// ============================================================================

/// How the fake endpoint answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Allow `web => db`, deny everything else
    Intentions,
    /// Reply with this status and an empty body
    Status(u16),
    /// Reply 200 with a body that is not a verdict
    Malformed,
    /// Never reply
    Hang,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub request: AuthorizationRequest,
    pub host: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Clone)]
struct FakeState {
    behavior: Arc<Mutex<Behavior>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

pub struct FakeAuthorize {
    pub addr: SocketAddr,
    state: FakeState,
}

impl FakeAuthorize {
    pub async fn start(behavior: Behavior) -> Self {
        Self::start_on(0, behavior).await
    }

    /// Start on a fixed local port, e.g. one a gateway already points at
    pub async fn start_on(port: u16, behavior: Behavior) -> Self {
        let state = FakeState {
            behavior: Arc::new(Mutex::new(behavior)),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route(AUTHORIZE_PATH, post(authorize_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.state.behavior.lock().unwrap() = behavior;
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn authorize_handler(
    State(state): State<FakeState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(request) = serde_json::from_slice::<AuthorizationRequest>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    state.requests.lock().unwrap().push(Recorded {
        request: request.clone(),
        host: header_value(&headers, header::HOST),
        content_type: header_value(&headers, header::CONTENT_TYPE),
    });

    let behavior = *state.behavior.lock().unwrap();
    match behavior {
        Behavior::Intentions => Json(intention_verdict(&request)).into_response(),
        Behavior::Status(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Behavior::Malformed => (StatusCode::OK, "{\"Authorized\": \"maybe\"").into_response(),
        Behavior::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}

fn intention_verdict(request: &AuthorizationRequest) -> AuthorizationVerdict {
    if request.target == "db" && request.client_service() == "web" {
        AuthorizationVerdict::allow("Matched intention: web => db (allow)")
    } else {
        AuthorizationVerdict::deny()
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// ============================================================================
// Upstream
// ============================================================================

/// TCP echo server standing in for the protected service
pub async fn spawn_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// A local port with nothing listening on it
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
