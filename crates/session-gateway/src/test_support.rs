//! Scripted in-memory API used by the coordinator, gateway and session tests.
//!
//! Resource paths accept exactly one access credential (`valid_access`) and
//! answer 401 with `reject_code` otherwise. The refresh endpoint waits
//! `refresh_delay` (so concurrent failures pile up behind it) and then answers
//! with `refresh_reply`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use session_auth::{CredentialPair, CredentialStore, MemoryStore};
use transport::{HttpRequest, HttpResponse, Transport, TransportError};

use crate::coordinator::RefreshCoordinator;
use crate::gateway::RequestGateway;
use crate::notifier::SessionNotifier;

#[derive(Clone)]
pub(crate) enum RefreshReply {
    Access(String),
    Status(u16, serde_json::Value),
    Network,
}

/// What a resource path answers.
#[derive(Clone)]
pub(crate) enum ResourceMode {
    /// 200 for the valid credential, 401 with `reject_code` otherwise
    CheckBearer,
    /// Always this status and body
    Always(u16, serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Recorded {
    pub path: String,
    pub bearer: Option<String>,
}

pub(crate) struct ScriptedApi {
    pub valid_access: Mutex<String>,
    pub reject_code: Mutex<Option<String>>,
    pub refresh_reply: Mutex<RefreshReply>,
    pub resource_mode: Mutex<ResourceMode>,
    pub refresh_delay: Duration,
    pub refresh_calls: AtomicUsize,
    pub refresh_bodies: Mutex<Vec<String>>,
    pub requests: Mutex<Vec<Recorded>>,
}

impl ScriptedApi {
    /// Accepts `A1` until a refresh hands out `A2`.
    pub fn new() -> Self {
        Self {
            valid_access: Mutex::new("A1".into()),
            reject_code: Mutex::new(Some("token_expired".into())),
            refresh_reply: Mutex::new(RefreshReply::Access("A2".into())),
            resource_mode: Mutex::new(ResourceMode::CheckBearer),
            refresh_delay: Duration::from_millis(50),
            refresh_calls: AtomicUsize::new(0),
            refresh_bodies: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_valid_access(&self, access: &str) {
        *self.valid_access.lock().unwrap() = access.to_string();
    }

    pub fn set_reject_code(&self, code: Option<&str>) {
        *self.reject_code.lock().unwrap() = code.map(str::to_string);
    }

    pub fn set_refresh_reply(&self, reply: RefreshReply) {
        *self.refresh_reply.lock().unwrap() = reply;
    }

    pub fn set_resource_mode(&self, mode: ResourceMode) {
        *self.resource_mode.lock().unwrap() = mode;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Recorded calls to anything but the token endpoints.
    pub fn resource_requests(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| !r.path.starts_with("token/"))
            .collect()
    }

    fn resource_reply(&self, request: &HttpRequest) -> HttpResponse {
        match self.resource_mode.lock().unwrap().clone() {
            ResourceMode::Always(status, body) => HttpResponse::json_body(status, &body),
            ResourceMode::CheckBearer => {
                let valid = self.valid_access.lock().unwrap().clone();
                if request.bearer() == Some(valid.as_str()) {
                    HttpResponse::json_body(200, &serde_json::json!({"path": request.path}))
                } else {
                    let body = match self.reject_code.lock().unwrap().clone() {
                        Some(code) => serde_json::json!({"detail": "rejected", "code": code}),
                        None => serde_json::json!({"detail": "rejected"}),
                    };
                    HttpResponse::json_body(401, &body)
                }
            }
        }
    }

    fn login_reply(&self, request: &HttpRequest) -> HttpResponse {
        let body: serde_json::Value = request
            .body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or_default();
        if body["password"] == "secret" {
            let access = token_for("access", body["username"].as_str().unwrap_or(""));
            self.set_valid_access(&access);
            HttpResponse::json_body(200, &serde_json::json!({"access": access, "refresh": "R1"}))
        } else {
            HttpResponse::json_body(
                401,
                &serde_json::json!({"detail": "No active account found with the given credentials"}),
            )
        }
    }
}

impl Transport for ScriptedApi {
    fn id(&self) -> &str {
        "scripted"
    }

    fn send<'a>(
        &'a self,
        request: &'a HttpRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<HttpResponse>> + Send + 'a>> {
        self.requests.lock().unwrap().push(Recorded {
            path: request.path.clone(),
            bearer: request.bearer().map(str::to_string),
        });

        Box::pin(async move {
            match request.path.as_str() {
                "token/refresh/" => {
                    self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                    let body = request
                        .body
                        .as_ref()
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .unwrap_or_default();
                    self.refresh_bodies.lock().unwrap().push(body);
                    tokio::time::sleep(self.refresh_delay).await;

                    let reply = self.refresh_reply.lock().unwrap().clone();
                    match reply {
                        RefreshReply::Access(access) => {
                            self.set_valid_access(&access);
                            Ok(HttpResponse::json_body(
                                200,
                                &serde_json::json!({"access": access}),
                            ))
                        }
                        RefreshReply::Status(status, body) => {
                            Ok(HttpResponse::json_body(status, &body))
                        }
                        RefreshReply::Network => {
                            Err(TransportError::Network("connection reset".into()))
                        }
                    }
                }
                "token/" => Ok(self.login_reply(request)),
                _ => Ok(self.resource_reply(request)),
            }
        })
    }
}

/// Unsigned compact token with the given kind and username.
pub(crate) fn token_for(kind: &str, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({
            "token_type": kind,
            "user_id": 7,
            "role": "STUDENT",
            "username": username,
            "exp": 4_102_444_800u64,
        })
        .to_string(),
    );
    format!("{header}.{payload}.sig")
}

/// Everything a gateway test needs, wired around one `ScriptedApi`.
pub(crate) struct Harness {
    pub api: Arc<ScriptedApi>,
    pub store: Arc<CredentialStore>,
    pub notifier: SessionNotifier,
    pub gateway: Arc<RequestGateway>,
}

impl Harness {
    /// Stored pair `{A1, R1}` unless `pair` says otherwise.
    pub fn new(pair: Option<CredentialPair>) -> Self {
        let api = Arc::new(ScriptedApi::new());
        let store = Arc::new(CredentialStore::new(Arc::new(MemoryStore::new())));
        if let Some(pair) = pair {
            store.save(&pair).unwrap();
        }
        let notifier = SessionNotifier::new();
        let coordinator = RefreshCoordinator::new(store.clone(), api.clone(), notifier.clone());
        let gateway = Arc::new(RequestGateway::new(api.clone(), store.clone(), coordinator));
        Self {
            api,
            store,
            notifier,
            gateway,
        }
    }

    pub fn with_pair() -> Self {
        Self::new(Some(CredentialPair::new("A1", "R1")))
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        self.gateway.coordinator()
    }
}
