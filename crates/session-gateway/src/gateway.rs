//! Authenticated request path
//!
//! Every outbound call goes through `RequestGateway::send()`:
//! - attach the stored access credential as a bearer header
//! - send through the transport
//! - on a recoverable 401, wait for the shared refresh cycle and replay once
//!
//! Anything that is not a recoverable 401 (success, 4xx/5xx, unrecoverable
//! 401) is handed back to the caller untouched.

use std::sync::Arc;

use serde::Serialize;
use session_auth::CredentialStore;
use tracing::{debug, instrument, warn};
use transport::header::{AUTHORIZATION, HeaderValue};
use transport::{HttpRequest, HttpResponse, Method, Transport, TransportError};

use crate::classify::{FailureClass, classify};
use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};

/// Sends requests with the current access credential and recovers from expiry.
pub struct RequestGateway {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl RequestGateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Set `Authorization: Bearer <access>` from the store.
    ///
    /// Reads storage on every call, so a credential written by anyone else
    /// is picked up by the next request. With nothing stored, or a stored
    /// value that cannot be a header, the request goes out unauthenticated.
    pub fn attach_credential(&self, request: &mut HttpRequest) {
        let Some(access) = self.store.access() else {
            debug!(path = %request.path, "no stored credential, sending unauthenticated");
            return;
        };
        if let Some(claims) = session_auth::inspect_access(&access) {
            debug!(subject = ?claims.subject_id, "attaching access credential");
        }
        if let Err(e) = set_bearer(request, &access) {
            warn!(path = %request.path, error = %e, "stored credential unusable, sending unauthenticated");
            request.headers.remove(AUTHORIZATION);
        }
    }

    /// Send `request`, refreshing and replaying once on a recoverable 401.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        self.attach_credential(&mut request);
        let response = self.transport.send(&request).await?;

        match classify(response.status, &response.body, request.is_retried()) {
            FailureClass::NotAuthFailure => Ok(response),
            FailureClass::Unrecoverable => {
                crate::metrics::record_auth_failure("unrecoverable");
                debug!("unrecoverable auth failure, returning response");
                Err(Error::UnrecoverableAuth(Box::new(response)))
            }
            FailureClass::Recoverable => {
                crate::metrics::record_auth_failure("recoverable");
                request.mark_retried();
                debug!("recoverable auth failure, waiting for refresh");

                let access = self.coordinator.get_valid_access_credential().await?;
                set_bearer(&mut request, &access)?;
                self.replay(&request).await
            }
        }
    }

    async fn replay(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                crate::metrics::record_replay("transport_error");
                return Err(e.into());
            }
        };

        match classify(response.status, &response.body, request.is_retried()) {
            FailureClass::NotAuthFailure => {
                crate::metrics::record_replay("ok");
                Ok(response)
            }
            _ => {
                crate::metrics::record_replay("unrecoverable");
                warn!(status = response.status, "replayed request rejected again");
                Err(Error::UnrecoverableAuth(Box::new(response)))
            }
        }
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        self.send(HttpRequest::get(path)).await
    }

    pub async fn delete(&self, path: &str) -> Result<HttpResponse> {
        self.send(HttpRequest::new(Method::DELETE, path)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<HttpResponse> {
        self.send(HttpRequest::post(path).with_json(body)?).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<HttpResponse> {
        self.send(HttpRequest::new(Method::PUT, path).with_json(body)?)
            .await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<HttpResponse> {
        self.send(HttpRequest::new(Method::PATCH, path).with_json(body)?)
            .await
    }
}

fn set_bearer(request: &mut HttpRequest, access: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {access}")).map_err(|_| {
        TransportError::InvalidRequest("access credential is not a valid header value".into())
    })?;
    value.set_sensitive(true);
    request.headers.insert(AUTHORIZATION, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{SessionEndReason, SessionEvent};
    use crate::test_support::{Harness, Recorded, RefreshReply, ResourceMode};
    use serde_json::json;
    use session_auth::{CredentialPair, MemoryStore};
    use std::future::Future;
    use std::pin::Pin;

    fn recorded(path: &str, bearer: Option<&str>) -> Recorded {
        Recorded {
            path: path.to_string(),
            bearer: bearer.map(str::to_string),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn valid_credential_passes_through() {
        let h = Harness::with_pair();

        let response = h.gateway.get("users/").await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(h.api.requests(), vec![recorded("users/", Some("A1"))]);
        assert_eq!(h.api.refresh_calls(), 0);
    }

    #[test]
    fn attach_credential_is_idempotent() {
        let h = Harness::with_pair();
        let mut request = HttpRequest::get("users/");

        h.gateway.attach_credential(&mut request);
        h.gateway.attach_credential(&mut request);

        assert_eq!(request.headers.get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(request.bearer(), Some("A1"));
        assert!(request.headers[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn attach_credential_picks_up_external_writes() {
        let h = Harness::with_pair();
        h.store.save(&CredentialPair::new("B1", "R9")).unwrap();

        let mut request = HttpRequest::get("users/");
        h.gateway.attach_credential(&mut request);
        assert_eq!(request.bearer(), Some("B1"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_stored_credential_sends_unauthenticated() {
        let h = Harness::new(Some(CredentialPair::new("bad\nvalue", "R1")));
        h.api
            .set_resource_mode(ResourceMode::Always(200, json!({"public": true})));

        let response = h.gateway.get("courses/").await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(h.api.requests(), vec![recorded("courses/", None)]);
        assert_eq!(h.store.access().as_deref(), Some("bad\nvalue"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_credential_sends_unauthenticated() {
        let h = Harness::new(None);
        h.api
            .set_resource_mode(ResourceMode::Always(200, json!({"public": true})));

        let response = h.gateway.get("courses/").await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(h.api.requests(), vec![recorded("courses/", None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_expired_requests_share_one_refresh() {
        let h = Harness::with_pair();
        h.api.set_valid_access("not-A1");
        let mut events = h.notifier.subscribe();

        let (a, b, c) = tokio::join!(
            h.gateway.get("users/"),
            h.gateway.get("courses/"),
            h.gateway.get("grades/"),
        );

        for response in [a, b, c] {
            assert_eq!(response.unwrap().status, 200);
        }
        assert_eq!(h.api.refresh_calls(), 1);
        assert_eq!(h.store.load(), Some(CredentialPair::new("A2", "R1")));
        assert_eq!(
            h.api.refresh_bodies.lock().unwrap().as_slice(),
            [r#"{"refresh":"R1"}"#.to_string()]
        );

        let resources = h.api.resource_requests();
        assert_eq!(resources.len(), 6);
        assert!(resources[..3].iter().all(|r| r.bearer.as_deref() == Some("A1")));
        assert!(resources[3..].iter().all(|r| r.bearer.as_deref() == Some("A2")));
        assert_eq!(events.try_recv(), Some(SessionEvent::CredentialsUpdated));
        assert!(!h.coordinator().is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_refresh_credential_ends_session() {
        let h = Harness::new(None);
        h.api.set_reject_code(Some("user_inactive"));
        let mut events = h.notifier.subscribe();

        let err = h.gateway.get("users/").await.unwrap_err();

        assert!(matches!(err, Error::NoRefreshCredential), "got: {err:?}");
        assert!(err.is_session_ended());
        assert_eq!(h.api.refresh_calls(), 0);
        assert_eq!(h.api.resource_requests().len(), 1);
        assert!(h.store.load().is_none());
        assert_eq!(
            events.try_recv(),
            Some(SessionEvent::SessionEnded(SessionEndReason::NoRefreshCredential))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_refresh_fails_all_waiters_without_replay() {
        let h = Harness::with_pair();
        h.api.set_valid_access("not-A1");
        h.api.set_refresh_reply(RefreshReply::Status(
            401,
            json!({"detail": "Token is invalid or expired", "code": "token_not_valid"}),
        ));
        let mut events = h.notifier.subscribe();

        let (a, b) = tokio::join!(h.gateway.get("users/"), h.gateway.get("courses/"));

        for result in [a, b] {
            let err = result.unwrap_err();
            assert!(matches!(err, Error::RefreshExchangeFailed(_)), "got: {err:?}");
        }
        assert_eq!(h.api.refresh_calls(), 1);
        assert_eq!(h.api.resource_requests().len(), 2, "nothing replayed");
        assert!(h.store.load().is_none());
        assert_eq!(
            events.try_recv(),
            Some(SessionEvent::SessionEnded(SessionEndReason::RefreshRejected))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn non_recoverable_401_is_returned_without_refresh() {
        let h = Harness::with_pair();
        h.api.set_valid_access("not-A1");

        h.api.set_reject_code(Some("permission_denied"));
        let err = h.gateway.get("admin/").await.unwrap_err();
        let response = err.response().expect("response kept");
        assert_eq!(response.status, 401);
        assert!(response.text().contains("permission_denied"));

        h.api.set_reject_code(None);
        let err = h.gateway.get("admin/").await.unwrap_err();
        assert!(matches!(err, Error::UnrecoverableAuth(_)), "got: {err:?}");

        assert_eq!(h.api.refresh_calls(), 0);
        assert_eq!(h.store.load(), Some(CredentialPair::new("A1", "R1")));
    }

    #[tokio::test(start_paused = true)]
    async fn non_401_errors_are_returned_as_responses() {
        let h = Harness::with_pair();
        h.api.set_resource_mode(ResourceMode::Always(
            500,
            json!({"code": "token_expired"}),
        ));

        let response = h.gateway.get("users/").await.unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(h.api.refresh_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_request_is_not_retried_twice() {
        let h = Harness::with_pair();
        h.api.set_resource_mode(ResourceMode::Always(
            401,
            json!({"code": "token_expired"}),
        ));

        let err = h.gateway.get("users/").await.unwrap_err();

        assert!(matches!(err, Error::UnrecoverableAuth(_)), "got: {err:?}");
        assert_eq!(h.api.refresh_calls(), 1);
        assert_eq!(
            h.api.resource_requests(),
            vec![recorded("users/", Some("A1")), recorded("users/", Some("A2"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn json_helpers_send_method_and_body() {
        let h = Harness::with_pair();

        let response = h
            .gateway
            .patch_json("users/7/", &json!({"first_name": "Ada"}))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(h.gateway.put_json("users/7/", &json!({})).await.unwrap().status, 200);
        assert_eq!(h.gateway.post_json("users/", &json!({})).await.unwrap().status, 200);
        assert_eq!(h.gateway.delete("users/7/").await.unwrap().status, 200);
    }

    struct Unreachable;

    impl Transport for Unreachable {
        fn id(&self) -> &str {
            "unreachable"
        }

        fn send<'a>(
            &'a self,
            _request: &'a HttpRequest,
        ) -> Pin<Box<dyn Future<Output = transport::Result<HttpResponse>> + Send + 'a>> {
            Box::pin(async { Err(TransportError::Network("connection refused".into())) })
        }
    }

    #[tokio::test]
    async fn transport_errors_propagate_without_refresh() {
        let transport: Arc<dyn Transport> = Arc::new(Unreachable);
        let store = Arc::new(CredentialStore::new(Arc::new(MemoryStore::new())));
        store.save(&CredentialPair::new("A1", "R1")).unwrap();
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            transport.clone(),
            crate::notifier::SessionNotifier::new(),
        );
        let gateway = RequestGateway::new(transport, store.clone(), coordinator);

        let err = gateway.get("users/").await.unwrap_err();

        assert!(matches!(err, Error::Transport(TransportError::Network(_))), "got: {err:?}");
        assert!(!err.is_session_ended());
        assert_eq!(gateway.coordinator().exchanges_started(), 0);
        assert!(store.load().is_some(), "credentials untouched");
    }
}
