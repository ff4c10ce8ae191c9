//! Session lifecycle around the gateway
//!
//! `SessionClient` owns one credential store, one notifier, one refresh
//! coordinator and the gateway that ties them together. Login, logout and
//! password changes all go through it so the notifier sees every transition.

use std::sync::Arc;
use std::time::SystemTime;

use common::Secret;
use serde::Serialize;
use session_auth::{Claims, CredentialStore, KeyValueStore, SET_PASSWORD_PATH};
use tracing::{debug, info};
use transport::Transport;

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::gateway::RequestGateway;
use crate::notifier::{SessionEndReason, SessionEvent, SessionNotifier, Subscription};

#[derive(Serialize)]
struct SetPasswordRequest<'a> {
    password: &'a str,
}

/// A logged-in (or not yet logged-in) user session against one API.
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    notifier: SessionNotifier,
    gateway: RequestGateway,
}

impl SessionClient {
    pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self::with_store(transport, CredentialStore::new(storage))
    }

    pub fn with_store(transport: Arc<dyn Transport>, store: CredentialStore) -> Self {
        let store = Arc::new(store);
        let notifier = SessionNotifier::new();
        let coordinator = RefreshCoordinator::new(store.clone(), transport.clone(), notifier.clone());
        let gateway = RequestGateway::new(transport.clone(), store.clone(), coordinator);
        Self {
            transport,
            store,
            notifier,
            gateway,
        }
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn notifier(&self) -> &SessionNotifier {
        &self.notifier
    }

    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    /// Exchange username and password for a credential pair and store it.
    ///
    /// Returns the identity carried by the new access credential, if it decodes.
    pub async fn login(&self, username: &str, password: &Secret<String>) -> Result<Option<Claims>> {
        let pair = session_auth::obtain_pair(self.transport.as_ref(), username, password).await?;
        self.store.save(&pair)?;
        info!(username, "logged in");
        self.notifier.notify(SessionEvent::LoggedIn);
        Ok(session_auth::decode(&pair.access).ok())
    }

    /// Drop the stored credentials and end the session.
    pub fn logout(&self) -> Result<()> {
        self.store.clear()?;
        info!("logged out");
        self.notifier
            .notify(SessionEvent::SessionEnded(SessionEndReason::LoggedOut));
        Ok(())
    }

    /// Change the password of the current user, then log out.
    pub async fn set_password(&self, password: &Secret<String>) -> Result<()> {
        let body = SetPasswordRequest {
            password: password.expose(),
        };
        let response = self.gateway.post_json(SET_PASSWORD_PATH, &body).await?;
        if !response.is_success() {
            return Err(Error::Rejected(Box::new(response)));
        }
        debug!("password changed, ending session");
        self.logout()
    }

    /// Identity from the stored access credential.
    ///
    /// `None` when nothing is stored or the credential is undecodable or
    /// expired at `now`.
    pub fn current_identity(&self, now: SystemTime) -> Option<Claims> {
        let access = self.store.access()?;
        let claims = session_auth::decode(&access).ok()?;
        if session_auth::is_expired(&claims, now) {
            debug!("stored access credential has expired");
            return None;
        }
        Some(claims)
    }
}
