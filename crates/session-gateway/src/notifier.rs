//! Session event broadcast
//!
//! Typed publish/subscribe over a tokio broadcast channel. Delivery is
//! best-effort: a subscriber only sees events sent while it is subscribed,
//! and a subscriber that falls more than `capacity` events behind skips the
//! oldest ones.

use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// A refresh was needed but no refresh credential was stored
    NoRefreshCredential,
    /// The refresh exchange failed or its result could not be stored
    RefreshRejected,
    /// Explicit logout
    LoggedOut,
}

impl SessionEndReason {
    pub fn label(&self) -> &'static str {
        match self {
            SessionEndReason::NoRefreshCredential => "no_refresh_credential",
            SessionEndReason::RefreshRejected => "refresh_rejected",
            SessionEndReason::LoggedOut => "logged_out",
        }
    }
}

/// Credential lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    CredentialsUpdated,
    /// Credentials were cleared; the application should return to an
    /// unauthenticated state.
    SessionEnded(SessionEndReason),
}

const DEFAULT_CAPACITY: usize = 16;

/// Broadcast handle. Cheap to clone; all clones share subscribers.
#[derive(Clone)]
pub struct SessionNotifier {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Send `event` to current subscribers. Returns how many were reached.
    pub fn notify(&self, event: SessionEvent) -> usize {
        match self.tx.send(event) {
            Ok(listeners) => listeners,
            Err(broadcast::error::SendError(event)) => {
                debug!(?event, "no session listeners");
                0
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One listener's view of the event stream. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<SessionEvent>,
}

impl Subscription {
    /// Next event, or `None` once every notifier handle is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session listener lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered event, without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "session listener lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
