//! Single-flight refresh state machine
//!
//! The coordinator is either `Idle` or `Refreshing`. The first caller that
//! needs a fresh access credential while `Idle` flips the state to
//! `Refreshing` before anything is awaited and spawns the refresh cycle on
//! its own task; every caller arriving while `Refreshing` queues a oneshot
//! waiter instead of starting another exchange.
//!
//! When the cycle settles the whole queue is drained under the same lock
//! that flips the state back to `Idle`, so each waiter observes the outcome
//! of the cycle it joined, never a later one.
//!
//! Transitions:
//! - Idle → Refreshing (first recoverable failure)
//! - Refreshing → Refreshing (more failures join the queue)
//! - Refreshing → Idle (cycle settled, queue drained)
//!
//! A cycle whose pair was cleared or replaced while the exchange was in
//! flight (logout, a new login) is superseded: the exchanged credential is
//! dropped, waiters fail, and the store is left to whoever changed it.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use session_auth::CredentialStore;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use transport::Transport;

use crate::error::RefreshError;
use crate::notifier::{SessionEndReason, SessionEvent, SessionNotifier};

type Outcome = Result<String, RefreshError>;
type Waiter = oneshot::Sender<Outcome>;

enum CycleError {
    Failed(RefreshError),
    Superseded,
}

impl From<RefreshError> for CycleError {
    fn from(err: RefreshError) -> Self {
        CycleError::Failed(err)
    }
}

enum RefreshState {
    Idle,
    Refreshing {
        /// Caller that started the cycle; settled after the queue
        leader: Waiter,
        waiters: Vec<Waiter>,
    },
}

struct Inner {
    state: Mutex<RefreshState>,
    store: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    notifier: SessionNotifier,
    exchanges: AtomicU64,
}

/// Obtains a new access credential on behalf of any number of concurrent callers.
///
/// One instance per session. Clones share state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        transport: Arc<dyn Transport>,
        notifier: SessionNotifier,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::Idle),
                store,
                transport,
                notifier,
                exchanges: AtomicU64::new(0),
            }),
        }
    }

    /// Wait for the outcome of the current refresh cycle, starting one if idle.
    ///
    /// Dropping the returned future only abandons this caller's interest;
    /// the exchange and every other waiter are unaffected.
    pub async fn get_valid_access_credential(&self) -> Result<String, RefreshError> {
        let (tx, rx) = oneshot::channel();
        let start_cycle = {
            let mut state = self.inner.state();
            match &mut *state {
                RefreshState::Refreshing { waiters, .. } => {
                    waiters.push(tx);
                    debug!(queued = waiters.len(), "refresh in flight, queued waiter");
                    false
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing {
                        leader: tx,
                        waiters: Vec::new(),
                    };
                    true
                }
            }
        };

        if start_cycle {
            self.inner.exchanges.fetch_add(1, Ordering::Relaxed);
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.run_cycle().await });
        }

        rx.await.unwrap_or_else(|_| {
            Err(RefreshError::ExchangeFailed(
                "refresh task ended without a result".into(),
            ))
        })
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.state(), RefreshState::Refreshing { .. })
    }

    /// Callers queued behind the one that started the current cycle.
    pub fn pending_waiters(&self) -> usize {
        match &*self.inner.state() {
            RefreshState::Refreshing { waiters, .. } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Refresh cycles started since creation.
    pub fn exchanges_started(&self) -> u64 {
        self.inner.exchanges.load(Ordering::Relaxed)
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RefreshState> {
        // Every critical section is a plain field swap; a poisoned lock holds valid state
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_cycle(&self) {
        let outcome = match self.exchange().await {
            Ok(access) => {
                info!("access credential refreshed");
                crate::metrics::record_refresh("success");
                self.notifier.notify(SessionEvent::CredentialsUpdated);
                Ok(access)
            }
            Err(CycleError::Superseded) => {
                info!("credentials changed during refresh, discarding exchanged credential");
                crate::metrics::record_refresh("superseded");
                Err(RefreshError::ExchangeFailed(
                    "session changed during refresh".into(),
                ))
            }
            Err(CycleError::Failed(e)) => {
                let reason = match e {
                    RefreshError::NoRefreshCredential => SessionEndReason::NoRefreshCredential,
                    RefreshError::ExchangeFailed(_) => SessionEndReason::RefreshRejected,
                };
                warn!(error = %e, reason = reason.label(), "refresh failed, ending session");
                crate::metrics::record_refresh(reason.label());
                if let Err(clear_err) = self.store.clear() {
                    warn!(error = %clear_err, "failed to clear credentials after refresh failure");
                }
                self.notifier.notify(SessionEvent::SessionEnded(reason));
                Err(e)
            }
        };

        self.settle(outcome);
    }

    /// Steps 1–3 of a cycle: load, exchange, persist unless the pair changed.
    async fn exchange(&self) -> Result<String, CycleError> {
        let (pair, generation) = self.store.load_versioned();
        let pair = pair.ok_or(RefreshError::NoRefreshCredential)?;

        let response = session_auth::refresh_access(self.transport.as_ref(), &pair.refresh)
            .await
            .map_err(|e| RefreshError::ExchangeFailed(e.to_string()))?;

        let updated = pair.with_access(response.access);
        let saved = self
            .store
            .save_if_unchanged(&updated, generation)
            .map_err(|e| {
                RefreshError::ExchangeFailed(format!("persisting refreshed credential: {e}"))
            })?;
        if !saved {
            return Err(CycleError::Superseded);
        }
        Ok(updated.access)
    }

    /// Drain the queue and return to `Idle` in one step, then deliver.
    fn settle(&self, outcome: Outcome) {
        let drained = mem::replace(&mut *self.state(), RefreshState::Idle);
        let RefreshState::Refreshing { leader, waiters } = drained else {
            warn!("refresh cycle settled while idle");
            return;
        };

        debug!(waiters = waiters.len(), ok = outcome.is_ok(), "settling refresh waiters");
        for waiter in waiters {
            // A dropped receiver is a cancelled caller
            let _ = waiter.send(outcome.clone());
        }
        let _ = leader.send(outcome);
    }
}
