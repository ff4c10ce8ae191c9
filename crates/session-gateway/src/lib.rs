//! Token-refresh coordination for outbound API calls
//!
//! Wraps a `Transport` so every call carries the current access credential and
//! recovers from an expired one without the caller noticing. Many calls can
//! fail with a recoverable 401 at once; they share a single refresh exchange
//! and are each replayed once with the new credential, or all fail with the
//! same error when the refresh itself fails.
//!
//! Request lifecycle:
//! 1. `RequestGateway::send()` attaches `Authorization: Bearer <access>`
//! 2. Server answers 401 with a recoverable `code` → request marked retried
//! 3. `RefreshCoordinator` joins the in-flight refresh or starts one
//! 4. Success → pair persisted, `CredentialsUpdated` broadcast, request replayed
//! 5. Failure → pair cleared, `SessionEnded` broadcast, every waiter fails alike

pub mod classify;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod notifier;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use classify::{FailureClass, RECOVERABLE_CODES, classify, error_code};
pub use coordinator::RefreshCoordinator;
pub use error::{Error, RefreshError, Result};
pub use gateway::RequestGateway;
pub use notifier::{SessionEndReason, SessionEvent, SessionNotifier, Subscription};
pub use session::SessionClient;
