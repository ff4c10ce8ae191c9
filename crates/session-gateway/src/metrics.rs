//! Session layer metrics
//!
//! Recorded through the `metrics` facade; the binary decides where they go.
//!
//! - `session_refresh_total` (counter): label `outcome`
//! - `session_replays_total` (counter): label `outcome`
//! - `session_auth_failures_total` (counter): label `kind`

/// Record the end of one refresh cycle.
///
/// `outcome` is `success`, `superseded` or a `SessionEndReason` label.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
}

/// Record the result of replaying a request after a refresh.
pub fn record_replay(outcome: &'static str) {
    metrics::counter!("session_replays_total", "outcome" => outcome).increment(1);
}

/// Record a 401 classified by the gateway (`recoverable` / `unrecoverable`).
pub fn record_auth_failure(kind: &'static str) {
    metrics::counter!("session_auth_failures_total", "kind" => kind).increment(1);
}
