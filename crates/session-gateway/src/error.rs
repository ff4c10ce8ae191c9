//! Error types crossing the session layer boundary

use transport::{HttpResponse, TransportError};

/// Outcome of a failed refresh cycle, shared by every waiter of that cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh credential stored")]
    NoRefreshCredential,

    #[error("refresh exchange failed: {0}")]
    ExchangeFailed(String),
}

/// Errors returned to callers of the gateway and session client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session ended: no refresh credential stored")]
    NoRefreshCredential,

    #[error("session ended: refresh exchange failed: {0}")]
    RefreshExchangeFailed(String),

    /// A 401 this layer does not recover from, returned unchanged.
    #[error("authentication failed with status {}: {}", .0.status, .0.text())]
    UnrecoverableAuth(Box<HttpResponse>),

    /// A session operation the server answered with a non-success status.
    #[error("request rejected with status {}: {}", .0.status, .0.text())]
    Rejected(Box<HttpResponse>),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("credential error: {0}")]
    Credential(#[from] session_auth::Error),
}

impl Error {
    /// True when the session is gone and the user has to log in again.
    pub fn is_session_ended(&self) -> bool {
        matches!(
            self,
            Error::NoRefreshCredential | Error::RefreshExchangeFailed(_)
        )
    }

    /// The untouched server response, when one was received.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Error::UnrecoverableAuth(response) | Error::Rejected(response) => Some(response),
            _ => None,
        }
    }
}

impl From<RefreshError> for Error {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::NoRefreshCredential => Error::NoRefreshCredential,
            RefreshError::ExchangeFailed(msg) => Error::RefreshExchangeFailed(msg),
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_errors_map_to_session_ended() {
        let no_refresh: Error = RefreshError::NoRefreshCredential.into();
        assert!(matches!(no_refresh, Error::NoRefreshCredential));
        assert!(no_refresh.is_session_ended());

        let failed: Error = RefreshError::ExchangeFailed("rejected".into()).into();
        assert!(matches!(failed, Error::RefreshExchangeFailed(ref m) if m == "rejected"));
        assert!(failed.is_session_ended());
    }

    #[test]
    fn unrecoverable_auth_keeps_response() {
        let response = HttpResponse::json_body(401, &serde_json::json!({"code": "permission_denied"}));
        let err = Error::UnrecoverableAuth(Box::new(response));
        assert!(!err.is_session_ended());
        assert_eq!(err.response().map(|r| r.status), Some(401));
        assert!(err.to_string().contains("permission_denied"), "got: {err}");
    }

    #[test]
    fn transport_errors_are_not_session_ended() {
        let err: Error = TransportError::Timeout("15s".into()).into();
        assert!(!err.is_session_ended());
        assert!(err.response().is_none());
    }
}
