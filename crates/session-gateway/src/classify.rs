//! Failure classification for server responses
//!
//! Distinguishes 401s that a refresh can fix (the server names an expired or
//! invalid credential) from every other 401. Only the former drive the
//! refresh coordinator; everything else belongs to the caller.

/// `code` values in a 401 body that mean "refresh and try again".
pub const RECOVERABLE_CODES: &[&str] = &[
    "token_not_valid",
    "user_inactive",
    "token_expired",
    "authentication_failed",
];

/// What a response means to the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Not a 401; not ours to handle, whatever the status
    NotAuthFailure,
    /// 401 with a recoverable code on a request not yet retried
    Recoverable,
    /// Any other 401
    Unrecoverable,
}

/// Read the string `code` field of a JSON error body.
pub fn error_code(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("code")?.as_str().map(str::to_string)
}

/// Classify a response by status, body and whether the request was already retried.
pub fn classify(status: u16, body: &[u8], retried: bool) -> FailureClass {
    if status != 401 {
        return FailureClass::NotAuthFailure;
    }
    if retried {
        return FailureClass::Unrecoverable;
    }
    match error_code(body) {
        Some(code) if RECOVERABLE_CODES.contains(&code.as_str()) => FailureClass::Recoverable,
        _ => FailureClass::Unrecoverable,
    }
}
