//! Error types for credential operations

/// Errors from credential storage and token endpoint exchanges.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
