//! Server contract constants
//!
//! Relative endpoint paths (joined onto the transport's base URL), the
//! persistence key and the token-kind claim expected on access credentials.

/// Login endpoint: `{username, password}` → `{access, refresh}`
pub const LOGIN_PATH: &str = "token/";

/// Refresh endpoint: `{refresh}` → `{access}`
pub const REFRESH_PATH: &str = "token/refresh/";

/// Password change endpoint for the authenticated user
pub const SET_PASSWORD_PATH: &str = "auth/set-password/";

/// Well-known persistence key holding the serialized credential pair
pub const STORAGE_KEY: &str = "authTokens";

/// `token_type` claim value carried by access credentials
pub const ACCESS_TOKEN_KIND: &str = "access";
