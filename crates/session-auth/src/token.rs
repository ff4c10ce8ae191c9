//! Token endpoint exchanges
//!
//! Handles the two token endpoint interactions:
//! 1. Login: username/password exchanged for a credential pair
//! 2. Refresh: refresh credential exchanged for a new access credential
//!
//! Both are JSON POSTs through the same `Transport` as every other call, so
//! they share its base URL and timeout. Neither attaches a bearer credential.

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;
use transport::{HttpRequest, HttpResponse, Transport};

use crate::constants::{LOGIN_PATH, REFRESH_PATH};
use crate::credentials::CredentialPair;
use crate::error::{Error, Result};

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Success body of the refresh endpoint.
///
/// A rotated `refresh` value in the body is ignored; the stored refresh
/// credential is kept as-is.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
}

/// Exchange a refresh credential for a new access credential.
pub async fn refresh_access(transport: &dyn Transport, refresh: &str) -> Result<RefreshResponse> {
    let request = HttpRequest::post(REFRESH_PATH)
        .with_json(&RefreshRequest { refresh })
        .map_err(|e| Error::Http(e.to_string()))?;
    let response = transport
        .send(&request)
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    if !response.is_success() {
        // 401/403 means the refresh credential is revoked, expired or invalid
        if response.status == 401 || response.status == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh credential rejected ({}): {}",
                response.status,
                response.text()
            )));
        }
        return Err(Error::TokenExchange(format!(
            "token refresh returned {}: {}",
            response.status,
            response.text()
        )));
    }

    let body: RefreshResponse = response
        .json()
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;
    if body.access.is_empty() {
        return Err(Error::TokenExchange(
            "refresh response carried an empty access credential".into(),
        ));
    }
    debug!("refresh exchange succeeded");
    Ok(body)
}

/// Exchange username and password for a credential pair.
pub async fn obtain_pair(
    transport: &dyn Transport,
    username: &str,
    password: &Secret<String>,
) -> Result<CredentialPair> {
    let request = HttpRequest::post(LOGIN_PATH)
        .with_json(&LoginRequest {
            username,
            password: password.expose(),
        })
        .map_err(|e| Error::Http(e.to_string()))?;
    let response = transport
        .send(&request)
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    if !response.is_success() {
        return Err(login_failure(&response));
    }

    let pair: CredentialPair = response
        .json()
        .map_err(|e| Error::TokenExchange(format!("invalid login response: {e}")))?;
    if !pair.is_complete() {
        return Err(Error::TokenExchange(
            "login response is missing a credential".into(),
        ));
    }
    debug!(username, "login exchange succeeded");
    Ok(pair)
}

fn login_failure(response: &HttpResponse) -> Error {
    match response.status {
        400 | 401 | 403 => Error::InvalidCredentials(format!(
            "login rejected ({}): {}",
            response.status,
            response.text()
        )),
        status => Error::TokenExchange(format!("login returned {status}: {}", response.text())),
    }
}
