//! Session endpoints
//!
//! - POST /session/login   : exchange username/password for a credential pair
//! - POST /session/logout  : drop the stored pair
//! - GET  /session         : current identity, if any
//! - POST /session/password: change the password, then log out
//!
//! Credentials never appear in responses; only decoded identity claims do.

use std::time::SystemTime;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::Secret;
use serde::Deserialize;
use session_auth::Claims;
use session_gateway::Error;
use tracing::{info, warn};

use crate::AppState;
use crate::proxy::{error_response, gateway_error_response};

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    password: String,
}

fn identity_json(claims: &Claims) -> serde_json::Value {
    serde_json::json!({
        "user_id": claims.subject_id,
        "username": claims.username,
        "role": claims.role,
        "expires_at": claims.expires_at,
        "must_change_password": claims.must_change_password,
    })
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// POST /session/login
pub async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Response {
    let password = Secret::new(body.password);
    match state.session.login(&body.username, &password).await {
        Ok(identity) => {
            info!(username = %body.username, "session login");
            json_response(
                StatusCode::OK,
                serde_json::json!({
                    "authenticated": true,
                    "identity": identity.as_ref().map(identity_json),
                }),
            )
        }
        Err(Error::Credential(session_auth::Error::InvalidCredentials(msg))) => {
            warn!(username = %body.username, "login rejected");
            error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                &msg,
                &new_request_id(),
            )
        }
        Err(Error::Credential(session_auth::Error::Http(msg))) => error_response(
            StatusCode::BAD_GATEWAY,
            "upstream_error",
            &msg,
            &new_request_id(),
        ),
        Err(err) => gateway_error_response(err, &new_request_id()),
    }
}

/// POST /session/logout
pub async fn logout(State(state): State<AppState>) -> Response {
    match state.session.logout() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => gateway_error_response(err, &new_request_id()),
    }
}

/// GET /session
pub async fn identity(State(state): State<AppState>) -> Response {
    let identity = state.session.current_identity(SystemTime::now());
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "authenticated": identity.is_some(),
            "identity": identity.as_ref().map(identity_json),
        }),
    )
}

/// POST /session/password
pub async fn set_password(
    State(state): State<AppState>,
    Json(body): Json<PasswordRequest>,
) -> Response {
    let password = Secret::new(body.password);
    if password.is_blank() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "password must not be empty",
            &new_request_id(),
        );
    }
    match state.session.set_password(&password).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => gateway_error_response(err, &new_request_id()),
    }
}
