//! reqwest-backed transport.
//!
//! Every request path is joined onto a single base URL and sent with the
//! configured timeout. Non-2xx statuses are returned as responses, not errors:
//! deciding what a 401 means is the session layer's job.

use crate::{HttpRequest, HttpResponse, Result, Transport, TransportError};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Production transport over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Join a base URL and a relative path with exactly one `/` between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl Transport for ReqwestTransport {
    fn id(&self) -> &str {
        "reqwest"
    }

    fn send<'a>(
        &'a self,
        request: &'a HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + 'a>> {
        Box::pin(async move {
            let url = join_url(&self.base_url, &request.path);
            debug!(method = %request.method, path = %request.path, "sending request");

            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .headers(request.headers.clone())
                .timeout(self.timeout);
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    warn!(path = %request.path, "request timed out");
                    TransportError::Timeout(format!(
                        "{} {} after {}s",
                        request.method,
                        request.path,
                        self.timeout.as_secs()
                    ))
                } else if e.is_builder() {
                    TransportError::InvalidRequest(e.to_string())
                } else {
                    warn!(path = %request.path, error = %e, "request failed");
                    TransportError::Network(e.to_string())
                }
            })?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(format!("reading response body: {e}"))
                } else {
                    TransportError::Network(format!("reading response body: {e}"))
                }
            })?;

            debug!(path = %request.path, status, "response received");
            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}
