// SPDX-License-Identifier: Apache-2.0

//! Loopback bypass: scenario handlers that need unmodified archive data can
//! call back into the playback server, tagging the request so dispatch
//! short-circuits to the archive instead of re-entering scenario handlers.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::{HeaderValue, StatusCode};
use httpvcr_core::{Result, VcrError};
use serde_json::Value;

/// Header identifying intra-process loopback requests. Any non-empty value
/// triggers the bypass.
pub const LOOPBACK_HEADER: &str = "x-vcr-loopback";

/// Request-extension marker stamped by [`loopback_middleware`].
#[derive(Debug, Clone, Copy)]
pub struct LoopbackMark;

/// Tags request extensions when [`LOOPBACK_HEADER`] is present, so the
/// marker survives into dispatch regardless of how the request travels.
pub async fn loopback_middleware(mut req: Request, next: Next) -> Response {
    let marked = req
        .headers()
        .get(LOOPBACK_HEADER)
        .is_some_and(|v| !v.is_empty());
    if marked {
        req.extensions_mut().insert(LoopbackMark);
    }
    next.run(req).await
}

#[must_use]
pub fn is_loopback<B>(req: &http::Request<B>) -> bool {
    req.extensions().get::<LoopbackMark>().is_some()
}

/// HTTP client for scenario handlers calling back into the playback server.
/// Every request carries [`LOOPBACK_HEADER`], so answers always come from
/// the archive.
pub struct LoopbackClient {
    base_url: String,
    client: reqwest::Client,
}

impl LoopbackClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(VcrError::NotConfigured(format!(
                "invalid loopback base URL {base_url:?}"
            )));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Issues a loopback GET and decodes the JSON response body.
    pub async fn get_json(&self, path_and_query: &str) -> Result<(StatusCode, Value)> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .client
            .get(&url)
            .header(LOOPBACK_HEADER, HeaderValue::from_static("1"))
            .send()
            .await
            .map_err(|err| loopback_error(&url, err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| loopback_error(&url, err))?;
        let value = serde_json::from_slice(&body).map_err(|err| {
            VcrError::io(
                format!("loopback response from {url} is not JSON"),
                std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            )
        })?;
        Ok((status, value))
    }
}

fn loopback_error(url: &str, err: reqwest::Error) -> VcrError {
    VcrError::io(
        format!("loopback request to {url}"),
        std::io::Error::new(std::io::ErrorKind::Other, err),
    )
}
