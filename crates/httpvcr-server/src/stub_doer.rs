// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use httpvcr_archive::Archive;
use httpvcr_core::diversifier::{parse_query, request_diversifier};
use httpvcr_core::{Endpoint, VcrError};
use tracing::warn;

use crate::matcher::RouteMatcher;

/// A reconstructed response served from the archive.
#[derive(Debug)]
pub struct StubResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Serves HTTP responses straight from archived stubs: the Background leg of
/// playback, and the target of loopback-bypassed requests.
pub struct StubDoer {
    archive: Arc<Archive>,
    matcher: Arc<RouteMatcher>,
}

impl StubDoer {
    #[must_use]
    pub fn new(archive: Arc<Archive>, endpoints: &[Endpoint]) -> Self {
        Self {
            archive,
            matcher: Arc::new(RouteMatcher::new(endpoints)),
        }
    }

    pub(crate) fn with_matcher(archive: Arc<Archive>, matcher: Arc<RouteMatcher>) -> Self {
        Self { archive, matcher }
    }

    /// Resolves a request to a stub and reconstructs the archived response.
    /// Unknown routes and recording gaps answer 501; archive faults 500.
    #[must_use]
    pub fn handle(&self, method: &Method, uri: &Uri) -> StubResponse {
        let Some((name, vars)) = self.matcher.match_request(method.as_str(), uri.path()) else {
            return plain_response(StatusCode::NOT_IMPLEMENTED, "vcr: unstubbed endpoint");
        };

        let query = parse_query(uri.query().unwrap_or(""));
        let diversifier = request_diversifier(&self.archive.policy, name, &query, &vars);

        let (meta, body) = match self.archive.read_response(name, &diversifier) {
            Ok(found) => found,
            Err(err) if err.is_not_found() => {
                return plain_response(StatusCode::NOT_IMPLEMENTED, "vcr: unstubbed endpoint");
            }
            Err(err) => {
                warn!(endpoint = name, error = %err, "stub read failed");
                return plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "vcr: failed to read stub",
                );
            }
        };

        let status = if meta.status == 0 {
            StatusCode::OK
        } else {
            StatusCode::from_u16(meta.status).unwrap_or(StatusCode::OK)
        };

        let mut headers = HeaderMap::with_capacity(meta.headers.len() + 2);
        for (key, value) in &meta.headers {
            // Stored hop-by-hop framing headers would lie about the body we
            // actually serve.
            if key.eq_ignore_ascii_case(CONTENT_LENGTH.as_str())
                || key.eq_ignore_ascii_case(TRANSFER_ENCODING.as_str())
            {
                continue;
            }
            let Ok(header_name) = HeaderName::from_bytes(key.as_bytes()) else {
                continue;
            };
            let Ok(header_value) = HeaderValue::from_str(value) else {
                continue;
            };
            headers.insert(header_name, header_value);
        }
        if !headers.contains_key(CONTENT_TYPE) && !meta.mime_type.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&meta.mime_type) {
                headers.insert(CONTENT_TYPE, value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&body.len().to_string()) {
            headers.insert(CONTENT_LENGTH, value);
        }

        StubResponse {
            status,
            headers,
            body: Bytes::from(body),
        }
    }
}

pub(crate) fn plain_response(status: StatusCode, message: &str) -> StubResponse {
    let body = Bytes::from(message.to_string());
    let mut headers = HeaderMap::with_capacity(2);
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&body.len().to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    StubResponse {
        status,
        headers,
        body,
    }
}

/// Maps engine errors to playback responses per the error taxonomy.
pub(crate) fn error_response(err: &VcrError) -> StubResponse {
    match err {
        VcrError::NotFound { .. } | VcrError::MatchMiss { .. } => {
            plain_response(StatusCode::NOT_IMPLEMENTED, "vcr: unstubbed endpoint")
        }
        _ => plain_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("vcr: {err}")),
    }
}
