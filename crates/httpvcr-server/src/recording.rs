// SPDX-License-Identifier: Apache-2.0

//! Recording transport: a proxying round-tripper that forwards requests to
//! the live upstream and persists `GET 200` JSON responses as stubs.
//!
//! The transport never fails the caller's request because of a recording
//! problem, and the bytes it returns are exactly the bytes the upstream
//! produced, whether or not a stub was written.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use http::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode, Uri};
use httpvcr_archive::{Archive, RequestSpec, ResponseMeta};
use httpvcr_core::diversifier::{parse_query, request_diversifier};
use httpvcr_core::{Endpoint, Result, VcrError};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::matcher::RouteMatcher;

/// A request as seen by the proxy, before it reaches the upstream.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Absolute request URI.
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl ProxyRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
        }
    }
}

/// The upstream's answer, held in full so it can be both inspected for
/// recording and handed back to the caller untouched.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The live upstream leg of the recording proxy.
#[async_trait]
pub trait UpstreamTransport: Send + Sync + 'static {
    async fn round_trip(&self, req: &ProxyRequest) -> Result<UpstreamResponse>;
}

/// Default upstream transport backed by a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn round_trip(&self, req: &ProxyRequest) -> Result<UpstreamResponse> {
        let response = self
            .client
            .request(req.method.clone(), req.uri.to_string())
            .headers(req.headers.clone())
            .send()
            .await
            .map_err(upstream_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(upstream_error)?;
        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

fn upstream_error(err: reqwest::Error) -> VcrError {
    VcrError::io(
        "upstream round trip",
        std::io::Error::new(std::io::ErrorKind::Other, err),
    )
}

struct RecorderState {
    archive: Archive,
    variants_seen: HashMap<String, HashSet<String>>,
}

/// Proxying round-tripper that records matched `GET 200` JSON responses.
///
/// All recorder bookkeeping, including the variant heuristic's policy write
/// and stub deletion, happens under one lock: the heuristic triggers at most
/// once per endpoint per session.
pub struct RecordingTransport {
    matcher: RouteMatcher,
    upstream: Arc<dyn UpstreamTransport>,
    max_variants: usize,
    state: Mutex<RecorderState>,
}

impl RecordingTransport {
    pub fn new(
        archive: Archive,
        endpoints: &[Endpoint],
        upstream: Arc<dyn UpstreamTransport>,
        max_variants: usize,
    ) -> Self {
        Self {
            matcher: RouteMatcher::new(endpoints),
            upstream,
            max_variants,
            state: Mutex::new(RecorderState {
                archive,
                variants_seen: HashMap::new(),
            }),
        }
    }

    /// Forwards the request upstream and, on the recording path, persists a
    /// stub. Recording failures are logged and swallowed.
    pub async fn round_trip(&self, req: &ProxyRequest) -> Result<UpstreamResponse> {
        let matched = self
            .matcher
            .match_request(req.method.as_str(), req.uri.path());
        let query = parse_query(req.uri.query().unwrap_or(""));
        let diversifier = match &matched {
            Some((name, vars)) => {
                let state = self.state.lock().await;
                request_diversifier(&state.archive.policy, name, &query, vars)
            }
            None => String::new(),
        };

        let resp = self.upstream.round_trip(req).await?;

        // Record only GET 200 responses for known endpoints.
        let Some((name, _vars)) = matched else {
            return Ok(resp);
        };
        if req.method != Method::GET || resp.status != StatusCode::OK {
            return Ok(resp);
        }

        let mut state = self.state.lock().await;

        let auth_header = req
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if !state.archive.policy.allow_record(auth_header) {
            debug!(endpoint = name, "recording skipped: authorization gate denied");
            return Ok(resp);
        }

        // Auto-tune only while variant.query is implicit.
        if !diversifier.is_empty() && !state.archive.policy.query_variant_enabled(name).1 {
            if self.observe_variant(&mut state, name, &diversifier) {
                warn!(
                    endpoint = name,
                    variant = %diversifier,
                    max_variants = self.max_variants,
                    "too many query variants; set variant.query=false and deleted existing stubs"
                );
                // The next request, now undiversified, lands the canonical stub.
                return Ok(resp);
            }
        }

        let decoded = decode_body(&resp);
        let Ok(value) = serde_json::from_slice::<Value>(&decoded) else {
            debug!(endpoint = name, "recording skipped: body is not JSON");
            return Ok(resp);
        };
        let pretty = pretty_json(&value);
        let mime_type = resp
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();

        let exists = match state.archive.has_stub(name, &diversifier) {
            Ok(exists) => exists,
            Err(err) => {
                error!(endpoint = name, error = %err, "stub exists check failed");
                return Ok(resp);
            }
        };
        let action = if exists { "update" } else { "create" };

        let req_spec = RequestSpec::new(req.uri.to_string());
        let meta = ResponseMeta {
            status: resp.status.as_u16(),
            headers: first_header_values(&resp.headers),
            mime_type,
            size: pretty.len(),
        };
        if let Err(err) = state
            .archive
            .write_stub(name, &req_spec, &meta, &pretty, &diversifier)
        {
            error!(endpoint = name, error = %err, "stub write failed");
            return Ok(resp);
        }

        info!(endpoint = name, variant = %diversifier, action, "recorded stub");
        Ok(resp)
    }

    /// Tracks a diversifier sighting; flips the endpoint to non-diversified
    /// once the distinct count exceeds the budget. Returns whether the
    /// heuristic fired. If the policy cannot be persisted the in-memory flip
    /// is rolled back and recording proceeds normally.
    fn observe_variant(&self, state: &mut RecorderState, name: &str, diversifier: &str) -> bool {
        if self.max_variants == 0 {
            return false;
        }

        let seen = state.variants_seen.entry(name.to_string()).or_default();
        seen.insert(diversifier.to_string());
        if seen.len() <= self.max_variants {
            return false;
        }

        state.archive.policy.set_variant_query(name, false);
        if let Err(err) = state.archive.write_policy() {
            error!(endpoint = name, error = %err, "failed to persist policy update");
            state.archive.policy.clear_variant_query(name);
            return false;
        }

        if let Err(err) = state.archive.delete_endpoint_stubs(name) {
            error!(endpoint = name, error = %err, "failed to delete endpoint stubs");
        }
        state.variants_seen.remove(name);
        true
    }
}

/// Transparently undoes gzip for persistence; the caller still receives the
/// original encoded bytes. Decode failures fall back to the raw body.
fn decode_body(resp: &UpstreamResponse) -> Vec<u8> {
    let gzipped = resp
        .headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    if !gzipped {
        return resp.body.to_vec();
    }
    let mut decoder = GzDecoder::new(resp.body.as_ref());
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => out,
        Err(_) => resp.body.to_vec(),
    }
}

fn pretty_json(value: &Value) -> Vec<u8> {
    let mut out = serde_json::to_vec_pretty(value).unwrap_or_else(|_| value.to_string().into_bytes());
    out.push(b'\n');
    out
}

fn first_header_values(headers: &HeaderMap) -> std::collections::BTreeMap<String, String> {
    let mut out = std::collections::BTreeMap::new();
    for (name, value) in headers {
        let Ok(text) = value.to_str() else { continue };
        out.entry(canonical_header_name(name.as_str()))
            .or_insert_with(|| text.to_string());
    }
    out
}

/// HeaderMap lowercases names; stubs keep the conventional capitalization so
/// the archive stays friendly to human readers.
fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for ch in name.chars() {
        if ch == '-' {
            out.push('-');
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
