// SPDX-License-Identifier: Apache-2.0

//! Playback dispatch: per endpoint, choose between a scenario handler, the
//! archive-backed Background leg, or the loopback bypass.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{Method, StatusCode, Uri};
use httpvcr_archive::Archive;
use httpvcr_core::diversifier::parse_query;
use httpvcr_core::{Endpoint, VcrError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::loopback::is_loopback;
use crate::matcher::RouteMatcher;
use crate::scenario::{EventSink, Scenario, ScenarioCall, ScenarioHandler};
use crate::stub_doer::{error_response, plain_response, StubDoer, StubResponse};

/// Whether an endpoint answers with a single JSON result or drives a stream.
/// Streaming endpoints have no archive fallback: a scenario is required.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    #[default]
    Unary,
    Streaming,
}

/// An endpoint as registered with the playback surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    #[serde(default)]
    pub kind: EndpointKind,
}

impl ServiceEndpoint {
    pub fn unary(name: &str, method: &str, pattern: &str) -> Self {
        Self {
            endpoint: Endpoint::new(name, method, pattern),
            kind: EndpointKind::Unary,
        }
    }

    pub fn streaming(name: &str, method: &str, pattern: &str) -> Self {
        Self {
            endpoint: Endpoint::new(name, method, pattern),
            kind: EndpointKind::Streaming,
        }
    }
}

/// Routes playback requests per endpoint.
///
/// Scenario and Background never reference each other; this dispatcher is
/// the only place the two legs compose.
pub struct PlaybackDispatcher {
    matcher: Arc<RouteMatcher>,
    kinds: HashMap<String, EndpointKind>,
    scenario: Arc<Scenario>,
    background: StubDoer,
}

impl PlaybackDispatcher {
    #[must_use]
    pub fn new(
        archive: Arc<Archive>,
        endpoints: &[ServiceEndpoint],
        scenario: Arc<Scenario>,
    ) -> Self {
        let plain: Vec<Endpoint> = endpoints.iter().map(|ep| ep.endpoint.clone()).collect();
        let matcher = Arc::new(RouteMatcher::new(&plain));
        let kinds = endpoints
            .iter()
            .map(|ep| (ep.endpoint.name.clone(), ep.kind))
            .collect();
        Self {
            matcher: matcher.clone(),
            kinds,
            scenario,
            background: StubDoer::with_matcher(archive, matcher),
        }
    }

    pub async fn dispatch(&self, req: Request) -> Response {
        let loopback = is_loopback(&req);
        let (parts, body) = req.into_parts();

        let Some((name, path_vars)) = self
            .matcher
            .match_request(parts.method.as_str(), parts.uri.path())
        else {
            return into_response(error_response(&VcrError::MatchMiss {
                method: parts.method.to_string(),
                path: parts.uri.path().to_string(),
            }));
        };
        let name = name.to_string();
        let kind = self.kinds.get(&name).copied().unwrap_or_default();

        match kind {
            EndpointKind::Streaming => {
                let call = scenario_call(&name, &parts.uri, path_vars, None);
                self.dispatch_streaming(&name, call)
            }
            EndpointKind::Unary => {
                if loopback {
                    debug!(endpoint = %name, "loopback bypass: serving from archive");
                    return self.background(&parts.method, &parts.uri);
                }
                match self.scenario.next(&name) {
                    Some(ScenarioHandler::Unary(handler)) => {
                        let payload = match read_json_body(body).await {
                            Ok(payload) => payload,
                            Err(response) => return response,
                        };
                        let call = scenario_call(&name, &parts.uri, path_vars, payload);
                        match handler(call).await {
                            Ok(value) => json_response(StatusCode::OK, &value),
                            Err(err) => {
                                warn!(endpoint = %name, error = %err, "scenario handler failed");
                                into_response(error_response(&err))
                            }
                        }
                    }
                    Some(ScenarioHandler::Streaming(_)) => into_response(plain_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &format!("vcr: scenario handler for {name} has unexpected type"),
                    )),
                    None => self.background(&parts.method, &parts.uri),
                }
            }
        }
    }

    fn dispatch_streaming(&self, name: &str, call: ScenarioCall) -> Response {
        let Some(handler) = self.scenario.next(name) else {
            return into_response(error_response(&VcrError::MissingScenario {
                endpoint: name.to_string(),
            }));
        };
        let ScenarioHandler::Streaming(handler) = handler else {
            return into_response(plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("vcr: scenario handler for {name} has unexpected type"),
            ));
        };

        let (sink, rx) = EventSink::channel(16);
        let endpoint = name.to_string();
        tokio::spawn(async move {
            if let Err(err) = handler(call, sink).await {
                warn!(endpoint = %endpoint, error = %err, "streaming scenario handler failed");
            }
        });

        match Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(ReceiverStream::new(rx)))
        {
            Ok(response) => response,
            Err(_) => into_response(plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "vcr: failed to build stream response",
            )),
        }
    }

    fn background(&self, method: &Method, uri: &Uri) -> Response {
        into_response(self.background.handle(method, uri))
    }
}

fn scenario_call(
    name: &str,
    uri: &Uri,
    path_vars: std::collections::BTreeMap<String, String>,
    body: Option<Value>,
) -> ScenarioCall {
    ScenarioCall {
        endpoint: name.to_string(),
        path_vars,
        query: parse_query(uri.query().unwrap_or("")),
        body,
    }
}

async fn read_json_body(body: Body) -> Result<Option<Value>, Response> {
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Err(into_response(plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("vcr: failed to read request body: {err}"),
            )));
        }
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(err) => Err(into_response(plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("vcr: request body is not JSON: {err}"),
        ))),
    }
}

fn json_response(status: StatusCode, value: &Value) -> Response {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(err) => {
            return into_response(plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("vcr: failed to encode result: {err}"),
            ));
        }
    };
    let built = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body));
    match built {
        Ok(response) => response,
        Err(_) => into_response(plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "vcr: failed to build response",
        )),
    }
}

fn into_response(stub: StubResponse) -> Response {
    let mut builder = Response::builder().status(stub.status);
    if let Some(headers) = builder.headers_mut() {
        *headers = stub.headers;
    }
    builder
        .body(Body::from(stub.body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
