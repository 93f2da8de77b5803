// SPDX-License-Identifier: Apache-2.0

//! httpvcr runtime: the recording transport that captures upstream JSON
//! responses into an archive, and the playback surface that serves them
//! back, with scenario handlers layered over archive playback.

#![forbid(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod loopback;
pub mod matcher;
pub mod recording;
pub mod runtime;
pub mod scenario;
pub mod stub_doer;

pub use config::{load_playback_startup_config, PlaybackStartupConfig};
pub use dispatcher::{EndpointKind, PlaybackDispatcher, ServiceEndpoint};
pub use loopback::{loopback_middleware, LoopbackClient, LOOPBACK_HEADER};
pub use matcher::RouteMatcher;
pub use recording::{
    ProxyRequest, RecordingTransport, ReqwestTransport, UpstreamResponse, UpstreamTransport,
};
pub use runtime::{build_playback_router, serve_playback};
pub use scenario::{EventSink, Scenario, ScenarioCall, ScenarioHandler};
pub use stub_doer::{StubDoer, StubResponse};

pub const CRATE_NAME: &str = "httpvcr-server";
