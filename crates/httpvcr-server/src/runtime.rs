// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::dispatcher::PlaybackDispatcher;
use crate::loopback::loopback_middleware;

#[derive(Clone)]
struct PlaybackState {
    dispatcher: Arc<PlaybackDispatcher>,
}

/// Builds the playback HTTP surface: a health probe plus a catch-all route
/// driving the dispatcher, with loopback tagging layered outside so the
/// marker is set before dispatch runs.
#[must_use]
pub fn build_playback_router(dispatcher: Arc<PlaybackDispatcher>) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .fallback(dispatch_handler)
        .layer(middleware::from_fn(loopback_middleware))
        .with_state(PlaybackState { dispatcher })
}

async fn healthz_handler() -> impl IntoResponse {
    "ok"
}

async fn dispatch_handler(State(state): State<PlaybackState>, req: Request) -> Response {
    state.dispatcher.dispatch(req).await
}

/// Serves playback until SIGINT/SIGTERM, then drains gracefully.
pub async fn serve_playback(listener: TcpListener, router: Router) -> Result<(), String> {
    let addr = listener
        .local_addr()
        .map_err(|err| format!("local addr: {err}"))?;
    info!("httpvcr playback listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(err) = wait_for_shutdown_signal().await {
                warn!("shutdown signal handler failed: {err}");
            }
        })
        .await
        .map_err(|err| format!("server failed: {err}"))
}

async fn wait_for_shutdown_signal() -> Result<(), String> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| format!("failed to register SIGTERM handler: {e}"))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| format!("failed to register SIGINT handler: {e}"))?;
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("failed to register ctrl-c handler: {e}"))?;
    }
    Ok(())
}
