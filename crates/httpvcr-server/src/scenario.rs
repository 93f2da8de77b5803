// SPDX-License-Identifier: Apache-2.0

//! Scenario registry: a name-keyed queue of programmable handlers layered
//! over archive playback.
//!
//! Handlers are a tagged variant rather than fully typed closures; service
//! wrappers that know their payload and result types are expected to wrap
//! [`ScenarioHandler::unary`] / [`ScenarioHandler::streaming`] with their own
//! encode/decode glue.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use httpvcr_core::{Result, VcrError};
use serde_json::Value;
use tokio::sync::mpsc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The decoded request handed to a scenario handler.
#[derive(Debug, Clone, Default)]
pub struct ScenarioCall {
    pub endpoint: String,
    pub path_vars: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    /// JSON request body, when one was sent.
    pub body: Option<Value>,
}

type UnaryFn = dyn Fn(ScenarioCall) -> BoxFuture<Result<Value>> + Send + Sync;
type StreamingFn = dyn Fn(ScenarioCall, EventSink) -> BoxFuture<Result<()>> + Send + Sync;

#[derive(Clone)]
pub enum ScenarioHandler {
    Unary(Arc<UnaryFn>),
    Streaming(Arc<StreamingFn>),
}

impl ScenarioHandler {
    pub fn unary<F, Fut>(f: F) -> Self
    where
        F: Fn(ScenarioCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::Unary(Arc::new(move |call| Box::pin(f(call))))
    }

    pub fn streaming<F, Fut>(f: F) -> Self
    where
        F: Fn(ScenarioCall, EventSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::Streaming(Arc::new(move |call, sink| Box::pin(f(call, sink))))
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unary(_) => "unary",
            Self::Streaming(_) => "streaming",
        }
    }
}

impl std::fmt::Debug for ScenarioHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// Name-keyed queues of handlers.
#[derive(Debug, Default)]
pub struct Scenario {
    queues: Mutex<HashMap<String, VecDeque<ScenarioHandler>>>,
}

impl Scenario {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the queue for `name` with a single sticky handler.
    pub fn set(&self, name: &str, handler: ScenarioHandler) {
        let mut queues = self.queues.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        queues.insert(name.to_string(), VecDeque::from([handler]));
    }

    /// Appends a one-shot handler to the queue for `name`.
    pub fn add(&self, name: &str, handler: ScenarioHandler) {
        let mut queues = self.queues.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        queues.entry(name.to_string()).or_default().push_back(handler);
    }

    /// Returns the next handler for `name`, if any. A queue holding exactly
    /// one handler keeps it (sticky); longer queues are consumed FIFO.
    #[must_use]
    pub fn next(&self, name: &str) -> Option<ScenarioHandler> {
        let mut queues = self.queues.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let queue = queues.get_mut(name)?;
        if queue.len() == 1 {
            queue.front().cloned()
        } else {
            queue.pop_front()
        }
    }
}

/// Sink through which streaming scenario handlers emit server-sent events.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<std::result::Result<Bytes, Infallible>>,
}

impl EventSink {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<std::result::Result<Bytes, Infallible>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Emits one SSE frame carrying a JSON payload, optionally named.
    pub async fn send_json(&self, event: Option<&str>, data: &Value) -> Result<()> {
        let mut frame = String::new();
        if let Some(name) = event {
            frame.push_str("event: ");
            frame.push_str(name);
            frame.push('\n');
        }
        frame.push_str("data: ");
        frame.push_str(&data.to_string());
        frame.push_str("\n\n");
        self.send_raw(frame).await
    }

    /// Emits a pre-formatted frame verbatim.
    pub async fn send_raw(&self, frame: String) -> Result<()> {
        self.tx
            .send(Ok(Bytes::from(frame)))
            .await
            .map_err(|_| {
                VcrError::io(
                    "send stream event",
                    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client went away"),
                )
            })
    }
}
