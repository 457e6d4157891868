//! Streaming event channel.
//!
//! The streaming orchestrator reports progress as typed events tagged with the
//! request id the caller chose. Several invocations may share one channel, so
//! the caller side (`StreamAccumulator`) keys everything by id and drops events
//! that belong to any other request.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

// ─── Request identity ───────────────────────────────────────────────────────

/// Opaque caller-chosen identifier for one streaming invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// A fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// One event of a streaming invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Chunk { request_id: RequestId, text: String },
    #[serde(rename_all = "camelCase")]
    End {
        request_id: RequestId,
        final_text: String,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        request_id: RequestId,
        error: String,
    },
}

impl StreamEvent {
    pub fn request_id(&self) -> &RequestId {
        match self {
            StreamEvent::Chunk { request_id, .. }
            | StreamEvent::End { request_id, .. }
            | StreamEvent::Error { request_id, .. } => request_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk { .. })
    }
}

/// Sending half of the event channel.
///
/// Delivery is best-effort: once the receiver is gone, events are dropped and
/// the orchestration runs to completion without a listener.
#[derive(Debug, Clone)]
pub struct StreamEmitter {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamEmitter {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { tx }
    }

    /// An emitter plus the receiver its events arrive on, in emission order.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("stream listener gone, dropping event");
        }
    }
}

// ─── Producer-side session state ────────────────────────────────────────────

/// State of one streaming invocation, owned by that invocation.
#[derive(Debug)]
pub struct StreamingSession {
    request_id: RequestId,
    accumulated_text: String,
    tool_calls_handled: u32,
    emitter: StreamEmitter,
}

impl StreamingSession {
    pub fn new(request_id: RequestId, emitter: StreamEmitter) -> Self {
        Self {
            request_id,
            accumulated_text: String::new(),
            tool_calls_handled: 0,
            emitter,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn tool_calls_handled(&self) -> u32 {
        self.tool_calls_handled
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls_handled += 1;
    }

    /// Forward a text fragment. Empty fragments are not emitted.
    pub fn chunk(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.accumulated_text.push_str(text);
        self.emitter.emit(StreamEvent::Chunk {
            request_id: self.request_id.clone(),
            text: text.to_string(),
        });
    }

    /// Emit the terminal success event, consuming the session.
    pub fn finish(self, final_text: String) {
        self.emitter.emit(StreamEvent::End {
            request_id: self.request_id,
            final_text,
        });
    }

    /// Emit the terminal failure event, consuming the session.
    pub fn fail(self, error: String) {
        self.emitter.emit(StreamEvent::Error {
            request_id: self.request_id,
            error,
        });
    }
}

// ─── Consumer-side accumulator ──────────────────────────────────────────────

/// How a tracked request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(String),
    Failed(String),
}

/// Caller-side view of the active streaming request.
///
/// Events for any other request id are ignored, which guards against late
/// events from a superseded or abandoned request.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    active: Option<RequestId>,
    text: String,
    outcome: Option<StreamOutcome>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `request_id`, discarding state of any previous request.
    pub fn begin(&mut self, request_id: RequestId) {
        self.active = Some(request_id);
        self.text.clear();
        self.outcome = None;
    }

    /// Stop tracking; every later event is ignored.
    pub fn abandon(&mut self) {
        self.active = None;
    }

    /// Apply an event. Returns `false` when it was ignored.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        if self.active.as_ref() != Some(event.request_id()) || self.outcome.is_some() {
            return false;
        }
        match event {
            StreamEvent::Chunk { text, .. } => self.text.push_str(text),
            StreamEvent::End { final_text, .. } => {
                self.outcome = Some(StreamOutcome::Completed(final_text.clone()))
            }
            StreamEvent::Error { error, .. } => {
                self.outcome = Some(StreamOutcome::Failed(error.clone()))
            }
        }
        true
    }

    /// Text received so far for the active request.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn outcome(&self) -> Option<&StreamOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }
}
