//! Output channels for one turn and the state machine that guards them.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle of an output channel within one turn.
///
/// `Initial -> Active -> Closing -> Closed`. Only `Active` accepts writes and
/// only `Active` may start closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Initial,
    Active,
    Closing,
    Closed,
}

/// Append-only, closable text channel owned by the consumer.
///
/// `update` replaces the consumer-visible value with the full text so far.
/// Implementations return [`Error::SinkClosed`] once the consumer has gone away.
pub trait Sink: Send + Sync {
    fn update(&self, value: String) -> Result<()>;
    fn done(&self) -> Result<()>;
}

/// Structured UI pieces streamed alongside the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiElement {
    /// Marks where the synthesized answer renders.
    AnswerSection,
    /// A running or finished web search. `results` is the serialized
    /// `SearchResults` once the search has completed.
    SearchSection {
        query: String,
        include_domains: Vec<String>,
        results: Option<String>,
    },
}

/// The composite UI surface. `update(None)` clears the current element.
pub trait UiStream: Send + Sync {
    fn append(&self, element: UiElement) -> Result<()>;
    fn update(&self, element: Option<UiElement>) -> Result<()>;
}

/// A [`Sink`] wrapped in its own [`StreamState`].
///
/// Writes outside `Active` are dropped, and `close` calls `done` at most once.
/// Failures of the wrapped sink are logged, never propagated.
pub struct GuardedSink {
    name: &'static str,
    inner: Arc<dyn Sink>,
    state: StreamState,
}

impl GuardedSink {
    pub fn new(name: &'static str, inner: Arc<dyn Sink>) -> Self {
        Self {
            name,
            inner,
            state: StreamState::Initial,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == StreamState::Active
    }

    pub fn start(&mut self) {
        if self.state == StreamState::Initial {
            self.state = StreamState::Active;
        }
    }

    /// Push the full current text. Returns whether the write reached the sink.
    pub fn write(&mut self, value: &str) -> bool {
        if self.state != StreamState::Active {
            return false;
        }
        match self.inner.update(value.to_string()) {
            Ok(()) => true,
            Err(Error::SinkClosed(msg)) => {
                // Consumer went away; nothing left to close.
                tracing::debug!(sink = self.name, %msg, "sink closed by consumer");
                self.state = StreamState::Closed;
                false
            }
            Err(e) => {
                tracing::error!(sink = self.name, error = %e, "error updating sink");
                false
            }
        }
    }

    /// Close the sink if it is still active. Idempotent.
    pub fn close(&mut self) {
        if self.state != StreamState::Active {
            return;
        }
        self.state = StreamState::Closing;
        if let Err(e) = self.inner.done() {
            tracing::error!(sink = self.name, error = %e, "error closing sink");
        }
        self.state = StreamState::Closed;
    }
}

impl std::fmt::Debug for GuardedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedSink")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}
