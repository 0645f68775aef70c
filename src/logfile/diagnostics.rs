// SPDX-License-Identifier: Apache-2.0

//! Diagnostic messages and errors raised by a logfile input.
//!
//! A monitor starts producing diagnostics (journal recovery, open failures)
//! before any runner is attached to the input. Until then they are buffered in
//! arrival order; [`Diagnostics::attach`] flushes the buffer once and from then
//! on forwards directly. Every diagnostic is also emitted through `tracing`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{error, info};

/// Receiver of diagnostics, normally the input runner.
pub trait DiagnosticSink: Send + Sync {
    fn log_message(&self, msg: &str);
    fn log_error(&self, msg: &str);
}

#[derive(Default)]
struct DiagnosticsState {
    sink: Option<Arc<dyn DiagnosticSink>>,
    pending_messages: Vec<String>,
    pending_errors: Vec<String>,
}

/// Shared handle to one input's diagnostic streams.
#[derive(Clone)]
pub struct Diagnostics {
    logger: Arc<str>,
    state: Arc<Mutex<DiagnosticsState>>,
}

impl Diagnostics {
    pub fn new(logger: impl Into<String>) -> Self {
        Self {
            logger: Arc::from(logger.into()),
            state: Arc::new(Mutex::new(DiagnosticsState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DiagnosticsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report an informational message
    pub fn message(&self, msg: impl Into<String>) {
        let msg = msg.into();
        info!(logger = %self.logger, "{}", msg);

        // The sink is called with the lock released so it may report back.
        let sink = {
            let mut state = self.lock();
            let Some(sink) = state.sink.clone() else {
                state.pending_messages.push(msg);
                return;
            };
            sink
        };
        sink.log_message(&msg);
    }

    /// Report an error
    pub fn error(&self, msg: impl Into<String>) {
        let msg = msg.into();
        error!(logger = %self.logger, "{}", msg);

        let sink = {
            let mut state = self.lock();
            let Some(sink) = state.sink.clone() else {
                state.pending_errors.push(msg);
                return;
            };
            sink
        };
        sink.log_error(&msg);
    }

    /// Attach a sink, delivering everything buffered so far: messages first,
    /// then errors, each in the order they were raised.
    ///
    /// Anything raised while the backlog is being delivered is buffered and
    /// delivered in a following round, before the sink goes live.
    pub fn attach(&self, sink: Arc<dyn DiagnosticSink>) {
        loop {
            let (messages, errors) = {
                let mut state = self.lock();
                if state.pending_messages.is_empty() && state.pending_errors.is_empty() {
                    state.sink = Some(sink);
                    return;
                }
                (
                    std::mem::take(&mut state.pending_messages),
                    std::mem::take(&mut state.pending_errors),
                )
            };

            for msg in messages {
                sink.log_message(&msg);
            }
            for msg in errors {
                sink.log_error(&msg);
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        self.lock().sink.is_some()
    }

    pub fn pending_messages(&self) -> Vec<String> {
        self.lock().pending_messages.clone()
    }

    pub fn pending_errors(&self) -> Vec<String> {
        self.lock().pending_errors.clone()
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Diagnostics")
            .field("logger", &self.logger)
            .field("attached", &state.sink.is_some())
            .field("pending_messages", &state.pending_messages.len())
            .field("pending_errors", &state.pending_errors.len())
            .finish()
    }
}

/// Sink that records everything it receives. Useful in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(DiagnosticKind, String)>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Message,
    Error,
}

impl RecordingSink {
    pub fn entries(&self) -> Vec<(DiagnosticKind, String)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.filtered(DiagnosticKind::Message)
    }

    pub fn errors(&self) -> Vec<String> {
        self.filtered(DiagnosticKind::Error)
    }

    fn filtered(&self, kind: DiagnosticKind) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, msg)| msg)
            .collect()
    }

    fn push(&self, kind: DiagnosticKind, msg: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, msg.to_string()));
    }
}

impl DiagnosticSink for RecordingSink {
    fn log_message(&self, msg: &str) {
        self.push(DiagnosticKind::Message, msg);
    }

    fn log_error(&self, msg: &str) {
        self.push(DiagnosticKind::Error, msg);
    }
}
