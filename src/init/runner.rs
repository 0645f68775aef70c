// SPDX-License-Identifier: Apache-2.0

//! Stdout pipeline used by the `logtail` binary.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use portable_atomic::{AtomicU64, Ordering};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::debug;

use crate::init::wait;
use crate::logfile::config::LogfileInputConfig;
use crate::logfile::diagnostics::DiagnosticSink;
use crate::logfile::directory::InputFactory;
use crate::logfile::error::Result;
use crate::logfile::input::LogfileInput;
use crate::logfile::pipeline::{DecoderSet, InputRunner, PackPool, PipelinePack};

/// Writes each message to stdout as one JSON line.
///
/// Diagnostics are already logged by the input; the runner only counts them.
pub struct StdoutRunner {
    name: String,
    pool: PackPool,
    messages: AtomicU64,
    errors: AtomicU64,
}

impl StdoutRunner {
    pub fn new(name: impl Into<String>, pack_pool_size: usize) -> Self {
        Self {
            name: name.into(),
            pool: PackPool::new(pack_pool_size),
            messages: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl DiagnosticSink for StdoutRunner {
    fn log_message(&self, _msg: &str) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    fn log_error(&self, _msg: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

impl InputRunner for StdoutRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn packs(&self) -> &PackPool {
        &self.pool
    }

    fn inject(&self, pack: PipelinePack) -> std::result::Result<(), BoxError> {
        let result = serde_json::to_string(&pack.message)
            .map_err(BoxError::from)
            .and_then(|json| {
                let mut out = std::io::stdout().lock();
                writeln!(out, "{}", json).map_err(BoxError::from)
            });
        self.recycle(pack);
        result
    }
}

/// Starts a stdout-backed input for every path a directory manager finds.
pub struct StdoutInputFactory {
    decoders: Arc<DecoderSet>,
    pack_pool_size: usize,
    cancel: CancellationToken,
    tasks: JoinSet<std::result::Result<(), BoxError>>,
}

impl StdoutInputFactory {
    pub fn new(decoders: Arc<DecoderSet>, pack_pool_size: usize, cancel: CancellationToken) -> Self {
        Self {
            decoders,
            pack_pool_size,
            cancel,
            tasks: JoinSet::new(),
        }
    }

    /// Number of inputs still running
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every started input to finish
    pub async fn wait(&mut self, timeout: Duration) -> std::result::Result<(), BoxError> {
        wait::wait_for_tasks_with_timeout(&mut self.tasks, timeout).await
    }
}

impl InputFactory for StdoutInputFactory {
    fn start_input(&mut self, name: String, config: LogfileInputConfig) -> Result<()> {
        let input = LogfileInput::init_with_cancel(config, self.cancel.clone())?;
        debug!(input = %name, path = ?input.path(), "Created logfile input");

        let runner = Arc::new(StdoutRunner::new(name, self.pack_pool_size));
        input.start(&mut self.tasks, runner, self.decoders.clone());
        Ok(())
    }
}
