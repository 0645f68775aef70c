// SPDX-License-Identifier: Apache-2.0

//! A logfile input: one tailed file feeding one pipeline runner.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::bounded_channel::BoundedReceiver;
use crate::logfile::config::LogfileInputConfig;
use crate::logfile::diagnostics::Diagnostics;
use crate::logfile::error::Result;
use crate::logfile::monitor::{FileMonitor, Line};
use crate::logfile::pipeline::{
    DecoderSet, ENV_VERSION, InputRunner, MESSAGE_TYPE, Message, PipelinePack,
};
use crate::logfile::watcher::Watcher;

/// Requests a running input to stop
#[derive(Debug, Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct LogfileInput {
    config: LogfileInputConfig,
    hostname: String,
    monitor: FileMonitor,
    lines_rx: BoundedReceiver<Line>,
    diagnostics: Diagnostics,
    cancel: CancellationToken,
}

impl LogfileInput {
    /// Validate `config`, prepare the journal and recover the start offset.
    pub fn init(config: LogfileInputConfig) -> Result<Self> {
        Self::init_with_cancel(config, CancellationToken::new())
    }

    /// Like [`init`](Self::init), stopping when `cancel` (or a parent of it) fires.
    pub fn init_with_cancel(config: LogfileInputConfig, cancel: CancellationToken) -> Result<Self> {
        config.validate()?;

        let hostname = if config.hostname.is_empty() {
            hostname::get()?.to_string_lossy().into_owned()
        } else {
            config.hostname.clone()
        };

        let diagnostics = Diagnostics::new(config.logger_ident());
        let (monitor, lines_rx) = FileMonitor::new(&config, diagnostics.clone())?;

        Ok(Self {
            config,
            hostname,
            monitor,
            lines_rx,
            diagnostics,
            cancel: cancel.child_token(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.log_file
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Diagnostics raised by this input, buffered until a runner attaches
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Run the input on `task_set`
    pub fn start<R: InputRunner + 'static>(
        self,
        task_set: &mut JoinSet<std::result::Result<(), BoxError>>,
        runner: Arc<R>,
        decoders: Arc<DecoderSet>,
    ) {
        info!(path = ?self.config.log_file, input = runner.name(), "Starting logfile input");

        task_set.spawn(async move {
            let name = runner.name().to_string();
            let result = self.run(runner, &decoders).await;
            if let Err(ref e) = result {
                error!(input = %name, error = %e, "Logfile input failed");
            }
            result.map_err(|e| e.into())
        });
    }

    /// Feed every line to `runner` until stopped.
    ///
    /// Buffered diagnostics are delivered to the runner first. An unknown
    /// decoder name fails the run before any line is read.
    pub async fn run<R: InputRunner + 'static>(
        self,
        runner: Arc<R>,
        decoders: &DecoderSet,
    ) -> Result<()> {
        let Self {
            config,
            hostname,
            monitor,
            mut lines_rx,
            diagnostics,
            cancel,
        } = self;

        diagnostics.attach(runner.clone());
        let decoders = decoders.resolve(&config.decoders)?;

        let watcher = tokio::spawn(Watcher::from_config(&config).run(monitor, cancel.clone()));

        while let Some(line) = lines_rx.next().await {
            // The line is already delivered; wait for a pack even if stopping.
            let Some(mut pack) = runner.packs().get().await else {
                debug!(path = ?line.path, "Pack supply closed");
                break;
            };

            fill_pack(&mut pack, &line, &hostname);

            if decoders.is_empty() || decoders.iter().any(|d| d.decode(&mut pack).is_ok()) {
                if let Err(e) = runner.inject(pack) {
                    diagnostics.error(format!("Error injecting message: {}", e));
                }
            } else {
                diagnostics.error(format!("Couldn't parse log line: {}", line.content));
                runner.recycle(pack);
            }
        }

        // The watcher may still be discovering if the pack supply went away.
        cancel.cancel();
        drop(lines_rx);
        if let Err(e) = watcher.await {
            error!(path = ?config.log_file, error = %e, "Watcher task failed");
        }

        info!(path = ?config.log_file, "Logfile input stopped");
        Ok(())
    }
}

fn fill_pack(pack: &mut PipelinePack, line: &Line, hostname: &str) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default();

    pack.message = Message {
        uuid: Uuid::new_v4(),
        timestamp,
        message_type: MESSAGE_TYPE.to_string(),
        logger: line.logger.clone(),
        severity: 0,
        env_version: ENV_VERSION.to_string(),
        pid: 0,
        payload: line.content.clone(),
        hostname: hostname.to_string(),
        fields: Default::default(),
    };
}
