// SPDX-License-Identifier: Apache-2.0

//! Starts one logfile input per file matching a glob.
//!
//! The manager rescans its pattern on a fixed interval and asks an
//! [`InputFactory`] to start an input for every path it has not seen before.
//! Inputs are never stopped by the manager; a path that disappears and comes
//! back is handled by the input already tailing it.

use std::collections::HashSet;
use std::path::PathBuf;

use glob::glob;
use tokio::select;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::logfile::config::LogfileInputConfig;
use crate::logfile::error::{Error, Result};

/// Starts inputs on behalf of a directory manager
pub trait InputFactory: Send {
    /// Start an input called `name` tailing `config.log_file`
    fn start_input(&mut self, name: String, config: LogfileInputConfig) -> Result<()>;
}

#[derive(Debug)]
pub struct LogfileDirectoryManager {
    name: String,
    config: LogfileInputConfig,
    seen: HashSet<PathBuf>,
}

impl LogfileDirectoryManager {
    pub fn new(name: impl Into<String>, config: LogfileInputConfig) -> Result<Self> {
        config.validate_for_directory()?;

        Ok(Self {
            name: name.into(),
            config,
            seen: HashSet::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Paths an input has been started for
    pub fn known_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.seen.iter()
    }

    /// Scan now and on every tick until cancelled. A factory failure ends the
    /// run with that error.
    pub async fn run<F: InputFactory>(
        &mut self,
        factory: &mut F,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(self.config.ticker_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(manager = %self.name, pattern = ?self.config.log_file, "Starting directory manager");

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    self.scan(factory)?;
                }
            }
        }

        debug!(manager = %self.name, "Directory manager stopped");
        Ok(())
    }

    /// Start inputs for newly matched paths. Returns how many were started.
    pub fn scan<F: InputFactory>(&mut self, factory: &mut F) -> Result<usize> {
        let mut started = 0;

        for path in self.find_files()? {
            if self.seen.contains(&path) {
                continue;
            }

            let name = format!("{}-{}", self.name, path.display());
            info!(manager = %self.name, path = ?path, "Starting LogfileInput for {}", path.display());

            let mut config = self.config.clone();
            config.log_file = path.clone();

            if let Err(e) = factory.start_input(name.clone(), config) {
                error!(manager = %self.name, "Initialization failed for '{}': {}", name, e);
                return Err(Error::InputStart {
                    name,
                    reason: e.to_string(),
                });
            }

            self.seen.insert(path);
            started += 1;
        }

        Ok(started)
    }

    fn find_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.config.log_file.to_string_lossy();
        let matches = glob(&pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

        let mut paths = Vec::new();
        for entry in matches {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                // Unreadable directories along the way are skipped.
                Err(e) => warn!(manager = %self.name, error = %e, "Glob match failed"),
            }
        }
        Ok(paths)
    }
}
