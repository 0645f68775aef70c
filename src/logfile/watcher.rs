// SPDX-License-Identifier: Apache-2.0

//! Timer loop driving a [`FileMonitor`].
//!
//! Two intervals run side by side: discovery ticks try to open the file while
//! the monitor has no handle, stat ticks run a read pass while it does. The
//! cancellation token is polled first on every iteration, so a stop request
//! always wins over a pending tick. Only this task ever touches the monitor.

use std::time::Duration;

use tokio::select;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::logfile::config::LogfileInputConfig;
use crate::logfile::monitor::{FileMonitor, MonitorState, PassOutcome};

#[derive(Debug, Clone, Copy)]
pub struct Watcher {
    discover_interval: Duration,
    stat_interval: Duration,
}

impl Watcher {
    pub fn new(discover_interval: Duration, stat_interval: Duration) -> Self {
        Self {
            discover_interval,
            stat_interval,
        }
    }

    pub fn from_config(config: &LogfileInputConfig) -> Self {
        Self::new(config.discover_interval(), config.stat_interval())
    }

    /// Run until `cancel` fires or the line consumer goes away, then shut the
    /// monitor down. The line conduit is closed when this returns.
    pub async fn run(self, mut monitor: FileMonitor, cancel: CancellationToken) {
        // Discovery fires right away; the first read waits one stat period.
        let mut discover = interval(self.discover_interval);
        discover.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stat = interval_at(Instant::now() + self.stat_interval, self.stat_interval);
        stat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(path = ?monitor.path(), "Watcher started");

        loop {
            let state = monitor.state();
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(path = ?monitor.path(), "Watcher cancelled");
                    break;
                }

                _ = stat.tick(), if state == MonitorState::Tailing => {
                    if monitor.read_available(&cancel).await == PassOutcome::Stop {
                        break;
                    }
                }

                _ = discover.tick(), if state == MonitorState::Discovering => {
                    if monitor.try_open().await {
                        stat.reset();
                    }
                }
            }
        }

        monitor.shutdown();
    }
}
