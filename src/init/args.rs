// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::path::PathBuf;

use crate::logfile::config::LogfileInputConfig;

/// Where to start when no trustworthy journal position exists
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum ResumeFromArg {
    /// Start at the beginning of the file
    #[default]
    Start,
    /// Start at the end of the file (tail mode)
    End,
}

#[derive(Debug, Args, Clone)]
pub struct LogfileInputArgs {
    /// Path of the file to tail. A glob in a directory component starts one
    /// input per matching file (e.g. "/var/log/*/app.log").
    #[arg(long, env = "LOGTAIL_LOG_FILE")]
    pub log_file: PathBuf,

    /// Hostname stamped on messages (defaults to the local hostname)
    #[arg(long, env = "LOGTAIL_HOSTNAME", default_value = "")]
    pub hostname: String,

    /// Interval in milliseconds between attempts to open a missing file
    #[arg(long, env = "LOGTAIL_DISCOVER_INTERVAL_MS", default_value = "5000")]
    pub discover_interval_ms: u64,

    /// Interval in milliseconds between reads of an open file
    #[arg(long, env = "LOGTAIL_STAT_INTERVAL_MS", default_value = "500")]
    pub stat_interval_ms: u64,

    /// Comma-separated decoder names, tried in order (available: json)
    #[arg(long, env = "LOGTAIL_DECODERS", value_delimiter = ',')]
    pub decoders: Vec<String>,

    /// Track the read position in a seek journal
    #[arg(
        long,
        env = "LOGTAIL_USE_SEEK_JOURNAL",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub use_seek_journal: bool,

    /// Seek journal file name (defaults to the sanitized logger name)
    #[arg(long, env = "LOGTAIL_SEEK_JOURNAL_NAME", default_value = "")]
    pub seek_journal_name: String,

    /// Logger identifier attached to every line (defaults to the file path)
    #[arg(long, env = "LOGTAIL_LOGGER", default_value = "")]
    pub logger: String,

    /// Where to resume when the seek journal cannot be used: start or end
    #[arg(value_enum, long, env = "LOGTAIL_RESUME_FROM", default_value = "start")]
    pub resume_from: ResumeFromArg,

    /// Base directory; journals are kept in <base-dir>/seekjournals
    #[arg(long, env = "LOGTAIL_BASE_DIR", default_value = "/var/cache/logtail")]
    pub base_dir: PathBuf,

    /// Maximum bytes scanned backwards when verifying a journal position
    #[arg(long, env = "LOGTAIL_MAX_JOURNAL_SCAN", default_value = "1048576")]
    pub max_journal_scan: u64,

    /// Longest line read in one piece; longer lines are split
    #[arg(long, env = "LOGTAIL_MAX_LINE_LENGTH", default_value = "1048576")]
    pub max_line_length: u64,

    /// Interval in milliseconds between glob rescans
    #[arg(long, env = "LOGTAIL_TICKER_INTERVAL_MS", default_value = "5000")]
    pub ticker_interval_ms: u64,
}

impl LogfileInputArgs {
    /// Build the input config from command line args
    pub fn build_config(&self) -> LogfileInputConfig {
        LogfileInputConfig {
            log_file: self.log_file.clone(),
            hostname: self.hostname.clone(),
            discover_interval: self.discover_interval_ms,
            stat_interval: self.stat_interval_ms,
            decoders: self.decoders.clone(),
            use_seek_journal: self.use_seek_journal,
            seek_journal_name: self.seek_journal_name.clone(),
            logger: self.logger.clone(),
            resume_from_start: self.resume_from == ResumeFromArg::Start,
            base_dir: self.base_dir.clone(),
            max_journal_scan: self.max_journal_scan,
            max_line_length: self.max_line_length,
            ticker_interval: self.ticker_interval_ms,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct StartArgs {
    /// Input name, used as the prefix of per-file input names
    #[arg(long, env = "LOGTAIL_NAME", default_value = "logfile")]
    pub name: String,

    /// Number of messages that may be in flight per input
    #[arg(long, env = "LOGTAIL_PACK_POOL_SIZE", default_value = "100")]
    pub pack_pool_size: usize,

    /// Time in milliseconds to wait for inputs to stop on shutdown
    #[arg(long, env = "LOGTAIL_SHUTDOWN_TIMEOUT_MS", default_value = "5000")]
    pub shutdown_timeout_ms: u64,

    #[command(flatten)]
    pub input: LogfileInputArgs,
}
