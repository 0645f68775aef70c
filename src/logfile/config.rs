// SPDX-License-Identifier: Apache-2.0

//! Configuration for a single logfile input.

use serde::Deserialize;
use std::path::{self, MAIN_SEPARATOR, Path, PathBuf};
use std::time::Duration;

use crate::logfile::error::{Error, Result};

/// Name of the folder under `base_dir` holding one journal per input.
pub const SEEK_JOURNAL_DIR: &str = "seekjournals";

/// Characters that make a path component a glob pattern.
const GLOB_CHARS: &[char] = &['*', '?', '[', ']'];

/// Where to resume when no trustworthy journal position exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePolicy {
    /// Start from the first byte of the file
    FromStart,
    /// Skip existing content and only read what is appended
    FromEnd,
}

/// Configuration for the logfile input
#[derive(Debug, Clone, Deserialize)]
pub struct LogfileInputConfig {
    /// Path of the log file to tail. The directory manager accepts a glob here.
    pub log_file: PathBuf,

    /// Hostname stamped on generated messages. Empty means the local hostname.
    #[serde(default)]
    pub hostname: String,

    /// Interval between attempts to open a file that is not open yet (milliseconds)
    #[serde(default = "default_discover_interval")]
    pub discover_interval: u64,

    /// Interval between read passes on an open file (milliseconds)
    #[serde(default = "default_stat_interval")]
    pub stat_interval: u64,

    /// Names of decoders to try on each line, in order
    #[serde(default)]
    pub decoders: Vec<String>,

    /// Track the read position in a seek journal so restarts resume in place
    #[serde(default = "default_true")]
    pub use_seek_journal: bool,

    /// File name of the seek journal. Defaults to a sanitized `logger`.
    #[serde(default)]
    pub seek_journal_name: String,

    /// Logger identifier attached to every line. Defaults to the file path.
    #[serde(default)]
    pub logger: String,

    /// When the journal cannot be trusted, start from the beginning of the
    /// file instead of its end
    #[serde(default = "default_true")]
    pub resume_from_start: bool,

    /// Base directory; journals are kept in `<base_dir>/seekjournals`
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Maximum number of bytes scanned backwards when re-deriving the start
    /// of the journaled line during recovery
    #[serde(default = "default_max_journal_scan")]
    pub max_journal_scan: u64,

    /// Longest line read in one piece. A line without a terminator that
    /// reaches this length is delivered as is.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: u64,

    /// Interval between glob rescans of the directory manager (milliseconds)
    #[serde(default = "default_ticker_interval")]
    pub ticker_interval: u64,
}

fn default_discover_interval() -> u64 {
    5000
}

fn default_stat_interval() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/var/cache/logtail")
}

fn default_max_journal_scan() -> u64 {
    1024 * 1024 // 1MB
}

fn default_max_line_length() -> u64 {
    1024 * 1024 // 1MB
}

fn default_ticker_interval() -> u64 {
    5000
}

impl Default for LogfileInputConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::new(),
            hostname: String::new(),
            discover_interval: default_discover_interval(),
            stat_interval: default_stat_interval(),
            decoders: Vec::new(),
            use_seek_journal: true,
            seek_journal_name: String::new(),
            logger: String::new(),
            resume_from_start: true,
            base_dir: default_base_dir(),
            max_journal_scan: default_max_journal_scan(),
            max_line_length: default_max_line_length(),
            ticker_interval: default_ticker_interval(),
        }
    }
}

impl LogfileInputConfig {
    /// Create a config for `log_file` with every other field at its default
    pub fn new(log_file: impl Into<PathBuf>) -> Self {
        Self {
            log_file: log_file.into(),
            ..Default::default()
        }
    }

    pub fn discover_interval(&self) -> Duration {
        Duration::from_millis(self.discover_interval)
    }

    pub fn stat_interval(&self) -> Duration {
        Duration::from_millis(self.stat_interval)
    }

    pub fn ticker_interval(&self) -> Duration {
        Duration::from_millis(self.ticker_interval)
    }

    pub fn resume_policy(&self) -> ResumePolicy {
        if self.resume_from_start {
            ResumePolicy::FromStart
        } else {
            ResumePolicy::FromEnd
        }
    }

    /// Logger identifier: the configured `logger`, or the file path
    pub fn logger_ident(&self) -> String {
        if self.logger.is_empty() {
            self.log_file.display().to_string()
        } else {
            self.logger.clone()
        }
    }

    /// Directory holding the seek journals
    pub fn journal_dir(&self) -> PathBuf {
        self.base_dir.join(SEEK_JOURNAL_DIR)
    }

    /// Full path of this input's journal, or `None` when journaling is off
    pub fn journal_path(&self) -> Option<PathBuf> {
        if !self.use_seek_journal {
            return None;
        }
        let name = if self.seek_journal_name.is_empty() {
            self.logger_ident()
        } else {
            self.seek_journal_name.clone()
        };
        Some(self.journal_dir().join(sanitize_journal_name(&name)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.log_file.as_os_str().is_empty() {
            return Err(Error::Config("log_file must be specified".to_string()));
        }

        if self.discover_interval == 0 {
            return Err(Error::Config(
                "discover_interval must be positive".to_string(),
            ));
        }

        if self.stat_interval == 0 {
            return Err(Error::Config("stat_interval must be positive".to_string()));
        }

        if self.max_journal_scan == 0 {
            return Err(Error::Config(
                "max_journal_scan must be positive".to_string(),
            ));
        }

        if self.max_line_length == 0 {
            return Err(Error::Config("max_line_length must be positive".to_string()));
        }

        Ok(())
    }

    /// Extra rules for configs driving the directory manager
    pub fn validate_for_directory(&self) -> Result<()> {
        self.validate()?;

        if self.ticker_interval == 0 {
            return Err(Error::Config("ticker_interval must be positive".to_string()));
        }

        // `Path::file_name` would skip a trailing `.`, so look at the raw text.
        let raw = self.log_file.to_string_lossy();
        let name = raw.rsplit(path::is_separator).next().unwrap_or_default();
        if name.is_empty() || name == "." || name == ".." {
            return Err(Error::Config("A logfile name must be specified.".to_string()));
        }
        if name.contains(GLOB_CHARS) {
            return Err(Error::Config(format!(
                "Globs are not allowed in the file name: {}",
                name
            )));
        }

        if !self.seek_journal_name.is_empty() {
            return Err(Error::Config(
                "The directory manager doesn't support the `seek_journal_name` option."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Turn a logger name or path into a flat journal file name
pub fn sanitize_journal_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '.' | '/' => '_',
            c if c == MAIN_SEPARATOR => '_',
            c => c,
        })
        .collect()
}

/// Whether `path` contains glob metacharacters anywhere
pub fn is_glob(path: &Path) -> bool {
    path.to_string_lossy().contains(GLOB_CHARS)
}
