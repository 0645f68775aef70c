// SPDX-License-Identifier: Apache-2.0

//! Logfile input: tails a file line by line and survives restarts.
//!
//! Features:
//! - Rotation detection by file identity (device + inode on unix)
//! - In-place truncation detection
//! - Seek journal with hash verification of the resume position
//! - Backpressured, cancellation-safe line delivery
//! - Glob-driven directory manager spawning one input per file

pub mod config;
pub mod diagnostics;
pub mod directory;
pub mod error;
pub mod file_id;
pub mod input;
pub mod journal;
pub mod monitor;
pub mod pipeline;
pub mod watcher;

pub use config::{LogfileInputConfig, ResumePolicy};
pub use diagnostics::{DiagnosticSink, Diagnostics};
pub use directory::{InputFactory, LogfileDirectoryManager};
pub use error::{Error, Result};
pub use file_id::{FileId, FileIdentity, NativeFileIdentity};
pub use input::{LogfileInput, StopHandle};
pub use journal::{Recovery, SeekJournal, SeekJournalRecord};
pub use monitor::{FileMonitor, Line, MonitorState, PassOutcome};
pub use pipeline::{Decoder, DecoderSet, InputRunner, Message, PackPool, PipelinePack};
pub use watcher::Watcher;
