// SPDX-License-Identifier: Apache-2.0

//! Seek journal: durable resume point for one tailed file.
//!
//! The journal stores the offset of the next unread byte together with the
//! hash of the line that ends there. On startup [`SeekJournal::recover`] only
//! trusts the offset when the line found at that position in the file still
//! hashes to the stored value; otherwise the resume policy decides.

mod record;

pub use record::{JOURNAL_FORMAT_VERSION, SeekJournalRecord, line_hash};

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use portable_atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::logfile::config::{LogfileInputConfig, ResumePolicy};
use crate::logfile::diagnostics::Diagnostics;
use crate::logfile::error::{Error, Result};

/// Read size used while scanning backwards for a line start
const SCAN_CHUNK_SIZE: u64 = 4096;

/// Outcome of journal recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// The journaled line was found intact at the stored offset
    Verified(u64),
    /// The journal could not be trusted; `offset` comes from the resume policy
    Fallback { offset: u64, reason: FallbackReason },
}

impl Recovery {
    pub fn offset(&self) -> u64 {
        match self {
            Recovery::Verified(offset) => *offset,
            Recovery::Fallback { offset, .. } => *offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// No journal exists yet (first run)
    NoJournal,
    /// The journal exists but holds no decodable record
    Unreadable,
    /// The tailed file does not exist
    FileMissing,
    /// The tailed file is shorter than the journaled offset
    FileShorter,
    /// No line start was found within the configured scan window
    ScanLimit,
    /// The line at the journaled offset hashes differently
    Mismatch,
    /// Reading the tailed file failed
    Io(String),
}

/// A journal file for one input.
#[derive(Debug)]
pub struct SeekJournal {
    path: PathBuf,
    max_scan: u64,
    last_persisted: Option<SeekJournalRecord>,
    diagnostics: Diagnostics,
}

impl SeekJournal {
    /// Open the journal configured for this input, preparing its directory.
    ///
    /// Returns `Ok(None)` when journaling is disabled.
    pub fn open(config: &LogfileInputConfig, diagnostics: Diagnostics) -> Result<Option<Self>> {
        let Some(path) = config.journal_path() else {
            return Ok(None);
        };

        ensure_journal_dir(&config.journal_dir())?;

        Ok(Some(Self::with_path(path, config.max_journal_scan, diagnostics)))
    }

    /// Use an explicit journal path. The parent directory must already exist.
    pub fn with_path(path: impl Into<PathBuf>, max_scan: u64, diagnostics: Diagnostics) -> Self {
        Self {
            path: path.into(),
            max_scan,
            last_persisted: None,
            diagnostics,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored record with `offset` and the hash of `last_line`.
    ///
    /// Skips the write when the same offset and hash are already on disk. A
    /// failed write is reported as a diagnostic error and returned; the
    /// caller keeps tailing.
    pub fn persist(&mut self, offset: u64, last_line: &[u8]) -> Result<()> {
        let record = SeekJournalRecord::for_line(offset, last_line);
        if self.last_persisted.as_ref() == Some(&record) {
            return Ok(());
        }

        match atomic_write(&self.path, record.encode().as_bytes()) {
            Ok(()) => {
                debug!(path = ?self.path, offset, "Persisted seek journal");
                self.last_persisted = Some(record);
                Ok(())
            }
            Err(e) => {
                self.diagnostics
                    .error(format!("Error writing seek recovery log: {}", e));
                Err(e.into())
            }
        }
    }

    /// Read the last decodable record. `Ok(None)` when no journal exists yet.
    pub fn load(&self) -> Result<Option<SeekJournalRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        SeekJournalRecord::decode_last(&contents)
    }

    /// Decide where to start reading `target`.
    pub fn recover(&mut self, target: &Path, policy: ResumePolicy) -> Recovery {
        let record = match self.load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(path = ?self.path, "No seek journal found");
                return self.fall_back(target, policy, FallbackReason::NoJournal);
            }
            Err(e) => {
                self.diagnostics
                    .message(format!("Error opening seek recovery log: {}", e));
                return self.fall_back(target, policy, FallbackReason::Unreadable);
            }
        };

        if record.offset == 0 {
            self.last_persisted = Some(record);
            return Recovery::Verified(0);
        }

        match verify_line(target, &record, self.max_scan) {
            Ok(()) => {
                self.diagnostics.message(format!(
                    "Line matches, continuing from byte pos: {}",
                    record.offset
                ));
                let offset = record.offset;
                self.last_persisted = Some(record);
                Recovery::Verified(offset)
            }
            Err(reason) => {
                if reason == FallbackReason::Mismatch {
                    self.diagnostics.message("Line mismatch.");
                } else {
                    warn!(path = ?target, offset = record.offset, reason = ?reason,
                        "Unable to verify seek journal position");
                }
                self.fall_back(target, policy, reason)
            }
        }
    }

    fn fall_back(&self, target: &Path, policy: ResumePolicy, reason: FallbackReason) -> Recovery {
        let offset = fresh_offset(target, policy);
        match policy {
            ResumePolicy::FromStart => self.diagnostics.message("Restarting from start of file."),
            ResumePolicy::FromEnd => self
                .diagnostics
                .message(format!("Restarting from end of file [{}].", offset)),
        }
        Recovery::Fallback { offset, reason }
    }
}

/// Starting offset when no journal position is used
pub fn fresh_offset(target: &Path, policy: ResumePolicy) -> u64 {
    match policy {
        ResumePolicy::FromStart => 0,
        ResumePolicy::FromEnd => fs::metadata(target).map(|m| m.len()).unwrap_or(0),
    }
}

/// Check that the line ending at `record.offset` still hashes to `record.last_hash`.
fn verify_line(
    target: &Path,
    record: &SeekJournalRecord,
    max_scan: u64,
) -> std::result::Result<(), FallbackReason> {
    let mut file = match File::open(target) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(FallbackReason::FileMissing),
        Err(e) => return Err(FallbackReason::Io(e.to_string())),
    };

    let len = file
        .metadata()
        .map_err(|e| FallbackReason::Io(e.to_string()))?
        .len();
    if len < record.offset {
        return Err(FallbackReason::FileShorter);
    }

    let start = find_line_start(&mut file, record.offset, max_scan)?;

    let mut line = vec![0u8; (record.offset - start) as usize];
    file.seek(SeekFrom::Start(start))
        .and_then(|_| file.read_exact(&mut line))
        .map_err(|e| FallbackReason::Io(e.to_string()))?;

    if line_hash(&line) == record.last_hash {
        Ok(())
    } else {
        Err(FallbackReason::Mismatch)
    }
}

/// Offset of the first byte of the line whose last byte sits at `end - 1`.
///
/// Scans backwards from `end - 1` (the terminator itself is skipped) in
/// chunks, looking at no more than `max_scan` bytes.
fn find_line_start<R: Read + Seek>(
    reader: &mut R,
    end: u64,
    max_scan: u64,
) -> std::result::Result<u64, FallbackReason> {
    let last = end.saturating_sub(1);
    let floor = last.saturating_sub(max_scan);
    let mut pos = last;
    let mut buf = vec![0u8; SCAN_CHUNK_SIZE as usize];

    while pos > floor {
        let chunk_start = pos.saturating_sub(SCAN_CHUNK_SIZE).max(floor);
        let chunk = &mut buf[..(pos - chunk_start) as usize];

        reader
            .seek(SeekFrom::Start(chunk_start))
            .map_err(|e| FallbackReason::Io(e.to_string()))?;
        reader
            .read_exact(chunk)
            .map_err(|e| FallbackReason::Io(e.to_string()))?;

        if let Some(i) = chunk.iter().rposition(|b| *b == b'\n') {
            return Ok(chunk_start + i as u64 + 1);
        }
        pos = chunk_start;
    }

    if floor == 0 {
        Ok(0)
    } else {
        Err(FallbackReason::ScanLimit)
    }
}

fn ensure_journal_dir(dir: &Path) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::NotADirectory(dir.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => create_private_dir(dir),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Write `contents` to a sibling temp file, then rename over `path`.
fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let unique_id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let result = File::create(&temp_path).and_then(|mut file| {
        file.write_all(contents)?;
        file.sync_all()
    });
    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}
