// SPDX-License-Identifier: Apache-2.0

//! The per-file read state machine.
//!
//! A [`FileMonitor`] owns at most one open handle for its path. It starts out
//! discovering (no handle), moves to tailing once [`FileMonitor::try_open`]
//! succeeds, and falls back to discovering whenever the file is rotated away
//! or a read fails. Every complete line is handed to the consumer through a
//! rendezvous channel, so the monitor never runs more than one line ahead of
//! whoever is draining it.

use std::borrow::Cow;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender, SendError, rendezvous};
use crate::logfile::config::LogfileInputConfig;
use crate::logfile::diagnostics::Diagnostics;
use crate::logfile::error::Result;
use crate::logfile::file_id::{FileId, FileIdentity, NativeFileIdentity};
use crate::logfile::journal::{self, Recovery, SeekJournal};

/// One line read from a tailed file, terminator included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub path: PathBuf,
    pub content: String,
    pub logger: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No open handle; waiting for the file to (re)appear
    Discovering,
    /// Handle open; read passes run on every stat tick
    Tailing,
}

/// Result of a read pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Continue,
    /// Cancellation was observed or the consumer went away
    Stop,
}

struct OpenFile {
    file: File,
    id: FileId,
}

pub struct FileMonitor {
    path: PathBuf,
    logger: String,
    offset: u64,
    last_line: Vec<u8>,
    max_line_length: u64,
    dirty: bool,
    handle: Option<OpenFile>,
    open_error_reported: bool,
    journal: Option<SeekJournal>,
    identity: Arc<dyn FileIdentity>,
    lines_tx: BoundedSender<Line>,
    diagnostics: Diagnostics,
}

impl FileMonitor {
    /// Create a monitor and the receiving end of its line conduit.
    ///
    /// Prepares the seek journal and decides the starting offset. Fails only
    /// on configuration problems; an unverifiable journal falls back to the
    /// configured resume policy.
    pub fn new(
        config: &LogfileInputConfig,
        diagnostics: Diagnostics,
    ) -> Result<(Self, BoundedReceiver<Line>)> {
        let path = config.log_file.clone();
        let mut journal = SeekJournal::open(config, diagnostics.clone())?;

        let offset = match journal.as_mut() {
            Some(journal) => {
                let recovery = journal.recover(&path, config.resume_policy());
                if let Recovery::Fallback { reason, .. } = &recovery {
                    debug!(path = ?path, reason = ?reason, "Seek journal not used");
                }
                recovery.offset()
            }
            None => journal::fresh_offset(&path, config.resume_policy()),
        };

        info!(path = ?path, offset, "Created file monitor");

        let (lines_tx, lines_rx) = rendezvous();
        let monitor = Self {
            path,
            logger: config.logger_ident(),
            offset,
            last_line: Vec::new(),
            max_line_length: config.max_line_length,
            dirty: false,
            handle: None,
            open_error_reported: false,
            journal,
            identity: Arc::new(NativeFileIdentity),
            lines_tx,
            diagnostics,
        };

        Ok((monitor, lines_rx))
    }

    /// Replace the mechanism used to detect rotation
    pub fn with_identity(mut self, identity: Arc<dyn FileIdentity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next byte to be delivered
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn state(&self) -> MonitorState {
        if self.handle.is_some() {
            MonitorState::Tailing
        } else {
            MonitorState::Discovering
        }
    }

    /// Try to open the file and position it at the current offset.
    ///
    /// Returns whether the monitor is tailing afterwards.
    pub async fn try_open(&mut self) -> bool {
        if self.handle.is_some() {
            return true;
        }

        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) => {
                self.report_open_error(&e);
                return false;
            }
        };

        let id = match self.identity.of_file(&file) {
            Ok(id) => id,
            Err(e) => {
                self.report_open_error(&e);
                return false;
            }
        };

        let mut file = File::from_std(file);

        let len = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(e) => {
                self.report_open_error(&e);
                return false;
            }
        };
        if len < self.offset {
            warn!(path = ?self.path, offset = self.offset, len, "Offset past end of file, seeking to start");
            self.reset();
        }

        if let Err(e) = file.seek(SeekFrom::Start(self.offset)).await {
            warn!(path = ?self.path, offset = self.offset, error = %e, "Seek failed, seeking to start");
            self.reset();
            if let Err(e) = file.seek(SeekFrom::Start(0)).await {
                self.report_open_error(&e);
                return false;
            }
        }

        info!(path = ?self.path, file_id = %id, offset = self.offset, "Opened file");
        self.open_error_reported = false;
        self.handle = Some(OpenFile { file, id });
        true
    }

    fn report_open_error(&mut self, e: &io::Error) {
        debug!(path = ?self.path, error = %e, "Unable to open file");
        if e.kind() != io::ErrorKind::NotFound && !self.open_error_reported {
            self.open_error_reported = true;
            self.diagnostics
                .message(format!("Unable to open {}: {}", self.path.display(), e));
        }
    }

    /// Run one read pass over the open file.
    ///
    /// Delivers every complete line past the current offset, then persists
    /// the journal if anything moved. A trailing unterminated line is held
    /// back unless the path was rotated away, in which case it is final and
    /// delivered as is. Lines longer than `max_line_length` are delivered in
    /// pieces of that size.
    pub async fn read_available(&mut self, cancel: &CancellationToken) -> PassOutcome {
        let Some(mut open) = self.handle.take() else {
            return PassOutcome::Continue;
        };

        match open.file.metadata().await {
            Ok(meta) if meta.len() < self.offset => {
                warn!(path = ?self.path, offset = self.offset, len = meta.len(), "File truncated");
                self.diagnostics.message(format!(
                    "File truncated, restarting from start of file: {}",
                    self.path.display()
                ));
                self.reset();
            }
            Ok(_) => {}
            Err(e) => {
                self.read_failed(e);
                return PassOutcome::Continue;
            }
        }

        let rotated = self.is_rotated(open.id);

        match self.read_lines(&mut open.file, rotated, cancel).await {
            Ok(PassOutcome::Continue) => {}
            Ok(PassOutcome::Stop) => return PassOutcome::Stop,
            Err(e) => {
                self.read_failed(e);
                return PassOutcome::Continue;
            }
        }

        if rotated {
            info!(path = ?self.path, file_id = %open.id, offset = self.offset, "File rotated");
            self.diagnostics
                .message(format!("File rotated: {}", self.path.display()));
            self.reset();
        } else {
            self.handle = Some(open);
        }

        self.persist();
        PassOutcome::Continue
    }

    async fn read_lines(
        &mut self,
        file: &mut File,
        rotated: bool,
        cancel: &CancellationToken,
    ) -> io::Result<PassOutcome> {
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = (&mut reader)
                .take(self.max_line_length)
                .read_until(b'\n', &mut buf)
                .await?;
            if n == 0 {
                break;
            }

            if buf.last() != Some(&b'\n') && !rotated {
                if (n as u64) < self.max_line_length {
                    // Still growing; the next pass starts over from `offset`.
                    debug!(path = ?self.path, offset = self.offset, len = n, "Holding back partial line");
                    break;
                }
                warn!(path = ?self.path, offset = self.offset, max_line_length = self.max_line_length,
                    "Line too long, splitting");
            }

            let content = match String::from_utf8_lossy(&buf) {
                Cow::Borrowed(text) => text.to_owned(),
                Cow::Owned(text) => {
                    warn!(path = ?self.path, offset = self.offset, "Invalid UTF-8 in line, replaced");
                    text
                }
            };

            let line = Line {
                path: self.path.clone(),
                content,
                logger: self.logger.clone(),
            };

            match self.lines_tx.send_cancellable(line, cancel).await {
                Ok(()) => {
                    self.offset += n as u64;
                    std::mem::swap(&mut self.last_line, &mut buf);
                    self.dirty = true;
                }
                Err(SendError::Cancelled) => {
                    debug!(path = ?self.path, offset = self.offset, "Line delivery abandoned on shutdown");
                    return Ok(PassOutcome::Stop);
                }
                Err(SendError::Disconnected(_)) => {
                    debug!(path = ?self.path, "Line consumer went away");
                    return Ok(PassOutcome::Stop);
                }
            }
        }

        Ok(PassOutcome::Continue)
    }

    /// Whether the path now resolves to a different file than the open handle
    fn is_rotated(&self, open_id: FileId) -> bool {
        match self.identity.of_path(&self.path) {
            Ok(id) => id != open_id,
            Err(e) => {
                debug!(path = ?self.path, error = %e, "Path no longer resolves");
                true
            }
        }
    }

    fn read_failed(&mut self, e: io::Error) {
        self.diagnostics
            .error(format!("Error reading {}: {}", self.path.display(), e));
        self.reset();
        self.persist();
    }

    /// Drop back to the start of the file. Closes nothing by itself; callers
    /// decide whether the handle survives.
    fn reset(&mut self) {
        self.offset = 0;
        self.last_line.clear();
        self.dirty = true;
    }

    fn persist(&mut self) {
        if !self.dirty {
            return;
        }
        match self.journal.as_mut() {
            // Errors are already reported through diagnostics; stay dirty and
            // retry after the next pass.
            Some(journal) => {
                if journal.persist(self.offset, &self.last_line).is_ok() {
                    self.dirty = false;
                }
            }
            None => self.dirty = false,
        }
    }

    /// Persist what was delivered so far and close the handle. Dropping the
    /// monitor closes the line conduit.
    pub fn shutdown(mut self) {
        self.persist();
        if self.handle.take().is_some() {
            debug!(path = ?self.path, "Closed file");
        }
        info!(path = ?self.path, offset = self.offset, "File monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logfile::diagnostics::RecordingSink;
    use crate::logfile::journal::{SeekJournalRecord, line_hash};
    use portable_atomic::{AtomicU64, Ordering};
    use std::fs;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn config_for(dir: &TempDir) -> LogfileInputConfig {
        let mut config = LogfileInputConfig::new(dir.path().join("app.log"));
        config.base_dir = dir.path().join("base");
        config
    }

    async fn take(rx: &mut BoundedReceiver<Line>, n: usize) -> Vec<String> {
        let mut lines = Vec::with_capacity(n);
        while lines.len() < n {
            match rx.next().await {
                Some(line) => lines.push(line.content),
                None => break,
            }
        }
        lines
    }

    async fn pass(
        monitor: &mut FileMonitor,
        rx: &mut BoundedReceiver<Line>,
        n: usize,
    ) -> Vec<String> {
        let cancel = CancellationToken::new();
        let (outcome, lines) = timeout(Duration::from_secs(5), async {
            tokio::join!(monitor.read_available(&cancel), take(rx, n))
        })
        .await
        .expect("read pass did not finish");
        assert_eq!(outcome, PassOutcome::Continue);
        lines
    }

    fn append(path: &Path, data: &str) {
        let mut f = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    fn stored_record(config: &LogfileInputConfig) -> SeekJournalRecord {
        let contents = fs::read_to_string(config.journal_path().unwrap()).unwrap();
        SeekJournalRecord::decode(&contents).unwrap()
    }

    #[tokio::test]
    async fn test_starts_discovering_until_file_exists() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let (mut monitor, _rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();

        assert_eq!(monitor.state(), MonitorState::Discovering);
        assert!(!monitor.try_open().await);

        fs::write(&config.log_file, "a\n").unwrap();
        assert!(monitor.try_open().await);
        assert_eq!(monitor.state(), MonitorState::Tailing);
    }

    #[tokio::test]
    async fn test_reads_lines_and_persists() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        fs::write(&config.log_file, "a\nb\nc\n").unwrap();

        let (mut monitor, mut rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert!(monitor.try_open().await);

        let lines = pass(&mut monitor, &mut rx, 3).await;
        assert_eq!(lines, vec!["a\n", "b\n", "c\n"]);
        assert_eq!(monitor.offset(), 6);
        assert_eq!(
            stored_record(&config),
            SeekJournalRecord::new(6, line_hash(b"c\n"))
        );
    }

    #[tokio::test]
    async fn test_holds_back_partial_line() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        fs::write(&config.log_file, "a\npart").unwrap();

        let (mut monitor, mut rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert!(monitor.try_open().await);

        assert_eq!(pass(&mut monitor, &mut rx, 1).await, vec!["a\n"]);
        assert_eq!(monitor.offset(), 2);

        append(&config.log_file, "ial\n");
        assert_eq!(pass(&mut monitor, &mut rx, 1).await, vec!["partial\n"]);
        assert_eq!(monitor.offset(), 10);
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_start() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        fs::write(&config.log_file, "aaaa\nbbbb\n").unwrap();

        let (mut monitor, mut rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert!(monitor.try_open().await);
        assert_eq!(pass(&mut monitor, &mut rx, 2).await.len(), 2);

        fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&config.log_file)
            .unwrap()
            .write_all(b"c\n")
            .unwrap();

        assert_eq!(pass(&mut monitor, &mut rx, 1).await, vec!["c\n"]);
        assert_eq!(monitor.offset(), 2);
        assert_eq!(monitor.state(), MonitorState::Tailing);
    }

    #[tokio::test]
    async fn test_rotation_drains_old_file_then_rediscovers() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let rotated_path = dir.path().join("app.log.1");
        fs::write(&config.log_file, "a\n").unwrap();

        let (mut monitor, mut rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert!(monitor.try_open().await);
        assert_eq!(pass(&mut monitor, &mut rx, 1).await, vec!["a\n"]);

        fs::rename(&config.log_file, &rotated_path).unwrap();
        append(&rotated_path, "b\ntail");
        fs::write(&config.log_file, "new\n").unwrap();

        assert_eq!(pass(&mut monitor, &mut rx, 2).await, vec!["b\n", "tail"]);
        assert_eq!(monitor.state(), MonitorState::Discovering);
        assert_eq!(monitor.offset(), 0);

        assert!(monitor.try_open().await);
        assert_eq!(pass(&mut monitor, &mut rx, 1).await, vec!["new\n"]);
        assert_eq!(monitor.offset(), 4);
    }

    #[tokio::test]
    async fn test_cancel_abandons_blocked_line() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        fs::write(&config.log_file, "a\nb\n").unwrap();

        let (mut monitor, _rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert!(monitor.try_open().await);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let outcome = timeout(Duration::from_secs(5), monitor.read_available(&cancel))
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::Stop);
        assert_eq!(monitor.offset(), 0);

        monitor.shutdown();
        assert!(!config.journal_path().unwrap().exists());
    }

    #[tokio::test]
    async fn test_resumes_from_journal() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        fs::write(&config.log_file, "a\nb\n").unwrap();

        {
            let (mut monitor, mut rx) =
                FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
            assert!(monitor.try_open().await);
            assert_eq!(pass(&mut monitor, &mut rx, 2).await.len(), 2);
            monitor.shutdown();
        }

        append(&config.log_file, "c\n");

        let (mut monitor, mut rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert_eq!(monitor.offset(), 4);
        assert!(monitor.try_open().await);
        assert_eq!(pass(&mut monitor, &mut rx, 1).await, vec!["c\n"]);
    }

    #[tokio::test]
    async fn test_offset_past_end_resets_on_open() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir);
        config.use_seek_journal = false;
        config.resume_from_start = false;
        fs::write(&config.log_file, "0123456789\n").unwrap();

        let (mut monitor, mut rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert_eq!(monitor.offset(), 11);

        fs::write(&config.log_file, "x\n").unwrap();
        assert!(monitor.try_open().await);
        assert_eq!(monitor.offset(), 0);
        assert_eq!(pass(&mut monitor, &mut rx, 1).await, vec!["x\n"]);
    }

    #[tokio::test]
    async fn test_rereading_to_same_offset_updates_hash() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        fs::write(&config.log_file, "aaaa\nbbbb\n").unwrap();

        {
            let (mut monitor, mut rx) =
                FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
            assert!(monitor.try_open().await);
            assert_eq!(pass(&mut monitor, &mut rx, 2).await.len(), 2);
            monitor.shutdown();
        }

        let (mut monitor, mut rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert_eq!(monitor.offset(), 10);

        // Shrunk before the reopen, then grown back to the journaled length.
        fs::write(&config.log_file, "x\n").unwrap();
        assert!(monitor.try_open().await);
        assert_eq!(monitor.offset(), 0);
        append(&config.log_file, "yyyyyyy\n");

        assert_eq!(pass(&mut monitor, &mut rx, 2).await, vec!["x\n", "yyyyyyy\n"]);
        assert_eq!(monitor.offset(), 10);
        assert_eq!(
            stored_record(&config),
            SeekJournalRecord::new(10, line_hash(b"yyyyyyy\n"))
        );
        monitor.shutdown();

        let (monitor, _rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert_eq!(monitor.offset(), 10);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_read_error_resets_to_discovering() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir);
        // Opening a directory works, reading it fails with EISDIR.
        config.log_file = dir.path().join("logs");
        fs::create_dir(&config.log_file).unwrap();

        let diagnostics = Diagnostics::new("test");
        let sink = Arc::new(RecordingSink::default());
        diagnostics.attach(sink.clone());

        let (mut monitor, mut rx) = FileMonitor::new(&config, diagnostics).unwrap();
        assert!(monitor.try_open().await);
        assert_eq!(monitor.state(), MonitorState::Tailing);

        assert!(pass(&mut monitor, &mut rx, 0).await.is_empty());
        assert_eq!(monitor.state(), MonitorState::Discovering);
        assert_eq!(monitor.offset(), 0);

        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Error reading"), "{}", errors[0]);
        assert_eq!(
            stored_record(&config),
            SeekJournalRecord::new(0, line_hash(b""))
        );
    }

    /// Identity controlled by the test: every handle and path reports the
    /// current generation.
    #[derive(Default)]
    struct GenerationIdentity {
        generation: AtomicU64,
    }

    impl GenerationIdentity {
        fn rotate(&self) {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }

        fn current(&self) -> FileId {
            FileId::new(0, self.generation.load(Ordering::SeqCst))
        }
    }

    impl FileIdentity for GenerationIdentity {
        fn of_file(&self, _file: &std::fs::File) -> io::Result<FileId> {
            Ok(self.current())
        }

        fn of_path(&self, _path: &Path) -> io::Result<FileId> {
            Ok(self.current())
        }
    }

    #[tokio::test]
    async fn test_rotation_through_custom_identity() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        fs::write(&config.log_file, "a\n").unwrap();

        let identity = Arc::new(GenerationIdentity::default());
        let (monitor, mut rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        let mut monitor = monitor.with_identity(identity.clone());

        assert!(monitor.try_open().await);
        assert_eq!(pass(&mut monitor, &mut rx, 1).await, vec!["a\n"]);

        append(&config.log_file, "b\npart");
        identity.rotate();

        // The old handle is drained, trailing partial line included.
        assert_eq!(pass(&mut monitor, &mut rx, 2).await, vec!["b\n", "part"]);
        assert_eq!(monitor.state(), MonitorState::Discovering);
        assert_eq!(monitor.offset(), 0);

        // Same bytes on disk, but a new identity: read from the start.
        assert!(monitor.try_open().await);
        assert_eq!(pass(&mut monitor, &mut rx, 2).await, vec!["a\n", "b\n"]);
        assert_eq!(monitor.offset(), 4);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced_but_offset_counts_bytes() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        fs::write(&config.log_file, b"ok\xff\n").unwrap();

        let (mut monitor, mut rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert!(monitor.try_open().await);

        assert_eq!(pass(&mut monitor, &mut rx, 1).await, vec!["ok\u{FFFD}\n"]);
        assert_eq!(monitor.offset(), 4);
        assert_eq!(
            stored_record(&config),
            SeekJournalRecord::new(4, line_hash(b"ok\xff\n"))
        );
    }

    #[tokio::test]
    async fn test_long_line_is_split() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir);
        config.max_line_length = 4;
        fs::write(&config.log_file, "abcdefgh12\nok\nre").unwrap();

        let (mut monitor, mut rx) = FileMonitor::new(&config, Diagnostics::new("test")).unwrap();
        assert!(monitor.try_open().await);

        assert_eq!(
            pass(&mut monitor, &mut rx, 4).await,
            vec!["abcd", "efgh", "12\n", "ok\n"]
        );
        assert_eq!(monitor.offset(), 14);
    }
}
