// SPDX-License-Identifier: Apache-2.0

//! File identity used to tell a rotated file from the one still at its path.
//!
//! The monitor records the identity of the handle it opened and compares it
//! against whatever the configured path resolves to on every read pass. The
//! comparison goes through [`FileIdentity`] so platforms or tests can swap the
//! mechanism.

use std::fs::File;
use std::io;
use std::path::Path;

/// A platform-specific identifier for an underlying file.
///
/// On Unix systems, this is the device ID + inode number.
/// On Windows, this is the volume serial number + file index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    /// Device ID (Unix) or volume serial number (Windows)
    dev: u64,
    /// Inode number (Unix) or file index (Windows)
    ino: u64,
}

impl FileId {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Identify an open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = file.metadata()?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// Identify an open file handle.
    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        let file_index = ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64);

        Ok(Self {
            dev: info.dwVolumeSerialNumber as u64,
            ino: file_index,
        })
    }

    /// Identify whatever `path` currently resolves to.
    #[cfg(unix)]
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// Identify whatever `path` currently resolves to.
    #[cfg(windows)]
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// "Is this the same file" check used for rotation detection.
pub trait FileIdentity: Send + Sync {
    /// Identity of an already-open handle.
    fn of_file(&self, file: &File) -> io::Result<FileId>;

    /// Identity of the file currently found at `path`.
    fn of_path(&self, path: &Path) -> io::Result<FileId>;
}

/// Identity from the operating system's device and inode numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFileIdentity;

impl FileIdentity for NativeFileIdentity {
    fn of_file(&self, file: &File) -> io::Result<FileId> {
        FileId::from_file(file)
    }

    fn of_path(&self, path: &Path) -> io::Result<FileId> {
        FileId::from_path(path)
    }
}
