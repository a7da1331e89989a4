//! The SMB client surface the filesystem is written against.
//!
//! [`SmbBackend`] mirrors the synchronous libsmbclient calls the worker
//! needs. Every method takes `&mut self`: an implementation is owned by the
//! worker thread and is never called concurrently. Failures are reported as
//! the errno the client library set.

use std::time::SystemTime;

use crate::error::BackendResult;

/// DOS attribute: read-only.
pub const DOS_ATTR_READONLY: u16 = 0x01;
/// DOS attribute: directory.
pub const DOS_ATTR_DIRECTORY: u16 = 0x10;

/// `statvfs` flag set by libsmbclient when the server lacks the UNIX CIFS
/// extensions (`SMBC_VFS_FEATURE_NO_UNIXCIFS`).
pub const VFS_FEATURE_NO_UNIXCIFS: u64 = 1 << 30;

/// Metadata returned by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Type and permission bits as reported by the client library.
    pub mode: u32,
    /// Size in bytes.
    pub size: u64,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
}

/// Filesystem-wide statistics returned by `statvfs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
    /// Preferred block size.
    pub block_size: u64,
    /// Fragment size; `blocks` are counted in these units.
    pub fragment_size: u64,
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub blocks_free: u64,
    /// Free blocks available to unprivileged users.
    pub blocks_available: u64,
    /// Total file nodes.
    pub files: u64,
    /// Free file nodes.
    pub files_free: u64,
    /// Maximum filename length.
    pub name_max: u64,
    /// Mount flags, including [`VFS_FEATURE_NO_UNIXCIFS`].
    pub flags: u64,
}

/// One entry from `readdirplus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// Entry name, a single path component.
    pub name: String,
    /// DOS attribute bitmap (`DOS_ATTR_*`).
    pub attrs: u16,
    /// Size in bytes.
    pub size: u64,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
}

impl DirEntryInfo {
    /// Returns true if the directory attribute is set.
    pub fn is_dir(&self) -> bool {
        self.attrs & DOS_ATTR_DIRECTORY != 0
    }
}

/// Synchronous, single-threaded SMB client operations.
///
/// URLs are fully resolved `smb://host/share/path` strings. Open files and
/// open directories share one handle type, as they do in libsmbclient.
pub trait SmbBackend: Send + 'static {
    /// An open file or directory.
    type File: Send + 'static;

    /// Stats the object at `url`.
    fn stat(&mut self, url: &str) -> BackendResult<FileStat>;

    /// Returns filesystem statistics for the share containing `url`.
    fn statvfs(&mut self, url: &str) -> BackendResult<FsStats>;

    /// Opens (or, with `O_CREAT`, creates) a file.
    fn open(&mut self, url: &str, flags: i32, mode: u32) -> BackendResult<Self::File>;

    /// Closes a file opened with [`open`](Self::open).
    fn close(&mut self, file: &Self::File) -> BackendResult<()>;

    /// Seeks to an absolute offset and returns it.
    fn lseek(&mut self, file: &Self::File, offset: i64) -> BackendResult<i64>;

    /// Reads at the current position; returns the number of bytes read.
    fn read(&mut self, file: &Self::File, buf: &mut [u8]) -> BackendResult<usize>;

    /// Writes at the current position; returns the number of bytes written.
    fn write(&mut self, file: &Self::File, data: &[u8]) -> BackendResult<usize>;

    /// Truncates or extends an open file.
    fn ftruncate(&mut self, file: &Self::File, size: u64) -> BackendResult<()>;

    /// Opens a directory for enumeration.
    fn opendir(&mut self, url: &str) -> BackendResult<Self::File>;

    /// Closes a directory opened with [`opendir`](Self::opendir).
    fn closedir(&mut self, dir: &Self::File) -> BackendResult<()>;

    /// Returns the next entry, or `None` at the end of the directory.
    fn readdirplus(&mut self, dir: &Self::File) -> BackendResult<Option<DirEntryInfo>>;

    /// Returns the opaque position of the next entry.
    fn telldir(&mut self, dir: &Self::File) -> BackendResult<i64>;

    /// Repositions to an offset previously returned by
    /// [`telldir`](Self::telldir).
    fn lseekdir(&mut self, dir: &Self::File, offset: i64) -> BackendResult<()>;

    /// Creates a directory.
    fn mkdir(&mut self, url: &str, mode: u32) -> BackendResult<()>;

    /// Removes an empty directory.
    fn rmdir(&mut self, url: &str) -> BackendResult<()>;

    /// Renames within the same share.
    fn rename(&mut self, old_url: &str, new_url: &str) -> BackendResult<()>;

    /// Removes a file.
    fn unlink(&mut self, url: &str) -> BackendResult<()>;
}
