//! Attribute translation from SMB metadata to kernel-facing stats.
//!
//! The share decides what a user may actually do; the mode bits reported to
//! the kernel only have to keep it from refusing operations up front while
//! never making anything world-accessible. Every stat leaving the filesystem
//! is therefore normalized the same way:
//!
//! - only regular files and directories are exposed
//! - "other" permission bits are always clear
//! - directories are user-searchable, files are never user-executable
//! - group bits mirror user bits
//! - owner and group are the configured uid/gid, link count is 1

use std::time::SystemTime;

use fuser::{FileAttr, FileType};
use nix::errno::Errno;
use smbfs_mount::{StatSnapshot, mode};
use thiserror::Error;

use crate::backend::{DOS_ATTR_DIRECTORY, DOS_ATTR_READONLY, FileStat};
use crate::error::ToErrno;

/// Block size reported in `st_blksize`.
const BLOCK_SIZE: u32 = 4096;

/// Failure to translate backend metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttrError {
    /// The object is neither a regular file nor a directory.
    #[error("Unsupported file type in mode {mode:#o}")]
    DisallowedFileType {
        /// The mode reported by the server.
        mode: u32,
    },
}

impl ToErrno for AttrError {
    fn to_errno(&self) -> Errno {
        match self {
            AttrError::DisallowedFileType { .. } => Errno::EACCES,
        }
    }
}

/// Returns true for the two file types the filesystem exposes.
pub fn is_allowed_file_type(mode: u32) -> bool {
    mode::is_reg(mode) || mode::is_dir(mode)
}

/// Normalizes permission bits for an allowed file type.
///
/// Keeps the type and user bits of `mode`, forces user-execute on for
/// directories and off for everything else, copies user bits to group and
/// clears other.
pub fn normalize_mode(mode: u32) -> u32 {
    let kind = mode & mode::S_IFMT;
    let mut user = mode & mode::S_IRWXU;
    if kind == mode::S_IFDIR {
        user |= mode::S_IXUSR;
    } else {
        user &= !mode::S_IXUSR;
    }
    kind | user | (user >> 3)
}

/// Derives a normalized mode from a DOS attribute bitmap.
pub fn mode_from_dos_attributes(attrs: u16) -> u32 {
    let kind = if attrs & DOS_ATTR_DIRECTORY != 0 {
        mode::S_IFDIR
    } else {
        mode::S_IFREG
    };
    let user = if attrs & DOS_ATTR_READONLY != 0 {
        mode::S_IRUSR
    } else {
        mode::S_IRUSR | mode::S_IWUSR
    };
    normalize_mode(kind | user)
}

/// Builds kernel-facing stats with a fixed owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrTranslator {
    uid: u32,
    gid: u32,
}

impl AttrTranslator {
    /// Creates a translator that reports every object as owned by `uid:gid`.
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Translates a backend stat for `inode`.
    pub fn from_stat(&self, inode: u64, stat: &FileStat) -> Result<StatSnapshot, AttrError> {
        if !is_allowed_file_type(stat.mode) {
            return Err(AttrError::DisallowedFileType { mode: stat.mode });
        }
        Ok(self.snapshot(
            inode,
            normalize_mode(stat.mode),
            stat.size,
            stat.atime,
            stat.mtime,
            stat.ctime,
        ))
    }

    /// Builds a stat for `inode` from DOS attributes and the size and times
    /// a directory listing supplies.
    pub fn from_dos_attributes(
        &self,
        inode: u64,
        attrs: u16,
        size: u64,
        atime: SystemTime,
        mtime: SystemTime,
        ctime: SystemTime,
    ) -> StatSnapshot {
        self.snapshot(
            inode,
            mode_from_dos_attributes(attrs),
            size,
            atime,
            mtime,
            ctime,
        )
    }

    /// Synthesizes the stat of an object the filesystem just created, before
    /// the server has been asked about it.
    ///
    /// `mode` is the requested type and permission bits; times are the epoch
    /// and size is zero.
    pub fn synthesized(&self, inode: u64, mode: u32) -> StatSnapshot {
        self.snapshot(
            inode,
            normalize_mode(mode),
            0,
            SystemTime::UNIX_EPOCH,
            SystemTime::UNIX_EPOCH,
            SystemTime::UNIX_EPOCH,
        )
    }

    fn snapshot(
        &self,
        inode: u64,
        mode: u32,
        size: u64,
        atime: SystemTime,
        mtime: SystemTime,
        ctime: SystemTime,
    ) -> StatSnapshot {
        StatSnapshot {
            inode,
            mode,
            size,
            atime,
            mtime,
            ctime,
            uid: self.uid,
            gid: self.gid,
            nlink: 1,
        }
    }
}

/// Converts a normalized snapshot to the fuser attribute struct.
pub fn to_file_attr(stat: &StatSnapshot) -> FileAttr {
    let kind = if stat.is_dir() {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    FileAttr {
        ino: stat.inode,
        size: stat.size,
        blocks: stat.size.div_ceil(512),
        atime: stat.atime,
        mtime: stat.mtime,
        ctime: stat.ctime,
        crtime: stat.ctime,
        kind,
        perm: stat.perm(),
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// The fuser file type for a normalized mode.
pub fn file_type(mode: u32) -> FileType {
    if mode::is_dir(mode) {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}
