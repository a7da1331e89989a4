//! Attribute snapshots and POSIX mode constants.

use std::time::SystemTime;

/// POSIX mode bits, spelled out so values are identical on every platform
/// (`libc::mode_t` is `u16` on macOS).
pub mod mode {
    /// File type mask.
    pub const S_IFMT: u32 = 0o170000;
    /// Directory.
    pub const S_IFDIR: u32 = 0o040000;
    /// Regular file.
    pub const S_IFREG: u32 = 0o100000;
    /// Symbolic link.
    pub const S_IFLNK: u32 = 0o120000;
    /// User read.
    pub const S_IRUSR: u32 = 0o400;
    /// User write.
    pub const S_IWUSR: u32 = 0o200;
    /// User execute.
    pub const S_IXUSR: u32 = 0o100;
    /// User read/write/execute.
    pub const S_IRWXU: u32 = 0o700;
    /// Group read.
    pub const S_IRGRP: u32 = 0o040;
    /// Group write.
    pub const S_IWGRP: u32 = 0o020;
    /// Group execute.
    pub const S_IXGRP: u32 = 0o010;
    /// Group read/write/execute.
    pub const S_IRWXG: u32 = 0o070;
    /// Other read/write/execute.
    pub const S_IRWXO: u32 = 0o007;

    /// Returns true if `mode` describes a directory.
    pub fn is_dir(mode: u32) -> bool {
        mode & S_IFMT == S_IFDIR
    }

    /// Returns true if `mode` describes a regular file.
    pub fn is_reg(mode: u32) -> bool {
        mode & S_IFMT == S_IFREG
    }
}

/// A POSIX-shaped attribute record for one inode.
///
/// Snapshots are derived from whatever the server last reported and are
/// never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatSnapshot {
    /// Inode this snapshot describes.
    pub inode: u64,
    /// Type and permission bits.
    pub mode: u32,
    /// Size in bytes.
    pub size: u64,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Link count.
    pub nlink: u32,
}

impl StatSnapshot {
    /// Returns true if this snapshot describes a directory.
    pub fn is_dir(&self) -> bool {
        mode::is_dir(self.mode)
    }

    /// Permission bits without the file type.
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }
}
