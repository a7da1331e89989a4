//! Kernel request objects as seen by the worker.
//!
//! A request is something that can say whether the kernel still cares about
//! it and that accepts exactly one reply. Reply methods take `self: Box<Self>`,
//! so a request is consumed by its reply and cannot be answered twice. A
//! request dropped without a reply is how an interrupted request is
//! discarded.

use std::time::Duration;

use nix::errno::Errno;
use smbfs_mount::StatSnapshot;

use crate::backend::FsStats;

/// Bits of the `to_set` mask passed to `setattr`, as in `fuse_lowlevel.h`.
pub mod set_attr {
    /// Mode.
    pub const MODE: u32 = 1 << 0;
    /// Owner.
    pub const UID: u32 = 1 << 1;
    /// Group.
    pub const GID: u32 = 1 << 2;
    /// Size.
    pub const SIZE: u32 = 1 << 3;
    /// Access time.
    pub const ATIME: u32 = 1 << 4;
    /// Modification time.
    pub const MTIME: u32 = 1 << 5;
    /// Access time set to now.
    pub const ATIME_NOW: u32 = 1 << 7;
    /// Modification time set to now.
    pub const MTIME_NOW: u32 = 1 << 8;
    /// Change time.
    pub const CTIME: u32 = 1 << 10;
}

/// Attribute values accompanying a `setattr` mask.
///
/// Only fields whose bit is set in the mask are meaningful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttrValues {
    /// New permission bits.
    pub mode: u32,
    /// New owner.
    pub uid: u32,
    /// New group.
    pub gid: u32,
    /// New size.
    pub size: u64,
}

/// Reply payload for operations that return a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryParam {
    /// The entry's inode.
    pub inode: u64,
    /// Inode generation; constant for the session.
    pub generation: u64,
    /// Attributes of the entry.
    pub attr: StatSnapshot,
    /// How long the kernel may cache `attr`.
    pub attr_timeout: Duration,
    /// How long the kernel may cache the name lookup.
    pub entry_timeout: Duration,
}

/// Behavior shared by every request.
pub trait FsRequest: Send + 'static {
    /// Returns true if the kernel no longer wants the reply.
    fn is_interrupted(&self) -> bool;

    /// Replies with an error.
    fn reply_error(self: Box<Self>, errno: Errno);
}

/// `statfs`.
pub trait StatFsRequest: FsRequest {
    /// Replies with filesystem statistics.
    fn reply_statfs(self: Box<Self>, stats: FsStats);
}

/// `lookup` and `mkdir`.
pub trait EntryRequest: FsRequest {
    /// Replies with a directory entry.
    fn reply_entry(self: Box<Self>, entry: EntryParam);
}

/// `getattr` and `setattr`.
pub trait AttrRequest: FsRequest {
    /// Replies with attributes valid for `timeout`.
    fn reply_attr(self: Box<Self>, attr: StatSnapshot, timeout: Duration);
}

/// `open` and `opendir`.
pub trait OpenRequest: FsRequest {
    /// Replies with a new file handle.
    fn reply_open(self: Box<Self>, handle: u64);
}

/// `create`.
pub trait CreateRequest: FsRequest {
    /// Replies with the new entry and its open handle.
    fn reply_create(self: Box<Self>, entry: EntryParam, handle: u64);
}

/// `read`.
pub trait BufRequest: FsRequest {
    /// Replies with data.
    fn reply_buf(self: Box<Self>, data: &[u8]);
}

/// `write`.
pub trait WriteRequest: FsRequest {
    /// Replies with the number of bytes written.
    fn reply_write(self: Box<Self>, written: usize);
}

/// Operations whose only success reply is "ok".
pub trait SimpleRequest: FsRequest {
    /// Replies with success.
    fn reply_ok(self: Box<Self>);
}

/// `readdir`.
pub trait DirEntryRequest: FsRequest {
    /// Offers an entry to the reply buffer.
    ///
    /// Returns false if the buffer has no room for it; the entry is then not
    /// part of the reply.
    fn add_entry(&mut self, name: &str, inode: u64, mode: u32, next_offset: i64) -> bool;

    /// Sends the entries added so far.
    fn reply_done(self: Box<Self>);
}
