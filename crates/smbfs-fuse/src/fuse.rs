//! fuser adapter.
//!
//! [`SmbFuse`] implements [`fuser::Filesystem`] by wrapping each fuser reply
//! object in a request type and handing it to [`SmbFilesystem`]. The kernel
//! thread returns as soon as the operation is queued.

use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{
    Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use nix::errno::Errno;
use smbfs_mount::StatSnapshot;
use tracing::{info, trace};

use crate::attr::{file_type, to_file_attr};
use crate::backend::{FsStats, SmbBackend};
use crate::filesystem::SmbFilesystem;
use crate::request::{
    AttrRequest, BufRequest, CreateRequest, DirEntryRequest, EntryParam, EntryRequest,
    FsRequest, OpenRequest, SetAttrValues, SimpleRequest, StatFsRequest, WriteRequest, set_attr,
};

/// A fuser reply object seen as a request.
struct FuseReply<R> {
    reply: R,
}

impl<R> FuseReply<R> {
    fn boxed(reply: R) -> Box<Self> {
        Box::new(Self { reply })
    }
}

macro_rules! fuse_request {
    ($($reply:ty),* $(,)?) => {
        $(
            impl FsRequest for FuseReply<$reply> {
                fn is_interrupted(&self) -> bool {
                    // fuser does not surface FUSE_INTERRUPT.
                    false
                }

                fn reply_error(self: Box<Self>, errno: Errno) {
                    self.reply.error(errno as i32);
                }
            }
        )*
    };
}

fuse_request!(
    ReplyStatfs,
    ReplyEntry,
    ReplyAttr,
    ReplyOpen,
    ReplyCreate,
    ReplyData,
    ReplyWrite,
    ReplyEmpty,
    ReplyDirectory,
);

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// fuser has a single timeout for the name and the attributes.
fn entry_ttl(entry: &EntryParam) -> Duration {
    entry.attr_timeout.min(entry.entry_timeout)
}

impl StatFsRequest for FuseReply<ReplyStatfs> {
    fn reply_statfs(self: Box<Self>, stats: FsStats) {
        self.reply.statfs(
            stats.blocks,
            stats.blocks_free,
            stats.blocks_available,
            stats.files,
            stats.files_free,
            saturating_u32(stats.block_size),
            saturating_u32(stats.name_max),
            saturating_u32(stats.fragment_size),
        );
    }
}

impl EntryRequest for FuseReply<ReplyEntry> {
    fn reply_entry(self: Box<Self>, entry: EntryParam) {
        self.reply
            .entry(&entry_ttl(&entry), &to_file_attr(&entry.attr), entry.generation);
    }
}

impl AttrRequest for FuseReply<ReplyAttr> {
    fn reply_attr(self: Box<Self>, attr: StatSnapshot, timeout: Duration) {
        self.reply.attr(&timeout, &to_file_attr(&attr));
    }
}

impl OpenRequest for FuseReply<ReplyOpen> {
    fn reply_open(self: Box<Self>, handle: u64) {
        self.reply.opened(handle, 0);
    }
}

impl CreateRequest for FuseReply<ReplyCreate> {
    fn reply_create(self: Box<Self>, entry: EntryParam, handle: u64) {
        self.reply.created(
            &entry_ttl(&entry),
            &to_file_attr(&entry.attr),
            entry.generation,
            handle,
            0,
        );
    }
}

impl BufRequest for FuseReply<ReplyData> {
    fn reply_buf(self: Box<Self>, data: &[u8]) {
        self.reply.data(data);
    }
}

impl WriteRequest for FuseReply<ReplyWrite> {
    fn reply_write(self: Box<Self>, written: usize) {
        self.reply.written(u32::try_from(written).unwrap_or(u32::MAX));
    }
}

impl SimpleRequest for FuseReply<ReplyEmpty> {
    fn reply_ok(self: Box<Self>) {
        self.reply.ok();
    }
}

impl DirEntryRequest for FuseReply<ReplyDirectory> {
    fn add_entry(&mut self, name: &str, inode: u64, mode: u32, next_offset: i64) -> bool {
        // `add` returns true when the buffer is full.
        !self.reply.add(inode, next_offset, file_type(mode), name)
    }

    fn reply_done(self: Box<Self>) {
        self.reply.ok();
    }
}

/// Converts a name from the kernel, replying `EINVAL` if it is not UTF-8.
macro_rules! utf8_name {
    ($name:expr, $reply:expr) => {
        match $name.to_str() {
            Some(name) => name,
            None => {
                $reply.error(libc::EINVAL);
                return;
            }
        }
    };
}

/// The share mounted through fuser.
pub struct SmbFuse<B: SmbBackend> {
    fs: SmbFilesystem<B>,
}

impl<B: SmbBackend> SmbFuse<B> {
    /// Wraps a filesystem for mounting.
    pub fn new(fs: SmbFilesystem<B>) -> Self {
        Self { fs }
    }

    /// The wrapped filesystem.
    pub fn filesystem(&self) -> &SmbFilesystem<B> {
        &self.fs
    }
}

/// Builds the `to_set` mask and values for a fuser `setattr` call.
pub fn setattr_mask(
    mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
    atime: Option<TimeOrNow>,
    mtime: Option<TimeOrNow>,
    ctime: Option<SystemTime>,
) -> (u32, SetAttrValues) {
    let mut to_set = 0;
    let mut values = SetAttrValues::default();
    if let Some(mode) = mode {
        to_set |= set_attr::MODE;
        values.mode = mode;
    }
    if let Some(uid) = uid {
        to_set |= set_attr::UID;
        values.uid = uid;
    }
    if let Some(gid) = gid {
        to_set |= set_attr::GID;
        values.gid = gid;
    }
    if let Some(size) = size {
        to_set |= set_attr::SIZE;
        values.size = size;
    }
    match atime {
        Some(TimeOrNow::Now) => to_set |= set_attr::ATIME | set_attr::ATIME_NOW,
        Some(TimeOrNow::SpecificTime(_)) => to_set |= set_attr::ATIME,
        None => {}
    }
    match mtime {
        Some(TimeOrNow::Now) => to_set |= set_attr::MTIME | set_attr::MTIME_NOW,
        Some(TimeOrNow::SpecificTime(_)) => to_set |= set_attr::MTIME,
        None => {}
    }
    if ctime.is_some() {
        to_set |= set_attr::CTIME;
    }
    (to_set, values)
}

impl<B: SmbBackend> Filesystem for SmbFuse<B> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(share = %self.fs.shared().share_url(), "FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = utf8_name!(name, reply);
        trace!(parent, name, "lookup");
        self.fs.lookup(parent, name, FuseReply::boxed(reply));
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        self.fs.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        self.fs.getattr(ino, FuseReply::boxed(reply));
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let (to_set, values) = setattr_mask(mode, uid, gid, size, atime, mtime, ctime);
        trace!(inode = ino, ?fh, to_set = format_args!("{to_set:#x}"), "setattr");
        self.fs
            .setattr(ino, fh, values, to_set, FuseReply::boxed(reply));
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let name = utf8_name!(name, reply);
        trace!(parent, name, mode = format_args!("{mode:o}"), "mkdir");
        self.fs
            .mkdir(parent, name, mode & !umask, FuseReply::boxed(reply));
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = utf8_name!(name, reply);
        trace!(parent, name, "unlink");
        self.fs.unlink(parent, name, FuseReply::boxed(reply));
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = utf8_name!(name, reply);
        trace!(parent, name, "rmdir");
        self.fs.rmdir(parent, name, FuseReply::boxed(reply));
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name = utf8_name!(name, reply);
        let newname = utf8_name!(newname, reply);
        trace!(parent, name, newparent, newname, "rename");
        self.fs
            .rename(parent, name, newparent, newname, FuseReply::boxed(reply));
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        self.fs.open(ino, flags, FuseReply::boxed(reply));
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh, offset, size, "read");
        self.fs
            .read(ino, fh, size as usize, offset, FuseReply::boxed(reply));
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, fh, offset, len = data.len(), "write");
        self.fs.write(ino, fh, data, offset, FuseReply::boxed(reply));
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "release");
        self.fs.release(ino, fh, FuseReply::boxed(reply));
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "opendir");
        self.fs.opendir(ino, flags, FuseReply::boxed(reply));
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        trace!(inode = ino, fh, offset, "readdir");
        self.fs.readdir(ino, fh, offset, FuseReply::boxed(reply));
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "releasedir");
        self.fs.releasedir(ino, fh, FuseReply::boxed(reply));
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        trace!(inode = ino, "statfs");
        self.fs.statfs(ino, FuseReply::boxed(reply));
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let name = utf8_name!(name, reply);
        trace!(parent, name, mode = format_args!("{mode:o}"), flags, "create");
        self.fs
            .create(parent, name, mode & !umask, flags, FuseReply::boxed(reply));
    }
}
