//! The backend worker: every filesystem operation, run on the thread that
//! owns the SMB client context.
//!
//! A [`Worker`] is the state of the `smbfs-libsmb` executor. It owns the
//! backend, the inode map, the stat cache and the open handle table, so no
//! locking is needed for any of them. Each operation checks whether its
//! request was interrupted, talks to the backend, and answers the request
//! exactly once.
//!
//! An inode or parent inode the kernel passes in that this worker never
//! handed out is treated as a protocol violation and panics; the executor
//! aborts the process in that case.

use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use smbfs_mount::{HandleTable, InodeMap, ROOT_INODE, SharePath, StatCache, StatSnapshot, mode};
use tracing::{debug, error, info, trace, warn};

use crate::attr::AttrTranslator;
use crate::backend::{SmbBackend, VFS_FEATURE_NO_UNIXCIFS};
use crate::config::SmbFsConfig;
use crate::credentials::CredentialRefresher;
use crate::error::{ConnectError, ToErrno};
use crate::executor::ExecutorHandle;
use crate::request::{
    AttrRequest, BufRequest, CreateRequest, DirEntryRequest, EntryParam, EntryRequest,
    FsRequest, OpenRequest, SetAttrValues, SimpleRequest, StatFsRequest, WriteRequest, set_attr,
};
use crate::shared::SharedState;

/// Generation reported for every inode; numbers are never reused.
const GENERATION: u64 = 1;

fn interrupted<R: FsRequest + ?Sized>(op: &'static str, request: &R) -> bool {
    let interrupted = request.is_interrupted();
    if interrupted {
        trace!(op, "Dropping interrupted request");
    }
    interrupted
}

/// A file opened only for the duration of one operation.
///
/// Closed when dropped; a failed close is logged since there is nobody left
/// to report it to.
struct ScopedFile<'a, B: SmbBackend> {
    backend: &'a mut B,
    file: B::File,
    url: &'a str,
}

impl<'a, B: SmbBackend> ScopedFile<'a, B> {
    fn open(backend: &'a mut B, url: &'a str, flags: i32) -> Result<Self, Errno> {
        let file = backend.open(url, flags, 0)?;
        Ok(Self { backend, file, url })
    }

    fn ftruncate(&mut self, size: u64) -> Result<(), Errno> {
        self.backend.ftruncate(&self.file, size)
    }
}

impl<B: SmbBackend> Drop for ScopedFile<'_, B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.close(&self.file) {
            error!(url = %self.url, error = %e, "Failed to close temporary file handle");
        }
    }
}

/// Backend worker state.
pub struct Worker<B: SmbBackend> {
    backend: B,
    shared: Arc<SharedState>,
    inodes: InodeMap,
    stat_cache: StatCache,
    open_files: HandleTable<B::File>,
    translator: AttrTranslator,
    attr_timeout: Duration,
    use_kerberos: bool,
    connected: bool,
    refresher: ExecutorHandle<CredentialRefresher>,
}

impl<B: SmbBackend> Worker<B> {
    /// Creates the worker state. `refresher` is the control thread that
    /// handles credential refresh requests.
    pub fn new(
        backend: B,
        shared: Arc<SharedState>,
        config: &SmbFsConfig,
        refresher: ExecutorHandle<CredentialRefresher>,
    ) -> Self {
        Self {
            backend,
            shared,
            inodes: InodeMap::new(),
            stat_cache: StatCache::new(config.stat_cache_capacity, config.attr_timeout),
            open_files: HandleTable::new(),
            translator: AttrTranslator::new(config.uid, config.gid),
            attr_timeout: config.attr_timeout,
            use_kerberos: config.use_kerberos,
            connected: false,
            refresher,
        }
    }

    /// Returns true once the share root has been reached successfully.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The inode map.
    pub fn inodes(&self) -> &InodeMap {
        &self.inodes
    }

    /// The stat cache.
    pub fn stat_cache(&self) -> &StatCache {
        &self.stat_cache
    }

    /// Number of open file and directory handles.
    pub fn open_handle_count(&self) -> usize {
        self.open_files.len()
    }

    fn path_of(&self, inode: u64) -> &SharePath {
        self.inodes
            .path(inode)
            .unwrap_or_else(|| panic!("no path for unknown inode {inode}"))
    }

    fn url_of(&self, inode: u64) -> String {
        self.shared.url_for(self.path_of(inode))
    }

    fn child_path(&self, parent: u64, name: &str) -> SharePath {
        self.path_of(parent).join(name)
    }

    fn entry_param(&self, attr: StatSnapshot, attr_timeout: Duration) -> EntryParam {
        EntryParam {
            inode: attr.inode,
            generation: GENERATION,
            attr,
            attr_timeout,
            entry_timeout: self.attr_timeout,
        }
    }

    fn forget_inode(&mut self, inode: u64, count: u64) {
        if self.inodes.forget(inode, count) {
            self.stat_cache.erase(inode);
        }
    }

    fn erase_cached_path(&mut self, path: &SharePath) {
        if let Some(inode) = self.inodes.inode(path) {
            self.stat_cache.erase(inode);
        }
    }

    /// Posts a credential refresh if `errno` on the share root looks like
    /// bad credentials and nothing has succeeded yet.
    fn maybe_refresh_credentials(&self, errno: Errno) {
        if self.use_kerberos || self.connected {
            return;
        }
        if errno != Errno::EPERM && errno != Errno::EACCES {
            return;
        }
        if self
            .refresher
            .post(CredentialRefresher::request_update)
            .is_err()
        {
            warn!("Control thread is gone, cannot refresh credentials");
        }
    }

    /// Opens and closes the share root to classify reachability.
    pub fn ensure_connected(&mut self) -> Result<(), ConnectError> {
        let url = self.shared.base_url();
        let dir = match self.backend.opendir(&url) {
            Ok(dir) => dir,
            Err(e) => {
                let result = ConnectError::from_errno(e);
                if result == ConnectError::UnknownError {
                    warn!(url = %url, error = %e, "Unexpected error connecting to share");
                } else {
                    info!(url = %url, error = %e, result = %result, "Failed to connect to share");
                }
                return Err(result);
            }
        };
        if let Err(e) = self.backend.closedir(&dir) {
            debug!(url = %url, error = %e, "smbc_closedir failed after connect probe");
        }
        self.connected = true;
        info!(url = %url, "Connected to share");
        Ok(())
    }

    /// Filesystem statistics.
    pub fn statfs(&mut self, inode: u64, request: Box<dyn StatFsRequest>) {
        if interrupted("statfs", &*request) {
            return;
        }
        let url = self.url_of(inode);
        match self.backend.statvfs(&url) {
            Ok(mut stats) => {
                // Without the UNIX extensions libsmbclient reports f_frsize in
                // units of f_bsize.
                if stats.flags & VFS_FEATURE_NO_UNIXCIFS != 0 && stats.fragment_size != 0 {
                    stats.fragment_size = stats.fragment_size.saturating_mul(stats.block_size);
                }
                request.reply_statfs(stats);
            }
            Err(e) => {
                debug!(url = %url, error = %e, "smbc_statvfs failed");
                request.reply_error(e);
            }
        }
    }

    /// Looks up `name` in `parent`, taking a reference on the result.
    pub fn lookup(&mut self, parent: u64, name: &str, request: Box<dyn EntryRequest>) {
        if interrupted("lookup", &*request) {
            return;
        }
        let path = self.child_path(parent, name);
        let inode = self.inodes.inc_ref(&path);

        let stat = match self.stat_cache.get(inode) {
            Some(stat) => stat,
            None => {
                let url = self.shared.url_for(&path);
                let translated = self
                    .backend
                    .stat(&url)
                    .inspect_err(|e| trace!(url = %url, error = %e, "smbc_stat failed"))
                    .and_then(|st| {
                        self.translator
                            .from_stat(inode, &st)
                            .map_err(|e| e.to_errno())
                    });
                match translated {
                    Ok(stat) => stat,
                    Err(e) => {
                        self.forget_inode(inode, 1);
                        request.reply_error(e);
                        return;
                    }
                }
            }
        };
        request.reply_entry(self.entry_param(stat, self.attr_timeout));
    }

    /// Drops `count` kernel references to `inode`.
    pub fn forget(&mut self, inode: u64, count: u64) {
        self.forget_inode(inode, count);
    }

    /// Attributes of `inode`.
    pub fn getattr(&mut self, inode: u64, request: Box<dyn AttrRequest>) {
        if interrupted("getattr", &*request) {
            return;
        }
        let stat = match self.stat_cache.get(inode) {
            Some(stat) => stat,
            None => {
                let url = self.url_of(inode);
                let st = match self.backend.stat(&url) {
                    Ok(st) => st,
                    Err(e) => {
                        debug!(url = %url, error = %e, "smbc_stat failed");
                        if inode == ROOT_INODE {
                            self.maybe_refresh_credentials(e);
                        }
                        request.reply_error(e);
                        return;
                    }
                };
                match self.translator.from_stat(inode, &st) {
                    Ok(stat) => stat,
                    Err(e) => {
                        request.reply_error(e.to_errno());
                        return;
                    }
                }
            }
        };
        if inode == ROOT_INODE && !self.connected {
            debug!("First successful getattr on share root");
            self.connected = true;
        }
        request.reply_attr(stat, self.attr_timeout);
    }

    /// Changes attributes. Only truncation is supported.
    pub fn setattr(
        &mut self,
        inode: u64,
        handle: Option<u64>,
        values: SetAttrValues,
        to_set: u32,
        request: Box<dyn AttrRequest>,
    ) {
        if interrupted("setattr", &*request) {
            return;
        }
        if to_set & !set_attr::SIZE != 0 {
            warn!(inode, to_set = format_args!("{to_set:#x}"), "Unsupported setattr request");
            request.reply_error(Errno::ENOTSUP);
            return;
        }
        if to_set == 0 {
            request.reply_error(Errno::EINVAL);
            return;
        }

        let url = self.url_of(inode);
        let st = match self.backend.stat(&url) {
            Ok(st) => st,
            Err(e) => {
                debug!(url = %url, error = %e, "smbc_stat failed");
                request.reply_error(e);
                return;
            }
        };
        if mode::is_dir(st.mode) {
            request.reply_error(Errno::EISDIR);
            return;
        }
        let mut stat = match self.translator.from_stat(inode, &st) {
            Ok(stat) => stat,
            Err(e) => {
                request.reply_error(e.to_errno());
                return;
            }
        };

        let result = match handle {
            Some(fh) => {
                let Some(file) = self.open_files.get(fh) else {
                    request.reply_error(Errno::EBADF);
                    return;
                };
                self.backend.ftruncate(file, values.size)
            }
            None => ScopedFile::open(&mut self.backend, &url, libc::O_WRONLY)
                .inspect_err(|e| debug!(url = %url, error = %e, "smbc_open failed"))
                .and_then(|mut file| file.ftruncate(values.size)),
        };
        if let Err(e) = result {
            debug!(url = %url, size = values.size, error = %e, "smbc_ftruncate failed");
            request.reply_error(e);
            return;
        }

        stat.size = values.size;
        self.stat_cache.erase(inode);
        request.reply_attr(stat, self.attr_timeout);
    }

    /// Opens a file.
    pub fn open(&mut self, inode: u64, flags: i32, request: Box<dyn OpenRequest>) {
        if interrupted("open", &*request) {
            return;
        }
        if inode == ROOT_INODE {
            request.reply_error(Errno::EISDIR);
            return;
        }
        let url = self.url_of(inode);
        match self.backend.open(&url, flags, 0) {
            Ok(file) => {
                let handle = self.open_files.insert(file);
                trace!(url = %url, handle, "Opened file");
                request.reply_open(handle);
            }
            Err(e) => {
                debug!(url = %url, flags, error = %e, "smbc_open failed");
                request.reply_error(e);
            }
        }
    }

    /// Creates and opens a regular file.
    ///
    /// The server generally ignores `mode`; the reply reports the requested
    /// mode, normalized, with attribute caching disabled so the kernel asks
    /// again.
    pub fn create(
        &mut self,
        parent: u64,
        name: &str,
        mode: u32,
        flags: i32,
        request: Box<dyn CreateRequest>,
    ) {
        if interrupted("create", &*request) {
            return;
        }
        let path = self.child_path(parent, name);
        let url = self.shared.url_for(&path);
        let flags = flags | libc::O_CREAT;
        let mode = mode & 0o777;

        let file = match self.backend.open(&url, flags, mode) {
            Ok(file) => file,
            Err(e) => {
                debug!(url = %url, flags, mode = format_args!("{mode:o}"), error = %e, "smbc_open failed");
                request.reply_error(e);
                return;
            }
        };
        let handle = self.open_files.insert(file);
        let inode = self.inodes.inc_ref(&path);
        self.stat_cache.erase(inode);

        let attr = self.translator.synthesized(inode, mode::S_IFREG | mode);
        request.reply_create(self.entry_param(attr, Duration::ZERO), handle);
    }

    /// Reads up to `size` bytes at `offset`.
    pub fn read(
        &mut self,
        inode: u64,
        handle: u64,
        size: usize,
        offset: i64,
        request: Box<dyn BufRequest>,
    ) {
        if interrupted("read", &*request) {
            return;
        }
        let Some(file) = self.open_files.get(handle) else {
            request.reply_error(Errno::EBADF);
            return;
        };
        if let Err(e) = self.backend.lseek(file, offset) {
            debug!(path = ?self.inodes.path(inode), offset, error = %e, "smbc_lseek failed");
            request.reply_error(e);
            return;
        }
        let mut buf = vec![0u8; size];
        match self.backend.read(file, &mut buf) {
            Ok(read) => request.reply_buf(&buf[..read.min(size)]),
            Err(e) => {
                debug!(path = ?self.inodes.path(inode), size, error = %e, "smbc_read failed");
                request.reply_error(e);
            }
        }
    }

    /// Writes `data` at `offset`.
    pub fn write(
        &mut self,
        inode: u64,
        handle: u64,
        data: &[u8],
        offset: i64,
        request: Box<dyn WriteRequest>,
    ) {
        if interrupted("write", &*request) {
            return;
        }
        let Some(file) = self.open_files.get(handle) else {
            request.reply_error(Errno::EBADF);
            return;
        };
        if let Err(e) = self.backend.lseek(file, offset) {
            debug!(path = ?self.inodes.path(inode), offset, error = %e, "smbc_lseek failed");
            request.reply_error(e);
            return;
        }
        match self.backend.write(file, data) {
            Ok(written) => {
                self.stat_cache.erase(inode);
                request.reply_write(written);
            }
            Err(e) => {
                debug!(path = ?self.inodes.path(inode), len = data.len(), error = %e, "smbc_write failed");
                request.reply_error(e);
            }
        }
    }

    /// Closes a file handle.
    pub fn release(&mut self, inode: u64, handle: u64, request: Box<dyn SimpleRequest>) {
        if interrupted("release", &*request) {
            return;
        }
        let Some(file) = self.open_files.get(handle) else {
            request.reply_error(Errno::EBADF);
            return;
        };
        if let Err(e) = self.backend.close(file) {
            debug!(path = ?self.inodes.path(inode), handle, error = %e, "smbc_close failed");
            request.reply_error(e);
            return;
        }
        self.open_files.remove(handle);
        request.reply_ok();
    }

    /// Renames `old_parent/old_name` to `new_parent/new_name`.
    ///
    /// The inode map keeps the old path; the kernel re-looks-up the new name.
    pub fn rename(
        &mut self,
        old_parent: u64,
        old_name: &str,
        new_parent: u64,
        new_name: &str,
        request: Box<dyn SimpleRequest>,
    ) {
        if interrupted("rename", &*request) {
            return;
        }
        let old_path = self.child_path(old_parent, old_name);
        let new_path = self.child_path(new_parent, new_name);
        let old_url = self.shared.url_for(&old_path);
        let new_url = self.shared.url_for(&new_path);

        if let Err(e) = self.backend.rename(&old_url, &new_url) {
            debug!(from = %old_url, to = %new_url, error = %e, "smbc_rename failed");
            request.reply_error(e);
            return;
        }
        self.erase_cached_path(&old_path);
        self.erase_cached_path(&new_path);
        request.reply_ok();
    }

    /// Removes a file.
    pub fn unlink(&mut self, parent: u64, name: &str, request: Box<dyn SimpleRequest>) {
        if interrupted("unlink", &*request) {
            return;
        }
        let path = self.child_path(parent, name);
        let url = self.shared.url_for(&path);
        if let Err(e) = self.backend.unlink(&url) {
            debug!(url = %url, error = %e, "smbc_unlink failed");
            request.reply_error(e);
            return;
        }
        self.erase_cached_path(&path);
        request.reply_ok();
    }

    /// Opens a directory for reading.
    pub fn opendir(&mut self, inode: u64, flags: i32, request: Box<dyn OpenRequest>) {
        if interrupted("opendir", &*request) {
            return;
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            request.reply_error(Errno::EACCES);
            return;
        }
        let url = self.url_of(inode);
        match self.backend.opendir(&url) {
            Ok(dir) => {
                let handle = self.open_files.insert(dir);
                trace!(url = %url, handle, "Opened directory");
                request.reply_open(handle);
            }
            Err(e) => {
                debug!(url = %url, error = %e, "smbc_opendir failed");
                request.reply_error(e);
            }
        }
    }

    /// Lists a directory from `offset`, a cookie from an earlier entry.
    ///
    /// Each listed entry takes an inode reference and seeds the stat cache.
    pub fn readdir(
        &mut self,
        inode: u64,
        handle: u64,
        offset: i64,
        request: Box<dyn DirEntryRequest>,
    ) {
        if interrupted("readdir", &*request) {
            return;
        }
        let mut request = request;
        if offset < 0 {
            request.reply_done();
            return;
        }
        let dir_path = self.path_of(inode).clone();
        let Some(dir) = self.open_files.get(handle) else {
            request.reply_error(Errno::EBADF);
            return;
        };
        if let Err(e) = self.backend.lseekdir(dir, offset) {
            debug!(path = %dir_path, offset, error = %e, "smbc_lseekdir failed");
            request.reply_error(e);
            return;
        }

        loop {
            let entry = match self.backend.readdirplus(dir) {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    debug!(path = %dir_path, error = %e, "smbc_readdirplus failed");
                    request.reply_error(e);
                    return;
                }
            };
            let next_offset = match self.backend.telldir(dir) {
                Ok(next) => next,
                Err(e) => {
                    debug!(path = %dir_path, error = %e, "smbc_telldir failed");
                    request.reply_error(e);
                    return;
                }
            };
            if entry.name == "." || entry.name == ".." {
                continue;
            }

            let child_path = dir_path.join(&entry.name);
            let child = self.inodes.inc_ref(&child_path);
            let stat = self.translator.from_dos_attributes(
                child,
                entry.attrs,
                entry.size,
                entry.atime,
                entry.mtime,
                entry.ctime,
            );
            if !request.add_entry(&entry.name, child, stat.mode, next_offset) {
                // The kernel never saw this entry, so it will never forget it.
                if self.inodes.forget(child, 1) {
                    self.stat_cache.erase(child);
                }
                break;
            }
            self.stat_cache.put(stat);
        }
        request.reply_done();
    }

    /// Closes a directory handle.
    pub fn releasedir(&mut self, inode: u64, handle: u64, request: Box<dyn SimpleRequest>) {
        if interrupted("releasedir", &*request) {
            return;
        }
        let Some(dir) = self.open_files.get(handle) else {
            request.reply_error(Errno::EBADF);
            return;
        };
        if let Err(e) = self.backend.closedir(dir) {
            debug!(path = ?self.inodes.path(inode), handle, error = %e, "smbc_closedir failed");
            request.reply_error(e);
            return;
        }
        self.open_files.remove(handle);
        request.reply_ok();
    }

    /// Creates a directory and takes a reference on it.
    pub fn mkdir(&mut self, parent: u64, name: &str, mode: u32, request: Box<dyn EntryRequest>) {
        if interrupted("mkdir", &*request) {
            return;
        }
        let path = self.child_path(parent, name);
        let url = self.shared.url_for(&path);
        if let Err(e) = self.backend.mkdir(&url, mode) {
            debug!(url = %url, mode = format_args!("{mode:o}"), error = %e, "smbc_mkdir failed");
            request.reply_error(e);
            return;
        }
        let inode = self.inodes.inc_ref(&path);
        self.stat_cache.erase(inode);
        let attr = self.translator.synthesized(inode, mode::S_IFDIR | (mode & 0o777));
        request.reply_entry(self.entry_param(attr, Duration::ZERO));
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, parent: u64, name: &str, request: Box<dyn SimpleRequest>) {
        if interrupted("rmdir", &*request) {
            return;
        }
        let path = self.child_path(parent, name);
        let url = self.shared.url_for(&path);
        if let Err(e) = self.backend.rmdir(&url) {
            debug!(url = %url, error = %e, "smbc_rmdir failed");
            request.reply_error(e);
            return;
        }
        self.erase_cached_path(&path);
        request.reply_ok();
    }
}
