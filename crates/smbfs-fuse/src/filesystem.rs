//! The filesystem dispatcher.
//!
//! [`SmbFilesystem`] is what the FUSE layer talks to. Every operation is
//! posted to the backend worker and returns immediately; the worker replies
//! to the request when the server has answered. A second executor, the
//! control thread, owns the credential refresh state so that waiting on a
//! credential provider never stalls filesystem traffic.
//!
//! ```text
//!  kernel ──► SmbFuse ──► SmbFilesystem ──post──► smbfs-libsmb (Worker<B>)
//!                              │                        │ EACCES on root
//!                              │                        ▼
//!                              └──────────────► smbfs-control (CredentialRefresher)
//! ```

use std::sync::Arc;
use std::time::Duration;

use smbfs_mount::SharePath;
use tracing::{debug, error, info};

use crate::backend::SmbBackend;
use crate::config::SmbFsConfig;
use crate::credentials::{CredentialProvider, CredentialRefresher};
use crate::error::{ConnectError, SmbFsError, ToErrno};
use crate::executor::{ExecutorResult, ExecutorStats, PanicPolicy, SerialExecutor};
use crate::path_resolver::{PathResolver, ResolveError};
use crate::request::{
    AttrRequest, BufRequest, CreateRequest, DirEntryRequest, EntryRequest, FsRequest,
    OpenRequest, SetAttrValues, SimpleRequest, StatFsRequest, WriteRequest,
};
use crate::shared::SharedState;
use crate::worker::Worker;

/// Name of the thread that owns the SMB client context.
pub const WORKER_THREAD_NAME: &str = "smbfs-libsmb";

/// Name of the thread that runs credential refresh.
pub const CONTROL_THREAD_NAME: &str = "smbfs-control";

/// SMB share exposed as a filesystem.
pub struct SmbFilesystem<B: SmbBackend> {
    worker: SerialExecutor<Worker<B>>,
    control: SerialExecutor<CredentialRefresher>,
    shared: Arc<SharedState>,
    attr_timeout: Duration,
}

impl<B: SmbBackend> SmbFilesystem<B> {
    /// Creates the filesystem and starts its threads.
    ///
    /// `make_backend` receives the shared state the backend's
    /// authentication callback should read credentials from.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid, the backend cannot be
    /// created, or a thread cannot be started.
    pub fn new<F>(
        config: SmbFsConfig,
        provider: Box<dyn CredentialProvider>,
        make_backend: F,
    ) -> Result<Self, SmbFsError>
    where
        F: FnOnce(Arc<SharedState>) -> Result<B, SmbFsError>,
    {
        config.validate()?;
        let resolver = PathResolver::new(&config.share_path).map_err(|e| match e {
            ResolveError::InvalidUrl { url, reason } => {
                SmbFsError::InvalidSharePath { path: url, reason }
            }
            ResolveError::UnsupportedAddress(_) => SmbFsError::InvalidSharePath {
                path: config.share_path.clone(),
                reason: "unparseable",
            },
        })?;
        let shared = Arc::new(SharedState::new(resolver, config.credentials.clone()));

        let control_shared = Arc::clone(&shared);
        let control = SerialExecutor::spawn_with(
            CONTROL_THREAD_NAME,
            PanicPolicy::Continue,
            move |handle| CredentialRefresher::new(provider, control_shared, handle),
        )?;

        let backend = make_backend(Arc::clone(&shared))?;
        let worker_state = Worker::new(backend, Arc::clone(&shared), &config, control.handle());
        let worker = SerialExecutor::spawn(WORKER_THREAD_NAME, PanicPolicy::Abort, worker_state)?;

        info!(
            share = %config.share_path,
            uid = config.uid,
            gid = config.gid,
            kerberos = config.use_kerberos,
            "SMB filesystem ready"
        );
        Ok(Self {
            worker,
            control,
            shared,
            attr_timeout: config.attr_timeout,
        })
    }

    /// The attribute timeout advertised to the kernel.
    pub fn attr_timeout(&self) -> Duration {
        self.attr_timeout
    }

    /// State shared with the backend's authentication callback.
    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Worker queue statistics.
    pub fn worker_stats(&self) -> Arc<ExecutorStats> {
        self.worker.stats()
    }

    fn dispatch<R, F>(&self, op: &'static str, request: Box<R>, task: F)
    where
        R: FsRequest + ?Sized + 'static,
        F: FnOnce(&mut Worker<B>, Box<R>) + Send + 'static,
        Box<R>: Send,
    {
        // The request travels inside the task; if the queue is gone it comes
        // back with the error so it can still be answered.
        let slot = Arc::new(parking_lot::Mutex::new(Some(request)));
        let task_slot = Arc::clone(&slot);
        let posted = self.worker.post(move |worker| {
            if let Some(request) = task_slot.lock().take() {
                task(worker, request);
            }
        });
        if let Err(e) = posted {
            error!(op, error = %e, "Failed to queue filesystem operation");
            if let Some(request) = slot.lock().take() {
                request.reply_error(e.to_errno());
            }
        }
    }

    /// Probes the share root; see [`Worker::ensure_connected`].
    ///
    /// Blocks until the worker has answered.
    pub fn ensure_connected(&self) -> Result<(), ConnectError> {
        self.worker
            .run_blocking(Worker::ensure_connected)
            .unwrap_or_else(|e| {
                error!(error = %e, "Connect probe did not run");
                Err(ConnectError::UnknownError)
            })
    }

    /// Returns true once the share root has been reached.
    pub fn is_connected(&self) -> bool {
        self.worker.run_blocking(|w| w.is_connected()).unwrap_or(false)
    }

    /// Directs later requests at an IPv4 address instead of the share host.
    /// An empty slice reverts to the host name.
    pub fn set_resolved_address(&self, address: &[u8]) -> Result<(), ResolveError> {
        self.shared.set_resolved_address(address)
    }

    /// The share root URL currently in use.
    pub fn base_url(&self) -> String {
        self.shared.base_url()
    }

    /// Returns true while a credential provider request is outstanding.
    pub fn credential_refresh_in_flight(&self) -> bool {
        self.control
            .run_blocking(|r| r.is_in_flight())
            .unwrap_or(false)
    }

    /// Number of credential provider requests made this session.
    pub fn credential_refresh_requests(&self) -> u64 {
        self.control.run_blocking(|r| r.requests()).unwrap_or(0)
    }

    /// Runs `f` against the worker state and returns its result.
    ///
    /// For inspection from tests and diagnostics; blocks the caller.
    pub fn inspect<F, T>(&self, f: F) -> ExecutorResult<T>
    where
        F: FnOnce(&Worker<B>) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.worker.run_blocking(move |w| f(w))
    }

    /// Waits until everything queued so far on both threads has run.
    pub fn flush(&self) -> ExecutorResult<()> {
        self.worker.flush()?;
        // A provider that answers synchronously queues its completion behind
        // the first marker.
        self.control.flush()?;
        self.control.flush()
    }

    /// `statfs`
    pub fn statfs(&self, inode: u64, request: Box<dyn StatFsRequest>) {
        self.dispatch("statfs", request, move |w, r| w.statfs(inode, r));
    }

    /// `lookup`
    pub fn lookup(&self, parent: u64, name: &str, request: Box<dyn EntryRequest>) {
        let name = name.to_string();
        self.dispatch("lookup", request, move |w, r| w.lookup(parent, &name, r));
    }

    /// `forget`. Never replies.
    pub fn forget(&self, inode: u64, count: u64) {
        if let Err(e) = self.worker.post(move |w| w.forget(inode, count)) {
            error!(inode, count, error = %e, "Failed to queue forget");
        }
    }

    /// `getattr`
    pub fn getattr(&self, inode: u64, request: Box<dyn AttrRequest>) {
        self.dispatch("getattr", request, move |w, r| w.getattr(inode, r));
    }

    /// `setattr`
    pub fn setattr(
        &self,
        inode: u64,
        handle: Option<u64>,
        values: SetAttrValues,
        to_set: u32,
        request: Box<dyn AttrRequest>,
    ) {
        self.dispatch("setattr", request, move |w, r| {
            w.setattr(inode, handle, values, to_set, r);
        });
    }

    /// `open`
    pub fn open(&self, inode: u64, flags: i32, request: Box<dyn OpenRequest>) {
        self.dispatch("open", request, move |w, r| w.open(inode, flags, r));
    }

    /// `create`
    pub fn create(
        &self,
        parent: u64,
        name: &str,
        mode: u32,
        flags: i32,
        request: Box<dyn CreateRequest>,
    ) {
        let name = name.to_string();
        self.dispatch("create", request, move |w, r| {
            w.create(parent, &name, mode, flags, r);
        });
    }

    /// `read`
    pub fn read(
        &self,
        inode: u64,
        handle: u64,
        size: usize,
        offset: i64,
        request: Box<dyn BufRequest>,
    ) {
        self.dispatch("read", request, move |w, r| {
            w.read(inode, handle, size, offset, r);
        });
    }

    /// `write`
    pub fn write(
        &self,
        inode: u64,
        handle: u64,
        data: &[u8],
        offset: i64,
        request: Box<dyn WriteRequest>,
    ) {
        let data = data.to_vec();
        self.dispatch("write", request, move |w, r| {
            w.write(inode, handle, &data, offset, r);
        });
    }

    /// `release`
    pub fn release(&self, inode: u64, handle: u64, request: Box<dyn SimpleRequest>) {
        self.dispatch("release", request, move |w, r| w.release(inode, handle, r));
    }

    /// `rename`
    pub fn rename(
        &self,
        old_parent: u64,
        old_name: &str,
        new_parent: u64,
        new_name: &str,
        request: Box<dyn SimpleRequest>,
    ) {
        let old_name = old_name.to_string();
        let new_name = new_name.to_string();
        self.dispatch("rename", request, move |w, r| {
            w.rename(old_parent, &old_name, new_parent, &new_name, r);
        });
    }

    /// `unlink`
    pub fn unlink(&self, parent: u64, name: &str, request: Box<dyn SimpleRequest>) {
        let name = name.to_string();
        self.dispatch("unlink", request, move |w, r| w.unlink(parent, &name, r));
    }

    /// `opendir`
    pub fn opendir(&self, inode: u64, flags: i32, request: Box<dyn OpenRequest>) {
        self.dispatch("opendir", request, move |w, r| w.opendir(inode, flags, r));
    }

    /// `readdir`
    pub fn readdir(
        &self,
        inode: u64,
        handle: u64,
        offset: i64,
        request: Box<dyn DirEntryRequest>,
    ) {
        self.dispatch("readdir", request, move |w, r| {
            w.readdir(inode, handle, offset, r);
        });
    }

    /// `releasedir`
    pub fn releasedir(&self, inode: u64, handle: u64, request: Box<dyn SimpleRequest>) {
        self.dispatch("releasedir", request, move |w, r| {
            w.releasedir(inode, handle, r);
        });
    }

    /// `mkdir`
    pub fn mkdir(&self, parent: u64, name: &str, mode: u32, request: Box<dyn EntryRequest>) {
        let name = name.to_string();
        self.dispatch("mkdir", request, move |w, r| w.mkdir(parent, &name, mode, r));
    }

    /// `rmdir`
    pub fn rmdir(&self, parent: u64, name: &str, request: Box<dyn SimpleRequest>) {
        let name = name.to_string();
        self.dispatch("rmdir", request, move |w, r| w.rmdir(parent, &name, r));
    }

    /// Path of `inode` as the worker knows it, for diagnostics.
    pub fn path_of(&self, inode: u64) -> Option<SharePath> {
        self.worker
            .run_blocking(move |w| w.inodes().path(inode).cloned())
            .ok()
            .flatten()
    }
}

impl<B: SmbBackend> Drop for SmbFilesystem<B> {
    fn drop(&mut self) {
        // The worker may still post to the control thread while draining.
        self.worker.shutdown();
        self.control.shutdown();
        debug!("SMB filesystem stopped");
    }
}
