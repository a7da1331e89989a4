//! Test harness around an [`SmbFilesystem`] backed by [`FakeSmbBackend`].
//!
//! `TestShare` turns each asynchronous filesystem operation into a blocking
//! call returning the recorded [`Reply`].

// Not all tests use all TestShare methods
#![allow(dead_code)]

use smbfs_fuse::request::{EntryParam, SetAttrValues};
use smbfs_fuse::request::set_attr;
use smbfs_fuse::testing::{
    DirListEntry, FakeCredentialProvider, FakeSmbBackend, Reply, TestRequest,
};
use smbfs_fuse::{ROOT_INODE, SmbFilesystem, SmbFsConfig};
use smbfs_mount::SharePath;

/// Share URL every harness mounts.
pub const TEST_SHARE: &str = "smb://fileserver/public";

/// Owner reported for every file.
pub const TEST_UID: u32 = 1000;

/// Group reported for every file.
pub const TEST_GID: u32 = 1000;

/// Builds a share path from `/a/b` notation.
pub fn share_path(path: &str) -> SharePath {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .fold(SharePath::root(), |acc, segment| acc.join(segment))
}

/// A running filesystem over an in-memory share.
pub struct TestShare {
    /// The share contents; shares state with the worker's backend.
    pub backend: FakeSmbBackend,
    /// The provider the control thread asks for new credentials.
    pub provider: FakeCredentialProvider,
    /// The filesystem under test.
    pub fs: SmbFilesystem<FakeSmbBackend>,
}

impl TestShare {
    /// An empty share with the default configuration.
    pub fn new() -> Self {
        Self::with_backend(FakeSmbBackend::new())
    }

    /// A share over `backend`, typically pre-populated.
    pub fn with_backend(backend: FakeSmbBackend) -> Self {
        Self::with_config(SmbFsConfig::new(TEST_SHARE, TEST_UID, TEST_GID), backend)
    }

    /// A share with an explicit configuration.
    pub fn with_config(config: SmbFsConfig, backend: FakeSmbBackend) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("smbfs_fuse=debug")
            .with_test_writer()
            .try_init();

        let provider = FakeCredentialProvider::new();
        let attached = backend.clone();
        let fs = SmbFilesystem::new(config, Box::new(provider.clone()), move |shared| {
            Ok(attached.attach(shared))
        })
        .expect("Failed to create filesystem");
        Self {
            backend,
            provider,
            fs,
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    pub fn lookup(&self, parent: u64, name: &str) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.lookup(parent, name, request);
        reply.wait()
    }

    /// Looks up every component of `path`, returning the final entry.
    ///
    /// # Panics
    ///
    /// Panics if any component fails.
    pub fn lookup_path(&self, path: &str) -> EntryParam {
        let mut entry = None;
        let mut parent = ROOT_INODE;
        for name in path.split('/').filter(|s| !s.is_empty()) {
            let found = expect_entry(self.lookup(parent, name));
            parent = found.inode;
            entry = Some(found);
        }
        entry.expect("empty path")
    }

    pub fn getattr(&self, inode: u64) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.getattr(inode, request);
        reply.wait()
    }

    pub fn truncate(&self, inode: u64, handle: Option<u64>, size: u64) -> Reply {
        let (request, reply) = TestRequest::new();
        let values = SetAttrValues {
            size,
            ..SetAttrValues::default()
        };
        self.fs.setattr(inode, handle, values, set_attr::SIZE, request);
        reply.wait()
    }

    pub fn setattr(&self, inode: u64, to_set: u32) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs
            .setattr(inode, None, SetAttrValues::default(), to_set, request);
        reply.wait()
    }

    pub fn open(&self, inode: u64, flags: i32) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.open(inode, flags, request);
        reply.wait()
    }

    /// Opens `inode` and returns the handle.
    pub fn open_handle(&self, inode: u64, flags: i32) -> u64 {
        match self.open(inode, flags) {
            Reply::Open(handle) => handle,
            other => panic!("open failed: {other:?}"),
        }
    }

    pub fn create(&self, parent: u64, name: &str, mode: u32, flags: i32) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.create(parent, name, mode, flags, request);
        reply.wait()
    }

    pub fn read(&self, inode: u64, handle: u64, size: usize, offset: i64) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.read(inode, handle, size, offset, request);
        reply.wait()
    }

    pub fn write(&self, inode: u64, handle: u64, data: &[u8], offset: i64) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.write(inode, handle, data, offset, request);
        reply.wait()
    }

    pub fn release(&self, inode: u64, handle: u64) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.release(inode, handle, request);
        reply.wait()
    }

    pub fn rename(&self, old_parent: u64, old_name: &str, new_parent: u64, new_name: &str) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs
            .rename(old_parent, old_name, new_parent, new_name, request);
        reply.wait()
    }

    pub fn unlink(&self, parent: u64, name: &str) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.unlink(parent, name, request);
        reply.wait()
    }

    pub fn opendir(&self, inode: u64, flags: i32) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.opendir(inode, flags, request);
        reply.wait()
    }

    pub fn readdir(&self, inode: u64, handle: u64, offset: i64) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.readdir(inode, handle, offset, request);
        reply.wait()
    }

    pub fn readdir_with_capacity(
        &self,
        inode: u64,
        handle: u64,
        offset: i64,
        capacity: usize,
    ) -> Reply {
        let (request, reply) = TestRequest::with_capacity(capacity);
        self.fs.readdir(inode, handle, offset, request);
        reply.wait()
    }

    pub fn releasedir(&self, inode: u64, handle: u64) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.releasedir(inode, handle, request);
        reply.wait()
    }

    /// Opens, lists and closes a directory.
    pub fn list(&self, inode: u64) -> Vec<DirListEntry> {
        let handle = match self.opendir(inode, libc::O_RDONLY) {
            Reply::Open(handle) => handle,
            other => panic!("opendir failed: {other:?}"),
        };
        let entries = match self.readdir(inode, handle, 0) {
            Reply::Dir(entries) => entries,
            other => panic!("readdir failed: {other:?}"),
        };
        assert_eq!(self.releasedir(inode, handle), Reply::Ok);
        entries
    }

    pub fn mkdir(&self, parent: u64, name: &str, mode: u32) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.mkdir(parent, name, mode, request);
        reply.wait()
    }

    pub fn rmdir(&self, parent: u64, name: &str) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.rmdir(parent, name, request);
        reply.wait()
    }

    pub fn statfs(&self) -> Reply {
        let (request, reply) = TestRequest::new();
        self.fs.statfs(ROOT_INODE, request);
        reply.wait()
    }

    // ------------------------------------------------------------------
    // Worker state
    // ------------------------------------------------------------------

    /// Inode currently assigned to `path`.
    pub fn inode_of(&self, path: &str) -> Option<u64> {
        let path = share_path(path);
        self.fs
            .inspect(move |w| w.inodes().inode(&path))
            .expect("worker gone")
    }

    /// Kernel reference count of `inode`.
    pub fn lookup_count(&self, inode: u64) -> Option<u64> {
        self.fs
            .inspect(move |w| w.inodes().lookup_count(inode))
            .expect("worker gone")
    }

    /// Returns true if `inode` has a stat cache entry.
    pub fn is_cached(&self, inode: u64) -> bool {
        self.fs
            .inspect(move |w| w.stat_cache().contains(inode))
            .expect("worker gone")
    }

    /// Number of handles the worker holds open.
    pub fn open_handles(&self) -> usize {
        self.fs
            .inspect(|w| w.open_handle_count())
            .expect("worker gone")
    }

    /// Waits for both threads to go idle.
    pub fn flush(&self) {
        self.fs.flush().expect("flush failed");
    }
}

/// Unwraps an entry reply.
pub fn expect_entry(reply: Reply) -> EntryParam {
    match reply {
        Reply::Entry(entry) => entry,
        other => panic!("expected an entry, got {other:?}"),
    }
}
