//! In-memory SMB backend.
//!
//! [`FakeSmbBackend`] keeps a small tree of files and directories and
//! answers every [`SmbBackend`] call against it with the errnos libsmbclient
//! would produce. Clones share the same tree, so a test can keep one clone
//! for setup and inspection while the worker thread owns another.
//!
//! URLs are mapped to share paths by dropping the scheme, the host and the
//! first path segment (the share name). Any host is accepted, so resolved
//! IPv4 URLs hit the same tree.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use nix::errno::Errno;
use parking_lot::Mutex;
use smbfs_mount::mode;

use crate::backend::{
    DOS_ATTR_DIRECTORY, DOS_ATTR_READONLY, DirEntryInfo, FileStat, FsStats, SmbBackend,
};
use crate::error::BackendResult;
use crate::shared::SharedState;

/// Size of the buffers handed to the authentication callback, as in
/// libsmbclient.
pub const AUTH_BUFFER_LEN: usize = 256;

/// Timestamp reported for every object.
pub fn fake_mtime() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

/// Backend operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    /// `stat`
    Stat,
    /// `statvfs`
    Statvfs,
    /// `open`
    Open,
    /// `close`
    Close,
    /// `lseek`
    Lseek,
    /// `read`
    Read,
    /// `write`
    Write,
    /// `ftruncate`
    Ftruncate,
    /// `opendir`
    Opendir,
    /// `closedir`
    Closedir,
    /// `readdirplus`
    Readdir,
    /// `telldir`
    Telldir,
    /// `lseekdir`
    Lseekdir,
    /// `mkdir`
    Mkdir,
    /// `rmdir`
    Rmdir,
    /// `rename`
    Rename,
    /// `unlink`
    Unlink,
}

/// What the authentication callback handed out for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRecord {
    /// Workgroup buffer contents.
    pub workgroup: String,
    /// Username buffer contents.
    pub username: String,
    /// Password buffer contents.
    pub password: String,
}

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, readonly: bool },
    Dir,
    Special(u32),
}

#[derive(Debug)]
enum OpenState {
    File { path: String, pos: usize, writable: bool },
    Dir { entries: Vec<DirEntryInfo>, pos: usize },
}

#[derive(Debug)]
struct FakeShare {
    nodes: BTreeMap<String, Node>,
    open: HashMap<u64, OpenState>,
    next_fd: u64,
    failures: HashMap<FakeOp, Errno>,
    calls: HashMap<FakeOp, usize>,
    urls: Vec<String>,
    auth: Vec<AuthRecord>,
    required_password: Option<String>,
    statvfs: FsStats,
}

impl Default for FakeShare {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), Node::Dir);
        Self {
            nodes,
            open: HashMap::new(),
            next_fd: 100,
            failures: HashMap::new(),
            calls: HashMap::new(),
            urls: Vec::new(),
            auth: Vec::new(),
            required_password: None,
            statvfs: FsStats {
                block_size: 4096,
                fragment_size: 4096,
                blocks: 1000,
                blocks_free: 500,
                blocks_available: 400,
                files: 100,
                files_free: 50,
                name_max: 255,
                flags: 0,
            },
        }
    }
}

/// Share path for `url`: `""` for the root, `/a/b` below it.
fn path_of_url(url: &str) -> String {
    let rest = url.strip_prefix("smb://").unwrap_or(url);
    let Some((_host, rest)) = rest.split_once('/') else {
        return String::new();
    };
    match rest.split_once('/') {
        Some((_share, path)) => format!("/{path}"),
        None => String::new(),
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn parent_of(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

fn name_of(path: &str) -> &str {
    path.rfind('/').map_or(path, |i| &path[i + 1..])
}

impl FakeShare {
    fn begin(&mut self, op: FakeOp) -> BackendResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get(&op) {
            Some(&errno) => Err(errno),
            None => Ok(()),
        }
    }

    fn check_auth(&self) -> BackendResult<()> {
        let Some(required) = &self.required_password else {
            return Ok(());
        };
        match self.auth.last() {
            Some(record) if &record.password == required => Ok(()),
            _ => Err(Errno::EACCES),
        }
    }

    fn children(&self, dir: &str) -> impl Iterator<Item = (&String, &Node)> {
        let prefix = format!("{dir}/");
        self.nodes
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
            .filter(move |(k, _)| !k[dir.len() + 1..].contains('/'))
    }

    fn require_dir(&self, path: &str) -> BackendResult<()> {
        match self.nodes.get(path) {
            Some(Node::Dir) => Ok(()),
            Some(_) => Err(Errno::ENOTDIR),
            None => Err(Errno::ENOENT),
        }
    }

    fn alloc_fd(&mut self, state: OpenState) -> u64 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.open.insert(fd, state);
        fd
    }

    fn file_stat(node: &Node) -> FileStat {
        let (mode, size) = match node {
            Node::Dir => (mode::S_IFDIR | 0o755, 0),
            Node::File { data, readonly } => {
                let perm = if *readonly { 0o444 } else { 0o644 };
                (mode::S_IFREG | perm, data.len() as u64)
            }
            Node::Special(m) => (*m, 0),
        };
        FileStat {
            mode,
            size,
            atime: fake_mtime(),
            mtime: fake_mtime(),
            ctime: fake_mtime(),
        }
    }

    fn dir_entry(name: &str, node: &Node) -> DirEntryInfo {
        let (attrs, size) = match node {
            Node::Dir => (DOS_ATTR_DIRECTORY, 0),
            Node::File { data, readonly } => {
                (if *readonly { DOS_ATTR_READONLY } else { 0 }, data.len() as u64)
            }
            Node::Special(_) => (0, 0),
        };
        DirEntryInfo {
            name: name.to_string(),
            attrs,
            size,
            atime: fake_mtime(),
            mtime: fake_mtime(),
            ctime: fake_mtime(),
        }
    }
}

/// In-memory [`SmbBackend`].
#[derive(Debug, Clone, Default)]
pub struct FakeSmbBackend {
    share: Arc<Mutex<FakeShare>>,
    shared: Option<Arc<SharedState>>,
}

impl FakeSmbBackend {
    /// Creates a backend holding an empty share.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone that runs the authentication callback on every URL-based call,
    /// like libsmbclient does when it connects.
    #[must_use]
    pub fn attach(&self, shared: Arc<SharedState>) -> Self {
        Self {
            share: Arc::clone(&self.share),
            shared: Some(shared),
        }
    }

    /// Adds a writable file, creating parent directories.
    pub fn add_file(&self, path: &str, contents: &[u8]) {
        self.insert(
            path,
            Node::File {
                data: contents.to_vec(),
                readonly: false,
            },
        );
    }

    /// Adds a read-only file, creating parent directories.
    pub fn add_readonly_file(&self, path: &str, contents: &[u8]) {
        self.insert(
            path,
            Node::File {
                data: contents.to_vec(),
                readonly: true,
            },
        );
    }

    /// Adds a directory, creating parent directories.
    pub fn add_dir(&self, path: &str) {
        self.insert(path, Node::Dir);
    }

    /// Adds an object whose `stat` reports `mode` verbatim, such as a
    /// symlink or FIFO.
    pub fn add_special(&self, path: &str, mode: u32) {
        self.insert(path, Node::Special(mode));
    }

    fn insert(&self, path: &str, node: Node) {
        let path = normalize(path);
        let mut share = self.share.lock();
        let mut parent = parent_of(&path);
        while !parent.is_empty() {
            share.nodes.entry(parent.to_string()).or_insert(Node::Dir);
            parent = parent_of(parent);
        }
        share.nodes.insert(path, node);
    }

    /// Contents of a regular file, if it exists.
    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.share.lock().nodes.get(&normalize(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Returns true if `path` exists.
    pub fn exists(&self, path: &str) -> bool {
        self.share.lock().nodes.contains_key(&normalize(path))
    }

    /// Number of times `op` has been called.
    pub fn call_count(&self, op: FakeOp) -> usize {
        self.share.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Every URL passed to a URL-based call, in order.
    pub fn urls(&self) -> Vec<String> {
        self.share.lock().urls.clone()
    }

    /// The most recent URL.
    pub fn last_url(&self) -> Option<String> {
        self.share.lock().urls.last().cloned()
    }

    /// Every authentication callback result, in order.
    pub fn auth_records(&self) -> Vec<AuthRecord> {
        self.share.lock().auth.clone()
    }

    /// The most recent authentication callback result.
    pub fn last_auth(&self) -> Option<AuthRecord> {
        self.share.lock().auth.last().cloned()
    }

    /// Number of open files and directories.
    pub fn open_count(&self) -> usize {
        self.share.lock().open.len()
    }

    /// Makes every later call of `op` fail with `errno`.
    pub fn fail(&self, op: FakeOp, errno: Errno) {
        self.share.lock().failures.insert(op, errno);
    }

    /// Undoes [`fail`](Self::fail).
    pub fn clear_failure(&self, op: FakeOp) {
        self.share.lock().failures.remove(&op);
    }

    /// Makes URL-based calls fail with `EACCES` unless the authentication
    /// callback supplied `password`. Needs [`attach`](Self::attach).
    pub fn require_password(&self, password: &str) {
        self.share.lock().required_password = Some(password.to_string());
    }

    /// Sets what `statvfs` returns.
    pub fn set_statvfs(&self, stats: FsStats) {
        self.share.lock().statvfs = stats;
    }

    fn authenticate(&self, url: &str) -> Option<AuthRecord> {
        let shared = self.shared.as_ref()?;
        let mut workgroup = [0u8; AUTH_BUFFER_LEN];
        let mut username = [0u8; AUTH_BUFFER_LEN];
        let mut password = [0u8; AUTH_BUFFER_LEN];
        shared.fill_auth(url, "", &mut workgroup, &mut username, &mut password);
        let text = |buffer: &[u8]| {
            let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
            String::from_utf8_lossy(&buffer[..end]).into_owned()
        };
        Some(AuthRecord {
            workgroup: text(&workgroup),
            username: text(&username),
            password: text(&password),
        })
    }

    /// Bookkeeping for a URL-based call; returns the share lock and path.
    fn url_call(
        &self,
        op: FakeOp,
        url: &str,
    ) -> BackendResult<(parking_lot::MutexGuard<'_, FakeShare>, String)> {
        let auth = self.authenticate(url);
        let mut share = self.share.lock();
        share.urls.push(url.to_string());
        if let Some(record) = auth {
            share.auth.push(record);
        }
        share.begin(op)?;
        share.check_auth()?;
        Ok((share, path_of_url(url)))
    }

    fn fd_call(&self, op: FakeOp) -> BackendResult<parking_lot::MutexGuard<'_, FakeShare>> {
        let mut share = self.share.lock();
        share.begin(op)?;
        Ok(share)
    }
}

impl SmbBackend for FakeSmbBackend {
    type File = u64;

    fn stat(&mut self, url: &str) -> BackendResult<FileStat> {
        let (share, path) = self.url_call(FakeOp::Stat, url)?;
        share
            .nodes
            .get(&path)
            .map(FakeShare::file_stat)
            .ok_or(Errno::ENOENT)
    }

    fn statvfs(&mut self, url: &str) -> BackendResult<FsStats> {
        let (share, _) = self.url_call(FakeOp::Statvfs, url)?;
        Ok(share.statvfs)
    }

    fn open(&mut self, url: &str, flags: i32, _mode: u32) -> BackendResult<u64> {
        let (mut share, path) = self.url_call(FakeOp::Open, url)?;
        let access = flags & libc::O_ACCMODE;
        let writable = access == libc::O_WRONLY || access == libc::O_RDWR;

        match share.nodes.get_mut(&path) {
            Some(_) if flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0 => {
                return Err(Errno::EEXIST);
            }
            Some(Node::Dir) => return Err(Errno::EISDIR),
            Some(Node::Special(_)) => return Err(Errno::EACCES),
            Some(Node::File { readonly: true, .. }) if writable => return Err(Errno::EACCES),
            Some(Node::File { data, .. }) => {
                if flags & libc::O_TRUNC != 0 && writable {
                    data.clear();
                }
            }
            None if flags & libc::O_CREAT != 0 => {
                if path.is_empty() {
                    return Err(Errno::EISDIR);
                }
                share.require_dir(parent_of(&path)).map_err(|_| Errno::ENOENT)?;
                share.nodes.insert(
                    path.clone(),
                    Node::File {
                        data: Vec::new(),
                        readonly: false,
                    },
                );
            }
            None => return Err(Errno::ENOENT),
        }
        Ok(share.alloc_fd(OpenState::File {
            path,
            pos: 0,
            writable,
        }))
    }

    fn close(&mut self, file: &u64) -> BackendResult<()> {
        let mut share = self.fd_call(FakeOp::Close)?;
        match share.open.remove(file) {
            Some(OpenState::File { .. }) => Ok(()),
            Some(dir) => {
                share.open.insert(*file, dir);
                Err(Errno::EBADF)
            }
            None => Err(Errno::EBADF),
        }
    }

    fn lseek(&mut self, file: &u64, offset: i64) -> BackendResult<i64> {
        let mut share = self.fd_call(FakeOp::Lseek)?;
        let new_pos = usize::try_from(offset).map_err(|_| Errno::EINVAL)?;
        match share.open.get_mut(file) {
            Some(OpenState::File { pos, .. }) => {
                *pos = new_pos;
                Ok(offset)
            }
            _ => Err(Errno::EBADF),
        }
    }

    fn read(&mut self, file: &u64, buf: &mut [u8]) -> BackendResult<usize> {
        let mut share = self.fd_call(FakeOp::Read)?;
        let share = &mut *share;
        let Some(OpenState::File { path, pos, .. }) = share.open.get_mut(file) else {
            return Err(Errno::EBADF);
        };
        let Some(Node::File { data, .. }) = share.nodes.get(path.as_str()) else {
            return Err(Errno::ENOENT);
        };
        let start = (*pos).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        *pos = start + len;
        Ok(len)
    }

    fn write(&mut self, file: &u64, bytes: &[u8]) -> BackendResult<usize> {
        let mut share = self.fd_call(FakeOp::Write)?;
        let share = &mut *share;
        let Some(OpenState::File {
            path,
            pos,
            writable,
        }) = share.open.get_mut(file)
        else {
            return Err(Errno::EBADF);
        };
        if !*writable {
            return Err(Errno::EBADF);
        }
        let Some(Node::File { data, .. }) = share.nodes.get_mut(path.as_str()) else {
            return Err(Errno::ENOENT);
        };
        let end = *pos + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[*pos..end].copy_from_slice(bytes);
        *pos = end;
        Ok(bytes.len())
    }

    fn ftruncate(&mut self, file: &u64, size: u64) -> BackendResult<()> {
        let mut share = self.fd_call(FakeOp::Ftruncate)?;
        let share = &mut *share;
        let Some(OpenState::File { path, writable, .. }) = share.open.get(file) else {
            return Err(Errno::EBADF);
        };
        if !*writable {
            return Err(Errno::EINVAL);
        }
        let Some(Node::File { data, .. }) = share.nodes.get_mut(path.as_str()) else {
            return Err(Errno::ENOENT);
        };
        data.resize(usize::try_from(size).map_err(|_| Errno::EFBIG)?, 0);
        Ok(())
    }

    fn opendir(&mut self, url: &str) -> BackendResult<u64> {
        let (mut share, path) = self.url_call(FakeOp::Opendir, url)?;
        share.require_dir(&path)?;
        let mut entries = vec![
            FakeShare::dir_entry(".", &Node::Dir),
            FakeShare::dir_entry("..", &Node::Dir),
        ];
        entries.extend(
            share
                .children(&path)
                .map(|(child, node)| FakeShare::dir_entry(name_of(child), node)),
        );
        Ok(share.alloc_fd(OpenState::Dir { entries, pos: 0 }))
    }

    fn closedir(&mut self, dir: &u64) -> BackendResult<()> {
        let mut share = self.fd_call(FakeOp::Closedir)?;
        match share.open.remove(dir) {
            Some(OpenState::Dir { .. }) => Ok(()),
            Some(file) => {
                share.open.insert(*dir, file);
                Err(Errno::EBADF)
            }
            None => Err(Errno::EBADF),
        }
    }

    fn readdirplus(&mut self, dir: &u64) -> BackendResult<Option<DirEntryInfo>> {
        let mut share = self.fd_call(FakeOp::Readdir)?;
        let Some(OpenState::Dir { entries, pos }) = share.open.get_mut(dir) else {
            return Err(Errno::EBADF);
        };
        let entry = entries.get(*pos).cloned();
        if entry.is_some() {
            *pos += 1;
        }
        Ok(entry)
    }

    fn telldir(&mut self, dir: &u64) -> BackendResult<i64> {
        let share = self.fd_call(FakeOp::Telldir)?;
        match share.open.get(dir) {
            Some(OpenState::Dir { pos, .. }) => Ok(*pos as i64),
            _ => Err(Errno::EBADF),
        }
    }

    fn lseekdir(&mut self, dir: &u64, offset: i64) -> BackendResult<()> {
        let mut share = self.fd_call(FakeOp::Lseekdir)?;
        let Some(OpenState::Dir { entries, pos }) = share.open.get_mut(dir) else {
            return Err(Errno::EBADF);
        };
        let offset = usize::try_from(offset).map_err(|_| Errno::EINVAL)?;
        if offset > entries.len() {
            return Err(Errno::EINVAL);
        }
        *pos = offset;
        Ok(())
    }

    fn mkdir(&mut self, url: &str, _mode: u32) -> BackendResult<()> {
        let (mut share, path) = self.url_call(FakeOp::Mkdir, url)?;
        if share.nodes.contains_key(&path) {
            return Err(Errno::EEXIST);
        }
        share.require_dir(parent_of(&path)).map_err(|_| Errno::ENOENT)?;
        share.nodes.insert(path, Node::Dir);
        Ok(())
    }

    fn rmdir(&mut self, url: &str) -> BackendResult<()> {
        let (mut share, path) = self.url_call(FakeOp::Rmdir, url)?;
        share.require_dir(&path)?;
        if path.is_empty() {
            return Err(Errno::EBUSY);
        }
        if share.children(&path).next().is_some() {
            return Err(Errno::ENOTEMPTY);
        }
        share.nodes.remove(&path);
        Ok(())
    }

    fn rename(&mut self, old_url: &str, new_url: &str) -> BackendResult<()> {
        let (mut share, old_path) = self.url_call(FakeOp::Rename, old_url)?;
        share.urls.push(new_url.to_string());
        let new_path = path_of_url(new_url);
        if old_path.is_empty() || new_path.is_empty() {
            return Err(Errno::EBUSY);
        }
        if !share.nodes.contains_key(&old_path) {
            return Err(Errno::ENOENT);
        }
        share.require_dir(parent_of(&new_path)).map_err(|_| Errno::ENOENT)?;

        let prefix = format!("{old_path}/");
        let moved: Vec<String> = share
            .nodes
            .keys()
            .filter(|k| **k == old_path || k.starts_with(&prefix))
            .cloned()
            .collect();
        share.nodes.remove(&new_path);
        for key in moved {
            if let Some(node) = share.nodes.remove(&key) {
                let renamed = format!("{new_path}{}", &key[old_path.len()..]);
                share.nodes.insert(renamed, node);
            }
        }
        Ok(())
    }

    fn unlink(&mut self, url: &str) -> BackendResult<()> {
        let (mut share, path) = self.url_call(FakeOp::Unlink, url)?;
        match share.nodes.get(&path) {
            Some(Node::Dir) => Err(Errno::EISDIR),
            Some(_) => {
                share.nodes.remove(&path);
                Ok(())
            }
            None => Err(Errno::ENOENT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_of_url() {
        assert_eq!(path_of_url("smb://server/share"), "");
        assert_eq!(path_of_url("smb://server/share/a/b"), "/a/b");
        assert_eq!(path_of_url("smb://10.0.0.1/share/a"), "/a");
    }

    #[test]
    fn test_listing_is_sorted_and_shallow() {
        let mut backend = FakeSmbBackend::new();
        backend.add_file("/b", b"");
        backend.add_file("/a/nested", b"");
        backend.add_dir("/c");

        let dir = backend.opendir("smb://server/share").unwrap();
        let mut names = Vec::new();
        while let Some(entry) = backend.readdirplus(&dir).unwrap() {
            names.push(entry.name);
        }
        assert_eq!(names, [".", "..", "a", "b", "c"]);
        backend.closedir(&dir).unwrap();
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn test_rename_moves_subtree() {
        let mut backend = FakeSmbBackend::new();
        backend.add_file("/d/f", b"x");
        backend.add_dir("/e");
        backend
            .rename("smb://server/share/d", "smb://server/share/e/d")
            .unwrap();
        assert!(!backend.exists("/d"));
        assert_eq!(backend.file_contents("/e/d/f").unwrap(), b"x");
    }

    #[test]
    fn test_failure_injection() {
        let mut backend = FakeSmbBackend::new();
        backend.fail(FakeOp::Stat, Errno::ETIMEDOUT);
        assert_eq!(backend.stat("smb://server/share"), Err(Errno::ETIMEDOUT));
        backend.clear_failure(FakeOp::Stat);
        assert!(backend.stat("smb://server/share").is_ok());
        assert_eq!(backend.call_count(FakeOp::Stat), 2);
    }
}
