//! [`SmbBackend`] on top of the system libsmbclient.
//!
//! Uses the context-based API: one `SMBCCTX` per filesystem, with the
//! operation function pointers fetched once after initialization. The
//! context is not thread-safe; [`LibSmbClient`] is `Send` so it can be moved
//! onto the worker thread, and from then on only that thread touches it.
//!
//! The authentication callback finds the [`SharedState`] through the
//! context's user-data pointer. The client holds an `Arc` to it, so the
//! pointer stays valid for as long as the context exists.

#![allow(unsafe_code)]

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::mem;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use libc::{mode_t, off_t, size_t, ssize_t};
use nix::errno::Errno;
use tracing::level_filters::LevelFilter;
use tracing::{debug, warn};

use crate::backend::{DirEntryInfo, FileStat, FsStats, SmbBackend};
use crate::error::{BackendResult, SmbFsError};
use crate::shared::SharedState;

#[repr(C)]
struct SmbcCtx {
    _private: [u8; 0],
}

#[repr(C)]
struct SmbcFileRaw {
    _private: [u8; 0],
}

/// `struct libsmb_file_info`
#[repr(C)]
#[allow(dead_code)]
struct LibsmbFileInfo {
    size: u64,
    attrs: u16,
    uid: u64,
    gid: u64,
    btime_ts: libc::timespec,
    mtime_ts: libc::timespec,
    atime_ts: libc::timespec,
    ctime_ts: libc::timespec,
    name: *mut c_char,
    short_name: *mut c_char,
}

type AuthFn = unsafe extern "C" fn(
    ctx: *mut SmbcCtx,
    server: *const c_char,
    share: *const c_char,
    workgroup: *mut c_char,
    workgroup_len: c_int,
    username: *mut c_char,
    username_len: c_int,
    password: *mut c_char,
    password_len: c_int,
);
type LogFn = unsafe extern "C" fn(private: *mut c_void, level: c_int, msg: *const c_char);

type CloseFn = unsafe extern "C" fn(*mut SmbcCtx, *mut SmbcFileRaw) -> c_int;
type FtruncateFn = unsafe extern "C" fn(*mut SmbcCtx, *mut SmbcFileRaw, off_t) -> c_int;
type LseekFn = unsafe extern "C" fn(*mut SmbcCtx, *mut SmbcFileRaw, off_t, c_int) -> off_t;
type LseekdirFn = unsafe extern "C" fn(*mut SmbcCtx, *mut SmbcFileRaw, off_t) -> c_int;
type MkdirFn = unsafe extern "C" fn(*mut SmbcCtx, *const c_char, mode_t) -> c_int;
type OpenFn =
    unsafe extern "C" fn(*mut SmbcCtx, *const c_char, c_int, mode_t) -> *mut SmbcFileRaw;
type OpendirFn = unsafe extern "C" fn(*mut SmbcCtx, *const c_char) -> *mut SmbcFileRaw;
type ReadFn = unsafe extern "C" fn(*mut SmbcCtx, *mut SmbcFileRaw, *mut c_void, size_t) -> ssize_t;
type ReaddirplusFn =
    unsafe extern "C" fn(*mut SmbcCtx, *mut SmbcFileRaw) -> *const LibsmbFileInfo;
type RenameFn =
    unsafe extern "C" fn(*mut SmbcCtx, *const c_char, *mut SmbcCtx, *const c_char) -> c_int;
type PathFn = unsafe extern "C" fn(*mut SmbcCtx, *const c_char) -> c_int;
type StatFn = unsafe extern "C" fn(*mut SmbcCtx, *const c_char, *mut libc::stat) -> c_int;
type StatvfsFn = unsafe extern "C" fn(*mut SmbcCtx, *mut c_char, *mut libc::statvfs) -> c_int;
type TelldirFn = unsafe extern "C" fn(*mut SmbcCtx, *mut SmbcFileRaw) -> off_t;
type WriteFn =
    unsafe extern "C" fn(*mut SmbcCtx, *mut SmbcFileRaw, *const c_void, size_t) -> ssize_t;

#[link(name = "smbclient")]
unsafe extern "C" {
    fn smbc_new_context() -> *mut SmbcCtx;
    fn smbc_init_context(ctx: *mut SmbcCtx) -> *mut SmbcCtx;
    fn smbc_free_context(ctx: *mut SmbcCtx, shutdown_ctx: c_int) -> c_int;
    fn smbc_setDebug(ctx: *mut SmbcCtx, debug: c_int);
    fn smbc_setLogCallback(ctx: *mut SmbcCtx, private: *mut c_void, callback: Option<LogFn>);
    fn smbc_setOptionUserData(ctx: *mut SmbcCtx, user_data: *mut c_void);
    fn smbc_getOptionUserData(ctx: *mut SmbcCtx) -> *mut c_void;
    fn smbc_setOptionUseKerberos(ctx: *mut SmbcCtx, value: c_int);
    fn smbc_setOptionFallbackAfterKerberos(ctx: *mut SmbcCtx, value: c_int);
    fn smbc_setFunctionAuthDataWithContext(ctx: *mut SmbcCtx, callback: Option<AuthFn>);

    fn smbc_getFunctionClose(ctx: *mut SmbcCtx) -> Option<CloseFn>;
    fn smbc_getFunctionClosedir(ctx: *mut SmbcCtx) -> Option<CloseFn>;
    fn smbc_getFunctionFtruncate(ctx: *mut SmbcCtx) -> Option<FtruncateFn>;
    fn smbc_getFunctionLseek(ctx: *mut SmbcCtx) -> Option<LseekFn>;
    fn smbc_getFunctionLseekdir(ctx: *mut SmbcCtx) -> Option<LseekdirFn>;
    fn smbc_getFunctionMkdir(ctx: *mut SmbcCtx) -> Option<MkdirFn>;
    fn smbc_getFunctionOpen(ctx: *mut SmbcCtx) -> Option<OpenFn>;
    fn smbc_getFunctionOpendir(ctx: *mut SmbcCtx) -> Option<OpendirFn>;
    fn smbc_getFunctionRead(ctx: *mut SmbcCtx) -> Option<ReadFn>;
    fn smbc_getFunctionReaddirPlus(ctx: *mut SmbcCtx) -> Option<ReaddirplusFn>;
    fn smbc_getFunctionRename(ctx: *mut SmbcCtx) -> Option<RenameFn>;
    fn smbc_getFunctionRmdir(ctx: *mut SmbcCtx) -> Option<PathFn>;
    fn smbc_getFunctionStat(ctx: *mut SmbcCtx) -> Option<StatFn>;
    fn smbc_getFunctionStatVFS(ctx: *mut SmbcCtx) -> Option<StatvfsFn>;
    fn smbc_getFunctionTelldir(ctx: *mut SmbcCtx) -> Option<TelldirFn>;
    fn smbc_getFunctionUnlink(ctx: *mut SmbcCtx) -> Option<PathFn>;
    fn smbc_getFunctionWrite(ctx: *mut SmbcCtx) -> Option<WriteFn>;
}

struct ContextFunctions {
    close: CloseFn,
    closedir: CloseFn,
    ftruncate: FtruncateFn,
    lseek: LseekFn,
    lseekdir: LseekdirFn,
    mkdir: MkdirFn,
    open: OpenFn,
    opendir: OpendirFn,
    read: ReadFn,
    readdirplus: ReaddirplusFn,
    rename: RenameFn,
    rmdir: PathFn,
    stat: StatFn,
    statvfs: StatvfsFn,
    telldir: TelldirFn,
    unlink: PathFn,
    write: WriteFn,
}

impl ContextFunctions {
    /// # Safety
    ///
    /// `ctx` must be an initialized context.
    unsafe fn load(ctx: *mut SmbcCtx) -> Result<Self, SmbFsError> {
        macro_rules! get {
            ($getter:ident) => {
                // SAFETY: guaranteed by the caller.
                unsafe { $getter(ctx) }.ok_or_else(|| {
                    SmbFsError::BackendInit(concat!(stringify!($getter), " returned NULL").into())
                })?
            };
        }
        Ok(Self {
            close: get!(smbc_getFunctionClose),
            closedir: get!(smbc_getFunctionClosedir),
            ftruncate: get!(smbc_getFunctionFtruncate),
            lseek: get!(smbc_getFunctionLseek),
            lseekdir: get!(smbc_getFunctionLseekdir),
            mkdir: get!(smbc_getFunctionMkdir),
            open: get!(smbc_getFunctionOpen),
            opendir: get!(smbc_getFunctionOpendir),
            read: get!(smbc_getFunctionRead),
            readdirplus: get!(smbc_getFunctionReaddirPlus),
            rename: get!(smbc_getFunctionRename),
            rmdir: get!(smbc_getFunctionRmdir),
            stat: get!(smbc_getFunctionStat),
            statvfs: get!(smbc_getFunctionStatVFS),
            telldir: get!(smbc_getFunctionTelldir),
            unlink: get!(smbc_getFunctionUnlink),
            write: get!(smbc_getFunctionWrite),
        })
    }
}

/// Views a C buffer handed to us by libsmbclient as a byte slice.
///
/// # Safety
///
/// `ptr` must be null or valid for `len` bytes of writes.
unsafe fn c_buffer<'a>(ptr: *mut c_char, len: c_int) -> &'a mut [u8] {
    match usize::try_from(len) {
        Ok(len) if !ptr.is_null() => {
            // SAFETY: guaranteed by the caller.
            unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), len) }
        }
        _ => &mut [],
    }
}

/// # Safety
///
/// `ptr` must be null or a NUL-terminated string.
unsafe fn lossy_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: guaranteed by the caller.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

unsafe extern "C" fn auth_callback(
    ctx: *mut SmbcCtx,
    server: *const c_char,
    share: *const c_char,
    workgroup: *mut c_char,
    workgroup_len: c_int,
    username: *mut c_char,
    username_len: c_int,
    password: *mut c_char,
    password_len: c_int,
) {
    // SAFETY: user data is the `SharedState` kept alive by the client that
    // owns `ctx`; the buffers are sized as libsmbclient says.
    unsafe {
        let shared = smbc_getOptionUserData(ctx).cast::<SharedState>().cast_const();
        let Some(shared) = shared.as_ref() else {
            warn!("Authentication callback without user data");
            return;
        };
        shared.fill_auth(
            &lossy_str(server),
            &lossy_str(share),
            c_buffer(workgroup, workgroup_len),
            c_buffer(username, username_len),
            c_buffer(password, password_len),
        );
    }
}

unsafe extern "C" fn log_callback(_private: *mut c_void, level: c_int, msg: *const c_char) {
    // SAFETY: libsmbclient passes a NUL-terminated message.
    let msg = unsafe { lossy_str(msg) };
    debug!(target: "libsmbclient", smb_level = level, "{}", msg.trim_end());
}

/// libsmbclient debug level for the active tracing filter.
fn debug_level() -> Option<c_int> {
    let current = LevelFilter::current();
    if current >= LevelFilter::TRACE {
        Some(3)
    } else if current >= LevelFilter::DEBUG {
        Some(1)
    } else {
        None
    }
}

fn c_url(url: &str) -> BackendResult<CString> {
    CString::new(url).map_err(|_| Errno::EINVAL)
}

fn timespec_to_system_time(secs: i64, nanos: i64) -> SystemTime {
    let nanos = u32::try_from(nanos.clamp(0, 999_999_999)).unwrap_or(0);
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(secs.unsigned_abs(), nanos)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
            + Duration::from_nanos(u64::from(nanos))
    }
}

fn from_timespec(ts: &libc::timespec) -> SystemTime {
    #[allow(clippy::useless_conversion)]
    timespec_to_system_time(i64::from(ts.tv_sec), i64::from(ts.tv_nsec))
}

/// An open `SMBCFILE`.
#[derive(Debug)]
pub struct SmbcFile(NonNull<SmbcFileRaw>);

// SAFETY: only ever used on the worker thread that owns the context.
unsafe impl Send for SmbcFile {}

/// A libsmbclient context.
pub struct LibSmbClient {
    ctx: NonNull<SmbcCtx>,
    fns: ContextFunctions,
    _shared: Arc<SharedState>,
}

// SAFETY: the context is created on one thread and then used exclusively by
// the worker thread it is moved to.
unsafe impl Send for LibSmbClient {}

impl LibSmbClient {
    /// Creates and initializes a context whose authentication callback reads
    /// from `shared`.
    ///
    /// Kerberos is always attempted first; `allow_ntlm` permits falling back
    /// to NTLM when it fails.
    ///
    /// # Errors
    ///
    /// Returns [`SmbFsError::BackendInit`] if the context cannot be created.
    pub fn new(shared: Arc<SharedState>, allow_ntlm: bool) -> Result<Self, SmbFsError> {
        // SAFETY: plain constructor.
        let ctx = NonNull::new(unsafe { smbc_new_context() })
            .ok_or_else(|| SmbFsError::BackendInit("smbc_new_context failed".into()))?;
        // SAFETY: `ctx` is a fresh context.
        if unsafe { smbc_init_context(ctx.as_ptr()) }.is_null() {
            let errno = Errno::last();
            // SAFETY: never initialized, nothing to shut down.
            unsafe { smbc_free_context(ctx.as_ptr(), 0) };
            return Err(SmbFsError::BackendInit(format!(
                "smbc_init_context failed: {errno}"
            )));
        }

        // SAFETY: `ctx` is initialized; the user data outlives it because
        // `Self` holds the `Arc`.
        let fns = unsafe {
            let raw = ctx.as_ptr();
            smbc_setOptionUserData(raw, Arc::as_ptr(&shared).cast_mut().cast::<c_void>());
            smbc_setOptionUseKerberos(raw, 1);
            smbc_setOptionFallbackAfterKerberos(raw, c_int::from(allow_ntlm));
            smbc_setFunctionAuthDataWithContext(raw, Some(auth_callback));
            smbc_setLogCallback(raw, std::ptr::null_mut(), Some(log_callback));
            if let Some(level) = debug_level() {
                smbc_setDebug(raw, level);
            }
            match ContextFunctions::load(raw) {
                Ok(fns) => fns,
                Err(e) => {
                    smbc_free_context(raw, 1);
                    return Err(e);
                }
            }
        };
        if !allow_ntlm {
            warn!("NTLM authentication is disabled");
        }

        Ok(Self {
            ctx,
            fns,
            _shared: shared,
        })
    }

    fn ctx(&self) -> *mut SmbcCtx {
        self.ctx.as_ptr()
    }

    fn check(result: c_int) -> BackendResult<()> {
        if result < 0 {
            Err(Errno::last())
        } else {
            Ok(())
        }
    }

    fn path_call(&mut self, f: PathFn, url: &str) -> BackendResult<()> {
        let url = c_url(url)?;
        // SAFETY: valid context and NUL-terminated URL.
        Self::check(unsafe { f(self.ctx(), url.as_ptr()) })
    }
}

impl Drop for LibSmbClient {
    fn drop(&mut self) {
        // SAFETY: the context is initialized and not used after this.
        if unsafe { smbc_free_context(self.ctx(), 1) } != 0 {
            warn!(error = %Errno::last(), "smbc_free_context failed");
        }
    }
}

impl SmbBackend for LibSmbClient {
    type File = SmbcFile;

    #[allow(clippy::useless_conversion, clippy::unnecessary_cast)]
    fn stat(&mut self, url: &str) -> BackendResult<FileStat> {
        let url = c_url(url)?;
        // SAFETY: plain-old-data, filled in by the call.
        let mut st: libc::stat = unsafe { mem::zeroed() };
        // SAFETY: valid context, URL and out-pointer.
        Self::check(unsafe { (self.fns.stat)(self.ctx(), url.as_ptr(), &mut st) })?;
        Ok(FileStat {
            mode: u32::from(st.st_mode),
            size: st.st_size as u64,
            atime: timespec_to_system_time(st.st_atime as i64, st.st_atime_nsec as i64),
            mtime: timespec_to_system_time(st.st_mtime as i64, st.st_mtime_nsec as i64),
            ctime: timespec_to_system_time(st.st_ctime as i64, st.st_ctime_nsec as i64),
        })
    }

    #[allow(clippy::useless_conversion, clippy::unnecessary_cast)]
    fn statvfs(&mut self, url: &str) -> BackendResult<FsStats> {
        let url = c_url(url)?;
        // SAFETY: plain-old-data, filled in by the call.
        let mut st: libc::statvfs = unsafe { mem::zeroed() };
        // SAFETY: libsmbclient takes the path as `char *` but does not write
        // through it.
        Self::check(unsafe { (self.fns.statvfs)(self.ctx(), url.as_ptr().cast_mut(), &mut st) })?;
        Ok(FsStats {
            block_size: st.f_bsize as u64,
            fragment_size: st.f_frsize as u64,
            blocks: st.f_blocks as u64,
            blocks_free: st.f_bfree as u64,
            blocks_available: st.f_bavail as u64,
            files: st.f_files as u64,
            files_free: st.f_ffree as u64,
            name_max: st.f_namemax as u64,
            flags: st.f_flag as u64,
        })
    }

    fn open(&mut self, url: &str, flags: i32, mode: u32) -> BackendResult<SmbcFile> {
        let url = c_url(url)?;
        // SAFETY: valid context and URL.
        let file = unsafe { (self.fns.open)(self.ctx(), url.as_ptr(), flags, mode as mode_t) };
        NonNull::new(file).map(SmbcFile).ok_or_else(Errno::last)
    }

    fn close(&mut self, file: &SmbcFile) -> BackendResult<()> {
        // SAFETY: `file` came from this context.
        Self::check(unsafe { (self.fns.close)(self.ctx(), file.0.as_ptr()) })
    }

    fn lseek(&mut self, file: &SmbcFile, offset: i64) -> BackendResult<i64> {
        // SAFETY: `file` came from this context.
        let result = unsafe {
            (self.fns.lseek)(self.ctx(), file.0.as_ptr(), offset as off_t, libc::SEEK_SET)
        };
        if result < 0 {
            Err(Errno::last())
        } else {
            Ok(i64::from(result))
        }
    }

    fn read(&mut self, file: &SmbcFile, buf: &mut [u8]) -> BackendResult<usize> {
        // SAFETY: `buf` is valid for `buf.len()` bytes of writes.
        let read = unsafe {
            (self.fns.read)(
                self.ctx(),
                file.0.as_ptr(),
                buf.as_mut_ptr().cast::<c_void>(),
                buf.len(),
            )
        };
        usize::try_from(read).map_err(|_| Errno::last())
    }

    fn write(&mut self, file: &SmbcFile, data: &[u8]) -> BackendResult<usize> {
        // SAFETY: `data` is valid for `data.len()` bytes of reads.
        let written = unsafe {
            (self.fns.write)(
                self.ctx(),
                file.0.as_ptr(),
                data.as_ptr().cast::<c_void>(),
                data.len(),
            )
        };
        usize::try_from(written).map_err(|_| Errno::last())
    }

    fn ftruncate(&mut self, file: &SmbcFile, size: u64) -> BackendResult<()> {
        let size = off_t::try_from(size).map_err(|_| Errno::EFBIG)?;
        // SAFETY: `file` came from this context.
        Self::check(unsafe { (self.fns.ftruncate)(self.ctx(), file.0.as_ptr(), size) })
    }

    fn opendir(&mut self, url: &str) -> BackendResult<SmbcFile> {
        let url = c_url(url)?;
        // SAFETY: valid context and URL.
        let dir = unsafe { (self.fns.opendir)(self.ctx(), url.as_ptr()) };
        NonNull::new(dir).map(SmbcFile).ok_or_else(Errno::last)
    }

    fn closedir(&mut self, dir: &SmbcFile) -> BackendResult<()> {
        // SAFETY: `dir` came from this context.
        Self::check(unsafe { (self.fns.closedir)(self.ctx(), dir.0.as_ptr()) })
    }

    fn readdirplus(&mut self, dir: &SmbcFile) -> BackendResult<Option<DirEntryInfo>> {
        // End of directory is NULL with errno untouched.
        Errno::clear();
        // SAFETY: `dir` came from this context.
        let info = unsafe { (self.fns.readdirplus)(self.ctx(), dir.0.as_ptr()) };
        // SAFETY: a non-NULL result points at an entry owned by `dir`, valid
        // until the next call on it.
        let Some(info) = (unsafe { info.as_ref() }) else {
            return match Errno::last() {
                Errno::UnknownErrno => Ok(None),
                errno => Err(errno),
            };
        };
        Ok(Some(DirEntryInfo {
            // SAFETY: `name` is NUL-terminated.
            name: unsafe { lossy_str(info.name) },
            attrs: info.attrs,
            size: info.size,
            atime: from_timespec(&info.atime_ts),
            mtime: from_timespec(&info.mtime_ts),
            ctime: from_timespec(&info.ctime_ts),
        }))
    }

    fn telldir(&mut self, dir: &SmbcFile) -> BackendResult<i64> {
        // SAFETY: `dir` came from this context.
        let offset = unsafe { (self.fns.telldir)(self.ctx(), dir.0.as_ptr()) };
        if offset < 0 {
            Err(Errno::last())
        } else {
            Ok(i64::from(offset))
        }
    }

    fn lseekdir(&mut self, dir: &SmbcFile, offset: i64) -> BackendResult<()> {
        // SAFETY: `dir` came from this context.
        Self::check(unsafe { (self.fns.lseekdir)(self.ctx(), dir.0.as_ptr(), offset as off_t) })
    }

    fn mkdir(&mut self, url: &str, mode: u32) -> BackendResult<()> {
        let url = c_url(url)?;
        // SAFETY: valid context and URL.
        Self::check(unsafe { (self.fns.mkdir)(self.ctx(), url.as_ptr(), mode as mode_t) })
    }

    fn rmdir(&mut self, url: &str) -> BackendResult<()> {
        self.path_call(self.fns.rmdir, url)
    }

    fn rename(&mut self, old_url: &str, new_url: &str) -> BackendResult<()> {
        let old_url = c_url(old_url)?;
        let new_url = c_url(new_url)?;
        let ctx = self.ctx();
        // SAFETY: both names live on the same context.
        Self::check(unsafe { (self.fns.rename)(ctx, old_url.as_ptr(), ctx, new_url.as_ptr()) })
    }

    fn unlink(&mut self, url: &str) -> BackendResult<()> {
        self.path_call(self.fns.unlink, url)
    }
}
