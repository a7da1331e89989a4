//! Error types for the SMB filesystem.
//!
//! Filesystem operations speak errno end to end: libsmbclient reports
//! failures through `errno` and the kernel expects one back, so backend calls
//! return [`Errno`] and pass it through unchanged. The enums here cover the
//! places where something richer is needed: setting the filesystem up, and
//! classifying the connect probe.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

use crate::executor::ExecutorError;

/// Errors raised while constructing or configuring the filesystem.
#[derive(Debug, Error)]
pub enum SmbFsError {
    /// The share path is not a usable `smb://host/share` URL.
    #[error("Invalid share path {path:?}: {reason}")]
    InvalidSharePath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Files would be reported as owned by root.
    #[error("Refusing to expose files owned by root (uid {uid}, gid {gid})")]
    RootOwnership {
        /// Configured owner.
        uid: u32,
        /// Configured group.
        gid: u32,
    },

    /// The SMB client context could not be created or initialized.
    #[error("Failed to initialize SMB client context: {0}")]
    BackendInit(String),

    /// A worker thread could not be started or has gone away.
    #[error("Worker thread error: {0}")]
    Executor(#[from] ExecutorError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of a failed connect probe.
///
/// A successful probe is simply `Ok(())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The server or share could not be reached or does not exist.
    #[error("Share not found or unreachable")]
    NotFound,

    /// The server rejected the supplied credentials.
    #[error("Access denied")]
    AccessDenied,

    /// The server only speaks SMB1, which the client refuses.
    #[error("Server requires an unsupported protocol version")]
    ProtocolNotSupported,

    /// Anything else.
    #[error("Unknown error while connecting to share")]
    UnknownError,
}

impl ConnectError {
    /// Classifies the errno returned by the probe's opendir.
    pub fn from_errno(errno: Errno) -> Self {
        match errno {
            Errno::EPERM | Errno::EACCES => Self::AccessDenied,
            Errno::ENODEV
            | Errno::ENOENT
            | Errno::ETIMEDOUT
            | Errno::EINVAL
            | Errno::EHOSTUNREACH
            | Errno::ECONNREFUSED => Self::NotFound,
            // libsmbclient returns ECONNABORTED when negotiation fails because
            // the server only offers SMB1.
            Errno::ECONNABORTED => Self::ProtocolNotSupported,
            _ => Self::UnknownError,
        }
    }
}

/// Converts an IO error to an errno.
pub fn io_error_to_errno(e: &io::Error) -> Errno {
    e.raw_os_error().map_or(Errno::EIO, Errno::from_raw)
}

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, Errno>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to an errno for a kernel reply.
    fn to_errno(&self) -> Errno;
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> Errno {
        io_error_to_errno(self)
    }
}

impl ToErrno for ExecutorError {
    fn to_errno(&self) -> Errno {
        match self {
            ExecutorError::Shutdown => Errno::ESHUTDOWN,
            ExecutorError::WorkerPanic => Errno::EIO,
            ExecutorError::Spawn(e) => io_error_to_errno(e),
        }
    }
}

impl ToErrno for SmbFsError {
    fn to_errno(&self) -> Errno {
        match self {
            SmbFsError::InvalidSharePath { .. } | SmbFsError::RootOwnership { .. } => {
                Errno::EINVAL
            }
            SmbFsError::BackendInit(_) => Errno::EIO,
            SmbFsError::Executor(e) => e.to_errno(),
            SmbFsError::Io(e) => io_error_to_errno(e),
        }
    }
}
