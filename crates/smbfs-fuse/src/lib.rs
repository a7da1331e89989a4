//! FUSE filesystem backed by an SMB share.
//!
//! The share is reached through libsmbclient, whose contexts are not
//! thread-safe, so every backend call runs on a single worker thread. FUSE
//! callbacks only enqueue work and return; the worker replies when the server
//! has answered.
//!
//! # Layout
//!
//! - [`filesystem::SmbFilesystem`]: the dispatcher, generic over
//!   [`backend::SmbBackend`]
//! - [`worker::Worker`]: the per-operation logic and all mutable state
//! - [`fuse::SmbFuse`]: the fuser adapter
//! - [`bootstrap::mount_share`]: option handling and the connect probe
//! - [`libsmbclient::LibSmbClient`]: the real backend (feature `libsmbclient`)
//! - [`testing`]: an in-memory backend and recording requests
//!
//! # Usage
//!
//! ```ignore
//! use smbfs_fuse::bootstrap::{MountOptions, mount_share};
//! use smbfs_fuse::credentials::NoCredentialProvider;
//! use smbfs_fuse::libsmbclient::LibSmbClient;
//!
//! let options = MountOptions::new("smb://server/share");
//! let fs = mount_share(&options, 1000, 1000, None, Box::new(NoCredentialProvider),
//!     |shared| LibSmbClient::new(shared, false))?;
//! fuser::mount2(SmbFuse::new(fs), mountpoint, &[])?;
//! ```

pub mod attr;
pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod error;
pub mod executor;
pub mod exit_code;
pub mod filesystem;
pub mod fuse;
#[cfg(feature = "libsmbclient")]
pub mod libsmbclient;
pub mod path_resolver;
pub mod request;
pub mod shared;
pub mod worker;

/// Test doubles for driving the filesystem without a server or a kernel.
pub mod testing;

pub use attr::{AttrError, AttrTranslator};
pub use backend::{DirEntryInfo, FileStat, FsStats, SmbBackend};
pub use bootstrap::{MountError, MountOptions, mount_share};
pub use config::{DEFAULT_ATTR_TIMEOUT, SmbFsConfig};
pub use credentials::{
    CredentialProvider, NoCredentialProvider, PasswordPromptProvider, SmbCredential,
};
pub use error::{ConnectError, SmbFsError, ToErrno};
pub use filesystem::SmbFilesystem;
pub use fuse::SmbFuse;
pub use path_resolver::PathResolver;
pub use shared::SharedState;
pub use smbfs_mount::ROOT_INODE;
