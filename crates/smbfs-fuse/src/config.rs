//! Filesystem configuration.

use std::time::Duration;

use smbfs_mount::{DEFAULT_STAT_CACHE_CAPACITY, DEFAULT_STAT_TTL};

use crate::credentials::SmbCredential;
use crate::error::SmbFsError;
use crate::path_resolver::{ResolveError, validate_share_url};

/// Default attribute and entry timeout advertised to the kernel.
pub const DEFAULT_ATTR_TIMEOUT: Duration = DEFAULT_STAT_TTL;

/// Configuration for one mounted share.
#[derive(Debug, Clone)]
pub struct SmbFsConfig {
    /// Share URL, `smb://host/share[/path]`, without a trailing `/`.
    pub share_path: String,

    /// Owner reported for every file. Must not be root.
    pub uid: u32,

    /// Group reported for every file. Must not be root.
    pub gid: u32,

    /// Credentials for the authentication callback. `None` authenticates
    /// as guest.
    pub credentials: Option<SmbCredential>,

    /// Allow falling back to NTLM when Kerberos authentication fails.
    pub allow_ntlm: bool,

    /// The session authenticates with Kerberos. Disables the credential
    /// refresh flow.
    pub use_kerberos: bool,

    /// How long the kernel may cache attributes and entries, and how long a
    /// directory listing's stats stay in the stat cache.
    ///
    /// Default: 5 seconds.
    pub attr_timeout: Duration,

    /// Maximum number of stats kept from directory listings.
    ///
    /// Default: 1024.
    pub stat_cache_capacity: usize,
}

impl SmbFsConfig {
    /// Creates a configuration for `share_path` owned by `uid:gid`.
    pub fn new(share_path: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            share_path: share_path.into(),
            uid,
            gid,
            credentials: None,
            allow_ntlm: false,
            use_kerberos: false,
            attr_timeout: DEFAULT_ATTR_TIMEOUT,
            stat_cache_capacity: DEFAULT_STAT_CACHE_CAPACITY,
        }
    }

    /// Sets the initial credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: SmbCredential) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Allows NTLM after a failed Kerberos attempt.
    #[must_use]
    pub fn allow_ntlm(mut self, allow: bool) -> Self {
        self.allow_ntlm = allow;
        self
    }

    /// Marks the session as Kerberos-authenticated.
    #[must_use]
    pub fn use_kerberos(mut self, use_kerberos: bool) -> Self {
        self.use_kerberos = use_kerberos;
        self
    }

    /// Sets the attribute timeout.
    #[must_use]
    pub fn attr_timeout(mut self, timeout: Duration) -> Self {
        self.attr_timeout = timeout;
        self
    }

    /// Sets the stat cache capacity.
    #[must_use]
    pub fn stat_cache_capacity(mut self, capacity: usize) -> Self {
        self.stat_cache_capacity = capacity;
        self
    }

    /// Checks the share path and ownership.
    pub fn validate(&self) -> Result<(), SmbFsError> {
        if self.uid == 0 || self.gid == 0 {
            return Err(SmbFsError::RootOwnership {
                uid: self.uid,
                gid: self.gid,
            });
        }
        if self.share_path.is_empty() {
            return Err(SmbFsError::InvalidSharePath {
                path: String::new(),
                reason: "empty",
            });
        }
        validate_share_url(&self.share_path).map_err(|e| match e {
            ResolveError::InvalidUrl { url, reason } => {
                SmbFsError::InvalidSharePath { path: url, reason }
            }
            ResolveError::UnsupportedAddress(_) => SmbFsError::InvalidSharePath {
                path: self.share_path.clone(),
                reason: "unparseable",
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SmbFsConfig::new("smb://server/share", 1000, 1000);
        assert_eq!(config.attr_timeout, Duration::from_secs(5));
        assert_eq!(config.stat_cache_capacity, 1024);
        assert!(config.credentials.is_none());
        assert!(!config.use_kerberos);
        config.validate().unwrap();
    }

    #[test]
    fn test_builder() {
        let config = SmbFsConfig::new("smb://server/share", 1000, 1000)
            .credentials(SmbCredential::new("W", "U"))
            .allow_ntlm(true)
            .use_kerberos(true)
            .attr_timeout(Duration::from_secs(1))
            .stat_cache_capacity(16);
        assert!(config.allow_ntlm);
        assert!(config.use_kerberos);
        assert_eq!(config.attr_timeout, Duration::from_secs(1));
        assert_eq!(config.stat_cache_capacity, 16);
        assert_eq!(config.credentials.unwrap().workgroup, "W");
    }

    #[test]
    fn test_validate_rejects_root_ownership() {
        let err = SmbFsConfig::new("smb://server/share", 0, 1000)
            .validate()
            .unwrap_err();
        assert!(matches!(err, SmbFsError::RootOwnership { uid: 0, .. }));
        assert!(SmbFsConfig::new("smb://server/share", 1000, 0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_paths() {
        for path in ["", "smb://server/share/", "server/share", "smb://server"] {
            let err = SmbFsConfig::new(path, 1000, 1000).validate().unwrap_err();
            assert!(matches!(err, SmbFsError::InvalidSharePath { .. }), "{path:?}");
        }
    }
}
