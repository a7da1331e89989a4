//! Mount bootstrap.
//!
//! Turns user-facing [`MountOptions`] into a running [`SmbFilesystem`]:
//! validate the URL, settle which credentials to use, start the filesystem,
//! point it at a pre-resolved address, and probe the share so that a bad
//! URL or bad password is reported before anything is mounted.

use std::net::Ipv4Addr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::backend::SmbBackend;
use crate::config::SmbFsConfig;
use crate::credentials::{CredentialProvider, SmbCredential};
use crate::error::{ConnectError, SmbFsError};
use crate::filesystem::SmbFilesystem;
use crate::path_resolver::validate_share_url;
use crate::shared::SharedState;

/// Why a share could not be mounted.
#[derive(Debug, Error)]
pub enum MountError {
    /// The share path is not an `smb://host/share` URL.
    #[error("Invalid share URL {0:?}")]
    InvalidUrl(String),

    /// The options are inconsistent or the filesystem could not be set up.
    #[error("Invalid mount options: {0}")]
    InvalidOptions(#[source] SmbFsError),

    /// The server or share does not exist or cannot be reached.
    #[error("Share not found or unreachable")]
    NotFound,

    /// The server refused the credentials.
    #[error("Access denied by server")]
    AccessDenied,

    /// The server only offers a protocol version the client will not use.
    #[error("Server requires an unsupported SMB protocol version")]
    InvalidProtocol,

    /// Anything else.
    #[error("Unknown error mounting share")]
    Unknown(#[source] Option<SmbFsError>),
}

impl From<ConnectError> for MountError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::AccessDenied => MountError::AccessDenied,
            ConnectError::NotFound => MountError::NotFound,
            ConnectError::ProtocolNotSupported => MountError::InvalidProtocol,
            ConnectError::UnknownError => MountError::Unknown(None),
        }
    }
}

/// What the user asked to mount.
#[derive(Clone, Default)]
pub struct MountOptions {
    /// `smb://host/share[/path]`, without a trailing `/`.
    pub share_path: String,
    /// Workgroup or domain.
    pub workgroup: String,
    /// Account name; empty for guest.
    pub username: String,
    /// Password. Ignored when a Kerberos identity is given.
    pub password: Option<Zeroizing<String>>,
    /// Kerberos principal; presence selects Kerberos authentication.
    pub kerberos_identity: Option<String>,
    /// Allow NTLM when Kerberos fails.
    pub allow_ntlm: bool,
    /// IPv4 address of the share host as raw octets, resolved by the caller.
    pub resolved_host: Option<Vec<u8>>,
    /// Mount without probing the share first.
    pub skip_connect: bool,
}

impl std::fmt::Debug for MountOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountOptions")
            .field("share_path", &self.share_path)
            .field("workgroup", &self.workgroup)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("kerberos_identity", &self.kerberos_identity)
            .field("allow_ntlm", &self.allow_ntlm)
            .field("resolved_host", &self.resolved_host)
            .field("skip_connect", &self.skip_connect)
            .finish()
    }
}

impl MountOptions {
    /// Options for mounting `share_path` as guest.
    pub fn new(share_path: impl Into<String>) -> Self {
        Self {
            share_path: share_path.into(),
            ..Self::default()
        }
    }

    /// Returns true if the session authenticates with Kerberos.
    pub fn uses_kerberos(&self) -> bool {
        self.kerberos_identity.is_some()
    }

    /// The credential handed to the authentication callback.
    ///
    /// Kerberos sessions never carry a password.
    pub fn credential(&self) -> SmbCredential {
        let mut credential = SmbCredential::new(self.workgroup.clone(), self.username.clone());
        if !self.uses_kerberos() {
            credential.password = self.password.clone();
        }
        credential
    }
}

/// Builds the filesystem for `options` and, unless told otherwise, checks
/// that the share is reachable with the given credentials.
///
/// `make_backend` creates the SMB client; it receives the shared state its
/// authentication callback must read from.
///
/// # Errors
///
/// See [`MountError`].
pub fn mount_share<B, F>(
    options: &MountOptions,
    uid: u32,
    gid: u32,
    attr_timeout: Option<std::time::Duration>,
    provider: Box<dyn CredentialProvider>,
    make_backend: F,
) -> Result<SmbFilesystem<B>, MountError>
where
    B: SmbBackend,
    F: FnOnce(Arc<SharedState>) -> Result<B, SmbFsError>,
{
    if validate_share_url(&options.share_path).is_err() {
        return Err(MountError::InvalidUrl(options.share_path.clone()));
    }

    let use_kerberos = options.uses_kerberos();
    if let Some(identity) = &options.kerberos_identity {
        info!(identity = %identity, "Using Kerberos authentication");
    }

    let mut config = SmbFsConfig::new(options.share_path.clone(), uid, gid)
        .credentials(options.credential())
        .use_kerberos(use_kerberos)
        .allow_ntlm(options.allow_ntlm);
    if let Some(timeout) = attr_timeout {
        config = config.attr_timeout(timeout);
    }

    let fs = SmbFilesystem::new(config, provider, make_backend).map_err(|e| match e {
        SmbFsError::InvalidSharePath { .. } | SmbFsError::RootOwnership { .. } => {
            MountError::InvalidOptions(e)
        }
        other => MountError::Unknown(Some(other)),
    })?;

    // Kerberos needs the host name to find the service principal.
    if let Some(address) = options.resolved_host.as_deref().filter(|_| !use_kerberos) {
        match fs.set_resolved_address(address) {
            Ok(()) if address.len() == 4 => {
                let ip = Ipv4Addr::new(address[0], address[1], address[2], address[3]);
                debug!(address = %ip, url = %fs.base_url(), "Using resolved share address");
            }
            Ok(()) => {}
            Err(e) => warn!(error = %e, "Ignoring resolved share address"),
        }
    }

    if options.skip_connect {
        debug!("Skipping connect probe");
    } else {
        fs.ensure_connected()?;
    }
    Ok(fs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kerberos_credential_has_no_password() {
        let options = MountOptions {
            username: "alice".to_string(),
            password: Some(Zeroizing::new("secret".to_string())),
            kerberos_identity: Some("alice@EXAMPLE.COM".to_string()),
            ..MountOptions::new("smb://server/share")
        };
        let credential = options.credential();
        assert_eq!(credential.username, "alice");
        assert!(credential.password.is_none());
    }

    #[test]
    fn test_password_credential() {
        let options = MountOptions {
            workgroup: "WG".to_string(),
            username: "bob".to_string(),
            password: Some(Zeroizing::new("pw".to_string())),
            ..MountOptions::new("smb://server/share")
        };
        let credential = options.credential();
        assert_eq!(credential.password.as_deref().map(String::as_str), Some("pw"));
        assert!(!options.uses_kerberos());
    }

    #[test]
    fn test_connect_error_mapping() {
        assert!(matches!(MountError::from(ConnectError::AccessDenied), MountError::AccessDenied));
        assert!(matches!(MountError::from(ConnectError::NotFound), MountError::NotFound));
        assert!(matches!(
            MountError::from(ConnectError::ProtocolNotSupported),
            MountError::InvalidProtocol
        ));
        assert!(matches!(
            MountError::from(ConnectError::UnknownError),
            MountError::Unknown(None)
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let options = MountOptions {
            password: Some(Zeroizing::new("hunter2".to_string())),
            ..MountOptions::new("smb://server/share")
        };
        assert!(!format!("{options:?}").contains("hunter2"));
    }
}
