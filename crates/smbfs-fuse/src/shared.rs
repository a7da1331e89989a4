//! State shared between the backend worker and the control thread.
//!
//! The current credentials and the resolved share URL are read on the worker
//! thread (from inside the client library's authentication callback, and
//! whenever a URL is built) and replaced from the control thread. One mutex
//! guards both. It is only ever held for a copy, never across a backend call.

use parking_lot::Mutex;
use smbfs_mount::SharePath;
use tracing::trace;

use crate::credentials::{SmbCredential, copy_to_c_buffer};
use crate::path_resolver::{PathResolver, ResolveError};

struct SharedInner {
    credentials: Option<SmbCredential>,
    resolver: PathResolver,
}

/// Credentials and resolver behind a single lock.
pub struct SharedState {
    inner: Mutex<SharedInner>,
}

impl SharedState {
    /// Creates the shared state.
    pub fn new(resolver: PathResolver, credentials: Option<SmbCredential>) -> Self {
        Self {
            inner: Mutex::new(SharedInner {
                credentials,
                resolver,
            }),
        }
    }

    /// Fills the client library's authentication buffers.
    ///
    /// With no credentials set all three buffers receive empty strings; a
    /// credential without a password leaves the password empty.
    pub fn fill_auth(
        &self,
        server: &str,
        share: &str,
        workgroup: &mut [u8],
        username: &mut [u8],
        password: &mut [u8],
    ) {
        let inner = self.inner.lock();
        let Some(credentials) = inner.credentials.as_ref() else {
            trace!(server, share, "No credentials set, authenticating as guest");
            for buffer in [workgroup, username, password] {
                copy_to_c_buffer("empty", "", buffer);
            }
            return;
        };

        trace!(server, share, username = %credentials.username, "Supplying credentials");
        copy_to_c_buffer("workgroup", &credentials.workgroup, workgroup);
        copy_to_c_buffer("username", &credentials.username, username);
        let secret = credentials.password.as_ref().map_or("", |p| p.as_str());
        copy_to_c_buffer("password", secret, password);
    }

    /// Replaces the credentials used for subsequent authentications.
    pub fn replace_credentials(&self, credentials: SmbCredential) {
        self.inner.lock().credentials = Some(credentials);
    }

    /// A copy of the current credentials.
    pub fn credentials(&self) -> Option<SmbCredential> {
        self.inner.lock().credentials.clone()
    }

    /// Applies or clears a resolved IPv4 address for the share host.
    pub fn set_resolved_address(&self, address: &[u8]) -> Result<(), ResolveError> {
        self.inner.lock().resolver.set_resolved_address(address)
    }

    /// The backend URL for a path inside the share.
    pub fn url_for(&self, path: &SharePath) -> String {
        self.inner.lock().resolver.url_for(path)
    }

    /// The share root URL currently in use.
    pub fn base_url(&self) -> String {
        self.inner.lock().resolver.base_url().to_string()
    }

    /// The share root URL as configured.
    pub fn share_url(&self) -> String {
        self.inner.lock().resolver.share_url().to_string()
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SharedState")
            .field("credentials", &inner.credentials)
            .field("resolver", &inner.resolver)
            .finish()
    }
}
