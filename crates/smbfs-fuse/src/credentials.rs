//! Credentials and the one-shot credential refresh flow.
//!
//! The first operations of a session may fail with `EACCES` because the
//! credentials handed over at mount time are wrong or missing. When that
//! happens on the share root before anything has succeeded, the backend
//! worker asks the control thread to fetch new credentials from a
//! [`CredentialProvider`]. The provider answers asynchronously; a supplied
//! credential replaces the current one for every later authentication.
//!
//! The refresh state lives in [`CredentialRefresher`], which is owned by the
//! control thread. Only that thread starts a request or handles a
//! completion, so the in-flight flag needs no lock.

use std::fmt;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::executor::ExecutorHandle;
use crate::shared::SharedState;

/// A workgroup, username and optional password.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SmbCredential {
    /// Workgroup or domain.
    pub workgroup: String,
    /// Account name.
    pub username: String,
    /// Password, if any. Absent for guest and Kerberos sessions.
    pub password: Option<Zeroizing<String>>,
}

impl SmbCredential {
    /// Creates a credential without a password.
    pub fn new(workgroup: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            workgroup: workgroup.into(),
            username: username.into(),
            password: None,
        }
    }

    /// Attaches a password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Zeroizing::new(password.into()));
        self
    }

    /// Returns true if no username is set.
    pub fn is_guest(&self) -> bool {
        self.username.is_empty()
    }
}

impl fmt::Debug for SmbCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbCredential")
            .field("workgroup", &self.workgroup)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Copies `value` into a fixed-size C string buffer, always NUL-terminating.
///
/// Values that do not fit are truncated with a warning. A zero-length
/// buffer is left alone.
pub fn copy_to_c_buffer(field: &'static str, value: &str, buffer: &mut [u8]) {
    let Some(capacity) = buffer.len().checked_sub(1) else {
        return;
    };
    let bytes = value.as_bytes();
    let len = if bytes.len() > capacity {
        warn!(field, len = bytes.len(), capacity, "Credential truncated to fit buffer");
        capacity
    } else {
        bytes.len()
    };
    buffer[..len].copy_from_slice(&bytes[..len]);
    buffer[len] = 0;
}

/// Completion for [`CredentialProvider::request_credentials`].
///
/// `None` means the provider declined.
pub type CredentialCallback = Box<dyn FnOnce(Option<SmbCredential>) + Send + 'static>;

/// Source of replacement credentials.
pub trait CredentialProvider: Send + 'static {
    /// Starts fetching credentials and returns without waiting.
    ///
    /// `done` must eventually be called exactly once, from any thread.
    fn request_credentials(&mut self, done: CredentialCallback);
}

/// Provider that always declines.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentialProvider;

impl CredentialProvider for NoCredentialProvider {
    fn request_credentials(&mut self, done: CredentialCallback) {
        debug!("No credential provider configured, declining refresh");
        done(None);
    }
}

/// Provider that asks for a password on the controlling terminal.
///
/// The workgroup and username stay as configured; only the password is
/// prompted for. The prompt runs on its own thread so the control thread
/// keeps serving.
#[derive(Debug, Clone)]
pub struct PasswordPromptProvider {
    workgroup: String,
    username: String,
    share_url: String,
}

impl PasswordPromptProvider {
    /// Creates a provider prompting on behalf of `username` for `share_url`.
    pub fn new(workgroup: &str, username: &str, share_url: &str) -> Self {
        Self {
            workgroup: workgroup.to_string(),
            username: username.to_string(),
            share_url: share_url.to_string(),
        }
    }

    fn prompt(&self) -> String {
        if self.workgroup.is_empty() {
            format!("Password for {} on {}: ", self.username, self.share_url)
        } else {
            format!(
                "Password for {}\\{} on {}: ",
                self.workgroup, self.username, self.share_url
            )
        }
    }
}

impl CredentialProvider for PasswordPromptProvider {
    fn request_credentials(&mut self, done: CredentialCallback) {
        let prompt = self.prompt();
        let credential = SmbCredential::new(self.workgroup.clone(), self.username.clone());
        let spawned = thread::Builder::new()
            .name("smbfs-prompt".to_string())
            .spawn(move || match rpassword::prompt_password(prompt) {
                Ok(password) => {
                    let password = Zeroizing::new(password);
                    done(Some(credential.with_password(password.as_str())));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read password");
                    done(None);
                }
            });
        if let Err(e) = spawned {
            // `done` went down with the closure; the refresher stays in
            // flight, which only suppresses further prompts.
            warn!(error = %e, "Failed to start password prompt thread");
        }
    }
}

/// Control-thread state for credential refresh.
pub struct CredentialRefresher {
    provider: Box<dyn CredentialProvider>,
    shared: Arc<SharedState>,
    handle: ExecutorHandle<CredentialRefresher>,
    in_flight: bool,
    requests: u64,
}

impl CredentialRefresher {
    /// Creates the refresher. `handle` must point at the executor that owns
    /// it; completions are routed back through it.
    pub fn new(
        provider: Box<dyn CredentialProvider>,
        shared: Arc<SharedState>,
        handle: ExecutorHandle<CredentialRefresher>,
    ) -> Self {
        Self {
            provider,
            shared,
            handle,
            in_flight: false,
            requests: 0,
        }
    }

    /// Asks the provider for new credentials unless a request is already
    /// outstanding.
    pub fn request_update(&mut self) {
        if self.in_flight {
            debug!("Credential refresh already in flight");
            return;
        }
        self.in_flight = true;
        self.requests += 1;
        info!("Requesting updated credentials");

        let handle = self.handle.clone();
        self.provider.request_credentials(Box::new(move |credential| {
            let posted = handle.post(move |refresher: &mut CredentialRefresher| {
                refresher.on_credentials(credential);
            });
            if posted.is_err() {
                debug!("Credential refresh finished after shutdown");
            }
        }));
    }

    fn on_credentials(&mut self, credential: Option<SmbCredential>) {
        self.in_flight = false;
        match credential {
            Some(credential) => {
                info!(username = %credential.username, "Updated credentials");
                self.shared.replace_credentials(credential);
            }
            None => debug!("Credential provider declined"),
        }
    }

    /// Returns true while a provider request is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Number of provider requests started this session.
    pub fn requests(&self) -> u64 {
        self.requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{PanicPolicy, SerialExecutor};
    use crate::path_resolver::PathResolver;
    use parking_lot::Mutex;

    fn c_str(buffer: &[u8]) -> &str {
        let end = buffer.iter().position(|&b| b == 0).expect("NUL terminator");
        std::str::from_utf8(&buffer[..end]).unwrap()
    }

    #[test]
    fn test_copy_fits() {
        let mut buffer = [0xffu8; 8];
        copy_to_c_buffer("username", "bob", &mut buffer);
        assert_eq!(c_str(&buffer), "bob");
    }

    #[test]
    fn test_copy_truncates_and_terminates() {
        let mut buffer = [0xffu8; 4];
        copy_to_c_buffer("password", "secret", &mut buffer);
        assert_eq!(&buffer, b"sec\0");

        let mut exact = [0xffu8; 4];
        copy_to_c_buffer("password", "abcd", &mut exact);
        assert_eq!(&exact, b"abc\0");
    }

    #[test]
    fn test_copy_into_empty_buffer_is_noop() {
        let mut buffer: [u8; 0] = [];
        copy_to_c_buffer("workgroup", "W", &mut buffer);
    }

    #[test]
    fn test_debug_redacts_password() {
        let credential = SmbCredential::new("W", "U").with_password("hunter2");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    /// Provider that parks callbacks until the test completes them.
    #[derive(Clone, Default)]
    struct ParkedProvider(Arc<Mutex<Vec<CredentialCallback>>>);

    impl CredentialProvider for ParkedProvider {
        fn request_credentials(&mut self, done: CredentialCallback) {
            self.0.lock().push(done);
        }
    }

    fn spawn_refresher(
        provider: Box<dyn CredentialProvider>,
    ) -> (SerialExecutor<CredentialRefresher>, Arc<SharedState>) {
        let shared = Arc::new(SharedState::new(
            PathResolver::new("smb://server/share").unwrap(),
            None,
        ));
        let shared_clone = Arc::clone(&shared);
        let executor = SerialExecutor::spawn_with("test-control", PanicPolicy::Continue, |handle| {
            CredentialRefresher::new(provider, shared_clone, handle)
        })
        .unwrap();
        (executor, shared)
    }

    #[test]
    fn test_refresh_suppressed_while_in_flight() {
        let provider = ParkedProvider::default();
        let parked = Arc::clone(&provider.0);
        let (executor, shared) = spawn_refresher(Box::new(provider));

        executor.post(CredentialRefresher::request_update).unwrap();
        executor.post(CredentialRefresher::request_update).unwrap();
        let (requests, in_flight) = executor
            .run_blocking(|r| (r.requests(), r.is_in_flight()))
            .unwrap();
        assert_eq!((requests, in_flight), (1, true));
        assert_eq!(parked.lock().len(), 1);

        let done = parked.lock().pop().unwrap();
        done(Some(SmbCredential::new("W2", "U2").with_password("p2")));
        executor.flush().unwrap();

        assert!(!executor.run_blocking(|r| r.is_in_flight()).unwrap());
        let credential = shared.credentials().unwrap();
        assert_eq!(credential.username, "U2");
        assert_eq!(credential.password.as_deref().map(String::as_str), Some("p2"));

        executor.post(CredentialRefresher::request_update).unwrap();
        assert_eq!(executor.run_blocking(|r| r.requests()).unwrap(), 2);
    }

    #[test]
    fn test_declined_refresh_keeps_credentials() {
        let (executor, shared) = spawn_refresher(Box::new(NoCredentialProvider));
        shared.replace_credentials(SmbCredential::new("W", "U"));

        executor.post(CredentialRefresher::request_update).unwrap();
        executor.flush().unwrap();
        executor.flush().unwrap();

        assert!(!executor.run_blocking(|r| r.is_in_flight()).unwrap());
        assert_eq!(shared.credentials().unwrap().username, "U");
    }
}
