//! A credential provider driven by the test.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::credentials::{CredentialCallback, CredentialProvider, SmbCredential};

/// Parks every credential request until the test answers it with
/// [`complete`](Self::complete).
#[derive(Clone, Default)]
pub struct FakeCredentialProvider {
    pending: Arc<Mutex<VecDeque<CredentialCallback>>>,
    requests: Arc<AtomicUsize>,
}

impl FakeCredentialProvider {
    /// Creates a provider with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of requests not yet completed.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Answers the oldest pending request. Returns false if none was
    /// pending.
    pub fn complete(&self, credential: Option<SmbCredential>) -> bool {
        let Some(done) = self.pending.lock().pop_front() else {
            return false;
        };
        done(credential);
        true
    }
}

impl std::fmt::Debug for FakeCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeCredentialProvider")
            .field("requests", &self.requests())
            .field("pending", &self.pending())
            .finish()
    }
}

impl CredentialProvider for FakeCredentialProvider {
    fn request_credentials(&mut self, done: CredentialCallback) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push_back(done);
    }
}
