//! Test doubles for driving the filesystem without a server or a kernel.
//!
//! - [`FakeSmbBackend`]: an in-memory share implementing the backend trait
//! - [`TestRequest`]: a request that records the single reply it receives
//! - [`FakeCredentialProvider`]: a provider the test answers by hand
//!
//! # Usage
//!
//! ```ignore
//! use smbfs_fuse::testing::{FakeSmbBackend, TestRequest, Reply};
//!
//! let backend = FakeSmbBackend::new();
//! backend.add_file("/notes.txt", b"hello");
//! // ... build an SmbFilesystem around backend.clone() ...
//! let (request, reply) = TestRequest::new();
//! fs.lookup(ROOT_INODE, "notes.txt", request);
//! assert!(matches!(reply.wait(), Reply::Entry(_)));
//! ```

pub mod backend;
pub mod credentials;
pub mod request;

pub use backend::{AUTH_BUFFER_LEN, AuthRecord, FakeOp, FakeSmbBackend, fake_mtime};
pub use credentials::FakeCredentialProvider;
pub use request::{DirListEntry, REPLY_TIMEOUT, Reply, ReplyReceiver, TestRequest};
