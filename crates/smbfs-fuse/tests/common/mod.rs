//! Common utilities for filesystem integration tests.
//!
//! Every test drives a real [`SmbFilesystem`](smbfs_fuse::SmbFilesystem),
//! with its worker and control threads, against the in-memory backend.

pub mod assertions;
pub mod harness;

pub use assertions::*;
pub use harness::{TEST_GID, TEST_SHARE, TEST_UID, TestShare, expect_entry, share_path};
