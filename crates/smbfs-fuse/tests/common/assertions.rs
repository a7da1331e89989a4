//! Assertions on replies and attributes.

#![allow(dead_code)]

use nix::errno::Errno;
use smbfs_fuse::testing::Reply;
use smbfs_mount::{StatSnapshot, mode};

use super::harness::{TEST_GID, TEST_UID};

/// Asserts that `reply` is an error with `errno`.
#[track_caller]
pub fn assert_errno(reply: &Reply, errno: Errno) {
    assert_eq!(reply.errno(), Some(errno), "unexpected reply {reply:?}");
}

/// Asserts the permission policy every reported stat must satisfy.
#[track_caller]
pub fn assert_normalized(attr: &StatSnapshot) {
    let user = (attr.mode & mode::S_IRWXU) >> 6;
    let group = (attr.mode & mode::S_IRWXG) >> 3;
    assert_eq!(attr.mode & mode::S_IRWXO, 0, "other bits set in {:o}", attr.mode);
    assert_eq!(user, group, "group bits differ from user bits in {:o}", attr.mode);
    if mode::is_dir(attr.mode) {
        assert_ne!(attr.mode & mode::S_IXUSR, 0, "directory not searchable");
    } else {
        assert!(mode::is_reg(attr.mode), "unexpected type in {:o}", attr.mode);
        assert_eq!(attr.mode & mode::S_IXUSR, 0, "file is executable");
    }
    assert_eq!((attr.uid, attr.gid, attr.nlink), (TEST_UID, TEST_GID, 1));
}

/// Unwraps an attribute reply.
#[track_caller]
pub fn expect_attr(reply: Reply) -> StatSnapshot {
    match reply {
        Reply::Attr { attr, .. } => attr,
        other => panic!("expected attributes, got {other:?}"),
    }
}
