//! File operation tests.
//!
//! Drives lookup, open, read, write, truncate, rename and unlink through the
//! dispatcher and checks both the replies and what reached the share.
//!
//! Run: `cargo nextest run -p smbfs-fuse file_operation_tests`

mod common;

use common::*;
use nix::errno::Errno;
use smbfs_fuse::testing::{FakeOp, FakeSmbBackend, Reply, TestRequest};
use smbfs_fuse::{DEFAULT_ATTR_TIMEOUT, ROOT_INODE};
use smbfs_mount::mode;
use std::time::Duration;

fn share_with_file(path: &str, contents: &[u8]) -> TestShare {
    let backend = FakeSmbBackend::new();
    backend.add_file(path, contents);
    TestShare::with_backend(backend)
}

// =============================================================================
// Lookup and attributes
// =============================================================================

#[test]
fn test_lookup_reports_normalized_attributes() {
    let backend = FakeSmbBackend::new();
    backend.add_file("/rw.txt", b"hello");
    backend.add_readonly_file("/ro.txt", b"");
    backend.add_dir("/docs");
    let share = TestShare::with_backend(backend);

    let rw = share.lookup_path("/rw.txt");
    assert_eq!(rw.attr.mode, mode::S_IFREG | 0o660);
    assert_eq!(rw.attr.size, 5);
    assert_eq!(rw.attr_timeout, DEFAULT_ATTR_TIMEOUT);
    assert_eq!(rw.entry_timeout, DEFAULT_ATTR_TIMEOUT);

    let ro = share.lookup_path("/ro.txt");
    assert_eq!(ro.attr.mode, mode::S_IFREG | 0o440);

    let docs = share.lookup_path("/docs");
    assert_eq!(docs.attr.mode, mode::S_IFDIR | 0o770);

    for entry in [rw, ro, docs] {
        assert_normalized(&entry.attr);
    }
}

#[test]
fn test_lookup_nested_builds_share_url() {
    let share = share_with_file("/a/b/c.txt", b"x");
    let entry = share.lookup_path("/a/b/c.txt");
    assert_eq!(entry.attr.size, 1);
    assert_eq!(
        share.backend.last_url().as_deref(),
        Some("smb://fileserver/public/a/b/c.txt")
    );
    assert_eq!(share.inode_of("/a/b/c.txt"), Some(entry.inode));
}

#[test]
fn test_lookup_twice_shares_inode_until_forgotten() {
    let share = share_with_file("/a", b"");
    let first = expect_entry(share.lookup(ROOT_INODE, "a"));
    let second = expect_entry(share.lookup(ROOT_INODE, "a"));
    assert_eq!(first.inode, second.inode);
    assert_eq!(share.lookup_count(first.inode), Some(2));

    share.fs.forget(first.inode, 1);
    assert_eq!(share.lookup_count(first.inode), Some(1));
    share.fs.forget(first.inode, 1);
    assert_eq!(share.inode_of("/a"), None);

    let third = expect_entry(share.lookup(ROOT_INODE, "a"));
    assert!(third.inode > first.inode, "inode numbers must not be reused");
}

#[test]
fn test_lookup_special_file_denied_and_released() {
    let backend = FakeSmbBackend::new();
    backend.add_special("/fifo", 0o010644);
    backend.add_special("/link", mode::S_IFLNK | 0o777);
    let share = TestShare::with_backend(backend);

    assert_errno(&share.lookup(ROOT_INODE, "fifo"), Errno::EACCES);
    assert_errno(&share.lookup(ROOT_INODE, "link"), Errno::EACCES);
    assert_eq!(share.inode_of("/fifo"), None);
    assert_eq!(share.inode_of("/link"), None);
}

#[test]
fn test_lookup_missing_is_enoent() {
    let share = TestShare::new();
    assert_errno(&share.lookup(ROOT_INODE, "nope"), Errno::ENOENT);
    assert_eq!(share.inode_of("/nope"), None);
}

#[test]
fn test_getattr_root() {
    let share = TestShare::new();
    let attr = expect_attr(share.getattr(ROOT_INODE));
    assert_eq!(attr.inode, ROOT_INODE);
    assert_eq!(attr.mode, mode::S_IFDIR | 0o770);
    assert_normalized(&attr);
}

#[test]
fn test_attr_timeout_from_config() {
    let config = smbfs_fuse::SmbFsConfig::new(TEST_SHARE, TEST_UID, TEST_GID)
        .attr_timeout(Duration::from_secs(30));
    let share = TestShare::with_config(config, FakeSmbBackend::new());
    match share.getattr(ROOT_INODE) {
        Reply::Attr { timeout, .. } => assert_eq!(timeout, Duration::from_secs(30)),
        other => panic!("expected attributes, got {other:?}"),
    }
}

#[test]
fn test_interrupted_request_is_dropped() {
    let share = share_with_file("/a", b"");
    let (request, reply) = TestRequest::interrupted();
    share.fs.lookup(ROOT_INODE, "a", request);
    reply.assert_dropped();
    assert_eq!(share.backend.call_count(FakeOp::Stat), 0);
    assert_eq!(share.inode_of("/a"), None);
}

// =============================================================================
// Open, read, write, release
// =============================================================================

#[test]
fn test_write_then_read_round_trip() {
    let share = share_with_file("/notes.txt", b"");
    let inode = share.lookup_path("/notes.txt").inode;
    let handle = share.open_handle(inode, libc::O_RDWR);

    assert_eq!(share.write(inode, handle, b"hello world", 0), Reply::Written(11));
    assert_eq!(
        share.read(inode, handle, 11, 0),
        Reply::Data(b"hello world".to_vec())
    );
    assert_eq!(share.release(inode, handle), Reply::Ok);

    assert_eq!(share.backend.file_contents("/notes.txt").unwrap(), b"hello world");
    assert_eq!(share.open_handles(), 0);
    assert_eq!(share.backend.open_count(), 0);
}

#[test]
fn test_read_at_offset_and_past_end() {
    let share = share_with_file("/a", b"abcdef");
    let inode = share.lookup_path("/a").inode;
    let handle = share.open_handle(inode, libc::O_RDONLY);

    assert_eq!(share.read(inode, handle, 3, 2), Reply::Data(b"cde".to_vec()));
    assert_eq!(share.read(inode, handle, 100, 4), Reply::Data(b"ef".to_vec()));
    assert_eq!(share.read(inode, handle, 10, 100), Reply::Data(Vec::new()));
    assert_eq!(share.release(inode, handle), Reply::Ok);
}

#[test]
fn test_write_at_offset_extends_file() {
    let share = share_with_file("/a", b"abc");
    let inode = share.lookup_path("/a").inode;
    let handle = share.open_handle(inode, libc::O_WRONLY);

    assert_eq!(share.write(inode, handle, b"XY", 5), Reply::Written(2));
    assert_eq!(share.release(inode, handle), Reply::Ok);
    assert_eq!(share.backend.file_contents("/a").unwrap(), b"abc\0\0XY");
}

#[test]
fn test_seek_failure_returns_seek_errno() {
    let share = share_with_file("/a", b"abc");
    let inode = share.lookup_path("/a").inode;
    let handle = share.open_handle(inode, libc::O_RDWR);

    share.backend.fail(FakeOp::Lseek, Errno::ESPIPE);
    assert_errno(&share.read(inode, handle, 3, 0), Errno::ESPIPE);
    assert_errno(&share.write(inode, handle, b"x", 0), Errno::ESPIPE);
    assert_eq!(share.backend.call_count(FakeOp::Read), 0);
    assert_eq!(share.backend.call_count(FakeOp::Write), 0);
}

#[test]
fn test_write_to_readonly_handle_fails() {
    let share = share_with_file("/a", b"abc");
    let inode = share.lookup_path("/a").inode;
    let handle = share.open_handle(inode, libc::O_RDONLY);
    assert_errno(&share.write(inode, handle, b"x", 0), Errno::EBADF);
    assert_eq!(share.backend.file_contents("/a").unwrap(), b"abc");
}

#[test]
fn test_unknown_handle_is_ebadf() {
    let share = share_with_file("/a", b"abc");
    let inode = share.lookup_path("/a").inode;
    assert_errno(&share.read(inode, 999, 1, 0), Errno::EBADF);
    assert_errno(&share.write(inode, 999, b"x", 0), Errno::EBADF);
    assert_errno(&share.release(inode, 999), Errno::EBADF);
}

#[test]
fn test_open_root_is_eisdir() {
    let share = TestShare::new();
    assert_errno(&share.open(ROOT_INODE, libc::O_RDONLY), Errno::EISDIR);
    assert_eq!(share.backend.call_count(FakeOp::Open), 0);
}

#[test]
fn test_open_readonly_file_for_write_denied() {
    let backend = FakeSmbBackend::new();
    backend.add_readonly_file("/ro", b"data");
    let share = TestShare::with_backend(backend);
    let inode = share.lookup_path("/ro").inode;
    assert_errno(&share.open(inode, libc::O_WRONLY), Errno::EACCES);
    assert_eq!(share.open_handles(), 0);
}

#[test]
fn test_handles_are_distinct() {
    let share = share_with_file("/a", b"");
    let inode = share.lookup_path("/a").inode;
    let first = share.open_handle(inode, libc::O_RDONLY);
    let second = share.open_handle(inode, libc::O_RDONLY);
    assert_ne!(first, second);
    assert_ne!(first, 0);
    assert_eq!(share.open_handles(), 2);
    assert_eq!(share.release(inode, first), Reply::Ok);
    assert_eq!(share.release(inode, second), Reply::Ok);
}

#[test]
fn test_write_invalidates_cached_stat() {
    let share = share_with_file("/a", b"abc");
    share.list(ROOT_INODE);
    let inode = share.inode_of("/a").unwrap();
    assert!(share.is_cached(inode));

    let handle = share.open_handle(inode, libc::O_WRONLY);
    assert_eq!(share.write(inode, handle, b"abcdef", 0), Reply::Written(6));
    assert!(!share.is_cached(inode));
    assert_eq!(expect_attr(share.getattr(inode)).size, 6);
    assert_eq!(share.release(inode, handle), Reply::Ok);
}

// =============================================================================
// Create
// =============================================================================

#[test]
fn test_create_reports_requested_mode_uncached() {
    let share = TestShare::new();
    let Reply::Create { entry, handle } =
        share.create(ROOT_INODE, "new.txt", 0o644, libc::O_WRONLY)
    else {
        panic!("create failed");
    };
    assert_eq!(entry.attr.mode, mode::S_IFREG | 0o660);
    assert_eq!(entry.attr.size, 0);
    assert_eq!(entry.attr_timeout, Duration::ZERO);
    assert_eq!(entry.entry_timeout, DEFAULT_ATTR_TIMEOUT);
    assert_normalized(&entry.attr);

    assert!(share.backend.exists("/new.txt"));
    assert_eq!(share.inode_of("/new.txt"), Some(entry.inode));
    assert_eq!(share.lookup_count(entry.inode), Some(1));

    assert_eq!(share.write(entry.inode, handle, b"data", 0), Reply::Written(4));
    assert_eq!(share.release(entry.inode, handle), Reply::Ok);
    assert_eq!(share.backend.file_contents("/new.txt").unwrap(), b"data");
}

#[test]
fn test_create_exclusive_on_existing_file() {
    let share = share_with_file("/a", b"keep");
    let reply = share.create(ROOT_INODE, "a", 0o644, libc::O_WRONLY | libc::O_EXCL);
    assert_errno(&reply, Errno::EEXIST);
    assert_eq!(share.inode_of("/a"), None);
    assert_eq!(share.backend.file_contents("/a").unwrap(), b"keep");
}

#[test]
fn test_create_with_truncate_empties_file() {
    let share = share_with_file("/a", b"old contents");
    let Reply::Create { entry, handle } =
        share.create(ROOT_INODE, "a", 0o600, libc::O_WRONLY | libc::O_TRUNC)
    else {
        panic!("create failed");
    };
    assert_eq!(share.release(entry.inode, handle), Reply::Ok);
    assert_eq!(share.backend.file_contents("/a").unwrap(), b"");
}

// =============================================================================
// Truncate (setattr)
// =============================================================================

#[test]
fn test_truncate_without_handle() {
    let share = share_with_file("/a", b"hello world");
    let inode = share.lookup_path("/a").inode;

    let attr = expect_attr(share.truncate(inode, None, 5));
    assert_eq!(attr.size, 5);
    assert_normalized(&attr);
    assert_eq!(share.backend.file_contents("/a").unwrap(), b"hello");
    assert_eq!(share.backend.open_count(), 0);
}

#[test]
fn test_truncate_through_open_handle() {
    let share = share_with_file("/a", b"hello world");
    let inode = share.lookup_path("/a").inode;
    let handle = share.open_handle(inode, libc::O_RDWR);
    let opens = share.backend.call_count(FakeOp::Open);

    let attr = expect_attr(share.truncate(inode, Some(handle), 20));
    assert_eq!(attr.size, 20);
    assert_eq!(share.backend.call_count(FakeOp::Open), opens);
    assert_eq!(share.backend.file_contents("/a").unwrap().len(), 20);
    assert_eq!(share.release(inode, handle), Reply::Ok);
}

#[test]
fn test_truncate_readonly_handle_is_einval() {
    let share = share_with_file("/a", b"hello");
    let inode = share.lookup_path("/a").inode;
    let handle = share.open_handle(inode, libc::O_RDONLY);
    assert_errno(&share.truncate(inode, Some(handle), 1), Errno::EINVAL);
    assert_errno(&share.truncate(inode, Some(999), 1), Errno::EBADF);
    assert_eq!(share.backend.file_contents("/a").unwrap(), b"hello");
}

#[test]
fn test_truncate_then_getattr_misses_cache() {
    let share = share_with_file("/a", b"hello world");
    share.list(ROOT_INODE);
    let inode = share.inode_of("/a").unwrap();
    assert!(share.is_cached(inode));

    expect_attr(share.truncate(inode, None, 3));
    assert!(!share.is_cached(inode));

    let stats_before = share.backend.call_count(FakeOp::Stat);
    let attr = expect_attr(share.getattr(inode));
    assert_eq!(attr.size, 3);
    assert_eq!(share.backend.call_count(FakeOp::Stat), stats_before + 1);
}

#[test]
fn test_setattr_other_than_size_unsupported() {
    use smbfs_fuse::request::set_attr;

    let share = share_with_file("/a", b"");
    let inode = share.lookup_path("/a").inode;
    for to_set in [
        set_attr::MODE,
        set_attr::UID | set_attr::GID,
        set_attr::SIZE | set_attr::MTIME,
        set_attr::ATIME_NOW,
    ] {
        assert_errno(&share.setattr(inode, to_set), Errno::ENOTSUP);
    }
    assert_errno(&share.setattr(inode, 0), Errno::EINVAL);
}

#[test]
fn test_truncate_directory_is_eisdir() {
    let backend = FakeSmbBackend::new();
    backend.add_dir("/d");
    let share = TestShare::with_backend(backend);
    let inode = share.lookup_path("/d").inode;
    assert_errno(&share.truncate(inode, None, 0), Errno::EISDIR);
}

// =============================================================================
// Rename and unlink
// =============================================================================

#[test]
fn test_rename_moves_file_and_drops_cache() {
    let share = share_with_file("/a", b"x");
    share.list(ROOT_INODE);
    let old = share.inode_of("/a").unwrap();
    assert!(share.is_cached(old));

    assert_eq!(share.rename(ROOT_INODE, "a", ROOT_INODE, "b"), Reply::Ok);
    assert!(!share.is_cached(old));
    assert!(!share.backend.exists("/a"));
    assert_eq!(share.backend.file_contents("/b").unwrap(), b"x");

    // The old inode keeps its path until the kernel forgets it.
    assert_eq!(share.inode_of("/a"), Some(old));
    let new = expect_entry(share.lookup(ROOT_INODE, "b"));
    assert_ne!(new.inode, old);
}

#[test]
fn test_rename_across_directories() {
    let backend = FakeSmbBackend::new();
    backend.add_file("/src/f", b"1");
    backend.add_dir("/dst");
    let share = TestShare::with_backend(backend);
    let src = share.lookup_path("/src").inode;
    let dst = share.lookup_path("/dst").inode;

    assert_eq!(share.rename(src, "f", dst, "g"), Reply::Ok);
    assert_eq!(share.backend.file_contents("/dst/g").unwrap(), b"1");
    assert_errno(&share.rename(src, "f", dst, "g"), Errno::ENOENT);
}

#[test]
fn test_unlink() {
    let share = share_with_file("/a", b"x");
    let inode = share.lookup_path("/a").inode;

    assert_eq!(share.unlink(ROOT_INODE, "a"), Reply::Ok);
    assert!(!share.backend.exists("/a"));
    assert_errno(&share.getattr(inode), Errno::ENOENT);
    assert_errno(&share.unlink(ROOT_INODE, "a"), Errno::ENOENT);
}

#[test]
fn test_unlink_directory_is_eisdir() {
    let backend = FakeSmbBackend::new();
    backend.add_dir("/d");
    let share = TestShare::with_backend(backend);
    assert_errno(&share.unlink(ROOT_INODE, "d"), Errno::EISDIR);
    assert!(share.backend.exists("/d"));
}

// =============================================================================
// Statfs
// =============================================================================

#[test]
fn test_statfs() {
    let share = TestShare::new();
    let Reply::StatFs(stats) = share.statfs() else {
        panic!("statfs failed");
    };
    assert_eq!(stats.blocks, 1000);
    assert_eq!(stats.fragment_size, 4096);
}

#[test]
fn test_statfs_error() {
    let share = TestShare::new();
    share.backend.fail(FakeOp::Statvfs, Errno::EIO);
    assert_errno(&share.statfs(), Errno::EIO);
}
