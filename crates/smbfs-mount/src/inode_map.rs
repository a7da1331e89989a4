//! Inode management for the SMB filesystem.
//!
//! Maps kernel-visible inode numbers to share paths and back. Every inode
//! carries the kernel's lookup count: each `ReplyEntry` (lookup, create,
//! mkdir, readdir entry) adds one, and `forget()` subtracts whatever the
//! kernel says it dropped. An inode disappears only when the count reaches
//! zero, and its number is never handed out again.

use std::collections::HashMap;

use tracing::trace;

use crate::path::SharePath;

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// An entry in the inode map.
#[derive(Debug)]
struct InodeEntry {
    path: SharePath,
    /// Lookup count for proper `forget()` handling.
    nlookup: u64,
}

/// Bidirectional inode <-> path map with lookup counting.
///
/// The root is pre-allocated at [`ROOT_INODE`] and is never counted or
/// evicted.
#[derive(Debug)]
pub struct InodeMap {
    path_to_inode: HashMap<SharePath, u64>,
    inode_to_entry: HashMap<u64, InodeEntry>,
    next_inode: u64,
}

impl InodeMap {
    /// Creates a map holding only the root.
    pub fn new() -> Self {
        let mut path_to_inode = HashMap::new();
        let mut inode_to_entry = HashMap::new();
        path_to_inode.insert(SharePath::root(), ROOT_INODE);
        inode_to_entry.insert(
            ROOT_INODE,
            InodeEntry {
                path: SharePath::root(),
                nlookup: 0,
            },
        );
        Self {
            path_to_inode,
            inode_to_entry,
            next_inode: ROOT_INODE + 1,
        }
    }

    /// Takes a reference on `path`, allocating an inode if it has none.
    ///
    /// Returns the same inode for the same path for as long as the inode is
    /// live.
    pub fn inc_ref(&mut self, path: &SharePath) -> u64 {
        if let Some(&inode) = self.path_to_inode.get(path) {
            if inode != ROOT_INODE
                && let Some(entry) = self.inode_to_entry.get_mut(&inode)
            {
                entry.nlookup += 1;
            }
            return inode;
        }

        let inode = self.next_inode;
        self.next_inode = inode
            .checked_add(1)
            .unwrap_or_else(|| panic!("inode numbers exhausted"));
        self.path_to_inode.insert(path.clone(), inode);
        self.inode_to_entry.insert(
            inode,
            InodeEntry {
                path: path.clone(),
                nlookup: 1,
            },
        );
        trace!(inode, path = %path, "allocated inode");
        inode
    }

    /// Drops `count` references from `inode`.
    ///
    /// Returns true if the inode reached zero and was removed. Forgetting the
    /// root is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `inode` is not live, or if `count` exceeds its lookup
    /// count. Either means the kernel and this map disagree about what was
    /// handed out.
    pub fn forget(&mut self, inode: u64, count: u64) -> bool {
        if inode == ROOT_INODE {
            return false;
        }

        let Some(entry) = self.inode_to_entry.get_mut(&inode) else {
            panic!("forget on unknown inode {inode}");
        };
        entry.nlookup = entry
            .nlookup
            .checked_sub(count)
            .unwrap_or_else(|| panic!("forget({count}) exceeds lookup count of inode {inode}"));
        if entry.nlookup > 0 {
            return false;
        }

        if let Some(entry) = self.inode_to_entry.remove(&inode) {
            self.path_to_inode.remove(&entry.path);
            trace!(inode, path = %entry.path, "evicted inode");
        }
        true
    }

    /// Looks up the path of a live inode.
    pub fn path(&self, inode: u64) -> Option<&SharePath> {
        self.inode_to_entry.get(&inode).map(|entry| &entry.path)
    }

    /// Looks up the inode currently assigned to `path`, without taking a
    /// reference.
    pub fn inode(&self, path: &SharePath) -> Option<u64> {
        self.path_to_inode.get(path).copied()
    }

    /// Current lookup count of a live inode. The root reports `u64::MAX`.
    pub fn lookup_count(&self, inode: u64) -> Option<u64> {
        if inode == ROOT_INODE {
            return Some(u64::MAX);
        }
        self.inode_to_entry.get(&inode).map(|entry| entry.nlookup)
    }

    /// Number of live inodes, including the root.
    pub fn len(&self) -> usize {
        self.inode_to_entry.len()
    }

    /// Returns true if only the root is live.
    pub fn is_empty(&self) -> bool {
        self.inode_to_entry.len() <= 1
    }
}

impl Default for InodeMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn path(name: &str) -> SharePath {
        SharePath::root().join(name)
    }

    #[test]
    fn test_root_inode_exists() {
        let map = InodeMap::new();
        assert_eq!(map.path(ROOT_INODE), Some(&SharePath::root()));
        assert_eq!(map.inode(&SharePath::root()), Some(ROOT_INODE));
        assert!(map.is_empty());
    }

    #[test]
    fn test_inc_ref_is_stable_per_path() {
        let mut map = InodeMap::new();
        let a = map.inc_ref(&path("a"));
        let again = map.inc_ref(&path("a"));
        let b = map.inc_ref(&path("b"));

        assert!(a > ROOT_INODE);
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(map.lookup_count(a), Some(2));
        assert_eq!(map.path(a), Some(&path("a")));
    }

    #[test]
    fn test_inc_ref_root_returns_root() {
        let mut map = InodeMap::new();
        assert_eq!(map.inc_ref(&SharePath::root()), ROOT_INODE);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_forget_evicts_at_zero() {
        let mut map = InodeMap::new();
        let ino = map.inc_ref(&path("tmp"));
        map.inc_ref(&path("tmp"));

        assert!(!map.forget(ino, 1));
        assert_eq!(map.path(ino), Some(&path("tmp")));
        assert!(map.forget(ino, 1));
        assert_eq!(map.path(ino), None);
        assert_eq!(map.inode(&path("tmp")), None);
    }

    #[test]
    fn test_inode_numbers_not_reused() {
        let mut map = InodeMap::new();
        let first = map.inc_ref(&path("x"));
        assert!(map.forget(first, 1));
        let second = map.inc_ref(&path("x"));
        assert!(second > first);
    }

    #[test]
    fn test_forget_root_never_evicts() {
        let mut map = InodeMap::new();
        assert!(!map.forget(ROOT_INODE, 1000));
        assert!(map.path(ROOT_INODE).is_some());
    }

    #[test]
    #[should_panic(expected = "forget on unknown inode")]
    fn test_forget_unknown_panics() {
        let mut map = InodeMap::new();
        map.forget(42, 1);
    }

    #[test]
    #[should_panic(expected = "exceeds lookup count")]
    fn test_forget_more_than_counted_panics() {
        let mut map = InodeMap::new();
        let ino = map.inc_ref(&path("a"));
        map.forget(ino, 2);
    }

    proptest! {
        /// Interleaved references and forgets: an inode is removed exactly
        /// when its net count reaches zero, and its path resolves until then.
        #[test]
        fn prop_removed_only_at_zero(ops in prop::collection::vec((0usize..4, 1u64..4, any::<bool>()), 1..64)) {
            let names = ["a", "b", "c", "d"];
            let mut map = InodeMap::new();
            let mut model: HashMap<usize, (u64, u64)> = HashMap::new();

            for (idx, n, is_ref) in ops {
                let p = path(names[idx]);
                if is_ref {
                    for _ in 0..n {
                        let ino = map.inc_ref(&p);
                        let slot = model.entry(idx).or_insert((ino, 0));
                        prop_assert_eq!(slot.0, ino);
                        slot.1 += 1;
                    }
                    let ino = model[&idx].0;
                    prop_assert_eq!(map.path(ino), Some(&p));
                } else if let Some(&(ino, count)) = model.get(&idx) {
                    let n = n.min(count);
                    let removed = map.forget(ino, n);
                    prop_assert_eq!(removed, n == count);
                    if removed {
                        model.remove(&idx);
                        prop_assert_eq!(map.path(ino), None);
                    } else {
                        model.insert(idx, (ino, count - n));
                        prop_assert_eq!(map.path(ino), Some(&p));
                    }
                }
            }
            prop_assert_eq!(map.len(), model.len() + 1);
        }

        #[test]
        fn prop_path_of_inc_ref_round_trips(name in "[a-zA-Z0-9 ._-]{1,32}") {
            let mut map = InodeMap::new();
            let p = path(&name);
            let ino = map.inc_ref(&p);
            prop_assert_eq!(map.path(ino), Some(&p));
        }
    }
}
