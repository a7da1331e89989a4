//! Handle table for open files and directories.
//!
//! The kernel refers to an open object by a 64-bit handle; the backend
//! refers to it by whatever its open call returned. This table sits between
//! the two so a stale or forged handle can only ever miss, never reach a
//! dangling backend object.
//!
//! # Handle Lifecycle
//!
//! 1. **Insert**: the table issues the next handle (starting at 1)
//! 2. **Get**: resolve the handle for read/write/readdir
//! 3. **Remove**: the object is closed and the handle retired for good

use std::collections::HashMap;

/// Map from issued handles to open objects.
///
/// Handles come from a monotonic counter; 0 is never issued and no handle is
/// issued twice.
///
/// ```
/// use smbfs_mount::HandleTable;
///
/// let mut table = HandleTable::new();
/// let a = table.insert("file1".to_string());
/// let b = table.insert("file2".to_string());
///
/// assert_eq!((a, b), (1, 2));
/// assert_eq!(table.get(a).map(String::as_str), Some("file1"));
/// assert_eq!(table.remove(a), "file1");
/// assert!(table.get(a).is_none());
/// ```
#[derive(Debug)]
pub struct HandleTable<V> {
    handles: HashMap<u64, V>,
    next_id: u64,
}

impl<V> HandleTable<V> {
    /// Creates an empty table whose first handle will be 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates an empty table whose first handle will be `first`.
    ///
    /// # Panics
    ///
    /// Panics if `first` is 0.
    pub fn starting_at(first: u64) -> Self {
        assert_ne!(first, 0, "handle 0 is reserved");
        Self {
            handles: HashMap::new(),
            next_id: first,
        }
    }

    /// Stores `value` and returns its new handle.
    ///
    /// # Panics
    ///
    /// Panics once the 64-bit handle space is exhausted.
    pub fn insert(&mut self, value: V) -> u64 {
        let id = self.next_id;
        assert_ne!(id, 0, "file handle space exhausted");
        // Wraps to 0 after u64::MAX, which the assert above turns into a panic
        // on the following insert.
        self.next_id = id.wrapping_add(1);
        self.handles.insert(id, value);
        id
    }

    /// Resolves a handle.
    pub fn get(&self, handle: u64) -> Option<&V> {
        self.handles.get(&handle)
    }

    /// Returns true if `handle` is open.
    pub fn contains(&self, handle: u64) -> bool {
        self.handles.contains_key(&handle)
    }

    /// Retires a handle and returns its object.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not open; callers look the handle up first.
    pub fn remove(&mut self, handle: u64) -> V {
        self.handles
            .remove(&handle)
            .unwrap_or_else(|| panic!("remove of unknown file handle {handle}"))
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no handles are open.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
