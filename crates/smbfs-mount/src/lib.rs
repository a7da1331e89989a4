//! Session-scoped tables for the smbfs FUSE daemon.
//!
//! The backend worker in `smbfs-fuse` owns one instance of each table and is
//! the only thread that touches them, so none of these types synchronize
//! internally.
//!
//! - [`InodeMap`]: inode number <-> [`SharePath`] with kernel lookup counts
//! - [`StatCache`]: bounded, expiring LRU of [`StatSnapshot`]s
//! - [`HandleTable`]: opaque 64-bit handles for backend open objects

#![warn(missing_docs)]

pub mod handle_table;
pub mod inode_map;
pub mod path;
pub mod stat;
pub mod stat_cache;

pub use handle_table::HandleTable;
pub use inode_map::{InodeMap, ROOT_INODE};
pub use path::SharePath;
pub use stat::{StatSnapshot, mode};
pub use stat_cache::{DEFAULT_STAT_CACHE_CAPACITY, DEFAULT_STAT_TTL, StatCache};
