//! Recording request objects.
//!
//! A [`TestRequest`] implements every request trait and forwards whatever
//! reply it receives to a [`ReplyReceiver`]. Because replies consume the
//! boxed request, the channel disconnects right after the first reply; the
//! receiver checks that, which proves no second reply was sent.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use nix::errno::Errno;
use smbfs_mount::StatSnapshot;

use crate::backend::FsStats;
use crate::request::{
    AttrRequest, BufRequest, CreateRequest, DirEntryRequest, EntryParam, EntryRequest,
    FsRequest, OpenRequest, SimpleRequest, StatFsRequest, WriteRequest,
};

/// How long [`ReplyReceiver::wait`] waits for the worker.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// One `readdir` entry as offered to the reply buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListEntry {
    /// Entry name.
    pub name: String,
    /// Inode.
    pub inode: u64,
    /// Type and permission bits.
    pub mode: u32,
    /// Cookie for resuming after this entry.
    pub next_offset: i64,
}

/// A reply as the kernel would have received it.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// An error.
    Error(Errno),
    /// `statfs` statistics.
    StatFs(FsStats),
    /// A directory entry.
    Entry(EntryParam),
    /// Attributes.
    Attr {
        /// The attributes.
        attr: StatSnapshot,
        /// Attribute timeout.
        timeout: Duration,
    },
    /// An open handle.
    Open(u64),
    /// A created entry and its handle.
    Create {
        /// The entry.
        entry: EntryParam,
        /// The open handle.
        handle: u64,
    },
    /// Read data.
    Data(Vec<u8>),
    /// Bytes written.
    Written(usize),
    /// Success.
    Ok,
    /// A directory listing.
    Dir(Vec<DirListEntry>),
}

impl Reply {
    /// The errno of an error reply.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Reply::Error(errno) => Some(*errno),
            _ => None,
        }
    }
}

/// A request that records its reply.
#[derive(Debug)]
pub struct TestRequest {
    interrupted: bool,
    capacity: Option<usize>,
    entries: Vec<DirListEntry>,
    sender: Sender<Reply>,
}

/// Receiving end for a [`TestRequest`]'s reply.
#[derive(Debug)]
pub struct ReplyReceiver {
    receiver: Receiver<Reply>,
}

impl TestRequest {
    fn build(interrupted: bool, capacity: Option<usize>) -> (Box<Self>, ReplyReceiver) {
        let (sender, receiver) = unbounded();
        let request = Box::new(Self {
            interrupted,
            capacity,
            entries: Vec::new(),
            sender,
        });
        (request, ReplyReceiver { receiver })
    }

    /// A live request.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Box<Self>, ReplyReceiver) {
        Self::build(false, None)
    }

    /// A request the kernel has already given up on.
    pub fn interrupted() -> (Box<Self>, ReplyReceiver) {
        Self::build(true, None)
    }

    /// A `readdir` request whose buffer holds at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> (Box<Self>, ReplyReceiver) {
        Self::build(false, Some(capacity))
    }

    fn send(self: Box<Self>, reply: Reply) {
        // The receiver may have been dropped by a test that does not care.
        let _ = self.sender.send(reply);
    }
}

impl ReplyReceiver {
    /// Waits for the reply and checks that it was the only one.
    ///
    /// # Panics
    ///
    /// Panics if no reply arrives within [`REPLY_TIMEOUT`], or if the
    /// request is still alive afterwards.
    pub fn wait(&self) -> Reply {
        let reply = match self.receiver.recv_timeout(REPLY_TIMEOUT) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => panic!("no reply within {REPLY_TIMEOUT:?}"),
            Err(RecvTimeoutError::Disconnected) => panic!("request dropped without a reply"),
        };
        match self.receiver.recv_timeout(REPLY_TIMEOUT) {
            Err(RecvTimeoutError::Disconnected) => reply,
            Ok(second) => panic!("second reply {second:?} after {reply:?}"),
            Err(RecvTimeoutError::Timeout) => panic!("request still alive after {reply:?}"),
        }
    }

    /// Waits for an error reply and returns its errno.
    ///
    /// # Panics
    ///
    /// Panics on a success reply.
    pub fn wait_error(&self) -> Errno {
        match self.wait() {
            Reply::Error(errno) => errno,
            other => panic!("expected an error reply, got {other:?}"),
        }
    }

    /// Checks that the request was dropped without any reply.
    ///
    /// # Panics
    ///
    /// Panics if a reply was sent or the request is still alive.
    pub fn assert_dropped(&self) {
        match self.receiver.recv_timeout(REPLY_TIMEOUT) {
            Err(RecvTimeoutError::Disconnected) => {}
            Ok(reply) => panic!("expected no reply, got {reply:?}"),
            Err(RecvTimeoutError::Timeout) => panic!("request still alive"),
        }
    }
}

impl FsRequest for TestRequest {
    fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    fn reply_error(self: Box<Self>, errno: Errno) {
        self.send(Reply::Error(errno));
    }
}

impl StatFsRequest for TestRequest {
    fn reply_statfs(self: Box<Self>, stats: FsStats) {
        self.send(Reply::StatFs(stats));
    }
}

impl EntryRequest for TestRequest {
    fn reply_entry(self: Box<Self>, entry: EntryParam) {
        self.send(Reply::Entry(entry));
    }
}

impl AttrRequest for TestRequest {
    fn reply_attr(self: Box<Self>, attr: StatSnapshot, timeout: Duration) {
        self.send(Reply::Attr { attr, timeout });
    }
}

impl OpenRequest for TestRequest {
    fn reply_open(self: Box<Self>, handle: u64) {
        self.send(Reply::Open(handle));
    }
}

impl CreateRequest for TestRequest {
    fn reply_create(self: Box<Self>, entry: EntryParam, handle: u64) {
        self.send(Reply::Create { entry, handle });
    }
}

impl BufRequest for TestRequest {
    fn reply_buf(self: Box<Self>, data: &[u8]) {
        self.send(Reply::Data(data.to_vec()));
    }
}

impl WriteRequest for TestRequest {
    fn reply_write(self: Box<Self>, written: usize) {
        self.send(Reply::Written(written));
    }
}

impl SimpleRequest for TestRequest {
    fn reply_ok(self: Box<Self>) {
        self.send(Reply::Ok);
    }
}

impl DirEntryRequest for TestRequest {
    fn add_entry(&mut self, name: &str, inode: u64, mode: u32, next_offset: i64) -> bool {
        if self.capacity.is_some_and(|capacity| self.entries.len() >= capacity) {
            return false;
        }
        self.entries.push(DirListEntry {
            name: name.to_string(),
            inode,
            mode,
            next_offset,
        });
        true
    }

    fn reply_done(mut self: Box<Self>) {
        let entries = std::mem::take(&mut self.entries);
        self.send(Reply::Dir(entries));
    }
}
