//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). Sends
//! never block the caller on the in-process backend; receives come in two
//! flavours: a waitable handle bound to one peer ([`Communicator::irecv`]) and
//! a non-blocking poll over every peer ([`Communicator::try_recv_any`]), which
//! is what the asynchronous clustering loop multiplexes on.
//!
//! Every backend carries its process-group shape (`rank`, `size`) and supports
//! duplication, so an algorithm can isolate its traffic on a private context.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Non-blocking communication interface.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of the calling process inside this group.
    fn rank(&self) -> usize;
    /// Number of processes in this group.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// Pops the next message carrying `tag` from any peer, if one has arrived.
    fn try_recv_any(&self, tag: u16) -> Option<(usize, Vec<u8>)>;

    /// Collective: creates a congruent group with a private message context.
    fn duplicate(&self) -> Self
    where
        Self: Sized;

    /// True when both handles describe the same processes in the same order.
    fn is_congruent(&self, other: &Self) -> bool
    where
        Self: Sized;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Message tag newtype so protocol tags are not confused with payload values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `k` slots after this one.
    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

/// Tags reserved by this crate.
pub mod tags {
    use super::CommTag;

    /// Dendrogram node traffic of the clustering protocol.
    pub const CLUSTER: CommTag = CommTag::new(0xB000);
    /// Abort notices raised by a failing clustering rank.
    pub const CLUSTER_ABORT: CommTag = CommTag::new(0xB001);
    /// Gathers issued by the clustering post-passes.
    pub const CLUSTER_GATHER: CommTag = CommTag::new(0xB002);
    /// Timing barriers.
    pub const BARRIER: CommTag = CommTag::new(0xB003);
    /// Load-balance handshake and gathers.
    pub const BALANCE: CommTag = CommTag::new(0xD000);
    /// Load reporting gathers.
    pub const REPORT: CommTag = CommTag::new(0xD001);
}

/// Compile-time no-op comm for pure serial code paths: one rank, nothing sent.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16) {}
    fn try_recv_any(&self, _tag: u16) -> Option<(usize, Vec<u8>)> {
        None
    }
    fn duplicate(&self) -> Self {
        NoComm
    }
    fn is_congruent(&self, _other: &Self) -> bool {
        true
    }
}

// --- ThreadComm: one OS thread per rank inside a single process ---
type Key = (u32, usize, usize, u16); // (context, src, dst, tag)

#[derive(Default)]
struct Mailbox {
    queues: DashMap<Key, VecDeque<Bytes>>,
    /// (parent context, duplicate ordinal) -> context
    contexts: DashMap<(u32, u32), u32>,
    next_context: AtomicU32,
}

impl Mailbox {
    fn push(&self, key: Key, data: Bytes) {
        self.queues.entry(key).or_default().push_back(data);
    }

    fn pop(&self, key: &Key) -> Option<Bytes> {
        self.queues.get_mut(key).and_then(|mut q| q.pop_front())
    }
}

/// In-process communicator: every rank of a "world" is a thread sharing one
/// mailbox. Messages between a pair of ranks on one tag are FIFO.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    context: u32,
    dups: AtomicU32,
    cursor: AtomicUsize,
    mailbox: Arc<Mailbox>,
}

impl ThreadComm {
    /// Creates a world of `size` ranks; hand one communicator to each thread.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "a world needs at least one rank");
        let mailbox = Arc::new(Mailbox {
            next_context: AtomicU32::new(1),
            ..Default::default()
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                context: 0,
                dups: AtomicU32::new(0),
                cursor: AtomicUsize::new(0),
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Context id of this handle (0 for the world itself).
    pub fn context(&self) -> u32 {
        self.context
    }
}

impl Clone for ThreadComm {
    fn clone(&self) -> Self {
        ThreadComm {
            rank: self.rank,
            size: self.size,
            context: self.context,
            dups: AtomicU32::new(self.dups.load(Ordering::Relaxed)),
            cursor: AtomicUsize::new(0),
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("context", &self.context)
            .finish()
    }
}

/// Receive handle of [`ThreadComm`]; `wait` spins until the message lands.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(bytes) = self.mailbox.pop(&self.key) {
                return Some(bytes.to_vec());
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        debug_assert!(peer < self.size, "peer {peer} outside world of {}", self.size);
        let key = (self.context, self.rank, peer, tag);
        self.mailbox.push(key, Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16) -> LocalHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (self.context, peer, self.rank, tag),
        }
    }

    fn try_recv_any(&self, tag: u16) -> Option<(usize, Vec<u8>)> {
        // rotate the starting peer so one chatty rank cannot starve the rest
        let start = self.cursor.load(Ordering::Relaxed);
        for i in 0..self.size {
            let src = (start + i) % self.size;
            if let Some(bytes) = self.mailbox.pop(&(self.context, src, self.rank, tag)) {
                self.cursor.store(src + 1, Ordering::Relaxed);
                return Some((src, bytes.to_vec()));
            }
        }
        None
    }

    fn duplicate(&self) -> Self {
        let ordinal = self.dups.fetch_add(1, Ordering::Relaxed);
        let context = *self
            .mailbox
            .contexts
            .entry((self.context, ordinal))
            .or_insert_with(|| self.mailbox.next_context.fetch_add(1, Ordering::Relaxed));
        ThreadComm {
            rank: self.rank,
            size: self.size,
            context,
            dups: AtomicU32::new(0),
            cursor: AtomicUsize::new(0),
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    fn is_congruent(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.mailbox, &other.mailbox)
            && self.rank == other.rank
            && self.size == other.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::point_to_point::{Destination, Source};
    use mpi::request::{Request, StaticScope};
    use mpi::topology::{Communicator as MpiCommunicator, CommunicatorRelation, SimpleCommunicator};
    use std::sync::Arc;

    /// Communicator over an MPI group. Sends are immediate; receives match
    /// when their handle is waited on.
    pub struct MpiComm {
        comm: Arc<SimpleCommunicator>,
        rank: usize,
        size: usize,
    }

    // SAFETY: the handle is used by the single thread of control that owns the
    // MPI process; it is never shared between threads concurrently.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new(comm: SimpleCommunicator) -> Self {
            let rank = comm.rank() as usize;
            let size = comm.size() as usize;
            Self {
                comm: Arc::new(comm),
                rank,
                size,
            }
        }
    }

    pub struct MpiHandle {
        comm: Arc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
    }

    // SAFETY: see `MpiComm`.
    unsafe impl Send for MpiHandle {}

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self
                .comm
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Some(data)
        }
    }

    /// An immediate send. Owns a copy of the payload until MPI is done
    /// reading it; dropping the handle waits for completion.
    pub struct MpiSendHandle {
        request: Option<Request<'static, [u8]>>,
        _payload: Box<[u8]>,
    }

    // SAFETY: see `MpiComm`.
    unsafe impl Send for MpiSendHandle {}

    impl MpiSendHandle {
        fn complete(&mut self) {
            if let Some(request) = self.request.take() {
                request.wait();
            }
        }
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            self.complete();
            None
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            self.complete();
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let payload: Box<[u8]> = buf.into();
            // SAFETY: the heap block behind `payload` does not move with the
            // box and is freed only after `complete` has waited on the request.
            let data: &'static [u8] = unsafe { &*(payload.as_ref() as *const [u8]) };
            let request = self.comm.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                data,
                i32::from(tag),
            );
            MpiSendHandle {
                request: Some(request),
                _payload: payload,
            }
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiHandle {
            MpiHandle {
                comm: Arc::clone(&self.comm),
                peer: peer as i32,
                tag: i32::from(tag),
            }
        }

        fn try_recv_any(&self, tag: u16) -> Option<(usize, Vec<u8>)> {
            let (msg, status) = self
                .comm
                .any_process()
                .immediate_matched_probe_with_tag(i32::from(tag))?;
            let (data, _) = msg.matched_receive_vec::<u8>();
            Some((status.source_rank() as usize, data))
        }

        fn duplicate(&self) -> Self {
            MpiComm::new(self.comm.duplicate())
        }

        fn is_congruent(&self, other: &Self) -> bool {
            matches!(
                self.comm.compare(&*other.comm),
                CommunicatorRelation::Identical | CommunicatorRelation::Congruent
            )
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiSendHandle};
