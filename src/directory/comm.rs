//! Thin façade over the transport consumed by the replication directory.
//!
//! Messages are contiguous byte slices; all handles are waitable but
//! non-blocking. The protocol code calls `.wait()` before trusting a buffer.
//! A real inter-process transport is out of scope; [`LocalComm`] provides an
//! in-process mailbox backend so every collective phase is exercisable with
//! one thread per rank.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// This rank's index within the fixed set of cooperating ranks.
    fn rank(&self) -> usize;
    /// Number of cooperating ranks.
    fn size(&self) -> usize;
    /// True for the serial stub; collective phases short-circuit on it.
    fn is_no_comm(&self) -> bool {
        false
    }
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

/// Compile-time no-op comm for pure serial unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- LocalComm: in-process mailbox, one thread per rank ---

/// (world, src, dst, tag)
type Key = (u64, usize, usize, u16);

struct Slot {
    queue: Mutex<VecDeque<Bytes>>,
    ready: Condvar,
}

static MAILBOX: Lazy<DashMap<Key, Arc<Slot>>> = Lazy::new(DashMap::new);
static WORLD_COUNTER: AtomicU64 = AtomicU64::new(1);

fn slot(key: Key) -> Arc<Slot> {
    MAILBOX
        .entry(key)
        .or_insert_with(|| {
            Arc::new(Slot {
                queue: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
            })
        })
        .clone()
}

/// Receive handle: blocks in `wait` until the matching message arrives.
pub struct LocalRecvHandle {
    slot: Arc<Slot>,
    len: usize,
}

impl Wait for LocalRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let mut queue = self.slot.queue.lock();
        while queue.is_empty() {
            self.slot.ready.wait(&mut queue);
        }
        let bytes = queue.pop_front().expect("non-empty queue");
        let n = self.len.min(bytes.len());
        Some(bytes[..n].to_vec())
    }
}

/// In-process mailbox transport. Ranks of one "world" share a message space;
/// each [`spawn_ranks`] call gets a fresh world so stale messages from a
/// previous phase or test can never be mis-delivered.
#[derive(Clone, Debug)]
pub struct LocalComm {
    world: u64,
    rank: usize,
    size: usize,
}

impl LocalComm {
    pub fn new(world: u64, rank: usize, size: usize) -> Self {
        Self { world, rank, size }
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecvHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let s = slot((self.world, self.rank, peer, tag));
        let mut queue = s.queue.lock();
        queue.push_back(Bytes::from(buf.to_vec()));
        s.ready.notify_all();
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> LocalRecvHandle {
        LocalRecvHandle {
            slot: slot((self.world, peer, self.rank, tag)),
            len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
}

/// Run `f` once per rank on `n` threads sharing a fresh mailbox world.
///
/// Panics in any rank propagate (a rank detecting a fatal condition aborts the
/// collective step for everyone). Returns the per-rank results in rank order.
pub fn spawn_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(LocalComm) -> T + Send + Sync + 'static,
{
    let world = WORLD_COUNTER.fetch_add(1, Relaxed);
    let f = Arc::new(f);
    let handles: Vec<_> = (0..n)
        .map(|rank| {
            let f = Arc::clone(&f);
            std::thread::spawn(move || f(LocalComm::new(world, rank, n)))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn no_comm_is_nop() {
        let comm = NoComm;
        assert!(comm.is_no_comm());
        let mut buf = [0u8; 8];
        let h = comm.irecv(0, 123, &mut buf);
        assert!(h.wait().is_none());
        let s = comm.isend(0, 123, &[]);
        assert!(s.wait().is_none());
    }

    #[test]
    #[serial]
    fn local_roundtrip_two_ranks() {
        let out = spawn_ranks(2, |comm| {
            const TAG: u16 = 7;
            let peer = 1 - comm.rank();
            let mut recv_buf = [0u8; 4];
            let rx = comm.irecv(peer, TAG, &mut recv_buf);
            let payload = [comm.rank() as u8; 4];
            comm.isend(peer, TAG, &payload);
            rx.wait().expect("receive")
        });
        assert_eq!(out[0], vec![1u8; 4]);
        assert_eq!(out[1], vec![0u8; 4]);
    }

    #[test]
    #[serial]
    fn messages_on_one_tag_keep_order() {
        let out = spawn_ranks(2, |comm| {
            const TAG: u16 = 9;
            if comm.rank() == 0 {
                comm.isend(1, TAG, &[1]);
                comm.isend(1, TAG, &[2]);
                Vec::new()
            } else {
                let mut got = Vec::new();
                for _ in 0..2 {
                    let mut buf = [0u8; 1];
                    got.extend(comm.irecv(0, TAG, &mut buf).wait().unwrap());
                }
                got
            }
        });
        assert_eq!(out[1], vec![1, 2]);
    }
}
