//! Thin façade over in-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices*; typing happens in [`crate::algs::wire`].
//! Besides plain send/receive the slicing layer needs three primitives for the
//! non-blocking consensus: a synchronous send whose completion can be tested,
//! a tag probe over any source, and a non-blocking barrier.
//!
//! Collectives are provided on top of point-to-point and may be overridden by
//! backends with native support.

use crate::mesh_error::CoherentMeshError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Message tag. Backends only see the raw `u16`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    /// Reserved for the provided collectives.
    pub const COLLECTIVE: CommTag = CommTag(0xFFF0);
    pub const BROADCAST: CommTag = CommTag(0xFFF1);

    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// Tag `k` slots above this one.
    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// A request whose completion can be polled without blocking.
pub trait Test {
    fn test(&mut self) -> bool;
}

/// Point-to-point transport plus the few collectives the slicing layer uses.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;
    /// Handle returned by `issend`; completes once the receiver matched the message.
    type SyncSendHandle: Test;
    /// Handle returned by `ibarrier`.
    type BarrierHandle: Test;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Self::SendHandle;
    /// Receive one message of any length from `peer`.
    fn irecv(&self, peer: usize, tag: CommTag) -> Self::RecvHandle;
    fn issend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Self::SyncSendHandle;
    /// Source rank of a pending message with `tag`, if any.
    fn iprobe(&self, tag: CommTag) -> Option<usize>;
    fn ibarrier(&self) -> Self::BarrierHandle;

    fn is_parallel(&self) -> bool {
        self.size() > 1
    }

    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    /// Blocking send.
    fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) {
        let _ = self.isend(peer, tag, buf).wait();
    }

    /// Blocking receive.
    fn recv(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, CoherentMeshError> {
        self.irecv(peer, tag)
            .wait()
            .ok_or_else(|| CoherentMeshError::comm(peer, format!("no message with tag {tag:?}")))
    }

    fn barrier(&self) {
        let mut h = self.ibarrier();
        while !h.test() {
            std::thread::yield_now();
        }
    }

    /// Every rank contributes `buf`; result is indexed by rank.
    fn all_gather_bytes(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, CoherentMeshError> {
        let (me, n) = (self.rank(), self.size());
        let sends: Vec<_> = (0..n)
            .filter(|&p| p != me)
            .map(|p| self.isend(p, CommTag::COLLECTIVE, buf))
            .collect();
        let mut out = Vec::with_capacity(n);
        for p in 0..n {
            if p == me {
                out.push(buf.to_vec());
            } else {
                out.push(self.recv(p, CommTag::COLLECTIVE)?);
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        Ok(out)
    }

    /// `root`'s `buf` on every rank; other ranks' `buf` is ignored.
    fn broadcast_bytes(&self, root: usize, buf: &[u8]) -> Result<Vec<u8>, CoherentMeshError> {
        if self.rank() != root {
            return self.recv(root, CommTag::BROADCAST);
        }
        for p in (0..self.size()).filter(|&p| p != root) {
            self.send(p, CommTag::BROADCAST, buf);
        }
        Ok(buf.to_vec())
    }

    fn all_gather_i64(&self, value: i64) -> Result<Vec<i64>, CoherentMeshError> {
        self.all_gather_bytes(&value.to_le_bytes())?
            .into_iter()
            .enumerate()
            .map(|(p, raw)| {
                let arr: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| CoherentMeshError::comm(p, format!("expected 8 bytes, got {}", raw.len())))?;
                Ok(i64::from_le_bytes(arr))
            })
            .collect()
    }

    fn allreduce_max_i64(&self, value: i64) -> Result<i64, CoherentMeshError> {
        Ok(self.all_gather_i64(value)?.into_iter().fold(value, i64::max))
    }

    fn allreduce_max_f64(&self, value: f64) -> Result<f64, CoherentMeshError> {
        let all = self.all_gather_bytes(&value.to_le_bytes())?;
        let mut best = value;
        for (p, raw) in all.into_iter().enumerate() {
            let arr: [u8; 8] = raw
                .as_slice()
                .try_into()
                .map_err(|_| CoherentMeshError::comm(p, "expected one f64"))?;
            best = best.max(f64::from_le_bytes(arr));
        }
        Ok(best)
    }
}

/// Already-complete request.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ready;

impl Test for Ready {
    fn test(&mut self) -> bool {
        true
    }
}

/// Compile-time no-op comm for serial runs: rank 0 of 1.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();
    type SyncSendHandle = Ready;
    type BarrierHandle = Ready;

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: CommTag, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: CommTag) {}
    fn issend(&self, _peer: usize, _tag: CommTag, _buf: &[u8]) -> Ready {
        Ready
    }
    fn iprobe(&self, _tag: CommTag) -> Option<usize> {
        None
    }
    fn ibarrier(&self) -> Ready {
        Ready
    }
    fn all_gather_bytes(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, CoherentMeshError> {
        Ok(vec![buf.to_vec()])
    }
}

// --- LocalComm: ranks as threads of one process ---
type Key = (usize, usize, u16); // (src, dst, tag)

struct Envelope {
    payload: Bytes,
    matched: Option<Arc<AtomicBool>>,
}

#[derive(Default)]
struct BarrierState {
    generation: u64,
    arrived: usize,
}

struct Universe {
    size: usize,
    mailbox: DashMap<Key, VecDeque<Envelope>>,
    barrier: Mutex<BarrierState>,
}

impl Universe {
    fn post(&self, key: Key, env: Envelope) {
        self.mailbox.entry(key).or_default().push_back(env);
    }

    fn take(&self, key: &Key) -> Option<Bytes> {
        let env = self.mailbox.get_mut(key)?.pop_front()?;
        if let Some(flag) = env.matched {
            flag.store(true, Ordering::Release);
        }
        Some(env.payload)
    }

    fn pending(&self, key: &Key) -> bool {
        self.mailbox.get(key).is_some_and(|q| !q.is_empty())
    }
}

/// In-process communicator: every rank is a thread sharing one mailbox.
///
/// Messages between a (src, dst, tag) triple are delivered in send order,
/// like MPI's non-overtaking rule.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    universe: Arc<Universe>,
}

impl LocalComm {
    /// One communicator per rank, all wired to the same mailbox.
    pub fn universe(size: usize) -> Vec<LocalComm> {
        let universe = Arc::new(Universe {
            size,
            mailbox: DashMap::new(),
            barrier: Mutex::new(BarrierState::default()),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                universe: universe.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.universe.size)
            .finish()
    }
}

pub struct LocalRecvHandle {
    universe: Arc<Universe>,
    key: Key,
}

impl Wait for LocalRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(bytes) = self.universe.take(&self.key) {
                return Some(bytes.to_vec());
            }
            std::thread::yield_now();
        }
    }
}

pub struct LocalSyncSend(Arc<AtomicBool>);

impl Test for LocalSyncSend {
    fn test(&mut self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct LocalBarrier {
    universe: Arc<Universe>,
    generation: u64,
}

impl Test for LocalBarrier {
    fn test(&mut self) -> bool {
        self.universe.barrier.lock().generation > self.generation
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecvHandle;
    type SyncSendHandle = LocalSyncSend;
    type BarrierHandle = LocalBarrier;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.universe.size
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) {
        self.universe.post(
            (self.rank, peer, tag.as_u16()),
            Envelope {
                payload: Bytes::copy_from_slice(buf),
                matched: None,
            },
        );
    }

    fn irecv(&self, peer: usize, tag: CommTag) -> LocalRecvHandle {
        LocalRecvHandle {
            universe: self.universe.clone(),
            key: (peer, self.rank, tag.as_u16()),
        }
    }

    fn issend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> LocalSyncSend {
        let flag = Arc::new(AtomicBool::new(false));
        self.universe.post(
            (self.rank, peer, tag.as_u16()),
            Envelope {
                payload: Bytes::copy_from_slice(buf),
                matched: Some(flag.clone()),
            },
        );
        LocalSyncSend(flag)
    }

    fn iprobe(&self, tag: CommTag) -> Option<usize> {
        (0..self.universe.size).find(|&src| self.universe.pending(&(src, self.rank, tag.as_u16())))
    }

    fn ibarrier(&self) -> LocalBarrier {
        let mut st = self.universe.barrier.lock();
        let generation = st.generation;
        st.arrived += 1;
        if st.arrived == self.universe.size {
            st.arrived = 0;
            st.generation += 1;
        }
        LocalBarrier {
            universe: self.universe.clone(),
            generation,
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::collective::SystemOperation;
    use mpi::datatype::PartitionMut;
    use mpi::ffi;
    use mpi::raw::AsRaw;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::mem::MaybeUninit;
    use std::os::raw::{c_int, c_void};

    /// MPI-backed communicator over a user-provided communicator.
    ///
    /// The caller keeps the `mpi::environment::Universe` alive for as long as
    /// this value is in use.
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new(world: SimpleCommunicator) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self { world, rank, size }
        }

        pub fn world(&self) -> &SimpleCommunicator {
            &self.world
        }
    }

    pub struct MpiRecvHandle(Option<Vec<u8>>);

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    /// Raw request plus the send buffer it reads from.
    pub struct MpiRequest {
        req: ffi::MPI_Request,
        _buf: Box<[u8]>,
        done: bool,
    }

    impl Test for MpiRequest {
        fn test(&mut self) -> bool {
            if !self.done {
                let mut flag: c_int = 0;
                // SAFETY: `req` was produced by a successful MPI_I* call and is
                // not freed until it tests complete.
                unsafe {
                    ffi::MPI_Test(&mut self.req, &mut flag, ffi::RSMPI_STATUS_IGNORE);
                }
                self.done = flag != 0;
            }
            self.done
        }
    }

    impl Drop for MpiRequest {
        fn drop(&mut self) {
            if !self.done {
                // SAFETY: the buffer must outlive the request.
                unsafe {
                    ffi::MPI_Wait(&mut self.req, ffi::RSMPI_STATUS_IGNORE);
                }
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecvHandle;
        type SyncSendHandle = MpiRequest;
        type BarrierHandle = MpiRequest;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        /// Standard-mode send; returns once MPI releases the buffer.
        fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag.as_u16() as i32);
        }

        fn irecv(&self, peer: usize, tag: CommTag) -> MpiRecvHandle {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag.as_u16() as i32);
            MpiRecvHandle(Some(data))
        }

        fn issend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> MpiRequest {
            let buf: Box<[u8]> = buf.into();
            let mut req = MaybeUninit::<ffi::MPI_Request>::uninit();
            // SAFETY: `buf` is heap-owned by the returned request and outlives it.
            let req = unsafe {
                ffi::MPI_Issend(
                    buf.as_ptr() as *const c_void,
                    buf.len() as c_int,
                    u8::equivalent_datatype().as_raw(),
                    peer as c_int,
                    tag.as_u16() as c_int,
                    self.world.as_raw(),
                    req.as_mut_ptr(),
                );
                req.assume_init()
            };
            MpiRequest {
                req,
                _buf: buf,
                done: false,
            }
        }

        fn iprobe(&self, tag: CommTag) -> Option<usize> {
            self.world
                .any_process()
                .immediate_probe_with_tag(tag.as_u16() as i32)
                .map(|status| status.source_rank() as usize)
        }

        fn ibarrier(&self) -> MpiRequest {
            let mut req = MaybeUninit::<ffi::MPI_Request>::uninit();
            // SAFETY: MPI_Ibarrier writes a valid request handle.
            let req = unsafe {
                ffi::MPI_Ibarrier(self.world.as_raw(), req.as_mut_ptr());
                req.assume_init()
            };
            MpiRequest {
                req,
                _buf: Box::new([]),
                done: false,
            }
        }

        fn recv(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, CoherentMeshError> {
            Ok(self.irecv(peer, tag).0.unwrap_or_default())
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn all_gather_bytes(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, CoherentMeshError> {
            let mut counts = vec![0i32; self.size];
            self.world.all_gather_into(&(buf.len() as i32), &mut counts[..]);
            let displs: Vec<i32> = counts
                .iter()
                .scan(0i32, |acc, &c| {
                    let d = *acc;
                    *acc += c;
                    Some(d)
                })
                .collect();
            let total: i32 = counts.iter().sum();
            let mut flat = vec![0u8; total as usize];
            {
                let mut part = PartitionMut::new(&mut flat[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(buf, &mut part);
            }
            Ok(counts
                .iter()
                .zip(&displs)
                .map(|(&c, &d)| flat[d as usize..(d + c) as usize].to_vec())
                .collect())
        }

        fn all_gather_i64(&self, value: i64) -> Result<Vec<i64>, CoherentMeshError> {
            let mut out = vec![0i64; self.size];
            self.world.all_gather_into(&value, &mut out[..]);
            Ok(out)
        }

        fn allreduce_max_i64(&self, value: i64) -> Result<i64, CoherentMeshError> {
            let mut out = 0i64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::max());
            Ok(out)
        }

        fn allreduce_max_f64(&self, value: f64) -> Result<f64, CoherentMeshError> {
            let mut out = 0f64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::max());
            Ok(out)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let comms = LocalComm::universe(2);
        let (c0, c1) = (comms[0].clone(), comms[1].clone());

        let tag = CommTag::new(7);
        c0.send(1, tag, &[1, 2, 3, 4]);
        let got = c1.recv(0, tag).unwrap();
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[test]
    fn messages_are_not_overtaken() {
        let comms = LocalComm::universe(2);
        let tag = CommTag::new(3);
        comms[0].send(1, tag, &[1]);
        comms[0].send(1, tag, &[2, 2]);
        assert_eq!(comms[1].recv(0, tag).unwrap(), vec![1]);
        assert_eq!(comms[1].recv(0, tag).unwrap(), vec![2, 2]);
    }

    #[test]
    fn issend_completes_only_when_matched() {
        let comms = LocalComm::universe(2);
        let tag = CommTag::new(11);
        let mut h = comms[0].issend(1, tag, &[9]);
        assert!(!h.test());
        assert_eq!(comms[1].iprobe(tag), Some(0));
        assert_eq!(comms[1].iprobe(tag.offset(1)), None);
        comms[1].recv(0, tag).unwrap();
        assert!(h.test());
        assert_eq!(comms[1].iprobe(tag), None);
    }

    #[test]
    fn ibarrier_waits_for_everyone() {
        let comms = LocalComm::universe(3);
        let mut b0 = comms[0].ibarrier();
        let mut b1 = comms[1].ibarrier();
        assert!(!b0.test());
        let mut b2 = comms[2].ibarrier();
        assert!(b0.test() && b1.test() && b2.test());
        // Next generation starts fresh.
        let mut again = comms[0].ibarrier();
        assert!(!again.test());
    }

    #[test]
    fn collectives_over_threads() {
        let comms = LocalComm::universe(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| {
                std::thread::spawn(move || {
                    let r = c.rank() as i64;
                    let all = c.all_gather_i64(10 * r).unwrap();
                    let max = c.allreduce_max_i64(r).unwrap();
                    let fmax = c.allreduce_max_f64(0.5 * r as f64).unwrap();
                    c.barrier();
                    (all, max, fmax)
                })
            })
            .collect();
        for h in handles {
            let (all, max, fmax) = h.join().unwrap();
            assert_eq!(all, vec![0, 10, 20]);
            assert_eq!(max, 2);
            assert_eq!(fmax, 1.0);
        }
    }

    #[test]
    fn no_comm_is_serial() {
        let c = NoComm;
        assert!(!c.is_parallel());
        assert!(c.is_master());
        assert_eq!(c.all_gather_i64(5).unwrap(), vec![5]);
        assert_eq!(c.allreduce_max_i64(-3).unwrap(), -3);
        c.barrier();
    }
}
