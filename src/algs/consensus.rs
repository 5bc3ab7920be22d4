//! Non-blocking consensus: discover who talks to me without a schedule.
//!
//! Every rank knows whom it wants to send to, nobody knows who will send to
//! them. Phase 1 posts a synchronous send per partner and drains incoming
//! messages while waiting for all local sends to be matched. Once they are, a
//! non-blocking barrier is armed. Phase 2 keeps draining until that barrier
//! completes, at which point every message in the round has been received
//! somewhere.

use crate::Label;
use crate::algs::communicator::{CommTag, Communicator, Test};
use crate::algs::wire;
use crate::mesh_error::CoherentMeshError;
use std::collections::BTreeMap;

/// Exchange `outgoing[p]` with every partner `p`; returns `source -> payload`
/// for all messages addressed to this rank.
///
/// Collective: every rank must call this with the same `tag`.
pub fn nonblocking_consensus<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
) -> Result<BTreeMap<usize, Vec<u8>>, CoherentMeshError> {
    let me = comm.rank();
    let mut received = BTreeMap::new();

    // Separates this round from stragglers of an earlier one on the same tag.
    comm.barrier();

    let mut sends = Vec::with_capacity(outgoing.len());
    for (&p, buf) in outgoing {
        if p == me {
            received.insert(me, buf.clone());
        } else {
            sends.push(comm.issend(p, tag, buf));
        }
    }

    let mut barrier: Option<C::BarrierHandle> = None;
    loop {
        while let Some(src) = comm.iprobe(tag) {
            let msg = comm.recv(src, tag)?;
            if received.insert(src, msg).is_some() {
                return Err(CoherentMeshError::comm(src, "duplicate consensus message"));
            }
        }
        match barrier.as_mut() {
            Some(b) => {
                if b.test() {
                    break;
                }
            }
            None => {
                if sends.iter_mut().all(|s| s.test()) {
                    barrier = Some(comm.ibarrier());
                }
            }
        }
        std::thread::yield_now();
    }

    log::trace!(
        "[rank {me}] consensus on tag {:?}: sent {}, received {}",
        tag,
        outgoing.len(),
        received.len()
    );
    Ok(received)
}

/// Consensus over one label per partner (typically a count).
pub fn consensus_counts<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Label>,
) -> Result<BTreeMap<usize, Label>, CoherentMeshError> {
    let lists = outgoing.iter().map(|(&p, &v)| (p, vec![v])).collect();
    consensus_labels(comm, tag, &lists)?
        .into_iter()
        .map(|(src, v)| match v.as_slice() {
            [x] => Ok((src, *x)),
            _ => Err(CoherentMeshError::comm(src, format!("expected one label, got {}", v.len()))),
        })
        .collect()
}

/// Consensus over a label list per partner.
pub fn consensus_labels<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<Label>>,
) -> Result<BTreeMap<usize, Vec<Label>>, CoherentMeshError> {
    let raw: BTreeMap<usize, Vec<u8>> = outgoing
        .iter()
        .map(|(&p, v)| {
            wire::encode_labels(v)
                .map(|bytes| (p, bytes))
                .map_err(|e| CoherentMeshError::comm(p, e))
        })
        .collect::<Result<_, _>>()?;
    nonblocking_consensus(comm, tag, &raw)?
        .into_iter()
        .map(|(src, bytes)| {
            wire::decode_labels(&bytes)
                .map(|v| (src, v))
                .map_err(|e| CoherentMeshError::comm(src, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};

    #[test]
    fn serial_consensus_is_empty() {
        let got = consensus_counts(&NoComm, CommTag::new(1), &BTreeMap::new()).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn three_ranks_discover_senders() {
        // 0 -> {1, 2}, 2 -> {1}, 1 -> nobody
        let plan: Vec<BTreeMap<usize, Label>> = vec![
            BTreeMap::from([(1, 10), (2, 20)]),
            BTreeMap::new(),
            BTreeMap::from([(1, 21)]),
        ];
        let handles: Vec<_> = LocalComm::universe(3)
            .into_iter()
            .zip(plan)
            .map(|(c, out)| {
                std::thread::spawn(move || consensus_counts(&c, CommTag::new(5), &out).unwrap())
            })
            .collect();
        let got: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(got[0].is_empty());
        assert_eq!(got[1], BTreeMap::from([(0, 10), (2, 21)]));
        assert_eq!(got[2], BTreeMap::from([(0, 20)]));
    }

    #[test]
    fn back_to_back_rounds_do_not_mix() {
        let handles: Vec<_> = LocalComm::universe(2)
            .into_iter()
            .map(|c| {
                std::thread::spawn(move || {
                    let peer = 1 - c.rank();
                    let first = consensus_labels(
                        &c,
                        CommTag::new(9),
                        &BTreeMap::from([(peer, vec![1, 2])]),
                    )
                    .unwrap();
                    let second = consensus_labels(&c, CommTag::new(9), &BTreeMap::new()).unwrap();
                    (first, second)
                })
            })
            .collect();
        for h in handles {
            let (first, second) = h.join().unwrap();
            assert_eq!(first.values().next().unwrap(), &vec![1, 2]);
            assert!(second.is_empty());
        }
    }
}
