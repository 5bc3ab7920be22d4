//! Processor-boundary exchange between neighbouring partitions.
//!
//! Round 1 discovers, by consensus, which lower ranks will send faces and
//! how many. Round 2 moves the shared faces from the owning (lower) rank to
//! the higher one together with the coordinates of the points the owner
//! holds natively. Round 3 fetches every point that is still unresolved
//! from the lower rank that owns it.
//!
//! Each round receives from lower ranks before sending to higher ones, so
//! blocking point-to-point traffic cannot cycle.

use crate::algs::communicator::Communicator;
use crate::algs::consensus::{consensus_counts, consensus_labels};
use crate::algs::wire;
use crate::mesh::CoherentMesh;
use crate::mesh_error::{CoherentMeshError, index_to_label, label_to_index};
use crate::slice::helpers::{face_points_where, reverse_face};
use crate::slice::{PatchIdCounter, ProcessorPatch, Slice};
use crate::{Face, Label, Point};
use std::collections::BTreeMap;

/// Tag slots above the configured base tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ExchangeSlot {
    ShareCounts = 0,
    Faces = 1,
    Neighbours = 2,
    Points = 3,
    PointRequests = 4,
    PointReplies = 5,
    SurfaceField = 6,
}

impl CoherentMesh {
    fn point(&self, id: Label) -> Result<Point, CoherentMeshError> {
        let local = label_to_index(self.point_slice.convert(id)?)?;
        self.all_points
            .get(local)
            .copied()
            .ok_or(CoherentMeshError::InvalidLabel(id))
    }

    /// Rounds 1 and 2: learn who sends, take their faces, then send ours.
    pub(super) fn comm_slice_patches<C: Communicator>(
        &mut self,
        comm: &C,
        counter: &mut PatchIdCounter,
    ) -> Result<(), CoherentMeshError> {
        let shares = self.proc_patches[..self.n_owned_patches]
            .iter()
            .map(|p| Ok((p.partner(), index_to_label(p.size())?)))
            .collect::<Result<BTreeMap<_, _>, CoherentMeshError>>()?;
        let incoming = consensus_counts(comm, self.tag(ExchangeSlot::ShareCounts), &shares)?;

        for (&src, &n) in &incoming {
            if src >= self.my_rank {
                return Err(CoherentMeshError::comm(src, "faces offered by a higher rank"));
            }
            self.recv_slice_faces(comm, src, label_to_index(n)?, counter)?;
        }
        for k in 0..self.n_owned_patches {
            self.send_slice_faces(comm, k)?;
        }
        for patch in &self.proc_patches[..self.n_owned_patches] {
            patch.encode_patch(&mut self.global_neighbours);
        }
        Ok(())
    }

    fn send_slice_faces<C: Communicator>(&mut self, comm: &C, k: usize) -> Result<(), CoherentMeshError> {
        let patch = &self.proc_patches[k];
        let partner = patch.partner();
        let faces: Vec<Face> = patch.faces().iter().map(|&f| self.global_faces[f].clone()).collect();
        let neighbours: Vec<Label> = patch.faces().iter().map(|&f| self.global_neighbours[f]).collect();
        let ids = face_points_where(&faces, |id| self.point_slice.contains(id));
        let points = ids
            .iter()
            .map(|&id| self.point(id))
            .collect::<Result<Vec<_>, _>>()?;

        let to_partner = |e: String| CoherentMeshError::comm(partner, e);
        let faces_msg = wire::encode_faces(&faces).map_err(to_partner)?;
        let neighbours_msg = wire::encode_labels(&neighbours).map_err(to_partner)?;
        let points_msg = wire::encode_points(&points).map_err(to_partner)?;
        comm.send(partner, self.tag(ExchangeSlot::Faces), &faces_msg);
        comm.send(partner, self.tag(ExchangeSlot::Neighbours), &neighbours_msg);
        comm.send(partner, self.tag(ExchangeSlot::Points), &points_msg);
        log::debug!(
            "[rank {}] sent {} faces and {} points to rank {partner}",
            self.my_rank,
            faces.len(),
            points.len()
        );

        let mut local = ids;
        self.point_slice.convert_all(&mut local)?;
        self.proc_patches[k].set_points(local);
        Ok(())
    }

    fn recv_slice_faces<C: Communicator>(
        &mut self,
        comm: &C,
        src: usize,
        n: usize,
        counter: &mut PatchIdCounter,
    ) -> Result<(), CoherentMeshError> {
        let bad = |e: String| CoherentMeshError::comm(src, e);
        let mut faces = wire::decode_faces(&comm.recv(src, self.tag(ExchangeSlot::Faces))?).map_err(bad)?;
        let neighbours = wire::decode_labels(&comm.recv(src, self.tag(ExchangeSlot::Neighbours))?).map_err(bad)?;
        let points = wire::decode_points(&comm.recv(src, self.tag(ExchangeSlot::Points))?).map_err(bad)?;
        if faces.len() != n || neighbours.len() != n {
            return Err(CoherentMeshError::comm(
                src,
                format!("announced {n} faces, got {} faces and {} neighbours", faces.len(), neighbours.len()),
            ));
        }

        // the partner's side of a shared face points the other way
        faces.iter_mut().for_each(reverse_face);

        let sender = Slice::from_offsets(src, &self.point_offsets)?;
        let ids = face_points_where(&faces, |id| sender.contains(id));
        if ids.len() != points.len() {
            return Err(CoherentMeshError::comm(
                src,
                format!("{} coordinates for {} sender points", points.len(), ids.len()),
            ));
        }
        // import order == coordinate order
        for (&id, p) in ids.iter().zip(points) {
            if !self.point_slice.exist(id) {
                self.point_slice.append([id])?;
                self.all_points.push(p);
            }
        }

        let first = self.global_faces.len();
        for &nb in &neighbours {
            self.local_owner.push(self.cell_slice.convert(nb)?);
        }
        self.global_faces.extend(faces);
        let mut patch = ProcessorPatch::received(self.my_rank, src, first, n, self.num_boundaries, counter);
        self.global_neighbours.extend(std::iter::repeat_n(patch.id(), n));

        let mut local = ids;
        self.point_slice.convert_all(&mut local)?;
        patch.set_points(local);
        log::debug!(
            "[rank {}] received {n} faces from rank {src} as `{}`",
            self.my_rank,
            patch.name()
        );
        self.proc_patches.push(patch);
        Ok(())
    }

    /// Round 3: fetch points referenced by local faces that no exchange has
    /// resolved yet. Each is owned by exactly one lower rank.
    pub(super) fn comm_shared_points<C: Communicator>(&mut self, comm: &C) -> Result<(), CoherentMeshError> {
        let me = self.my_rank;
        let missing = face_points_where(&self.global_faces, |id| !self.point_slice.exist(id));
        let mut requests: BTreeMap<usize, Vec<Label>> = BTreeMap::new();
        for id in missing {
            let owner = self
                .point_offsets
                .owner_of(id)
                .filter(|&p| p < me)
                .ok_or_else(|| CoherentMeshError::UnresolvedId {
                    id,
                    partition: me,
                    bottom: self.point_slice.bottom(),
                    top: self.point_slice.top(),
                })?;
            requests.entry(owner).or_default().push(id);
        }
        let asked = consensus_labels(comm, self.tag(ExchangeSlot::PointRequests), &requests)?;

        for (&owner, ids) in &requests {
            let bytes = comm.recv(owner, self.tag(ExchangeSlot::PointReplies))?;
            let points = wire::decode_points(&bytes).map_err(|e| CoherentMeshError::comm(owner, e))?;
            if points.len() != ids.len() {
                return Err(CoherentMeshError::comm(
                    owner,
                    format!("{} coordinates for {} requested points", points.len(), ids.len()),
                ));
            }
            self.all_points.extend(points);
            self.point_slice.append(ids.iter().copied())?;
        }

        for (&requester, ids) in &asked {
            if requester <= me {
                return Err(CoherentMeshError::comm(requester, "points requested by a lower rank"));
            }
            let points = ids
                .iter()
                .map(|&id| {
                    if self.point_slice.contains(id) {
                        self.point(id)
                    } else {
                        Err(CoherentMeshError::comm(requester, format!("point {id} is not native here")))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            let reply = wire::encode_points(&points).map_err(|e| CoherentMeshError::comm(requester, e))?;
            comm.send(requester, self.tag(ExchangeSlot::PointReplies), &reply);
        }
        log::debug!(
            "[rank {me}] fetched {} shared points from {} ranks, served {} ranks",
            requests.values().map(Vec::len).sum::<usize>(),
            requests.len(),
            asked.len()
        );
        Ok(())
    }
}
