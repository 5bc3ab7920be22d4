//! CoherentMesh: this rank's slice of a coherently stored mesh.
//!
//! Reading walks one component tree over the mesh blocks:
//!
//! ```text
//! [partitionStarts] -> ownerStarts -> cellOffsets*
//!                                  -> neighbours -> faceOffsets
//!                                                -> internalFaceOffsets
//!                                                -> boundaryFaceOffsets{i}
//!                                  -> faceStarts -> faces -> pointOffsets* -> points
//! ```
//!
//! (`*` nodes also cache this rank's slice). Afterwards processor boundaries
//! are rebuilt peer to peer (see [`super::exchange`]), point ids are made
//! local, and faces are ordered internal first, boundary faces grouped by
//! patch.

use crate::algs::communicator::{CommTag, Communicator};
use crate::component::{ComponentTree, DataComponent, InitStrategy, OffsetStrategy as O};
use crate::config::{BlockNames, CoherentConfig};
use crate::debug_invariants::DebugInvariants;
use crate::io::context::StreamContext;
use crate::io::dictionary::Dictionary;
use crate::io::store::{BlockKind, SliceStream};
use crate::mesh::{ExchangeSlot, MeshState};
use crate::mesh::boundary::{PolyPatch, build_patches};
use crate::mesh_error::{CoherentMeshError, index_to_label, label_to_index};
use crate::slice::{
    FragmentPermutation, Offsets, PatchIdCounter, ProcessorPatch, Slice, decode_slice_patch_id,
    encode_slice_patch_id,
};
use crate::{Face, Label, Point};
use std::time::Instant;

const CELL_OFFSETS: &str = "cellOffsets";
const FACE_OFFSETS: &str = "faceOffsets";
const INTERNAL_FACE_OFFSETS: &str = "internalFaceOffsets";
const POINT_OFFSETS: &str = "pointOffsets";

fn boundary_node(i: Label) -> String {
    format!("boundaryFaceOffsets{i}")
}

#[derive(Debug, Clone)]
pub struct CoherentMesh {
    pub(super) state: MeshState,
    pub(super) my_rank: usize,
    pub(super) n_procs: usize,
    pub(super) tag_base: CommTag,
    pub(super) patch_names: Vec<String>,
    pub(super) num_boundaries: Label,

    // arrival order: native faces, then received processor faces
    pub(super) global_neighbours: Vec<Label>,
    pub(super) local_owner: Vec<Label>,
    pub(super) global_faces: Vec<Face>,
    pub(super) all_points: Vec<Point>,

    pub(super) cell_offsets: Offsets,
    pub(super) face_offsets: Offsets,
    pub(super) internal_face_offsets: Offsets,
    pub(super) point_offsets: Offsets,
    pub(super) boundary_offsets: Vec<Offsets>,
    pub(super) cell_slice: Slice,
    pub(super) point_slice: Slice,

    pub(super) proc_patches: Vec<ProcessorPatch>,
    /// Number of leading `proc_patches` this rank owns.
    pub(super) n_owned_patches: usize,
    pub(super) internal_face_ids_from_boundaries: Vec<Vec<usize>>,
    pub(super) boundary_ids_from_internal_faces: Vec<Label>,

    // mesh order
    permutation: FragmentPermutation,
    poly_owner: Vec<Label>,
    poly_neighbours: Vec<Label>,
    poly_faces: Vec<Face>,
    poly_patches: Vec<Label>,
    patches: Vec<PolyPatch>,
}

impl CoherentMesh {
    fn unread<C: Communicator>(comm: &C, config: &CoherentConfig) -> Self {
        let me = comm.rank();
        CoherentMesh {
            state: MeshState::Unread,
            my_rank: me,
            n_procs: comm.size(),
            tag_base: CommTag::new(config.tag_base),
            patch_names: Vec::new(),
            num_boundaries: 0,
            global_neighbours: Vec::new(),
            local_owner: Vec::new(),
            global_faces: Vec::new(),
            all_points: Vec::new(),
            cell_offsets: Offsets::default(),
            face_offsets: Offsets::default(),
            internal_face_offsets: Offsets::default(),
            point_offsets: Offsets::default(),
            boundary_offsets: Vec::new(),
            cell_slice: Slice::new(me, 0, 0),
            point_slice: Slice::new(me, 0, 0),
            proc_patches: Vec::new(),
            n_owned_patches: 0,
            internal_face_ids_from_boundaries: Vec::new(),
            boundary_ids_from_internal_faces: Vec::new(),
            permutation: FragmentPermutation::new(&[]),
            poly_owner: Vec::new(),
            poly_neighbours: Vec::new(),
            poly_faces: Vec::new(),
            poly_patches: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Read the mesh stored under `path`. Collective over `comm`.
    pub fn read<C: Communicator, S: SliceStream>(
        ctx: &mut StreamContext<S>,
        comm: &C,
        path: &str,
    ) -> Result<Self, CoherentMeshError> {
        let config = ctx.config().clone();
        let mut mesh = CoherentMesh::unread(comm, &config);
        let store: &S = ctx.access(BlockKind::Mesh, path)?;
        log::debug!(
            "[rank {}] reading coherent mesh `{path}` on {} ranks",
            mesh.my_rank,
            mesh.n_procs
        );

        let mut tree = topology_tree(&config.blocks, comm, store)?;
        tree.initialize(comm, store)?;
        mesh.state.advance(MeshState::TopologyTreeInitialized)?;

        let names = read_patch_names(store)?;
        let local = tree
            .labels(&config.blocks.neighbours)?
            .iter()
            .copied()
            .min()
            .filter(|&m| m < 0)
            .map_or(0, |m| decode_slice_patch_id(m) + 1);
        let seen = comm.allreduce_max_i64(local)?;
        mesh.num_boundaries = seen.max(names.as_ref().map_or(0, |n| n.len() as Label));
        mesh.patch_names = match names {
            Some(n) if (n.len() as Label) < mesh.num_boundaries => {
                return Err(CoherentMeshError::malformed(
                    "boundary",
                    format!("{} patch names for {} boundary patches", n.len(), mesh.num_boundaries),
                ));
            }
            Some(n) => n,
            None => (0..mesh.num_boundaries).map(|i| format!("patch{i}")).collect(),
        };

        for i in 0..mesh.num_boundaries {
            tree.add(
                Some(config.blocks.neighbours.as_str()),
                DataComponent::index(
                    boundary_node(i),
                    InitStrategy::offsets(true),
                    O::Unset,
                    O::CountEq(encode_slice_patch_id(i)),
                ),
            )?;
        }
        mesh.state.advance(MeshState::BoundaryOffsetsAppended)?;
        tree.initialize_node(&config.blocks.neighbours, comm, store)?;
        mesh.state.advance(MeshState::BoundaryTreeInitialized)?;

        mesh.extract(&mut tree, &config.blocks)?;
        log::debug!(
            "[rank {}] {} cells, {} faces, {} native points, {} boundary patches",
            mesh.my_rank,
            mesh.cell_slice.num_native(),
            mesh.global_faces.len(),
            mesh.point_slice.num_native(),
            mesh.num_boundaries
        );

        let mut counter = PatchIdCounter::new();
        mesh.initialize_surface_field_mappings(&mut counter)?;
        if comm.is_parallel() {
            let start = Instant::now();
            mesh.comm_slice_patches(comm, &mut counter)?;
            mesh.comm_shared_points(comm)?;
            let elapsed = comm.allreduce_max_f64(start.elapsed().as_secs_f64())?;
            if config.log_exchange_time {
                log::info!("processor boundary exchange took {elapsed:.6}s");
            }
            mesh.state.advance(MeshState::PeerExchangeComplete)?;
        }
        mesh.renumber_faces()?;
        mesh.state.advance(MeshState::Renumbered)?;
        mesh.build_permutation()?;
        mesh.state.advance(MeshState::PermutationBuilt)?;
        mesh.debug_assert_invariants();
        Ok(mesh)
    }

    fn extract(&mut self, tree: &mut ComponentTree, blocks: &BlockNames) -> Result<(), CoherentMeshError> {
        let owner_starts = tree.extract_labels(&blocks.owner_starts)?;
        let face_starts = tree.extract_labels(&blocks.face_starts)?;
        let flat = tree.extract_labels(&blocks.faces)?;
        self.global_neighbours = tree.extract_labels(&blocks.neighbours)?;
        self.all_points = tree.extract_points(&blocks.points)?;

        self.cell_slice = tree.extract_slice(CELL_OFFSETS)?;
        self.cell_offsets = tree.extract_offsets(CELL_OFFSETS)?;
        self.point_slice = tree.extract_slice(POINT_OFFSETS)?;
        self.point_offsets = tree.extract_offsets(POINT_OFFSETS)?;
        self.face_offsets = tree.extract_offsets(FACE_OFFSETS)?;
        self.internal_face_offsets = tree.extract_offsets(INTERNAL_FACE_OFFSETS)?;
        self.boundary_offsets = (0..self.num_boundaries)
            .map(|i| tree.extract_offsets(&boundary_node(i)))
            .collect::<Result<_, _>>()?;

        self.local_owner = expand_owner(&owner_starts)?;
        self.global_faces = split_faces(&face_starts, &flat)?;
        for (what, n) in [
            ("owner", self.local_owner.len()),
            ("faces", self.global_faces.len()),
        ] {
            if n != self.global_neighbours.len() {
                return Err(CoherentMeshError::SizeMismatch {
                    context: format!("{what} vs neighbours"),
                    expected: self.global_neighbours.len(),
                    found: n,
                });
            }
        }
        if index_to_label(self.all_points.len())? != self.point_slice.num_native() {
            return Err(CoherentMeshError::SizeMismatch {
                context: "points vs point offsets".into(),
                expected: label_to_index(self.point_slice.num_native())?,
                found: self.all_points.len(),
            });
        }
        Ok(())
    }

    /// Find the faces this rank owns towards every higher partition and
    /// record where they sit in the coherent internal-surface window.
    ///
    /// The window holds every native face with a cell neighbour, ordered by
    /// `(owner, neighbour)`. Runs before any processor patch is encoded.
    pub(super) fn initialize_surface_field_mappings(
        &mut self,
        counter: &mut PatchIdCounter,
    ) -> Result<(), CoherentMeshError> {
        let surface = FragmentPermutation::with_owner(&self.global_neighbours, &self.local_owner)?;
        let window = &surface.face_permutation()[..surface.n_internal_faces()];
        let mut position = vec![None; self.global_neighbours.len()];
        for (w, &f) in window.iter().enumerate() {
            position[f] = Some(w);
        }
        if index_to_label(window.len())? != self.internal_face_offsets.count(self.my_rank) {
            return Err(CoherentMeshError::SizeMismatch {
                context: "internal surface window".into(),
                expected: label_to_index(self.internal_face_offsets.count(self.my_rank))?,
                found: window.len(),
            });
        }

        self.boundary_ids_from_internal_faces = vec![-1; window.len()];
        for p in self.my_rank + 1..self.n_procs {
            let partner = Slice::from_offsets(p, &self.cell_offsets)?;
            if partner.count_in(&self.global_neighbours) == 0 {
                continue;
            }
            let patch = ProcessorPatch::new(
                self.my_rank,
                &partner,
                &self.global_neighbours,
                self.num_boundaries,
                counter,
            );
            let ids = patch
                .faces()
                .iter()
                .map(|&f| {
                    position[f].ok_or_else(|| {
                        CoherentMeshError::malformed("neighbours", format!("processor face {f} has no cell neighbour"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let decoded = decode_slice_patch_id(patch.id());
            for &w in &ids {
                self.boundary_ids_from_internal_faces[w] = decoded;
            }
            log::debug!(
                "[rank {}] owns {} faces towards rank {p}",
                self.my_rank,
                patch.size()
            );
            self.internal_face_ids_from_boundaries.push(ids);
            self.proc_patches.push(patch);
        }
        self.n_owned_patches = self.proc_patches.len();
        Ok(())
    }

    /// Point ids of every face become local.
    fn renumber_faces(&mut self) -> Result<(), CoherentMeshError> {
        for face in self.global_faces.iter_mut() {
            self.point_slice.convert_all(face)?;
        }
        Ok(())
    }

    fn build_permutation(&mut self) -> Result<(), CoherentMeshError> {
        let perm = FragmentPermutation::with_owner(&self.global_neighbours, &self.local_owner)?;
        let mut owner = self.local_owner.clone();
        perm.permute(&mut owner)?;
        let mut faces = self.global_faces.clone();
        perm.permute(&mut faces)?;
        let mut neighbours = perm.retrieve_neighbours();
        self.cell_slice.convert_all(&mut neighbours)?;
        let patch_ids = perm.retrieve_patches();
        self.patches = build_patches(
            perm.n_internal_faces(),
            &patch_ids,
            &self.patch_names,
            &self.proc_patches,
        )?;
        self.poly_owner = owner;
        self.poly_faces = faces;
        self.poly_neighbours = neighbours;
        self.poly_patches = patch_ids;
        self.permutation = perm;
        Ok(())
    }

    /// Message tag reserved for `slot` of the exchange.
    pub fn tag(&self, slot: ExchangeSlot) -> CommTag {
        self.tag_base.offset(slot as u16)
    }

    pub fn state(&self) -> MeshState {
        self.state
    }

    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    pub fn n_procs(&self) -> usize {
        self.n_procs
    }

    pub fn num_boundaries(&self) -> Label {
        self.num_boundaries
    }

    pub fn patch_names(&self) -> &[String] {
        &self.patch_names
    }

    pub fn n_cells(&self) -> usize {
        self.cell_slice.num_native().max(0) as usize
    }

    pub fn n_faces(&self) -> usize {
        self.poly_faces.len()
    }

    pub fn n_internal_faces(&self) -> usize {
        self.poly_neighbours.len()
    }

    pub fn n_points(&self) -> usize {
        self.all_points.len()
    }

    pub fn poly_owner(&self) -> &[Label] {
        &self.poly_owner
    }

    /// Local neighbour cell of every internal face.
    pub fn poly_neighbours(&self) -> &[Label] {
        &self.poly_neighbours
    }

    pub fn poly_faces(&self) -> &[Face] {
        &self.poly_faces
    }

    /// Native points followed by imported ones.
    pub fn poly_points(&self) -> &[Point] {
        &self.all_points
    }

    /// Encoded patch id of every boundary face, in mesh order.
    pub fn poly_patches(&self) -> &[Label] {
        &self.poly_patches
    }

    /// Physical patches in declared order, then processor patches.
    pub fn boundary_patches(&self) -> &[PolyPatch] {
        &self.patches
    }

    pub fn proc_patches(&self) -> &[ProcessorPatch] {
        &self.proc_patches
    }

    /// Processor patches whose partner is a higher rank.
    pub fn owned_proc_patches(&self) -> &[ProcessorPatch] {
        &self.proc_patches[..self.n_owned_patches]
    }

    pub fn permutation(&self) -> &FragmentPermutation {
        &self.permutation
    }

    /// Faces in arrival order, point ids local.
    pub fn global_faces(&self) -> &[Face] {
        &self.global_faces
    }

    pub fn global_neighbours(&self) -> &[Label] {
        &self.global_neighbours
    }

    pub fn local_owner(&self) -> &[Label] {
        &self.local_owner
    }

    pub fn cell_slice(&self) -> &Slice {
        &self.cell_slice
    }

    pub fn point_slice(&self) -> &Slice {
        &self.point_slice
    }

    pub fn cell_offsets(&self) -> &Offsets {
        &self.cell_offsets
    }

    pub fn face_offsets(&self) -> &Offsets {
        &self.face_offsets
    }

    pub fn point_offsets(&self) -> &Offsets {
        &self.point_offsets
    }

    /// Offsets of the coherent internal-surface window (internal faces plus
    /// owned processor faces).
    pub fn internal_surface_field_offsets(&self) -> &Offsets {
        &self.internal_face_offsets
    }

    pub fn boundary_patch_offsets(&self, patch: usize) -> Result<&Offsets, CoherentMeshError> {
        self.boundary_offsets
            .get(patch)
            .ok_or_else(|| CoherentMeshError::ComponentNotFound(boundary_node(patch as Label)))
    }

    /// Per owned processor patch, the window position of each of its faces.
    pub fn internal_face_ids_from_boundaries(&self) -> &[Vec<usize>] {
        &self.internal_face_ids_from_boundaries
    }

    /// Per window position, `-1` for a local internal face or the decoded
    /// id of the processor patch it belongs to.
    pub fn boundary_ids_from_internal_faces(&self) -> &[Label] {
        &self.boundary_ids_from_internal_faces
    }
}

impl DebugInvariants for CoherentMesh {
    fn validate_invariants(&self) -> Result<(), CoherentMeshError> {
        let n = self.global_faces.len();
        if self.local_owner.len() != n || self.global_neighbours.len() != n {
            return Err(CoherentMeshError::SizeMismatch {
                context: "faces, owners and neighbours".into(),
                expected: n,
                found: self.local_owner.len().min(self.global_neighbours.len()),
            });
        }
        let n_points = index_to_label(self.all_points.len())?;
        if self.state >= MeshState::Renumbered {
            if let Some(&bad) = self.global_faces.iter().flatten().find(|&&id| id < 0 || id >= n_points) {
                return Err(CoherentMeshError::InvalidLabel(bad));
            }
        }
        self.cell_offsets.validate_invariants()?;
        self.point_offsets.validate_invariants()?;
        self.point_slice.validate_invariants()
    }
}

/// The mesh block tree; `partitionStarts` is used when it has one entry per
/// rank plus one, otherwise `ownerStarts` is split evenly.
fn topology_tree<C: Communicator, S: SliceStream>(
    blocks: &BlockNames,
    comm: &C,
    store: &S,
) -> Result<ComponentTree, CoherentMeshError> {
    let mut tree = ComponentTree::new();
    let fast = comm.is_parallel()
        && store
            .buffer_size(&blocks.partition_starts)
            .is_ok_and(|n| n == comm.size() + 1);
    if fast {
        tree.add(
            None,
            DataComponent::index(
                &blocks.partition_starts,
                InitStrategy::from_store(&blocks.partition_starts),
                O::FromRank,
                O::Two,
            ),
        )?;
        tree.add(
            Some(blocks.partition_starts.as_str()),
            DataComponent::index(
                &blocks.owner_starts,
                InitStrategy::from_store(&blocks.owner_starts),
                O::Front,
                O::BackMinusFrontPlusOne,
            ),
        )?;
    } else {
        let init = if comm.is_parallel() {
            InitStrategy::naive_partitioning(&blocks.owner_starts)
        } else {
            InitStrategy::from_store(&blocks.owner_starts)
        };
        tree.add(None, DataComponent::index(&blocks.owner_starts, init, O::Unset, O::Unset))?;
    }
    log::debug!("mesh tree rooted at `{}`", if fast { &blocks.partition_starts } else { &blocks.owner_starts });

    let owner = Some(blocks.owner_starts.as_str());
    tree.add(
        owner,
        DataComponent::index(CELL_OFFSETS, InitStrategy::offsets(true), O::Unset, O::SizeMinusOne).sliced(),
    )?;
    tree.add(
        owner,
        DataComponent::index(
            &blocks.neighbours,
            InitStrategy::from_store(&blocks.neighbours),
            O::Front,
            O::BackMinusFront,
        ),
    )?;
    tree.add(
        Some(blocks.neighbours.as_str()),
        DataComponent::index(FACE_OFFSETS, InitStrategy::offsets(true), O::Unset, O::Size),
    )?;
    tree.add(
        Some(blocks.neighbours.as_str()),
        DataComponent::index(INTERNAL_FACE_OFFSETS, InitStrategy::offsets(true), O::Unset, O::CountGeq(0)),
    )?;
    tree.add(
        owner,
        DataComponent::index(
            &blocks.face_starts,
            InitStrategy::from_store(&blocks.face_starts),
            O::Front,
            O::BackMinusFrontPlusOne,
        ),
    )?;
    tree.add(
        Some(blocks.face_starts.as_str()),
        DataComponent::index(&blocks.faces, InitStrategy::from_store(&blocks.faces), O::Front, O::BackMinusFront),
    )?;
    tree.add(
        Some(blocks.faces.as_str()),
        DataComponent::index(POINT_OFFSETS, InitStrategy::offsets(false), O::MaxPlusOne, O::Unset).sliced(),
    )?;
    tree.add(
        Some(POINT_OFFSETS),
        DataComponent::field(&blocks.points, InitStrategy::primitives(&blocks.points, 3), O::Front, O::BackMinusFront),
    )?;
    Ok(tree)
}

/// Patch names from the `boundary` header, if the case has one.
fn read_patch_names<S: SliceStream>(store: &S) -> Result<Option<Vec<String>>, CoherentMeshError> {
    let text = match store.get_text("boundary") {
        Ok(t) => t,
        Err(CoherentMeshError::MissingBlock { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };
    let dict = Dictionary::parse("boundary", &text)?;
    Ok(Some(
        dict.keys()
            .filter(|&k| k != "FoamFile")
            .map(str::to_string)
            .collect(),
    ))
}

/// Run-length fill: cell `c` owns faces `starts[c] - starts[0] .. starts[c+1] - starts[0]`.
fn expand_owner(starts: &[Label]) -> Result<Vec<Label>, CoherentMeshError> {
    let Some(&first) = starts.first() else {
        return Ok(Vec::new());
    };
    let total = label_to_index(starts[starts.len() - 1] - first)?;
    let mut owner = Vec::with_capacity(total);
    for (cell, w) in starts.windows(2).enumerate() {
        let n = label_to_index(w[1] - w[0])?;
        owner.extend(std::iter::repeat_n(index_to_label(cell)?, n));
    }
    Ok(owner)
}

/// Ragged faces from a start table over the flat point-id window.
fn split_faces(starts: &[Label], flat: &[Label]) -> Result<Vec<Face>, CoherentMeshError> {
    let Some(&first) = starts.first() else {
        return Ok(Vec::new());
    };
    starts
        .windows(2)
        .map(|w| {
            let lo = label_to_index(w[0] - first)?;
            let hi = label_to_index(w[1] - first)?;
            flat.get(lo..hi).map(<[Label]>::to_vec).ok_or_else(|| {
                CoherentMeshError::malformed("faces", format!("face [{lo}, {hi}) outside {} entries", flat.len()))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_run_length_fill() {
        assert_eq!(expand_owner(&[4, 6, 6, 9]).unwrap(), vec![0, 0, 2, 2, 2]);
        assert!(expand_owner(&[]).unwrap().is_empty());
        assert!(expand_owner(&[3, 2]).is_err());
    }

    #[test]
    fn faces_split_from_starts() {
        let faces = split_faces(&[4, 7, 11], &[0, 1, 2, 1, 2, 3, 4]).unwrap();
        assert_eq!(faces, vec![vec![0, 1, 2], vec![1, 2, 3, 4]]);
        assert!(split_faces(&[0, 9], &[0, 1]).is_err());
    }
}
