//! Processor patches: the faces this partition shares with one partner.

use crate::Label;
use crate::slice::helpers::positions_where;
use crate::slice::patch_id::encode_slice_patch_id;
use crate::slice::slice::Slice;

/// Hands out processor patch ordinals during one mesh-construction pass.
///
/// The k-th patch created in a pass gets the encoded id
/// `encode_slice_patch_id(num_boundaries + k)`. A new pass starts from a new
/// counter.
#[derive(Debug, Default, Clone)]
pub struct PatchIdCounter {
    next: Label,
}

impl PatchIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_ordinal(&mut self) -> Label {
        let k = self.next;
        self.next += 1;
        k
    }

    pub fn issued(&self) -> Label {
        self.next
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorPatch {
    my_rank: usize,
    partner: usize,
    id: Label,
    faces: Vec<usize>,
    points: Vec<Label>,
    name: String,
}

impl ProcessorPatch {
    /// Owning side: faces whose neighbour cell lies in `partner_cells`.
    pub fn new(
        my_rank: usize,
        partner_cells: &Slice,
        neighbours: &[Label],
        num_boundaries: Label,
        counter: &mut PatchIdCounter,
    ) -> Self {
        let faces = positions_where(neighbours, |n| partner_cells.contains(n));
        Self::with_faces(my_rank, partner_cells.partition(), faces, num_boundaries, counter)
    }

    /// Receiving side: `n` faces appended at `first_face`.
    pub fn received(
        my_rank: usize,
        partner: usize,
        first_face: usize,
        n: usize,
        num_boundaries: Label,
        counter: &mut PatchIdCounter,
    ) -> Self {
        let faces = (first_face..first_face + n).collect();
        Self::with_faces(my_rank, partner, faces, num_boundaries, counter)
    }

    fn with_faces(
        my_rank: usize,
        partner: usize,
        faces: Vec<usize>,
        num_boundaries: Label,
        counter: &mut PatchIdCounter,
    ) -> Self {
        ProcessorPatch {
            my_rank,
            partner,
            id: encode_slice_patch_id(num_boundaries + counter.next_ordinal()),
            faces,
            points: Vec::new(),
            name: format!("procBoundary{my_rank}to{partner}"),
        }
    }

    /// Encoded (negative) patch id.
    pub fn id(&self) -> Label {
        self.id
    }

    pub fn partner(&self) -> usize {
        self.partner
    }

    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local face indices, in neighbour-array order.
    pub fn faces(&self) -> &[usize] {
        &self.faces
    }

    pub fn size(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Local point ids this patch sent or imported.
    pub fn points(&self) -> &[Label] {
        &self.points
    }

    pub fn set_points(&mut self, points: Vec<Label>) {
        self.points = points;
    }

    /// Lower rank owns the face orientation (and the field sign).
    pub fn is_owner(&self) -> bool {
        self.my_rank < self.partner
    }

    /// Replace the neighbour entry of every patch face with the patch id.
    pub fn encode_patch(&self, neighbours: &mut [Label]) {
        for &f in &self.faces {
            neighbours[f] = self.id;
        }
    }
}
