//! Orderings between streamed (arrival) face order and mesh order.
//!
//! [`FragmentPermutation`] is the read side: faces of a sliced partition
//! arrive in coherent order followed by imported processor faces, and the
//! consuming mesh wants internal faces first (upper-triangular by owner) and
//! boundary faces grouped by patch, physical patches before processor ones.
//!
//! [`SlicePermutation`] is the write side: it turns a conventional mesh
//! (faces grouped by patch) into the coherent layout, with faces ordered by
//! owner and points numbered by first appearance.

use crate::mesh_error::{CoherentMeshError, label_to_index};
use crate::slice::helpers::{apply_permutation, permutation_of_sorted, renumber_faces};
use crate::slice::patch_id::encode_slice_patch_id;
use crate::{Face, Label, Point};
use std::cmp::Reverse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPermutation {
    neighbours_and_patches: Vec<Label>,
    /// `new[i] = old[face_permutation[i]]`
    face_permutation: Vec<usize>,
    n_internal: usize,
}

impl FragmentPermutation {
    /// Internal entries sorted by neighbour, boundary entries by patch.
    pub fn new(neighbours: &[Label]) -> Self {
        Self::build(neighbours, |i| (0, neighbours[i]))
    }

    /// Internal entries sorted by `(owner, neighbour)`.
    pub fn with_owner(neighbours: &[Label], owner: &[Label]) -> Result<Self, CoherentMeshError> {
        if owner.len() != neighbours.len() {
            return Err(CoherentMeshError::SizeMismatch {
                context: "owner vs neighbour".into(),
                expected: neighbours.len(),
                found: owner.len(),
            });
        }
        Ok(Self::build(neighbours, |i| (owner[i], neighbours[i])))
    }

    fn build<K>(neighbours: &[Label], internal_key: K) -> Self
    where
        K: Fn(usize) -> (Label, Label),
    {
        let (mut internal, mut boundary): (Vec<usize>, Vec<usize>) =
            (0..neighbours.len()).partition(|&i| neighbours[i] >= 0);
        internal.sort_by_key(|&i| internal_key(i));
        // encode(0) = -1 sorts before encode(1) = -2
        boundary.sort_by_key(|&i| Reverse(neighbours[i]));

        let n_internal = internal.len();
        let mut face_permutation = internal;
        face_permutation.append(&mut boundary);
        let neighbours_and_patches = face_permutation.iter().map(|&i| neighbours[i]).collect();
        FragmentPermutation {
            neighbours_and_patches,
            face_permutation,
            n_internal,
        }
    }

    /// Arrival index of the face now at position `i`.
    pub fn permute_index(&self, i: usize) -> usize {
        self.face_permutation[i]
    }

    pub fn face_permutation(&self) -> &[usize] {
        &self.face_permutation
    }

    /// Reorder per-face data from arrival order to mesh order.
    pub fn permute<T>(&self, data: &mut Vec<T>) -> Result<(), CoherentMeshError> {
        apply_permutation(data, &self.face_permutation)
    }

    pub fn n_internal_faces(&self) -> usize {
        self.n_internal
    }

    /// Neighbours of the internal faces, in mesh order.
    pub fn retrieve_neighbours(&self) -> Vec<Label> {
        self.neighbours_and_patches[..self.n_internal].to_vec()
    }

    /// Encoded patch id of every boundary face, in mesh order.
    pub fn retrieve_patches(&self) -> Vec<Label> {
        self.neighbours_and_patches[self.n_internal..].to_vec()
    }

    pub fn neighbours_and_patches(&self) -> &[Label] {
        &self.neighbours_and_patches
    }
}

/// A conventional mesh re-laid out for coherent storage.
#[derive(Debug, Clone)]
pub struct SlicePermutation {
    /// `slice[i] = fragment[permutation_to_slice[i]]`
    permutation_to_slice: Vec<usize>,
    /// old point id -> new point id
    to_poly_point: Vec<Label>,
    /// new point id -> old point id
    to_slice_point: Vec<Label>,
    faces: Vec<Face>,
}

impl SlicePermutation {
    /// `owner` and `faces` are indexed by face; points are numbered
    /// `0..n_points`. Points referenced by no face are dropped.
    pub fn new(owner: &[Label], faces: &[Face], n_points: usize) -> Result<Self, CoherentMeshError> {
        if owner.len() != faces.len() {
            return Err(CoherentMeshError::SizeMismatch {
                context: "owner vs faces".into(),
                expected: faces.len(),
                found: owner.len(),
            });
        }
        let permutation_to_slice = permutation_of_sorted(owner);
        let mut faces = faces.to_vec();
        apply_permutation(&mut faces, &permutation_to_slice)?;

        let mut to_poly_point = vec![-1; n_points];
        let mut to_slice_point = Vec::with_capacity(n_points);
        for &id in faces.iter().flatten() {
            let old = label_to_index(id)?;
            let slot = to_poly_point
                .get_mut(old)
                .ok_or(CoherentMeshError::InvalidLabel(id))?;
            if *slot == -1 {
                *slot = to_slice_point.len() as Label;
                to_slice_point.push(id);
            }
        }
        renumber_faces(&mut faces, &to_poly_point)?;
        Ok(SlicePermutation {
            permutation_to_slice,
            to_poly_point,
            to_slice_point,
            faces,
        })
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn into_faces(self) -> Vec<Face> {
        self.faces
    }

    pub fn face_permutation(&self) -> &[usize] {
        &self.permutation_to_slice
    }

    /// Number of points that survive (referenced by at least one face).
    pub fn n_points(&self) -> usize {
        self.to_slice_point.len()
    }

    /// Old point id -> new point id (`-1` for unreferenced points).
    pub fn point_map(&self) -> &[Label] {
        &self.to_poly_point
    }

    /// Reorder per-face data into slice order.
    pub fn permute<T>(&self, data: &mut Vec<T>) -> Result<(), CoherentMeshError> {
        apply_permutation(data, &self.permutation_to_slice)
    }

    /// Apply the face order and point renumbering to another face list.
    pub fn apply(&self, faces: &mut Vec<Face>) -> Result<(), CoherentMeshError> {
        self.permute(faces)?;
        renumber_faces(faces, &self.to_poly_point)
    }

    /// Coordinates in slice point order.
    pub fn permute_points(&self, points: &[Point]) -> Result<Vec<Point>, CoherentMeshError> {
        self.to_slice_point
            .iter()
            .map(|&old| {
                let i = label_to_index(old)?;
                points.get(i).copied().ok_or(CoherentMeshError::InvalidLabel(old))
            })
            .collect()
    }

    /// Neighbour entry per slice-ordered face: the neighbour cell of internal
    /// faces, the encoded patch id of boundary faces.
    ///
    /// `patches` holds `(start, size)` of each boundary patch in fragment order.
    pub fn retrieve_neighbours(
        &self,
        face_neighbour: &[Label],
        patches: &[(usize, usize)],
    ) -> Result<Vec<Label>, CoherentMeshError> {
        self.permutation_to_slice
            .iter()
            .map(|&frag| {
                if let Some(&nb) = face_neighbour.get(frag) {
                    return Ok(nb);
                }
                patches
                    .iter()
                    .position(|&(start, size)| start <= frag && frag < start + size)
                    .map(|p| encode_slice_patch_id(p as Label))
                    .ok_or_else(|| {
                        CoherentMeshError::malformed(
                            "boundary",
                            format!("face {frag} is neither internal nor in a patch"),
                        )
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_first_then_patches_in_declared_order() {
        let p = FragmentPermutation::new(&[-1, 5, -2, 3, -1]);
        assert_eq!(p.neighbours_and_patches(), &[3, 5, -1, -1, -2]);
        assert_eq!(p.face_permutation(), &[3, 1, 0, 4, 2]);
        assert_eq!(p.n_internal_faces(), 2);
        assert_eq!(p.retrieve_neighbours(), vec![3, 5]);
        assert_eq!(p.retrieve_patches(), vec![-1, -1, -2]);
    }

    #[test]
    fn owner_breaks_internal_order() {
        let nb = [4, 2, -1, 3];
        let owner = [1, 1, 0, 0];
        let p = FragmentPermutation::with_owner(&nb, &owner).unwrap();
        assert_eq!(p.neighbours_and_patches(), &[3, 2, 4, -1]);
        let mut own = owner.to_vec();
        p.permute(&mut own).unwrap();
        assert_eq!(own, vec![0, 1, 1, 0]);
        assert!(FragmentPermutation::with_owner(&nb, &owner[..2]).is_err());
    }

    #[test]
    fn slice_permutation_orders_by_owner_and_first_appearance() {
        // fragment order: face 0 (owner 1), face 1 (owner 0), face 2 (boundary of 0)
        let owner = [1, 0, 0];
        let faces = vec![vec![4, 3], vec![2, 4], vec![0, 2]];
        let sp = SlicePermutation::new(&owner, &faces, 5).unwrap();
        assert_eq!(sp.face_permutation(), &[1, 2, 0]);
        assert_eq!(sp.faces(), &[vec![0, 1], vec![2, 0], vec![1, 3]]);
        assert_eq!(sp.n_points(), 4);
        assert_eq!(sp.point_map(), &[2, -1, 0, 3, 1]);

        let pts: Vec<Point> = (0..5).map(|i| [i as f64, 0.0, 0.0]).collect();
        let moved = sp.permute_points(&pts).unwrap();
        assert_eq!(moved.iter().map(|p| p[0]).collect::<Vec<_>>(), vec![2.0, 4.0, 0.0, 3.0]);

        // faces 0 and 1 internal (neighbours 2 and 1), face 2 in patch 0
        let nb = sp.retrieve_neighbours(&[2, 1], &[(2, 1)]).unwrap();
        assert_eq!(nb, vec![1, -1, 2]);
    }
}
