//! Small index utilities shared by the permutations and the mesh exchange.

use crate::mesh_error::{CoherentMeshError, label_to_index};
use crate::{Face, Label};
use itertools::Itertools;

/// Indices that stably sort `data`.
pub fn permutation_of_sorted<T: Ord>(data: &[T]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..data.len()).collect();
    idx.sort_by(|&i, &j| data[i].cmp(&data[j]));
    idx
}

/// `data[i] <- data[perm[i]]`. `perm` must be a bijection of `0..data.len()`.
pub fn apply_permutation<T>(data: &mut Vec<T>, perm: &[usize]) -> Result<(), CoherentMeshError> {
    if perm.len() != data.len() {
        return Err(CoherentMeshError::InvalidPermutation(format!(
            "permutation of length {} applied to {} elements",
            perm.len(),
            data.len()
        )));
    }
    let mut src: Vec<Option<T>> = data.drain(..).map(Some).collect();
    let mut out = Vec::with_capacity(perm.len());
    for &i in perm {
        let v = src
            .get_mut(i)
            .and_then(Option::take)
            .ok_or_else(|| CoherentMeshError::InvalidPermutation(format!("index {i} repeated or out of range")))?;
        out.push(v);
    }
    *data = out;
    Ok(())
}

/// `inv[perm[i]] == i`.
pub fn invert_permutation(perm: &[usize]) -> Vec<usize> {
    let mut inv = vec![0; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inv[p] = i;
    }
    inv
}

/// Rewrite every point id of every face through `map` (`new = map[old]`).
pub fn renumber_faces(faces: &mut [Face], map: &[Label]) -> Result<(), CoherentMeshError> {
    for id in faces.iter_mut().flatten() {
        let old = label_to_index(*id)?;
        *id = *map.get(old).ok_or(CoherentMeshError::InvalidLabel(*id))?;
    }
    Ok(())
}

/// Opposite orientation, same first point.
pub fn reverse_face(face: &mut Face) {
    if face.len() > 1 {
        face[1..].reverse();
    }
}

/// Sorted, deduplicated point ids of `faces` that satisfy `keep`.
pub fn face_points_where<F>(faces: &[Face], keep: F) -> Vec<Label>
where
    F: Fn(Label) -> bool,
{
    faces
        .iter()
        .flatten()
        .copied()
        .filter(|&id| keep(id))
        .sorted_unstable()
        .dedup()
        .collect()
}

/// Positions in `values` whose entry satisfies `keep`.
pub fn positions_where<F>(values: &[Label], keep: F) -> Vec<usize>
where
    F: Fn(Label) -> bool,
{
    values.iter().positions(|&v| keep(v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_sort_permutation() {
        let data = [3, 1, 3, 0];
        let p = permutation_of_sorted(&data);
        assert_eq!(p, vec![3, 1, 0, 2]);
        let mut v = data.to_vec();
        apply_permutation(&mut v, &p).unwrap();
        assert_eq!(v, vec![0, 1, 3, 3]);
        assert_eq!(invert_permutation(&p), vec![2, 1, 3, 0]);
    }

    #[test]
    fn reversed_face_keeps_its_first_point() {
        let mut f = vec![4, 7, 9, 2];
        reverse_face(&mut f);
        assert_eq!(f, vec![4, 2, 9, 7]);
        let mut single = vec![3];
        reverse_face(&mut single);
        assert_eq!(single, vec![3]);
    }

    #[test]
    fn point_and_position_filters() {
        let faces = vec![vec![5, 1, 3], vec![3, 8, 5]];
        assert_eq!(face_points_where(&faces, |id| id >= 3), vec![3, 5, 8]);
        assert_eq!(positions_where(&[2, -1, 7, -1], |v| v < 0), vec![1, 3]);
    }

    #[test]
    fn non_bijection_is_rejected() {
        let mut v = vec!['a', 'b', 'c'];
        assert!(apply_permutation(&mut v, &[0, 0, 1]).is_err());
        let mut w = vec![1, 2];
        assert!(apply_permutation(&mut w, &[0]).is_err());
    }

    #[test]
    fn face_point_collection() {
        let faces = vec![vec![5, 2, 9], vec![9, 2, 1]];
        assert_eq!(face_points_where(&faces, |id| id >= 2), vec![2, 5, 9]);
        let mut f = faces.clone();
        renumber_faces(&mut f, &[0, 10, 20, 30, 40, 50, 60, 70, 80, 90]).unwrap();
        assert_eq!(f, vec![vec![50, 20, 90], vec![90, 20, 10]]);
    }
}
