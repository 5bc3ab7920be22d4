//! Boundary patch table of a reconstructed mesh.

use crate::Label;
use crate::mesh_error::CoherentMeshError;
use crate::slice::patch_id::encode_slice_patch_id;
use crate::slice::ProcessorPatch;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    Physical,
    Processor { my_rank: usize, partner: usize },
}

/// A contiguous run of boundary faces in mesh order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolyPatch {
    pub name: String,
    pub kind: PatchKind,
    pub start: usize,
    pub size: usize,
}

impl PolyPatch {
    pub fn is_processor(&self) -> bool {
        matches!(self.kind, PatchKind::Processor { .. })
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.size
    }
}

/// Lay out the patches over `patch_ids` (encoded id per boundary face, in
/// mesh order). Physical patch `i` has id `encode(i)`; processor patches
/// follow with their own ids. Empty patches start where the previous one ends.
pub fn build_patches(
    n_internal: usize,
    patch_ids: &[Label],
    names: &[String],
    procs: &[ProcessorPatch],
) -> Result<Vec<PolyPatch>, CoherentMeshError> {
    let mut out = Vec::with_capacity(names.len() + procs.len());
    let mut next = n_internal;
    let physical = names
        .iter()
        .enumerate()
        .map(|(i, name)| (encode_slice_patch_id(i as Label), name.clone(), PatchKind::Physical));
    let processor = procs.iter().map(|p| {
        let kind = PatchKind::Processor {
            my_rank: p.my_rank(),
            partner: p.partner(),
        };
        (p.id(), p.name().to_string(), kind)
    });
    for (id, name, kind) in physical.chain(processor) {
        let size = patch_ids.iter().filter(|&&p| p == id).count();
        let start = patch_ids
            .iter()
            .position(|&p| p == id)
            .map_or(next, |first| n_internal + first);
        if start < next {
            return Err(CoherentMeshError::malformed(
                "boundary",
                format!("patch `{name}` starts at face {start}, inside the previous patch"),
            ));
        }
        next = start + size;
        out.push(PolyPatch { name, kind, start, size });
    }
    let covered = next - n_internal;
    if covered != patch_ids.len() {
        return Err(CoherentMeshError::SizeMismatch {
            context: "boundary faces covered by patches".into(),
            expected: patch_ids.len(),
            found: covered,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::{PatchIdCounter, Slice};

    #[test]
    fn physical_then_processor() {
        let names = vec!["inlet".to_string(), "wall".to_string(), "outlet".to_string()];
        let mut counter = PatchIdCounter::new();
        let partner = Slice::new(1, 10, 20);
        let proc = ProcessorPatch::new(0, &partner, &[12], 3, &mut counter);
        // inlet x2, wall empty, outlet x1, processor x1
        let ids = [-1, -1, -3, proc.id()];
        let patches = build_patches(5, &ids, &names, &[proc]).unwrap();
        let ranges: Vec<_> = patches.iter().map(|p| p.range()).collect();
        assert_eq!(ranges, vec![5..7, 7..7, 7..8, 8..9]);
        assert!(patches[3].is_processor());
        assert_eq!(patches[3].name, "procBoundary0to1");
    }

    #[test]
    fn uncovered_faces_are_an_error() {
        let names = vec!["inlet".to_string()];
        assert!(build_patches(0, &[-1, -2], &names, &[]).is_err());
    }
}
