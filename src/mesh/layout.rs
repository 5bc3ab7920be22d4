//! Conversion of a conventional (whole, face-ordered) mesh into the coherent
//! block layout that [`super::CoherentMesh`] slices.

use crate::config::BlockNames;
use crate::io::context::StreamContext;
use crate::io::dictionary::{Dictionary, Entry, Token};
use crate::io::store::{BlockKind, SliceStream};
use crate::mesh::boundary::PolyPatch;
use crate::mesh_error::{CoherentMeshError, index_to_label, label_to_index};
use crate::slice::SlicePermutation;
use crate::{Face, Label, Point};

/// The coherent blocks of one mesh, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct CoherentLayout {
    pub owner_starts: Vec<Label>,
    pub neighbours: Vec<Label>,
    pub face_starts: Vec<Label>,
    pub faces: Vec<Label>,
    pub points: Vec<f64>,
    pub partition_starts: Option<Vec<Label>>,
    pub patch_names: Vec<String>,
}

impl CoherentLayout {
    /// `owner` covers every face, `neighbour` only the internal ones (which
    /// come first); `patches` tile the remaining faces in declared order.
    pub fn from_global(
        owner: &[Label],
        neighbour: &[Label],
        faces: &[Face],
        points: &[Point],
        patches: &[PolyPatch],
    ) -> Result<Self, CoherentMeshError> {
        let perm = SlicePermutation::new(owner, faces, points.len())?;
        let ranges: Vec<(usize, usize)> = patches.iter().map(|p| (p.start, p.size)).collect();
        let neighbours = perm.retrieve_neighbours(neighbour, &ranges)?;

        let mut sorted_owner = owner.to_vec();
        perm.permute(&mut sorted_owner)?;
        let n_cells = owner
            .iter()
            .chain(neighbour)
            .copied()
            .max()
            .map_or(0, |m| m + 1);
        let mut owner_starts = vec![0; label_to_index(n_cells)? + 1];
        for &o in &sorted_owner {
            owner_starts[label_to_index(o)? + 1] += 1;
        }
        for c in 1..owner_starts.len() {
            owner_starts[c] += owner_starts[c - 1];
        }

        let mut face_starts = Vec::with_capacity(faces.len() + 1);
        face_starts.push(0);
        let mut flat = Vec::new();
        for face in perm.faces() {
            flat.extend_from_slice(face);
            face_starts.push(index_to_label(flat.len())?);
        }
        let points = perm
            .permute_points(points)?
            .into_iter()
            .flatten()
            .collect();

        log::debug!(
            "coherent layout: {n_cells} cells, {} faces, {} points, {} patches",
            faces.len(),
            perm.n_points(),
            patches.len()
        );
        Ok(CoherentLayout {
            owner_starts,
            neighbours,
            face_starts,
            faces: flat,
            points,
            partition_starts: None,
            patch_names: patches.iter().map(|p| p.name.clone()).collect(),
        })
    }

    /// Record an explicit cell partition: `cell_starts[p]..cell_starts[p+1]`
    /// are the cells of rank `p`.
    pub fn with_partitions(mut self, cell_starts: Vec<Label>) -> Result<Self, CoherentMeshError> {
        let n_cells = index_to_label(self.owner_starts.len().saturating_sub(1))?;
        let ok = cell_starts.first() == Some(&0)
            && cell_starts.last() == Some(&n_cells)
            && cell_starts.windows(2).all(|w| w[0] <= w[1]);
        if !ok {
            return Err(CoherentMeshError::malformed(
                "partitionStarts",
                format!("{cell_starts:?} does not partition {n_cells} cells"),
            ));
        }
        self.partition_starts = Some(cell_starts);
        Ok(self)
    }

    pub fn n_cells(&self) -> usize {
        self.owner_starts.len().saturating_sub(1)
    }

    /// Write every block under `path`, plus the `boundary` header.
    pub fn write<S: SliceStream>(&self, ctx: &mut StreamContext<S>, path: &str) -> Result<(), CoherentMeshError> {
        let blocks: BlockNames = ctx.config().blocks.clone();
        let store = ctx.access(BlockKind::Mesh, path)?;
        let mut label_blocks: Vec<(&str, &[Label])> = vec![
            (blocks.owner_starts.as_str(), self.owner_starts.as_slice()),
            (blocks.neighbours.as_str(), self.neighbours.as_slice()),
            (blocks.face_starts.as_str(), self.face_starts.as_slice()),
            (blocks.faces.as_str(), self.faces.as_slice()),
        ];
        if let Some(ps) = &self.partition_starts {
            label_blocks.push((blocks.partition_starts.as_str(), ps.as_slice()));
        }
        for (name, v) in label_blocks {
            store.put_labels(name, v.len(), 0, v)?;
        }
        store.put_scalars(&blocks.points, self.points.len(), 0, &self.points)?;

        let mut boundary = Dictionary::new("boundary");
        for name in &self.patch_names {
            let mut d = Dictionary::new(boundary.scoped(name));
            d.set("type", Entry::Primitive(vec![Token::Word("patch".into())]));
            boundary.set(name.clone(), Entry::Dict(d));
        }
        store.put_text("boundary", &boundary.to_string())
    }
}
