//! Uniformity tags and their global reduction.
//!
//! A field that is uniform on every rank with the same value is written as
//! one `uniform` entry; anything else goes to coherent storage. Each rank
//! tags its local data, the tags are reduced with
//! [`uniformity_compare_op`], and every rank ends up with the same decision.

use crate::algs::communicator::Communicator;
use crate::algs::wire;
use crate::mesh_error::{CoherentMeshError, index_to_label, label_to_index};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Uniformity {
    #[default]
    Empty,
    Uniform,
    NonUniform,
}

impl Uniformity {
    fn code(self) -> f64 {
        match self {
            Uniformity::Empty => 0.0,
            Uniformity::Uniform => 1.0,
            Uniformity::NonUniform => 2.0,
        }
    }

    fn from_code(c: f64) -> Option<Self> {
        match c as i64 {
            0 => Some(Uniformity::Empty),
            1 => Some(Uniformity::Uniform),
            2 => Some(Uniformity::NonUniform),
            _ => None,
        }
    }
}

/// Classify `n_components`-tuples: no tuples, all equal to the first, or not.
pub fn determine_uniformity(values: &[f64], n_components: usize) -> Uniformity {
    let n = n_components.max(1);
    let Some(first) = values.get(..n) else {
        return Uniformity::Empty;
    };
    if values.chunks_exact(n).all(|c| c == first) {
        Uniformity::Uniform
    } else {
        Uniformity::NonUniform
    }
}

/// Uniformity plus the first element, which is what ranks compare.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldTag {
    uniformity: Uniformity,
    first: Vec<f64>,
}

impl FieldTag {
    pub fn new(uniformity: Uniformity, first: Vec<f64>) -> Self {
        FieldTag { uniformity, first }
    }

    pub fn of_values(values: &[f64], n_components: usize) -> Self {
        let n = n_components.max(1);
        FieldTag {
            uniformity: determine_uniformity(values, n),
            first: values.get(..n).map(<[f64]>::to_vec).unwrap_or_default(),
        }
    }

    pub fn uniformity(&self) -> Uniformity {
        self.uniformity
    }

    pub fn first_element(&self) -> &[f64] {
        &self.first
    }

    pub fn is_uniform(&self) -> bool {
        self.uniformity == Uniformity::Uniform
    }
}

/// Combine two ranks' tags for the same field.
pub fn uniformity_compare_op(x: &FieldTag, y: &FieldTag) -> FieldTag {
    use Uniformity::*;
    match (x.uniformity, y.uniformity) {
        (NonUniform, _) | (_, NonUniform) => FieldTag {
            uniformity: NonUniform,
            first: x.first.clone(),
        },
        (Empty, _) => y.clone(),
        (Uniform, Uniform) if x.first != y.first => FieldTag {
            uniformity: NonUniform,
            first: x.first.clone(),
        },
        (Uniform, _) => x.clone(),
    }
}

fn encode_tags(tags: &[FieldTag]) -> Vec<f64> {
    let mut flat = Vec::new();
    for t in tags {
        flat.push(t.uniformity.code());
        flat.push(t.first.len() as f64);
        flat.extend_from_slice(&t.first);
    }
    flat
}

fn decode_tags(src: usize, flat: &[f64]) -> Result<Vec<FieldTag>, CoherentMeshError> {
    let bad = || CoherentMeshError::comm(src, "truncated field tag list");
    let mut out = Vec::new();
    let mut i = 0;
    while i < flat.len() {
        let uniformity = Uniformity::from_code(flat[i]).ok_or_else(bad)?;
        let n = label_to_index(*flat.get(i + 1).ok_or_else(bad)? as i64)?;
        let first = flat.get(i + 2..i + 2 + n).ok_or_else(bad)?.to_vec();
        out.push(FieldTag { uniformity, first });
        i += 2 + n;
    }
    Ok(out)
}

/// All-reduce one tag per field with [`uniformity_compare_op`]. Collective;
/// every rank must pass the same number of tags.
pub fn reduce_tags<C: Communicator>(comm: &C, tags: &[FieldTag]) -> Result<Vec<FieldTag>, CoherentMeshError> {
    let mine = wire::encode_scalars(&encode_tags(tags)).map_err(|e| CoherentMeshError::comm(comm.rank(), e))?;
    let gathered = comm.all_gather_bytes(&mine)?;
    let mut acc: Option<Vec<FieldTag>> = None;
    for (src, bytes) in gathered.iter().enumerate() {
        let flat = wire::decode_scalars(bytes).map_err(|e| CoherentMeshError::comm(src, e))?;
        let theirs = decode_tags(src, &flat)?;
        if theirs.len() != tags.len() {
            return Err(CoherentMeshError::SizeMismatch {
                context: format!("field tags from rank {src}"),
                expected: tags.len(),
                found: theirs.len(),
            });
        }
        acc = Some(match acc {
            None => theirs,
            Some(mine) => mine
                .iter()
                .zip(&theirs)
                .map(|(x, y)| uniformity_compare_op(x, y))
                .collect(),
        });
    }
    log::trace!("reduced {} field tags over {} ranks", tags.len(), index_to_label(gathered.len())?);
    Ok(acc.unwrap_or_default())
}
