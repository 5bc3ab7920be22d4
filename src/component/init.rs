//! How a component fills itself once its window is known.

use crate::Label;
use crate::algs::communicator::Communicator;
use crate::io::store::{SliceStream, Window};
use crate::mesh_error::{CoherentMeshError, index_to_label, label_to_index};
use crate::slice::offsets::Offsets;

/// Flat field values with a fixed number of components per element.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldData {
    pub values: Vec<f64>,
    pub n_components: usize,
}

impl FieldData {
    pub fn len(&self) -> usize {
        self.values.len() / self.n_components.max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What a strategy produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Populated {
    Labels(Vec<Label>),
    Field(FieldData),
    /// The table plus `[lower, upper]` of this rank.
    Offsets(Offsets, Vec<Label>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStrategy {
    /// Read a label block, whole if the window is unset.
    FromStore { block: String },
    /// Read a scalar block of `n_components`-tuples, whole if the window is unset.
    PrimitivesFromStore { block: String, n_components: usize },
    /// No per-partition table: split the block evenly, last rank takes the
    /// remainder, every window overlaps the next by one entry.
    NaivePartitioning { block: String },
    /// Collective offsets from this node's window: the count when
    /// accumulating, the start otherwise.
    Offsets { accumulate: bool },
}

impl InitStrategy {
    pub fn from_store(block: impl Into<String>) -> Self {
        InitStrategy::FromStore { block: block.into() }
    }

    pub fn primitives(block: impl Into<String>, n_components: usize) -> Self {
        InitStrategy::PrimitivesFromStore {
            block: block.into(),
            n_components,
        }
    }

    pub fn naive_partitioning(block: impl Into<String>) -> Self {
        InitStrategy::NaivePartitioning { block: block.into() }
    }

    pub fn offsets(accumulate: bool) -> Self {
        InitStrategy::Offsets { accumulate }
    }

    pub fn populate<C: Communicator, S: SliceStream>(
        &self,
        comm: &C,
        store: &S,
        start: Label,
        count: Label,
    ) -> Result<Populated, CoherentMeshError> {
        match self {
            InitStrategy::FromStore { block } => {
                Ok(Populated::Labels(store.get_labels(block, window(start, count)?)?))
            }
            InitStrategy::PrimitivesFromStore {
                block,
                n_components,
            } => {
                let k = (*n_components).max(1);
                let scaled = window(start, count)?.map(|(s, c)| (s * k, c * k));
                let values = store.get_scalars(block, scaled)?;
                if values.len() % k != 0 {
                    return Err(CoherentMeshError::malformed(
                        block,
                        format!("{} values do not form {n_components}-tuples", values.len()),
                    ));
                }
                Ok(Populated::Field(FieldData {
                    values,
                    n_components: *n_components,
                }))
            }
            InitStrategy::NaivePartitioning { block } => {
                let (s, c) = naive_window(block, store.buffer_size(block)?, comm.rank(), comm.size())?;
                Ok(Populated::Labels(store.get_labels(block, Some((s, c)))?))
            }
            InitStrategy::Offsets { accumulate } => {
                let value = if *accumulate { count } else { start };
                let offsets = Offsets::set(comm, value, *accumulate)?;
                let me = comm.rank();
                let row = vec![offsets.lower_bound(me), offsets.upper_bound(me)];
                Ok(Populated::Offsets(offsets, row))
            }
        }
    }
}

fn window(start: Label, count: Label) -> Result<Window, CoherentMeshError> {
    if start < 0 || count < 0 {
        return Ok(None);
    }
    Ok(Some((label_to_index(start)?, label_to_index(count)?)))
}

/// `(start, count)` of an even split of `size - 1` intervals with one
/// overlap entry.
pub fn naive_window(
    block: &str,
    size: usize,
    rank: usize,
    n_procs: usize,
) -> Result<(usize, usize), CoherentMeshError> {
    if size == 0 || n_procs == 0 {
        return Err(CoherentMeshError::malformed(block, "cannot partition an empty block"));
    }
    let total = index_to_label(size - 1)?;
    let n = index_to_label(n_procs)?;
    let me = index_to_label(rank)?;
    let part = total / n;
    let start = part * me;
    let count = (if rank + 1 == n_procs { total - start } else { part }) + 1;
    Ok((label_to_index(start)?, label_to_index(count)?))
}
