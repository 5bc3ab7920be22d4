//! One partition's window over a coherent index space, plus imported ids.

use crate::Label;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::{CoherentMeshError, index_to_label};
use crate::slice::offsets::Offsets;

/// Global id -> local id for entities imported from other partitions.
pub type SliceMap = hashbrown::HashMap<Label, Label>;

/// `[bottom, top)` of one partition, extended by an append-only import map.
///
/// Native ids map to `id - bottom`; imported ids are numbered after the
/// native range in the order they were appended. That order is also the
/// order in which their payload (coordinates, field values) is appended, so
/// it must never depend on hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    partition: usize,
    bottom: Label,
    top: Label,
    map: SliceMap,
}

impl Slice {
    pub fn new(partition: usize, bottom: Label, top: Label) -> Self {
        Slice {
            partition,
            bottom,
            top: top.max(bottom),
            map: SliceMap::new(),
        }
    }

    /// The window of `partition` in `offsets`.
    pub fn from_offsets(partition: usize, offsets: &Offsets) -> Result<Self, CoherentMeshError> {
        let (lo, hi) = offsets.get(partition).ok_or_else(|| {
            CoherentMeshError::malformed(
                "offsets",
                format!("no row for partition {partition} (table has {})", offsets.len()),
            )
        })?;
        Ok(Slice::new(partition, lo, hi))
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn bottom(&self) -> Label {
        self.bottom
    }

    pub fn top(&self) -> Label {
        self.top
    }

    /// Entities owned by this partition.
    pub fn num_native(&self) -> Label {
        self.top - self.bottom
    }

    pub fn num_imported(&self) -> usize {
        self.map.len()
    }

    /// Pure range test.
    #[inline]
    pub fn contains(&self, id: Label) -> bool {
        self.bottom <= id && id < self.top
    }

    /// True when `convert(id)` would succeed.
    #[inline]
    pub fn exist(&self, id: Label) -> bool {
        self.contains(id) || self.map.contains_key(&id)
    }

    pub fn convert(&self, id: Label) -> Result<Label, CoherentMeshError> {
        if self.contains(id) {
            return Ok(id - self.bottom);
        }
        self.map
            .get(&id)
            .copied()
            .ok_or(CoherentMeshError::UnresolvedId {
                id,
                partition: self.partition,
                bottom: self.bottom,
                top: self.top,
            })
    }

    /// Convert every id in place.
    pub fn convert_all(&self, ids: &mut [Label]) -> Result<(), CoherentMeshError> {
        for id in ids.iter_mut() {
            *id = self.convert(*id)?;
        }
        Ok(())
    }

    /// Import `ids` in iteration order. Ids that already resolve keep their
    /// local id and do not consume a new one.
    pub fn append<I: IntoIterator<Item = Label>>(&mut self, ids: I) -> Result<(), CoherentMeshError> {
        for id in ids {
            if self.exist(id) {
                continue;
            }
            let local = self.num_native() + index_to_label(self.map.len())?;
            self.map.insert(id, local);
        }
        Ok(())
    }

    /// How many of `ids` fall inside the native window.
    pub fn count_in(&self, ids: &[Label]) -> usize {
        ids.iter().filter(|&&id| self.contains(id)).count()
    }

    /// Imported `(global, local)` pairs ordered by local id.
    pub fn imported(&self) -> Vec<(Label, Label)> {
        let mut v: Vec<_> = self.map.iter().map(|(&g, &l)| (g, l)).collect();
        v.sort_unstable_by_key(|&(_, l)| l);
        v
    }
}

impl DebugInvariants for Slice {
    fn validate_invariants(&self) -> Result<(), CoherentMeshError> {
        let native = self.num_native();
        let mut locals: Vec<Label> = self.map.values().copied().collect();
        locals.sort_unstable();
        for (k, &l) in locals.iter().enumerate() {
            if l != native + index_to_label(k)? {
                return Err(CoherentMeshError::malformed(
                    "slice",
                    format!("imported local ids are not contiguous after {native}"),
                ));
            }
        }
        if let Some(g) = self.map.keys().find(|&&g| self.contains(g)) {
            return Err(CoherentMeshError::malformed(
                "slice",
                format!("native id {g} also imported"),
            ));
        }
        Ok(())
    }
}
