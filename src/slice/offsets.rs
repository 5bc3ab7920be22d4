//! Per-partition `[lower, upper)` bounds over a coherent index space.

use crate::Label;
use crate::algs::communicator::Communicator;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::CoherentMeshError;
use serde::{Deserialize, Serialize};

/// One `(lower, upper)` row per partition.
///
/// Rows are contiguous and monotone: `lower(0) == 0`,
/// `lower(p) == upper(p - 1)` and `upper(p) >= lower(p)`. A partition that
/// contributes nothing (or a value below its predecessor) collapses to a
/// zero-width row instead of a negative one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offsets {
    bounds: Vec<(Label, Label)>,
}

impl Offsets {
    /// All-gather `value` and build the table.
    ///
    /// With `accumulate` each rank contributes a count and the rows are the
    /// prefix sums; otherwise each rank contributes its upper bound.
    /// Collective.
    pub fn set<C: Communicator>(
        comm: &C,
        value: Label,
        accumulate: bool,
    ) -> Result<Self, CoherentMeshError> {
        let values = comm.all_gather_i64(value)?;
        Self::from_values(&values, accumulate)
    }

    /// Build from the already gathered per-partition values.
    pub fn from_values(values: &[Label], accumulate: bool) -> Result<Self, CoherentMeshError> {
        let mut bounds = Vec::with_capacity(values.len());
        let mut sum: Label = 0;
        let mut prev: Label = 0;
        for (partition, &value) in values.iter().enumerate() {
            let upper = if accumulate {
                sum = sum
                    .checked_add(value)
                    .ok_or(CoherentMeshError::OffsetOverflow {
                        partition,
                        sum,
                        value,
                    })?;
                sum
            } else {
                value
            };
            let upper = upper.max(prev);
            bounds.push((prev, upper));
            prev = upper;
        }
        let offsets = Offsets { bounds };
        offsets.debug_assert_invariants();
        Ok(offsets)
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Panics if `p` is not a partition of this table.
    #[inline]
    pub fn lower_bound(&self, p: usize) -> Label {
        self.bounds[p].0
    }

    /// Panics if `p` is not a partition of this table.
    #[inline]
    pub fn upper_bound(&self, p: usize) -> Label {
        self.bounds[p].1
    }

    #[inline]
    pub fn count(&self, p: usize) -> Label {
        let (lo, hi) = self.bounds[p];
        hi - lo
    }

    pub fn get(&self, p: usize) -> Option<(Label, Label)> {
        self.bounds.get(p).copied()
    }

    /// Size of the whole index space.
    pub fn total(&self) -> Label {
        self.bounds.last().map_or(0, |&(_, hi)| hi)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Label, Label)> + '_ {
        self.bounds.iter().copied()
    }

    /// Partition owning `id`, if any. Zero-width rows own nothing.
    pub fn owner_of(&self, id: Label) -> Option<usize> {
        let p = self.bounds.partition_point(|&(_, hi)| hi <= id);
        self.bounds.get(p).filter(|&&(lo, hi)| lo <= id && id < hi).map(|_| p)
    }
}

impl DebugInvariants for Offsets {
    fn validate_invariants(&self) -> Result<(), CoherentMeshError> {
        let mut prev = 0;
        for (p, &(lo, hi)) in self.bounds.iter().enumerate() {
            if lo != prev || hi < lo {
                return Err(CoherentMeshError::malformed(
                    "offsets",
                    format!("row {p} = [{lo}, {hi}) after upper bound {prev}"),
                ));
            }
            prev = hi;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use proptest::prelude::*;

    #[test]
    fn prefix_sums_with_empty_ranks() {
        let o = Offsets::from_values(&[3, 0, 2, 0], true).unwrap();
        assert_eq!(o.iter().collect::<Vec<_>>(), vec![(0, 3), (3, 3), (3, 5), (5, 5)]);
        assert_eq!(o.count(1), 0);
        assert_eq!(o.total(), 5);
        o.validate_invariants().unwrap();
    }

    #[test]
    fn raw_upper_bounds_are_clamped() {
        // A rank reporting an upper bound below its predecessor collapses to zero width.
        let o = Offsets::from_values(&[4, 2, 7, -1], false).unwrap();
        assert_eq!(o.iter().collect::<Vec<_>>(), vec![(0, 4), (4, 4), (4, 7), (7, 7)]);
        o.validate_invariants().unwrap();
    }

    #[test]
    fn all_zero_contributions() {
        let o = Offsets::from_values(&[0, 0, 0], true).unwrap();
        for p in 0..3 {
            assert_eq!(o.lower_bound(p), 0);
            assert_eq!(o.upper_bound(p), 0);
        }
    }

    #[test]
    fn overflow_is_an_error() {
        let err = Offsets::from_values(&[i64::MAX, 1], true).unwrap_err();
        assert!(matches!(
            err,
            CoherentMeshError::OffsetOverflow { partition: 1, .. }
        ));
    }

    #[test]
    fn owner_lookup_skips_empty_rows() {
        let o = Offsets::from_values(&[2, 0, 3], true).unwrap();
        assert_eq!(o.owner_of(0), Some(0));
        assert_eq!(o.owner_of(2), Some(2));
        assert_eq!(o.owner_of(4), Some(2));
        assert_eq!(o.owner_of(5), None);
        assert_eq!(o.owner_of(-1), None);
    }

    #[test]
    fn serial_set_is_one_row() {
        let o = Offsets::set(&NoComm, 6, true).unwrap();
        assert_eq!(o.len(), 1);
        assert_eq!(o.get(0), Some((0, 6)));
    }

    proptest! {
        #[test]
        fn rows_tile_the_index_space(
            values in proptest::collection::vec(-5i64..50, 0..12),
            accumulate in any::<bool>(),
        ) {
            let o = Offsets::from_values(&values, accumulate).unwrap();
            prop_assert_eq!(o.len(), values.len());
            prop_assert!(o.validate_invariants().is_ok());
            let covered: Label = (0..o.len()).map(|p| o.count(p)).sum();
            prop_assert_eq!(covered, o.total());
        }
    }
}
