//! Window strategies: a node's `(start, count)` as a pure function of its
//! parent's data. `-1` means "unset" (read the whole block).

use crate::Label;

pub const UNSET: Label = -1;

/// How a node derives one half of its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetStrategy {
    Unset,
    /// This rank's number.
    FromRank,
    /// The constant 2 (a start/end pair).
    Two,
    Front,
    BackMinusFront,
    BackMinusFrontPlusOne,
    Size,
    SizeMinusOne,
    MaxPlusOne,
    /// Number of parent entries `>= v`.
    CountGeq(Label),
    /// Number of parent entries `== v`.
    CountEq(Label),
}

impl OffsetStrategy {
    pub fn apply(&self, parent: &[Label], rank: usize) -> Label {
        match *self {
            OffsetStrategy::Unset => UNSET,
            OffsetStrategy::FromRank => start_from_rank(rank),
            OffsetStrategy::Two => count_two(parent),
            OffsetStrategy::Front => start_from_front(parent),
            OffsetStrategy::BackMinusFront => count_from_front(parent),
            OffsetStrategy::BackMinusFrontPlusOne => count_from_front_plus_one(parent),
            OffsetStrategy::Size => count_from_size(parent),
            OffsetStrategy::SizeMinusOne => offset_by_size_minus_one(parent),
            OffsetStrategy::MaxPlusOne => offset_by_max_plus_one(parent),
            OffsetStrategy::CountGeq(v) => count_geq(parent, v),
            OffsetStrategy::CountEq(v) => count_eq(parent, v),
        }
    }
}

pub fn start_from_rank(rank: usize) -> Label {
    rank as Label
}

pub fn count_two(_parent: &[Label]) -> Label {
    2
}

pub fn start_from_front(parent: &[Label]) -> Label {
    parent.first().copied().unwrap_or(0)
}

pub fn count_from_front(parent: &[Label]) -> Label {
    match (parent.first(), parent.last()) {
        (Some(f), Some(b)) => b - f,
        _ => 0,
    }
}

pub fn count_from_front_plus_one(parent: &[Label]) -> Label {
    count_from_front(parent) + 1
}

pub fn count_from_size(parent: &[Label]) -> Label {
    parent.len() as Label
}

pub fn offset_by_size_minus_one(parent: &[Label]) -> Label {
    (parent.len() as Label - 1).max(0)
}

/// One past the largest id; 0 for an empty parent.
pub fn offset_by_max_plus_one(parent: &[Label]) -> Label {
    parent.iter().copied().max().map_or(0, |m| m + 1)
}

pub fn count_geq(parent: &[Label], v: Label) -> Label {
    parent.iter().filter(|&&x| x >= v).count() as Label
}

pub fn count_eq(parent: &[Label], v: Label) -> Label {
    parent.iter().filter(|&&x| x == v).count() as Label
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_on_owner_starts() {
        let starts = [4, 6, 9, 9];
        assert_eq!(OffsetStrategy::Front.apply(&starts, 0), 4);
        assert_eq!(OffsetStrategy::BackMinusFront.apply(&starts, 0), 5);
        assert_eq!(OffsetStrategy::BackMinusFrontPlusOne.apply(&starts, 0), 6);
        assert_eq!(OffsetStrategy::SizeMinusOne.apply(&starts, 0), 3);
        assert_eq!(OffsetStrategy::Unset.apply(&starts, 3), UNSET);
        assert_eq!(OffsetStrategy::FromRank.apply(&[], 3), 3);
    }

    #[test]
    fn strategies_on_neighbours() {
        let nb = [3, -1, 5, -2, -1, 0];
        assert_eq!(count_geq(&nb, 0), 3);
        assert_eq!(count_eq(&nb, -1), 2);
        assert_eq!(offset_by_max_plus_one(&nb), 6);
        assert_eq!(offset_by_max_plus_one(&[]), 0);
        assert_eq!(count_from_size(&nb), 6);
        assert_eq!(count_from_front(&[]), 0);
    }
}
