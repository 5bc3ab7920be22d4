//! Negative-space encoding of boundary patch ids inside neighbour arrays.
//!
//! A neighbour entry `>= 0` is a cell; a negative entry names the patch the
//! face belongs to. Physical and processor patches share this space.

use crate::Label;

/// Patch index `x >= 0` to its neighbour-array encoding.
#[inline]
pub const fn encode_slice_patch_id(x: Label) -> Label {
    -(x + 1)
}

/// Inverse of [`encode_slice_patch_id`].
#[inline]
pub const fn decode_slice_patch_id(e: Label) -> Label {
    -(e + 1)
}

/// True for neighbour entries that name a patch rather than a cell.
#[inline]
pub const fn is_patch_id(e: Label) -> bool {
    e < 0
}
