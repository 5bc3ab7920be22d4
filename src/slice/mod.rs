//! Index-space slicing: offsets, slices, patch ids and face orderings.

pub mod helpers;
pub mod offsets;
pub mod patch_id;
pub mod permutation;
pub mod proc_patch;
#[allow(clippy::module_inception)]
pub mod slice;

pub use offsets::Offsets;
pub use patch_id::{decode_slice_patch_id, encode_slice_patch_id};
pub use permutation::{FragmentPermutation, SlicePermutation};
pub use proc_patch::{PatchIdCounter, ProcessorPatch};
pub use slice::{Slice, SliceMap};
