//! Invariant checking for the slicing data structures.
//!
//! Offsets, slices and the mesh itself validate their structural rules
//! through [`DebugInvariants`]. Checks are free in release builds unless the
//! `check-invariants` feature is on.

use crate::mesh_error::CoherentMeshError;

/// Structural self-check.
pub trait DebugInvariants {
    /// Validate invariants and return the first violation found.
    fn validate_invariants(&self) -> Result<(), CoherentMeshError>;

    /// Panics on the first violation in debug builds (or with `check-invariants`).
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "structural check failed");
    }
}

/// Run a fallible check and panic with context when invariant checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
