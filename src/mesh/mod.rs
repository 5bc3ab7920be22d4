//! Per-rank reconstruction of a coherently stored mesh, and the reverse
//! conversion of a conventional mesh into the coherent layout.

pub mod boundary;
pub mod coherent_mesh;
pub mod exchange;
pub mod layout;

pub use boundary::{PatchKind, PolyPatch};
pub use coherent_mesh::CoherentMesh;
pub use exchange::ExchangeSlot;
pub use layout::CoherentLayout;

use crate::mesh_error::CoherentMeshError;

/// Construction stages of a [`CoherentMesh`], in the only order they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum MeshState {
    #[default]
    Unread,
    TopologyTreeInitialized,
    BoundaryOffsetsAppended,
    BoundaryTreeInitialized,
    /// Skipped in serial runs.
    PeerExchangeComplete,
    Renumbered,
    PermutationBuilt,
}

impl MeshState {
    /// Move forward to `next`; going back or standing still is an error.
    pub fn advance(&mut self, next: MeshState) -> Result<(), CoherentMeshError> {
        if next <= *self {
            return Err(CoherentMeshError::MeshState {
                found: *self,
                required: next,
            });
        }
        log::debug!("mesh state {:?} -> {next:?}", *self);
        *self = next;
        Ok(())
    }

    /// Error unless at least `required` has been reached.
    pub fn require(&self, required: MeshState) -> Result<(), CoherentMeshError> {
        if *self < required {
            return Err(CoherentMeshError::MeshState {
                found: *self,
                required,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_only_move_forward() {
        let mut s = MeshState::default();
        s.advance(MeshState::TopologyTreeInitialized).unwrap();
        s.advance(MeshState::Renumbered).unwrap();
        assert!(s.advance(MeshState::PeerExchangeComplete).is_err());
        assert!(s.advance(MeshState::Renumbered).is_err());
        assert!(s.require(MeshState::BoundaryTreeInitialized).is_ok());
        assert!(s.require(MeshState::PermutationBuilt).is_err());
    }
}
