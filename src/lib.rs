#![cfg_attr(docsrs, feature(doc_cfg))]
//! # coherent-mesh
//!
//! coherent-mesh reads and writes unstructured polyhedral meshes and their
//! fields in a *coherent* layout: a handful of global, one-dimensional
//! blocks (faces grouped by owner cell, points numbered in first-use order)
//! that every rank slices by contiguous windows instead of keeping one
//! decomposed copy of the case per process.
//!
//! ## Features
//! - [`slice::Offsets`] and [`slice::Slice`]: per-rank windows of a global
//!   index space, with local renumbering of imported ids
//! - a [`component::ComponentTree`] that derives every window from the one
//!   above it, reading only what the rank needs
//! - [`mesh::CoherentMesh`]: per-rank reconstruction with processor
//!   boundaries exchanged between neighbouring partitions
//! - a non-blocking consensus for discovering senders without a global
//!   all-to-all ([`algs::consensus`])
//! - field streams [`io::IFCstream`] / [`io::OFCstream`] that keep uniform
//!   values inline and everything else in coherent blocks
//! - pluggable transport: serial [`algs::communicator::NoComm`], threaded
//!   [`algs::communicator::LocalComm`] and MPI (`mpi-support`)
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! coherent-mesh = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! ## Determinism
//!
//! Exchanges always receive from lower ranks before sending to higher
//! ones, and every ordering (faces, patches, imported points) depends only
//! on the stored blocks and the rank count.

/// Global or local index of a cell, face or point. Negative values are
/// reserved for boundary patch ids in the neighbour block.
pub type Label = i64;
/// Point coordinates.
pub type Point = [f64; 3];
/// A face as its point ids, in order.
pub type Face = Vec<Label>;

pub mod algs;
pub mod component;
pub mod config;
pub mod debug_invariants;
pub mod io;
pub mod mesh;
pub mod mesh_error;
pub mod slice;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::component::{ComponentTree, DataComponent, InitStrategy, OffsetStrategy};
    pub use crate::config::CoherentConfig;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::io::{
        BlockKind, Dictionary, FieldDataEntry, FieldKind, FileStore, IFCstream, MemoryStore,
        OFCstream, SliceStream, StreamContext,
    };
    pub use crate::mesh::{CoherentLayout, CoherentMesh, MeshState, PolyPatch};
    pub use crate::mesh_error::CoherentMeshError;
    pub use crate::slice::{Offsets, Slice};
    pub use crate::{Face, Label, Point};
}
