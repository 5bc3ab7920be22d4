//! Message passing plumbing: transport, wire records, consensus.

pub mod communicator;
pub mod consensus;
pub mod wire;

pub use consensus::{consensus_counts, consensus_labels, nonblocking_consensus};
