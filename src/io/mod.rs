//! Coherent storage and field streams.
//!
//! Blocks live behind the [`SliceStream`] trait; [`StreamContext`] carries
//! the backend and configuration into every read and write. Field headers
//! are [`Dictionary`] text whose non-uniform entries point at blocks.

pub mod context;
pub mod dictionary;
pub mod field_data;
pub mod field_tag;
pub mod file_store;
pub mod ifc_stream;
pub mod ofc_stream;
pub mod store;

pub use context::StreamContext;
pub use dictionary::{Dictionary, Entry, Token};
pub use field_data::{FieldDataEntry, FieldValue};
pub use field_tag::{FieldTag, Uniformity, reduce_tags, uniformity_compare_op};
pub use file_store::FileStore;
pub use ifc_stream::{FieldKind, IFCstream};
pub use ofc_stream::OFCstream;
pub use store::{BlockKind, MemoryStore, SliceStream, Window};
