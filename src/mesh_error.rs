//! CoherentMeshError: unified error type for coherent-mesh public APIs
//!
//! Every failure in this crate is fatal to the collective run: nothing is
//! retried and no partial mesh is ever returned. The variants exist so the
//! diagnostic names the block, path or rank that broke.

use thiserror::Error;

/// Unified error type for coherent-mesh operations.
#[derive(Debug, Error)]
pub enum CoherentMeshError {
    /// A named block is absent from the storage backend.
    #[error("missing storage block `{block}` under `{path}`")]
    MissingBlock { block: String, path: String },
    /// A block exists but its contents violate the coherent layout.
    #[error("malformed block `{block}`: {reason}")]
    MalformedBlock { block: String, reason: String },
    /// Storage backend could not be opened or used.
    #[error("storage backend unavailable for `{path}`: {reason}")]
    StoreUnavailable { path: String, reason: String },
    /// Found a token where another was required (`uniform`, `nonuniform`, a compound...).
    #[error("unexpected token in `{context}`: expected {expected}, found `{found}`")]
    UnexpectedToken {
        context: String,
        expected: String,
        found: String,
    },
    /// Field dictionary text could not be parsed.
    #[error("dictionary parse error at line {line}: {reason}")]
    DictParse { line: usize, reason: String },
    /// A required dictionary entry is missing.
    #[error("missing entry `{key}` in dictionary `{dict}`")]
    MissingEntry { dict: String, key: String },
    /// Running sum of an offset table does not fit a label.
    #[error("offset overflow while accumulating partition {partition} (running sum {sum}, adding {value})")]
    OffsetOverflow {
        partition: usize,
        sum: i64,
        value: i64,
    },
    /// `Slice::convert` on an id that is neither local nor imported.
    #[error("id {id} is not resolvable in slice [{bottom}, {top}) of partition {partition}")]
    UnresolvedId {
        id: i64,
        partition: usize,
        bottom: i64,
        top: i64,
    },
    /// Extraction or query on a component that holds no data.
    #[error("component `{0}` is not initialized")]
    ComponentNotInitialized(String),
    /// No component with this name exists in the tree.
    #[error("component `{0}` not found")]
    ComponentNotFound(String),
    /// Component exists but holds a different kind of data.
    #[error("component `{name}` holds {found}, expected {expected}")]
    ComponentKind {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    /// Communication with a neighbor failed.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A permutation vector is not a bijection of `0..n`.
    #[error("invalid permutation: {0}")]
    InvalidPermutation(String),
    /// Two arrays that must agree in length do not.
    #[error("size mismatch in {context}: expected {expected}, found {found}")]
    SizeMismatch {
        context: String,
        expected: usize,
        found: usize,
    },
    /// A label cannot be used as an index (negative or too large).
    #[error("label {0} cannot be used as an index")]
    InvalidLabel(i64),
    /// Mesh was queried in a state that does not hold the data yet.
    #[error("mesh is in state {found:?}, operation requires {required:?}")]
    MeshState {
        found: crate::mesh::MeshState,
        required: crate::mesh::MeshState,
    },
    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoherentMeshError {
    /// Shorthand for a [`CoherentMeshError::CommError`] with a plain message.
    pub fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        CoherentMeshError::CommError {
            neighbor,
            source: msg.into().into(),
        }
    }

    pub fn malformed(block: impl Into<String>, reason: impl Into<String>) -> Self {
        CoherentMeshError::MalformedBlock {
            block: block.into(),
            reason: reason.into(),
        }
    }
}

/// Checked conversion of a label to an array index.
pub fn label_to_index(label: i64) -> Result<usize, CoherentMeshError> {
    num_traits::cast::<i64, usize>(label).ok_or(CoherentMeshError::InvalidLabel(label))
}

/// Checked conversion of an array length or index to a label.
pub fn index_to_label(index: usize) -> Result<i64, CoherentMeshError> {
    num_traits::cast::<usize, i64>(index).ok_or(CoherentMeshError::InvalidLabel(i64::MAX))
}
