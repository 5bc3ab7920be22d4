//! Runtime configuration for coherent mesh and field I/O.
//!
//! All knobs have working defaults; a JSON document can override any subset
//! of them (missing keys fall back to [`CoherentConfig::default`]).

use crate::mesh_error::CoherentMeshError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Names of the coherent mesh blocks in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockNames {
    pub partition_starts: String,
    pub owner_starts: String,
    pub neighbours: String,
    pub face_starts: String,
    pub faces: String,
    pub points: String,
}

impl Default for BlockNames {
    fn default() -> Self {
        Self {
            partition_starts: "partitionStarts".into(),
            owner_starts: "ownerStarts".into(),
            neighbours: "neighbours".into(),
            face_starts: "faceStarts".into(),
            faces: "faces".into(),
            points: "points".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoherentConfig {
    /// Sub-path selected by `BlockKind::Mesh`.
    pub mesh_dir: String,
    /// Sub-path selected by `BlockKind::Fields`.
    pub data_dir: String,
    pub blocks: BlockNames,
    /// First message tag used by the mesh exchange; the exchange reserves a
    /// small contiguous range above it.
    pub tag_base: u16,
    /// Log wall time of the processor-boundary exchange (max over ranks).
    pub log_exchange_time: bool,
}

impl Default for CoherentConfig {
    fn default() -> Self {
        Self {
            mesh_dir: "polyMesh".into(),
            data_dir: "fields".into(),
            blocks: BlockNames::default(),
            tag_base: 0x4000,
            log_exchange_time: true,
        }
    }
}

impl CoherentConfig {
    pub fn from_json_str(s: &str) -> Result<Self, CoherentMeshError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CoherentMeshError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CoherentMeshError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = CoherentConfig::from_json_str(r#"{ "data_dir": "coherent", "blocks": { "faces": "f" } }"#)
            .unwrap();
        assert_eq!(cfg.data_dir, "coherent");
        assert_eq!(cfg.mesh_dir, "polyMesh");
        assert_eq!(cfg.blocks.faces, "f");
        assert_eq!(cfg.blocks.points, "points");
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(matches!(
            CoherentConfig::from_json_str("{ nope"),
            Err(CoherentMeshError::Serde(_))
        ));
    }
}
