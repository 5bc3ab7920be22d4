//! Storage backend contract for coherent blocks, and an in-memory backend.
//!
//! A backend holds named, globally shaped, one-dimensional blocks of labels
//! or scalars plus small text headers. Every rank reads and writes its own
//! disjoint window; only the master writes headers.

use crate::Label;
use crate::config::CoherentConfig;
use crate::mesh_error::CoherentMeshError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Which sub-path of a case a block lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Mesh,
    Fields,
}

impl BlockKind {
    pub fn sub_path<'a>(&self, cfg: &'a CoherentConfig) -> &'a str {
        match self {
            BlockKind::Mesh => &cfg.mesh_dir,
            BlockKind::Fields => &cfg.data_dir,
        }
    }

    /// `path/<sub_path>`: the location a backend opens for this kind.
    pub fn location(&self, cfg: &CoherentConfig, path: &str) -> String {
        format!("{path}/{}", self.sub_path(cfg))
    }
}

/// `(start, count)` of a read; `None` reads the whole block.
pub type Window = Option<(usize, usize)>;

pub trait SliceStream {
    /// Select `location` for the following calls; see [`BlockKind::location`].
    fn open(&mut self, location: &str) -> Result<(), CoherentMeshError>;
    fn close(&mut self) -> Result<(), CoherentMeshError>;

    /// Global length of `block`.
    fn buffer_size(&self, block: &str) -> Result<usize, CoherentMeshError>;
    fn has_block(&self, block: &str) -> bool {
        self.buffer_size(block).is_ok()
    }

    fn get_labels(&self, block: &str, window: Window) -> Result<Vec<Label>, CoherentMeshError>;
    fn get_scalars(&self, block: &str, window: Window) -> Result<Vec<f64>, CoherentMeshError>;

    /// Define `block` with global length `shape` (if not yet defined) and
    /// write `data` at `start`.
    fn put_labels(
        &mut self,
        block: &str,
        shape: usize,
        start: usize,
        data: &[Label],
    ) -> Result<(), CoherentMeshError>;
    fn put_scalars(
        &mut self,
        block: &str,
        shape: usize,
        start: usize,
        data: &[f64],
    ) -> Result<(), CoherentMeshError>;

    fn get_text(&self, name: &str) -> Result<String, CoherentMeshError>;
    fn put_text(&mut self, name: &str, text: &str) -> Result<(), CoherentMeshError>;
}

/// Checks a window against a block length; returns the index range.
pub(crate) fn window_range(
    block: &str,
    len: usize,
    window: Window,
) -> Result<std::ops::Range<usize>, CoherentMeshError> {
    match window {
        None => Ok(0..len),
        Some((start, count)) => {
            let end = start.checked_add(count).filter(|&e| e <= len).ok_or_else(|| {
                CoherentMeshError::malformed(
                    block,
                    format!("window [{start}, {start}+{count}) exceeds block length {len}"),
                )
            })?;
            Ok(start..end)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Labels(Vec<Label>),
    Scalars(Vec<f64>),
}

impl Block {
    fn len(&self) -> usize {
        match self {
            Block::Labels(v) => v.len(),
            Block::Scalars(v) => v.len(),
        }
    }
}

#[derive(Default)]
struct MemoryInner {
    blocks: HashMap<String, Block>,
    texts: HashMap<String, String>,
}

/// Shared in-memory backend. Clones share the data but not the open path,
/// so each rank holds its own clone.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
    reads: Arc<AtomicUsize>,
    prefix: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of block reads served so far, over all clones.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn key(&self, block: &str) -> Result<String, CoherentMeshError> {
        let prefix = self.prefix.as_deref().ok_or_else(|| CoherentMeshError::StoreUnavailable {
            path: block.to_string(),
            reason: "no location opened".into(),
        })?;
        Ok(format!("{prefix}/{block}"))
    }

    fn missing(&self, block: &str) -> CoherentMeshError {
        CoherentMeshError::MissingBlock {
            block: block.to_string(),
            path: self.prefix.clone().unwrap_or_default(),
        }
    }

    fn put_block<T: Clone + Default>(
        &mut self,
        block: &str,
        shape: usize,
        start: usize,
        data: &[T],
        wrap: fn(Vec<T>) -> Block,
        unwrap: fn(&mut Block) -> Option<&mut Vec<T>>,
    ) -> Result<(), CoherentMeshError> {
        let key = self.key(block)?;
        let range = window_range(block, shape, Some((start, data.len())))?;
        let mut inner = self.inner.write();
        let entry = inner
            .blocks
            .entry(key)
            .or_insert_with(|| wrap(vec![T::default(); shape]));
        if entry.len() != shape {
            return Err(CoherentMeshError::SizeMismatch {
                context: format!("shape of block `{block}`"),
                expected: entry.len(),
                found: shape,
            });
        }
        let v = unwrap(entry).ok_or_else(|| {
            CoherentMeshError::malformed(block, "block already defined with another element type")
        })?;
        v[range].clone_from_slice(data);
        Ok(())
    }
}

impl SliceStream for MemoryStore {
    fn open(&mut self, location: &str) -> Result<(), CoherentMeshError> {
        self.prefix = Some(location.to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<(), CoherentMeshError> {
        self.prefix = None;
        Ok(())
    }

    fn buffer_size(&self, block: &str) -> Result<usize, CoherentMeshError> {
        let key = self.key(block)?;
        self.inner
            .read()
            .blocks
            .get(&key)
            .map(Block::len)
            .ok_or_else(|| self.missing(block))
    }

    fn get_labels(&self, block: &str, window: Window) -> Result<Vec<Label>, CoherentMeshError> {
        let key = self.key(block)?;
        let inner = self.inner.read();
        match inner.blocks.get(&key) {
            Some(Block::Labels(v)) => {
                let range = window_range(block, v.len(), window)?;
                self.reads.fetch_add(1, Ordering::Relaxed);
                Ok(v[range].to_vec())
            }
            Some(Block::Scalars(_)) => Err(CoherentMeshError::malformed(block, "expected labels, found scalars")),
            None => Err(self.missing(block)),
        }
    }

    fn get_scalars(&self, block: &str, window: Window) -> Result<Vec<f64>, CoherentMeshError> {
        let key = self.key(block)?;
        let inner = self.inner.read();
        match inner.blocks.get(&key) {
            Some(Block::Scalars(v)) => {
                let range = window_range(block, v.len(), window)?;
                self.reads.fetch_add(1, Ordering::Relaxed);
                Ok(v[range].to_vec())
            }
            Some(Block::Labels(_)) => Err(CoherentMeshError::malformed(block, "expected scalars, found labels")),
            None => Err(self.missing(block)),
        }
    }

    fn put_labels(
        &mut self,
        block: &str,
        shape: usize,
        start: usize,
        data: &[Label],
    ) -> Result<(), CoherentMeshError> {
        self.put_block(block, shape, start, data, Block::Labels, |b| match b {
            Block::Labels(v) => Some(v),
            _ => None,
        })
    }

    fn put_scalars(
        &mut self,
        block: &str,
        shape: usize,
        start: usize,
        data: &[f64],
    ) -> Result<(), CoherentMeshError> {
        self.put_block(block, shape, start, data, Block::Scalars, |b| match b {
            Block::Scalars(v) => Some(v),
            _ => None,
        })
    }

    fn get_text(&self, name: &str) -> Result<String, CoherentMeshError> {
        let key = self.key(name)?;
        self.inner
            .read()
            .texts
            .get(&key)
            .cloned()
            .ok_or_else(|| self.missing(name))
    }

    fn put_text(&mut self, name: &str, text: &str) -> Result<(), CoherentMeshError> {
        let key = self.key(name)?;
        self.inner.write().texts.insert(key, text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_and_kinds_are_separate() {
        let mut s = MemoryStore::default();
        s.open("case/0/polyMesh").unwrap();
        s.put_labels("faces", 6, 2, &[7, 8, 9]).unwrap();
        assert_eq!(s.buffer_size("faces").unwrap(), 6);
        assert_eq!(s.get_labels("faces", None).unwrap(), vec![0, 0, 7, 8, 9, 0]);
        assert_eq!(s.get_labels("faces", Some((3, 2))).unwrap(), vec![8, 9]);
        assert!(s.get_labels("faces", Some((5, 2))).is_err());
        assert!(s.get_scalars("faces", None).is_err());

        s.open("case/0/fields").unwrap();
        assert!(matches!(
            s.get_labels("faces", None),
            Err(CoherentMeshError::MissingBlock { .. })
        ));
        assert_eq!(s.reads(), 2);
    }

    #[test]
    fn clones_share_data_but_not_location() {
        let mut a = MemoryStore::default();
        let mut b = a.clone();
        a.open("t/fields").unwrap();
        a.put_scalars("U", 2, 0, &[1.0]).unwrap();
        assert!(b.get_scalars("U", None).is_err());
        b.open("t/fields").unwrap();
        b.put_scalars("U", 2, 1, &[2.0]).unwrap();
        assert_eq!(a.get_scalars("U", None).unwrap(), vec![1.0, 2.0]);
        a.put_text("U", "hdr").unwrap();
        assert_eq!(b.get_text("U").unwrap(), "hdr");
    }

    #[test]
    fn reshaping_a_block_is_refused() {
        let mut s = MemoryStore::new();
        s.open("x/fields").unwrap();
        s.put_scalars("x", 4, 0, &[1.0, 2.0]).unwrap();
        let err = s.put_scalars("x", 5, 2, &[3.0, 4.0, 5.0]).unwrap_err();
        assert!(matches!(
            err,
            CoherentMeshError::SizeMismatch { expected: 4, found: 5, .. }
        ));
        assert_eq!(s.get_scalars("x", None).unwrap(), vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn location_follows_the_configured_sub_path() {
        let mut cfg = CoherentConfig::default();
        cfg.data_dir = "data".into();
        assert_eq!(BlockKind::Fields.location(&cfg, "case/1"), "case/1/data");
        assert_eq!(BlockKind::Mesh.location(&cfg, "case/1"), "case/1/polyMesh");
    }
}
