//! Directory-backed storage: one little-endian binary file per block, with
//! a small JSON descriptor next to it.
//!
//! ```text
//! <root>/<path>/<sub_path>/<block>.bin    raw 8-byte LE elements
//! <root>/<path>/<sub_path>/<block>.json   {"kind": "labels", "shape": N}
//! <root>/<path>/<sub_path>/<name>         text headers
//! ```
//!
//! Writers of disjoint windows never touch each other's bytes, so ranks in
//! separate processes may write the same block concurrently.

use crate::Label;
use crate::io::store::{SliceStream, Window, window_range};
use crate::mesh_error::CoherentMeshError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ElementKind {
    Labels,
    Scalars,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlockDescriptor {
    kind: ElementKind,
    shape: usize,
}

const ELEM: usize = 8;

pub struct FileStore {
    root: PathBuf,
    dir: Option<PathBuf>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CoherentMeshError + '_ {
    move |source| CoherentMeshError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore {
            root: root.into(),
            dir: None,
        }
    }

    fn dir(&self) -> Result<&Path, CoherentMeshError> {
        self.dir.as_deref().ok_or_else(|| CoherentMeshError::StoreUnavailable {
            path: self.root.display().to_string(),
            reason: "no location opened".into(),
        })
    }

    fn descriptor(&self, block: &str) -> Result<BlockDescriptor, CoherentMeshError> {
        let dir = self.dir()?;
        let path = dir.join(format!("{block}.json"));
        let text = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoherentMeshError::MissingBlock {
                    block: block.to_string(),
                    path: dir.display().to_string(),
                }
            } else {
                io_err(&path)(e)
            }
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn read_raw(&self, block: &str, expect: ElementKind, window: Window) -> Result<Vec<[u8; ELEM]>, CoherentMeshError> {
        let desc = self.descriptor(block)?;
        if desc.kind != expect {
            return Err(CoherentMeshError::malformed(
                block,
                format!("expected {expect:?}, found {:?}", desc.kind),
            ));
        }
        let range = window_range(block, desc.shape, window)?;
        let path = self.dir()?.join(format!("{block}.bin"));
        let mut f = File::open(&path).map_err(io_err(&path))?;
        f.seek(SeekFrom::Start((range.start * ELEM) as u64))
            .map_err(io_err(&path))?;
        let mut buf = vec![0u8; range.len() * ELEM];
        f.read_exact(&mut buf).map_err(io_err(&path))?;
        Ok(buf
            .chunks_exact(ELEM)
            .map(|c| {
                let mut a = [0u8; ELEM];
                a.copy_from_slice(c);
                a
            })
            .collect())
    }

    fn write_raw(
        &mut self,
        block: &str,
        kind: ElementKind,
        shape: usize,
        start: usize,
        data: impl Iterator<Item = [u8; ELEM]>,
        len: usize,
    ) -> Result<(), CoherentMeshError> {
        window_range(block, shape, Some((start, len)))?;
        match self.descriptor(block) {
            Ok(existing) if existing.kind != kind => {
                return Err(CoherentMeshError::malformed(
                    block,
                    format!("block already defined as {:?}", existing.kind),
                ));
            }
            Ok(existing) if existing.shape != shape => {
                return Err(CoherentMeshError::SizeMismatch {
                    context: format!("shape of block `{block}`"),
                    expected: existing.shape,
                    found: shape,
                });
            }
            Ok(_) | Err(CoherentMeshError::MissingBlock { .. }) => {}
            Err(e) => return Err(e),
        }
        let dir = self.dir()?.to_path_buf();
        let desc_path = dir.join(format!("{block}.json"));
        // block ids may contain `/`
        let parent = desc_path.parent().unwrap_or(&dir);
        fs::create_dir_all(parent).map_err(io_err(parent))?;

        let desc = serde_json::to_string(&BlockDescriptor { kind, shape })?;
        fs::write(&desc_path, desc).map_err(io_err(&desc_path))?;

        let path = dir.join(format!("{block}.bin"));
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err(&path))?;
        f.set_len((shape * ELEM) as u64).map_err(io_err(&path))?;
        f.seek(SeekFrom::Start((start * ELEM) as u64))
            .map_err(io_err(&path))?;
        let bytes: Vec<u8> = data.flatten().collect();
        f.write_all(&bytes).map_err(io_err(&path))?;
        Ok(())
    }
}

impl SliceStream for FileStore {
    fn open(&mut self, location: &str) -> Result<(), CoherentMeshError> {
        let dir = self.root.join(location);
        if !self.root.is_dir() {
            return Err(CoherentMeshError::StoreUnavailable {
                path: self.root.display().to_string(),
                reason: "root is not a directory".into(),
            });
        }
        self.dir = Some(dir);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CoherentMeshError> {
        self.dir = None;
        Ok(())
    }

    fn buffer_size(&self, block: &str) -> Result<usize, CoherentMeshError> {
        Ok(self.descriptor(block)?.shape)
    }

    fn get_labels(&self, block: &str, window: Window) -> Result<Vec<Label>, CoherentMeshError> {
        Ok(self
            .read_raw(block, ElementKind::Labels, window)?
            .into_iter()
            .map(i64::from_le_bytes)
            .collect())
    }

    fn get_scalars(&self, block: &str, window: Window) -> Result<Vec<f64>, CoherentMeshError> {
        Ok(self
            .read_raw(block, ElementKind::Scalars, window)?
            .into_iter()
            .map(f64::from_le_bytes)
            .collect())
    }

    fn put_labels(
        &mut self,
        block: &str,
        shape: usize,
        start: usize,
        data: &[Label],
    ) -> Result<(), CoherentMeshError> {
        let bytes = data.iter().map(|v| v.to_le_bytes());
        self.write_raw(block, ElementKind::Labels, shape, start, bytes, data.len())
    }

    fn put_scalars(
        &mut self,
        block: &str,
        shape: usize,
        start: usize,
        data: &[f64],
    ) -> Result<(), CoherentMeshError> {
        let bytes = data.iter().map(|v| v.to_le_bytes());
        self.write_raw(block, ElementKind::Scalars, shape, start, bytes, data.len())
    }

    fn get_text(&self, name: &str) -> Result<String, CoherentMeshError> {
        let dir = self.dir()?;
        let path = dir.join(name);
        fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoherentMeshError::MissingBlock {
                    block: name.to_string(),
                    path: dir.display().to_string(),
                }
            } else {
                io_err(&path)(e)
            }
        })
    }

    fn put_text(&mut self, name: &str, text: &str) -> Result<(), CoherentMeshError> {
        let path = self.dir()?.join(name);
        let parent = path.parent().unwrap_or(&path);
        fs::create_dir_all(parent).map_err(io_err(parent))?;
        fs::write(&path, text).map_err(io_err(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_persist_across_handles() {
        let tmp = tempfile::tempdir().unwrap();
        let mut a = FileStore::new(tmp.path());
        a.open("0/polyMesh").unwrap();
        a.put_labels("neighbours", 4, 0, &[1, -1]).unwrap();
        a.put_labels("neighbours", 4, 2, &[3, -2]).unwrap();
        a.put_text("boundary", "walls 2;").unwrap();

        a.put_labels("p/boundaryField/inlet", 1, 0, &[7]).unwrap();

        let mut b = FileStore::new(tmp.path());
        b.open("0/polyMesh").unwrap();
        assert_eq!(b.buffer_size("neighbours").unwrap(), 4);
        assert_eq!(b.get_labels("neighbours", Some((1, 2))).unwrap(), vec![-1, 3]);
        assert_eq!(b.get_text("boundary").unwrap(), "walls 2;");
        assert_eq!(b.get_labels("p/boundaryField/inlet", None).unwrap(), vec![7]);
        assert!(b.get_scalars("neighbours", None).is_err());
        assert!(matches!(
            b.get_labels("points", None),
            Err(CoherentMeshError::MissingBlock { .. })
        ));
    }

    #[test]
    fn scalars_keep_their_bits() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = FileStore::new(tmp.path());
        s.open("1/fields").unwrap();
        s.put_scalars("p", 3, 0, &[0.1, -2.5, f64::MAX]).unwrap();
        assert_eq!(s.get_scalars("p", None).unwrap(), vec![0.1, -2.5, f64::MAX]);
    }

    #[test]
    fn conflicting_redefinitions_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = FileStore::new(tmp.path());
        s.open("1/fields").unwrap();
        s.put_scalars("T", 4, 0, &[1.0, 2.0]).unwrap();
        assert!(matches!(
            s.put_scalars("T", 5, 2, &[3.0]),
            Err(CoherentMeshError::SizeMismatch { expected: 4, found: 5, .. })
        ));
        assert!(s.put_labels("T", 4, 2, &[3]).is_err());
        s.put_scalars("T", 4, 2, &[3.0, 4.0]).unwrap();
        assert_eq!(s.get_scalars("T", None).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn missing_root_is_unavailable() {
        let mut s = FileStore::new("/definitely/not/here");
        assert!(matches!(
            s.open("0/polyMesh"),
            Err(CoherentMeshError::StoreUnavailable { .. })
        ));
    }
}
