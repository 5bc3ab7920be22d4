//! Per-process I/O context: the storage handle and configuration, passed
//! explicitly to every mesh and field stream.

use crate::config::CoherentConfig;
use crate::io::store::{BlockKind, SliceStream};
use crate::mesh_error::CoherentMeshError;

/// Owns the storage backend and remembers which location it has open, so
/// consecutive accesses to the same location do not reopen it.
pub struct StreamContext<S: SliceStream> {
    store: S,
    config: CoherentConfig,
    current: Option<(BlockKind, String)>,
}

impl<S: SliceStream> StreamContext<S> {
    pub fn new(store: S, config: CoherentConfig) -> Self {
        StreamContext {
            store,
            config,
            current: None,
        }
    }

    pub fn config(&self) -> &CoherentConfig {
        &self.config
    }

    /// Open `path` of `kind` unless it is already the open location.
    pub fn access(&mut self, kind: BlockKind, path: &str) -> Result<&mut S, CoherentMeshError> {
        let hit = self
            .current
            .as_ref()
            .is_some_and(|(k, p)| *k == kind && p == path);
        if !hit {
            if self.current.take().is_some() {
                self.store.close()?;
            }
            self.store.open(&kind.location(&self.config, path))?;
            self.current = Some((kind, path.to_string()));
            log::debug!("opened {kind:?} location `{path}`");
        }
        Ok(&mut self.store)
    }

    /// The backend as currently opened.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn close(&mut self) -> Result<(), CoherentMeshError> {
        if self.current.take().is_some() {
            self.store.close()?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}
