//! Writing a field dictionary back to the coherent layout.
//!
//! Entries are collected while the stream is open and written on
//! [`OFCstream::finish`] (or on drop). Writing is collective: every rank
//! must hold the same entries in the same order.

use crate::algs::communicator::Communicator;
use crate::io::context::StreamContext;
use crate::io::dictionary::{Dictionary, Entry};
use crate::io::field_data::FieldDataEntry;
use crate::io::field_tag::{FieldTag, reduce_tags};
use crate::io::ifc_stream::{BOUNDARY_FIELD, FieldKind, INTERNAL_FIELD};
use crate::io::store::{BlockKind, SliceStream};
use crate::mesh::CoherentMesh;
use crate::mesh_error::{CoherentMeshError, index_to_label, label_to_index};
use crate::slice::Offsets;

pub struct OFCstream<'a, C: Communicator, S: SliceStream> {
    ctx: &'a mut StreamContext<S>,
    comm: &'a C,
    mesh: &'a CoherentMesh,
    path: String,
    kind: FieldKind,
    dict: Dictionary,
    finished: bool,
}

impl<'a, C: Communicator, S: SliceStream> OFCstream<'a, C, S> {
    /// An empty field `name` under `path`.
    pub fn new(
        ctx: &'a mut StreamContext<S>,
        comm: &'a C,
        mesh: &'a CoherentMesh,
        path: &str,
        name: &str,
        kind: FieldKind,
    ) -> Self {
        Self::with_dict(ctx, comm, mesh, path, kind, Dictionary::new(name))
    }

    /// Start from an existing dictionary, e.g. one filled by
    /// [`crate::io::IFCstream::read_to_dict`]. The field is written under
    /// the dictionary's name.
    pub fn with_dict(
        ctx: &'a mut StreamContext<S>,
        comm: &'a C,
        mesh: &'a CoherentMesh,
        path: &str,
        kind: FieldKind,
        dict: Dictionary,
    ) -> Self {
        OFCstream {
            ctx,
            comm,
            mesh,
            path: path.to_string(),
            kind,
            dict,
            finished: false,
        }
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn dict_mut(&mut self) -> &mut Dictionary {
        &mut self.dict
    }

    /// Set `key` of the sub-dictionary at `scope` (created as needed) to the
    /// local `values`, `n_components` scalars per element.
    pub fn write_field(
        &mut self,
        scope: &[&str],
        key: &str,
        n_components: usize,
        values: Vec<f64>,
    ) -> Result<(), CoherentMeshError> {
        let mut d = &mut self.dict;
        for &s in scope {
            if !matches!(d.get(s), Some(Entry::Dict(_))) {
                let sub = Dictionary::new(d.scoped(s));
                d.set(s, Entry::Dict(sub));
            }
            d = d.sub_dict_mut(s)?;
        }
        let entry = FieldDataEntry::from_values(d.scoped(key), n_components, values)?;
        d.set(key, Entry::Field(entry));
        Ok(())
    }

    /// Write everything and close the stream.
    pub fn finish(mut self) -> Result<(), CoherentMeshError> {
        let r = self.flush();
        self.finished = true;
        r
    }

    fn flush(&mut self) -> Result<(), CoherentMeshError> {
        if self.kind == FieldKind::Surface {
            self.combine_coherent_internal()?;
        }
        self.remove_proc_patches_from_dict()?;

        let me = self.comm.rank();
        let mut entries = self.dict.field_entries_mut();
        let tags: Vec<FieldTag> = entries.iter().map(|e| e.tag().clone()).collect();
        let reduced = reduce_tags(self.comm, &tags)?;
        let store = self.ctx.access(BlockKind::Fields, &self.path)?;
        for (entry, tag) in entries.iter_mut().zip(reduced) {
            let uniform = tag.is_uniform();
            entry.set_tag(tag);
            if uniform {
                continue;
            }
            let n = entry.n_components();
            let offsets = Offsets::set(self.comm, index_to_label(entry.n_elems())?, true)?;
            let total = label_to_index(offsets.total())?;
            let lower = label_to_index(offsets.lower_bound(me))?;
            store.put_scalars(entry.id(), n * total, n * lower, entry.values())?;
            entry.set_n_global(total);
        }

        if self.comm.is_master() {
            let text = self.dict.to_string();
            store.put_text(self.dict.name(), &text)?;
        }
        log::debug!(
            "[rank {me}] wrote field `{}` ({} entries)",
            self.dict.name(),
            tags.len()
        );
        Ok(())
    }

    /// Fold the values of owned processor patches back into the internal
    /// surface window, which is what the file stores.
    fn combine_coherent_internal(&mut self) -> Result<(), CoherentMeshError> {
        let mesh = self.mesh;
        let internal = match self.dict.get(INTERNAL_FIELD) {
            Some(Entry::Field(f)) => f,
            _ => return Ok(()),
        };
        let n = internal.n_components();
        let ids = mesh.boundary_ids_from_internal_faces();
        let mut window = vec![0.0; ids.len() * n];

        let mut rest = internal.values().chunks_exact(n);
        for (w, &b) in ids.iter().enumerate() {
            if b != -1 {
                continue;
            }
            let v = rest.next().ok_or_else(|| CoherentMeshError::SizeMismatch {
                context: format!("{} internal faces", internal.id()),
                expected: mesh.n_internal_faces(),
                found: internal.n_elems(),
            })?;
            window[w * n..(w + 1) * n].copy_from_slice(v);
        }

        let names = mesh.boundary_patches().iter().filter(|p| p.is_processor());
        for (positions, patch) in mesh.internal_face_ids_from_boundaries().iter().zip(names) {
            let values = self
                .dict
                .sub_dict(BOUNDARY_FIELD)?
                .sub_dict(&patch.name)?
                .field("value")?
                .values();
            if values.len() != positions.len() * n {
                return Err(CoherentMeshError::SizeMismatch {
                    context: format!("`{}` values", patch.name),
                    expected: positions.len() * n,
                    found: values.len(),
                });
            }
            for (&w, v) in positions.iter().zip(values.chunks_exact(n)) {
                window[w * n..(w + 1) * n].copy_from_slice(v);
            }
        }

        let Some(Entry::Field(internal)) = self.dict.get_mut(INTERNAL_FIELD) else {
            return Ok(());
        };
        internal.set_values(window)
    }

    /// Processor patches are rebuilt on read and never stored.
    fn remove_proc_patches_from_dict(&mut self) -> Result<(), CoherentMeshError> {
        let Some(Entry::Dict(bf)) = self.dict.get_mut(BOUNDARY_FIELD) else {
            return Ok(());
        };
        for patch in self.mesh.boundary_patches().iter().filter(|p| p.is_processor()) {
            bf.remove(&patch.name);
        }
        Ok(())
    }
}

impl<C: Communicator, S: SliceStream> Drop for OFCstream<'_, C, S> {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            if let Err(e) = self.flush() {
                log::warn!("field `{}` was not written: {e}", self.dict.name());
            }
        }
    }
}
