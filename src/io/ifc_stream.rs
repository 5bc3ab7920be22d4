//! Reading a coherently stored field into this rank's field dictionary.
//!
//! The header text is read once by the master and broadcast. Non-uniform
//! entries name a coherent block; each rank reads only its own window and
//! replaces the entry with the local values. Processor patch entries do not
//! exist on disk and are synthesized from the internal field.

use crate::algs::communicator::Communicator;
use crate::algs::wire;
use crate::io::context::StreamContext;
use crate::io::dictionary::{Dictionary, Entry, Token};
use crate::io::field_data::{FieldDataEntry, FieldValue};
use crate::io::store::{BlockKind, SliceStream};
use crate::mesh::{CoherentMesh, ExchangeSlot, PolyPatch};
use crate::mesh_error::{CoherentMeshError, label_to_index};
use crate::slice::Offsets;

pub const INTERNAL_FIELD: &str = "internalField";
pub const BOUNDARY_FIELD: &str = "boundaryField";

/// Where a field lives on the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One value per cell.
    Volume,
    /// One value per face; processor values change sign across the cut.
    Surface,
}

/// This rank's window `(start, count)` of an offsets table, in scalars.
pub(crate) fn scalar_window(
    offsets: &Offsets,
    rank: usize,
    n_components: usize,
) -> Result<(usize, usize), CoherentMeshError> {
    let lower = label_to_index(offsets.lower_bound(rank))?;
    let count = label_to_index(offsets.count(rank))?;
    Ok((lower * n_components, count * n_components))
}

fn processor_patches(mesh: &CoherentMesh) -> impl Iterator<Item = &PolyPatch> {
    mesh.boundary_patches().iter().filter(|p| p.is_processor())
}

#[derive(Debug)]
pub struct IFCstream<'m> {
    mesh: &'m CoherentMesh,
    path: String,
    dict: Dictionary,
}

impl<'m> IFCstream<'m> {
    /// Read the header of field `name` under `path`. Collective: the master
    /// reads, everyone else receives the text.
    pub fn open<C: Communicator, S: SliceStream>(
        ctx: &mut StreamContext<S>,
        comm: &C,
        mesh: &'m CoherentMesh,
        path: &str,
        name: &str,
    ) -> Result<Self, CoherentMeshError> {
        let mut payload = Vec::new();
        if comm.is_master() {
            match ctx.access(BlockKind::Fields, path).and_then(|s| s.get_text(name)) {
                Ok(text) => {
                    payload.push(1);
                    payload.extend_from_slice(text.as_bytes());
                }
                Err(e) => {
                    payload.push(0);
                    payload.extend_from_slice(e.to_string().as_bytes());
                }
            }
        }
        let payload = comm.broadcast_bytes(0, &payload)?;
        let (ok, body) = payload
            .split_first()
            .ok_or_else(|| CoherentMeshError::comm(0, "empty field header broadcast"))?;
        let body = String::from_utf8(body.to_vec()).map_err(|e| CoherentMeshError::comm(0, e.to_string()))?;
        if *ok == 0 {
            return Err(CoherentMeshError::StoreUnavailable {
                path: format!("{path}/{name}"),
                reason: body,
            });
        }
        Self::from_text(mesh, path, name, &body)
    }

    /// Use header text that is already at hand on every rank.
    pub fn from_text(mesh: &'m CoherentMesh, path: &str, name: &str, text: &str) -> Result<Self, CoherentMeshError> {
        Ok(IFCstream {
            mesh,
            path: path.to_string(),
            dict: Dictionary::parse(name, text)?,
        })
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn into_dict(self) -> Dictionary {
        self.dict
    }

    /// Fill the dictionary with this rank's values. Collective for surface
    /// fields, which trade processor values with the partners.
    pub fn read_to_dict<C: Communicator, S: SliceStream>(
        &mut self,
        ctx: &mut StreamContext<S>,
        comm: &C,
        kind: FieldKind,
    ) -> Result<&Dictionary, CoherentMeshError> {
        let store: &S = ctx.access(BlockKind::Fields, &self.path)?;
        self.read_boundary_patches(store)?;

        let tokens = self.dict.primitive(INTERNAL_FIELD)?.to_vec();
        match FieldValue::parse(&self.dict.scoped(INTERNAL_FIELD), &tokens)? {
            FieldValue::Uniform(_) => self.broadcast_uniform(tokens)?,
            FieldValue::Coherent {
                compound,
                n_components,
                global_size,
                id,
            } => {
                let coherent = Coherent {
                    compound,
                    n: n_components,
                    global_size,
                    id,
                };
                match kind {
                    FieldKind::Volume => self.read_volume(store, &coherent)?,
                    FieldKind::Surface => self.read_surface(store, comm, &coherent)?,
                }
            }
        }
        log::debug!(
            "[rank {}] read field `{}` ({kind:?})",
            self.mesh.my_rank(),
            self.dict.name()
        );
        Ok(&self.dict)
    }

    /// Coherent entries of physical patch dictionaries, read at the patch's
    /// own offsets.
    fn read_boundary_patches<S: SliceStream>(&mut self, store: &S) -> Result<(), CoherentMeshError> {
        let mesh = self.mesh;
        let me = mesh.my_rank();
        let bf = self.dict.sub_dict_mut(BOUNDARY_FIELD)?;
        for (i, patch) in mesh.boundary_patches().iter().filter(|p| !p.is_processor()).enumerate() {
            let pd = bf.sub_dict_mut(&patch.name)?;
            // entries such as `type` are not field values
            let mut coherent: Vec<(String, FieldValue)> = Vec::new();
            for (key, e) in pd.iter() {
                let Entry::Primitive(t) = e else { continue };
                if !matches!(t.first().and_then(Token::as_word), Some("uniform" | "nonuniform")) {
                    continue;
                }
                let value = FieldValue::parse(&pd.scoped(key), t)?;
                if !value.is_uniform() {
                    coherent.push((key.to_string(), value));
                }
            }
            if coherent.is_empty() {
                continue;
            }
            let offsets = mesh.boundary_patch_offsets(i)?;
            if label_to_index(offsets.count(me))? != patch.size {
                return Err(CoherentMeshError::SizeMismatch {
                    context: format!("patch `{}` offsets", patch.name),
                    expected: patch.size,
                    found: label_to_index(offsets.count(me))?,
                });
            }
            for (key, value) in coherent {
                let FieldValue::Coherent {
                    compound,
                    n_components,
                    global_size,
                    id,
                } = value
                else {
                    continue;
                };
                let values = store.get_scalars(&id, Some(scalar_window(offsets, me, n_components)?))?;
                let mut entry = FieldDataEntry::new(id, compound, values)?;
                entry.set_n_global(global_size);
                pd.set(key, Entry::Field(entry));
            }
        }
        Ok(())
    }

    /// A uniform internal field holds on every processor patch as is.
    fn broadcast_uniform(&mut self, value: Vec<Token>) -> Result<(), CoherentMeshError> {
        let patches: Vec<String> = processor_patches(self.mesh).map(|p| p.name.clone()).collect();
        let bf = self.dict.sub_dict_mut(BOUNDARY_FIELD)?;
        for name in patches {
            let mut pd = Dictionary::new(bf.scoped(&name));
            pd.set("type", Entry::Primitive(vec![Token::Word("processor".into())]));
            pd.set("value", Entry::Primitive(value.clone()));
            bf.set(name, Entry::Dict(pd));
        }
        Ok(())
    }

    fn set_internal(&mut self, field: &Coherent, values: Vec<f64>) -> Result<(), CoherentMeshError> {
        let mut entry = FieldDataEntry::new(field.id.clone(), field.compound.clone(), values)?;
        entry.set_n_global(field.global_size);
        self.dict.set(INTERNAL_FIELD, Entry::Field(entry));
        Ok(())
    }

    fn set_processor_value(&mut self, name: &str, field: &Coherent, values: Vec<f64>) -> Result<(), CoherentMeshError> {
        let bf = self.dict.sub_dict_mut(BOUNDARY_FIELD)?;
        let mut pd = Dictionary::new(bf.scoped(name));
        let entry = FieldDataEntry::new(pd.scoped("value"), field.compound.clone(), values)?;
        pd.set("type", Entry::Primitive(vec![Token::Word("processor".into())]));
        pd.set("value", Entry::Field(entry));
        bf.set(name, Entry::Dict(pd));
        Ok(())
    }

    /// Cell values from the cell window; processor faces take the value of
    /// their owner cell.
    fn read_volume<S: SliceStream>(&mut self, store: &S, field: &Coherent) -> Result<(), CoherentMeshError> {
        let mesh = self.mesh;
        let n = field.n;
        let values = store.get_scalars(&field.id, Some(scalar_window(mesh.cell_offsets(), mesh.my_rank(), n)?))?;
        for patch in processor_patches(mesh) {
            let mut pv = Vec::with_capacity(patch.size * n);
            for &cell in &mesh.poly_owner()[patch.range()] {
                let c = label_to_index(cell)?;
                pv.extend_from_slice(values.get(c * n..(c + 1) * n).ok_or(CoherentMeshError::InvalidLabel(cell))?);
            }
            self.set_processor_value(&patch.name, field, pv)?;
        }
        self.set_internal(field, values)
    }

    /// The internal-surface window holds internal faces and the faces this
    /// rank owns towards higher partners. Owned values go to the partner,
    /// which stores them negated.
    fn read_surface<C: Communicator, S: SliceStream>(
        &mut self,
        store: &S,
        comm: &C,
        field: &Coherent,
    ) -> Result<(), CoherentMeshError> {
        let mesh = self.mesh;
        let n = field.n;
        let window = store.get_scalars(
            &field.id,
            Some(scalar_window(mesh.internal_surface_field_offsets(), mesh.my_rank(), n)?),
        )?;
        let ids = mesh.boundary_ids_from_internal_faces();
        if window.len() != ids.len() * n {
            return Err(CoherentMeshError::SizeMismatch {
                context: format!("{} surface window", field.id),
                expected: ids.len() * n,
                found: window.len(),
            });
        }
        let internal: Vec<f64> = window
            .chunks_exact(n)
            .zip(ids)
            .filter(|&(_, &b)| b == -1)
            .flat_map(|(v, _)| v.iter().copied())
            .collect();

        let procs = mesh.proc_patches();
        let poly: Vec<&PolyPatch> = processor_patches(mesh).collect();
        let n_owned = mesh.owned_proc_patches().len();
        let tag = mesh.tag(ExchangeSlot::SurfaceField);

        for (k, patch) in procs.iter().enumerate().skip(n_owned) {
            let src = patch.partner();
            let bytes = comm.recv(src, tag)?;
            let mut values = wire::decode_scalars(&bytes).map_err(|e| CoherentMeshError::comm(src, e))?;
            if values.len() != patch.size() * n {
                return Err(CoherentMeshError::comm(
                    src,
                    format!("{} surface values for {} faces", values.len(), patch.size()),
                ));
            }
            values.iter_mut().for_each(|v| *v = -*v);
            self.set_processor_value(&poly[k].name, field, values)?;
        }
        for (k, positions) in mesh.internal_face_ids_from_boundaries().iter().enumerate() {
            let mut values = Vec::with_capacity(positions.len() * n);
            for &w in positions {
                values.extend_from_slice(&window[w * n..(w + 1) * n]);
            }
            let partner = procs[k].partner();
            let msg = wire::encode_scalars(&values).map_err(|e| CoherentMeshError::comm(partner, e))?;
            comm.send(partner, tag, &msg);
            self.set_processor_value(&poly[k].name, field, values)?;
        }
        self.set_internal(field, internal)
    }
}

/// A `nonuniform` internal field, destructured.
struct Coherent {
    compound: String,
    n: usize,
    global_size: usize,
    id: String,
}
