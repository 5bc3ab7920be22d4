//! Composable initialization tree over coherent storage blocks.
//!
//! Every node knows how to compute its read window from its parent's data
//! ([`OffsetStrategy`]) and how to fill itself once the window is known
//! ([`InitStrategy`]). `initialize` walks the tree top-down: a node populates
//! itself before its children, since the children's windows depend on the
//! freshly read parent data. Children are visited in name order, which keeps
//! the sequence of collectives identical on every rank.
//!
//! Extraction is destructive: it moves the data out and leaves the node
//! uninitialized, so a later `initialize` reads it again.

pub mod init;
pub mod offset;

pub use init::{FieldData, InitStrategy, Populated};
pub use offset::OffsetStrategy;

use crate::algs::communicator::Communicator;
use crate::io::store::SliceStream;
use crate::mesh_error::CoherentMeshError;
use crate::slice::{Offsets, Slice};
use crate::{Label, Point};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Core {
    name: String,
    init: InitStrategy,
    start: OffsetStrategy,
    count: OffsetStrategy,
}

impl Core {
    fn populate<C: Communicator, S: SliceStream>(
        &self,
        parent: &[Label],
        comm: &C,
        store: &S,
    ) -> Result<Populated, CoherentMeshError> {
        let start = self.start.apply(parent, comm.rank());
        let count = self.count.apply(parent, comm.rank());
        log::trace!("component `{}`: window ({start}, {count})", self.name);
        self.init.populate(comm, store, start, count)
    }
}

/// Label data (index lists, offset rows); may have children.
#[derive(Debug, Clone)]
pub struct IndexComponent {
    core: Core,
    data: Option<Vec<Label>>,
    offsets: Option<Offsets>,
    children: BTreeMap<String, DataComponent>,
}

/// Leaf holding field values (e.g. point coordinates).
#[derive(Debug, Clone)]
pub struct FieldComponent {
    core: Core,
    data: Option<FieldData>,
}

/// Wraps an offsets node and additionally caches this rank's [`Slice`].
#[derive(Debug, Clone)]
pub struct SliceDecorator {
    inner: Box<DataComponent>,
    slice: Option<Slice>,
}

#[derive(Debug, Clone)]
pub enum DataComponent {
    Index(IndexComponent),
    Field(FieldComponent),
    Sliced(SliceDecorator),
}

impl DataComponent {
    pub fn index(
        name: impl Into<String>,
        init: InitStrategy,
        start: OffsetStrategy,
        count: OffsetStrategy,
    ) -> Self {
        DataComponent::Index(IndexComponent {
            core: Core {
                name: name.into(),
                init,
                start,
                count,
            },
            data: None,
            offsets: None,
            children: BTreeMap::new(),
        })
    }

    pub fn field(
        name: impl Into<String>,
        init: InitStrategy,
        start: OffsetStrategy,
        count: OffsetStrategy,
    ) -> Self {
        DataComponent::Field(FieldComponent {
            core: Core {
                name: name.into(),
                init,
                start,
                count,
            },
            data: None,
        })
    }

    /// Decorate with a cached slice view of this node's offsets.
    pub fn sliced(self) -> Self {
        DataComponent::Sliced(SliceDecorator {
            inner: Box::new(self),
            slice: None,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            DataComponent::Index(ix) => &ix.core.name,
            DataComponent::Field(f) => &f.core.name,
            DataComponent::Sliced(d) => d.inner.name(),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            DataComponent::Index(_) => "index data",
            DataComponent::Field(_) => "field data",
            DataComponent::Sliced(_) => "a slice",
        }
    }

    pub fn is_initialized(&self) -> bool {
        match self {
            DataComponent::Index(ix) => ix.data.is_some(),
            DataComponent::Field(f) => f.data.is_some(),
            DataComponent::Sliced(d) => d.inner.is_initialized(),
        }
    }

    /// Borrow the label data without extracting it.
    pub fn labels(&self) -> Option<&[Label]> {
        match self {
            DataComponent::Index(ix) => ix.data.as_deref(),
            DataComponent::Field(_) => None,
            DataComponent::Sliced(d) => d.inner.labels(),
        }
    }

    pub fn offsets(&self) -> Option<&Offsets> {
        match self {
            DataComponent::Index(ix) => ix.offsets.as_ref(),
            DataComponent::Field(_) => None,
            DataComponent::Sliced(d) => d.inner.offsets(),
        }
    }

    pub fn slice(&self) -> Option<&Slice> {
        match self {
            DataComponent::Sliced(d) => d.slice.as_ref(),
            _ => None,
        }
    }

    fn children(&self) -> Option<&BTreeMap<String, DataComponent>> {
        match self {
            DataComponent::Index(ix) => Some(&ix.children),
            DataComponent::Field(_) => None,
            DataComponent::Sliced(d) => d.inner.children(),
        }
    }

    fn children_mut(&mut self) -> Option<&mut BTreeMap<String, DataComponent>> {
        match self {
            DataComponent::Index(ix) => Some(&mut ix.children),
            DataComponent::Field(_) => None,
            DataComponent::Sliced(d) => d.inner.children_mut(),
        }
    }

    /// Depth-first search by name, this node included.
    pub fn find(&self, name: &str) -> Option<&DataComponent> {
        if self.name() == name {
            return Some(self);
        }
        self.children()?.values().find_map(|c| c.find(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut DataComponent> {
        if self.name() == name {
            return Some(self);
        }
        self.children_mut()?.values_mut().find_map(|c| c.find_mut(name))
    }

    fn kind_error(&self, expected: &'static str) -> CoherentMeshError {
        CoherentMeshError::ComponentKind {
            name: self.name().to_string(),
            expected,
            found: self.kind_name(),
        }
    }

    /// Populate this node from `parent` unless already initialized, then
    /// initialize the children. Collective when any node in the sub-tree
    /// computes offsets.
    pub fn initialize<C: Communicator, S: SliceStream>(
        &mut self,
        parent: &[Label],
        comm: &C,
        store: &S,
    ) -> Result<(), CoherentMeshError> {
        match self {
            DataComponent::Index(ix) => {
                if ix.data.is_none() {
                    match ix.core.populate(parent, comm, store)? {
                        Populated::Labels(v) => ix.data = Some(v),
                        Populated::Offsets(o, row) => {
                            ix.offsets = Some(o);
                            ix.data = Some(row);
                        }
                        Populated::Field(_) => {
                            return Err(CoherentMeshError::ComponentKind {
                                name: ix.core.name.clone(),
                                expected: "index data",
                                found: "field data",
                            });
                        }
                    }
                }
                let data = ix.data.as_deref().unwrap_or(&[]);
                for child in ix.children.values_mut() {
                    child.initialize(data, comm, store)?;
                }
                Ok(())
            }
            DataComponent::Field(f) => {
                if f.data.is_none() {
                    match f.core.populate(parent, comm, store)? {
                        Populated::Field(fd) => f.data = Some(fd),
                        _ => {
                            return Err(CoherentMeshError::ComponentKind {
                                name: f.core.name.clone(),
                                expected: "field data",
                                found: "index data",
                            });
                        }
                    }
                }
                Ok(())
            }
            DataComponent::Sliced(d) => {
                d.inner.initialize(parent, comm, store)?;
                if d.slice.is_none() {
                    let offsets = d.inner.offsets().ok_or_else(|| d.inner.kind_error("offsets"))?;
                    d.slice = Some(Slice::from_offsets(comm.rank(), offsets)?);
                }
                Ok(())
            }
        }
    }

    /// Initialize the children of an already populated node.
    pub fn initialize_children<C: Communicator, S: SliceStream>(
        &mut self,
        comm: &C,
        store: &S,
    ) -> Result<(), CoherentMeshError> {
        match self {
            DataComponent::Index(ix) => {
                let data = ix
                    .data
                    .as_deref()
                    .ok_or_else(|| CoherentMeshError::ComponentNotInitialized(ix.core.name.clone()))?;
                for child in ix.children.values_mut() {
                    child.initialize(data, comm, store)?;
                }
                Ok(())
            }
            DataComponent::Field(_) => Ok(()),
            DataComponent::Sliced(d) => d.inner.initialize_children(comm, store),
        }
    }

    pub fn take_labels(&mut self) -> Result<Vec<Label>, CoherentMeshError> {
        match self {
            DataComponent::Index(ix) => ix
                .data
                .take()
                .ok_or_else(|| CoherentMeshError::ComponentNotInitialized(ix.core.name.clone())),
            DataComponent::Sliced(d) => {
                d.slice = None;
                d.inner.take_labels()
            }
            DataComponent::Field(_) => Err(self.kind_error("index data")),
        }
    }

    pub fn take_field(&mut self) -> Result<FieldData, CoherentMeshError> {
        match self {
            DataComponent::Field(f) => f
                .data
                .take()
                .ok_or_else(|| CoherentMeshError::ComponentNotInitialized(f.core.name.clone())),
            _ => Err(self.kind_error("field data")),
        }
    }

    /// Moves the offsets out; the node is uninitialized afterwards.
    pub fn take_offsets(&mut self) -> Result<Offsets, CoherentMeshError> {
        match self {
            DataComponent::Index(ix) => {
                let o = ix
                    .offsets
                    .take()
                    .ok_or_else(|| CoherentMeshError::ComponentNotInitialized(ix.core.name.clone()))?;
                ix.data = None;
                Ok(o)
            }
            // the cached slice was derived from these offsets
            DataComponent::Sliced(d) => {
                d.slice = None;
                d.inner.take_offsets()
            }
            DataComponent::Field(_) => Err(self.kind_error("offsets")),
        }
    }

    pub fn take_slice(&mut self) -> Result<Slice, CoherentMeshError> {
        match self {
            DataComponent::Sliced(d) => d
                .slice
                .take()
                .ok_or_else(|| CoherentMeshError::ComponentNotInitialized(d.inner.name().to_string())),
            _ => Err(self.kind_error("a slice")),
        }
    }
}

/// The forest of components read for one mesh.
#[derive(Debug, Clone, Default)]
pub struct ComponentTree {
    roots: BTreeMap<String, DataComponent>,
}

impl ComponentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `component` below `parent` (or as a root).
    pub fn add(&mut self, parent: Option<&str>, component: DataComponent) -> Result<(), CoherentMeshError> {
        let name = component.name().to_string();
        if self.node(&name).is_some() {
            return Err(CoherentMeshError::malformed(
                name,
                "a component with this name already exists",
            ));
        }
        let siblings = match parent {
            None => &mut self.roots,
            Some(p) => {
                let node = self.node_mut(p)?;
                let kind_err = node.kind_error("index data");
                node.children_mut().ok_or(kind_err)?
            }
        };
        siblings.insert(name, component);
        Ok(())
    }

    /// Wrap an existing node in a [`SliceDecorator`].
    pub fn decorate_slice(&mut self, name: &str) -> Result<(), CoherentMeshError> {
        let node = self.node_mut(name)?;
        let placeholder = DataComponent::index("", InitStrategy::offsets(false), OffsetStrategy::Unset, OffsetStrategy::Unset);
        let inner = std::mem::replace(node, placeholder);
        *node = inner.sliced();
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&DataComponent> {
        self.roots.values().find_map(|c| c.find(name))
    }

    pub fn node_mut(&mut self, name: &str) -> Result<&mut DataComponent, CoherentMeshError> {
        self.roots
            .values_mut()
            .find_map(|c| c.find_mut(name))
            .ok_or_else(|| CoherentMeshError::ComponentNotFound(name.to_string()))
    }

    /// Populate every uninitialized node. Collective.
    pub fn initialize<C: Communicator, S: SliceStream>(
        &mut self,
        comm: &C,
        store: &S,
    ) -> Result<(), CoherentMeshError> {
        for root in self.roots.values_mut() {
            root.initialize(&[], comm, store)?;
        }
        Ok(())
    }

    /// Populate the uninitialized nodes below `name`. Collective.
    pub fn initialize_node<C: Communicator, S: SliceStream>(
        &mut self,
        name: &str,
        comm: &C,
        store: &S,
    ) -> Result<(), CoherentMeshError> {
        self.node_mut(name)?.initialize_children(comm, store)
    }

    pub fn labels(&self, name: &str) -> Result<&[Label], CoherentMeshError> {
        let node = self
            .node(name)
            .ok_or_else(|| CoherentMeshError::ComponentNotFound(name.to_string()))?;
        node.labels()
            .ok_or_else(|| CoherentMeshError::ComponentNotInitialized(name.to_string()))
    }

    pub fn extract_labels(&mut self, name: &str) -> Result<Vec<Label>, CoherentMeshError> {
        self.node_mut(name)?.take_labels()
    }

    pub fn extract_field(&mut self, name: &str) -> Result<FieldData, CoherentMeshError> {
        self.node_mut(name)?.take_field()
    }

    /// Field data of a 3-component node as points.
    pub fn extract_points(&mut self, name: &str) -> Result<Vec<Point>, CoherentMeshError> {
        let f = self.extract_field(name)?;
        if f.n_components != 3 {
            return Err(CoherentMeshError::malformed(
                name,
                format!("points need 3 components, found {}", f.n_components),
            ));
        }
        Ok(f.values
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect())
    }

    pub fn extract_offsets(&mut self, name: &str) -> Result<Offsets, CoherentMeshError> {
        self.node_mut(name)?.take_offsets()
    }

    pub fn extract_slice(&mut self, name: &str) -> Result<Slice, CoherentMeshError> {
        self.node_mut(name)?.take_slice()
    }
}
