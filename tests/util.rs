#![allow(dead_code)]
use coherent_mesh::{
    Face, Label, Point,
    algs::communicator::LocalComm,
    config::CoherentConfig,
    io::{BlockKind, MemoryStore, SliceStream, StreamContext},
    mesh::{CoherentLayout, PatchKind, PolyPatch},
};

pub const CASE: &str = "case";

/// Run `f` on every rank of an `n`-rank in-process universe.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = LocalComm::universe(n)
            .into_iter()
            .map(|c| s.spawn(move || f(c)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

pub fn ctx(store: &MemoryStore) -> StreamContext<MemoryStore> {
    StreamContext::new(store.clone(), CoherentConfig::default())
}

pub fn physical(name: &str, start: usize, size: usize) -> PolyPatch {
    PolyPatch {
        name: name.into(),
        kind: PatchKind::Physical,
        start,
        size,
    }
}

/// Four cells in a row, faces as edges:
///
/// ```text
/// 5---6---7---8---9
/// | 0 | 1 | 2 | 3 |
/// 0---1---2---3---4
/// ```
///
/// `left` and `right` close the ends.
pub fn strip_layout() -> CoherentLayout {
    let owner: Vec<Label> = vec![0, 1, 2, 0, 3];
    let neighbour: Vec<Label> = vec![1, 2, 3];
    let faces: Vec<Face> = vec![vec![1, 6], vec![2, 7], vec![3, 8], vec![5, 0], vec![4, 9]];
    let points: Vec<Point> = (0..10)
        .map(|k| if k < 5 { [k as f64, 0.0, 0.0] } else { [(k - 5) as f64, 1.0, 0.0] })
        .collect();
    CoherentLayout::from_global(
        &owner,
        &neighbour,
        &faces,
        &points,
        &[physical("left", 3, 1), physical("right", 4, 1)],
    )
    .unwrap()
}

/// 2x2 quads; cells 0 and 3 share only the centre point.
///
/// ```text
/// 6---7---8
/// | 2 | 3 |
/// 3---4---5
/// | 0 | 1 |
/// 0---1---2
/// ```
pub fn quad_layout() -> CoherentLayout {
    let owner: Vec<Label> = vec![0, 0, 1, 2, 0, 0, 1, 1, 2, 2, 3, 3];
    let neighbour: Vec<Label> = vec![1, 2, 3, 3];
    let faces: Vec<Face> = vec![
        vec![1, 4],
        vec![3, 4],
        vec![4, 5],
        vec![4, 7],
        vec![0, 1],
        vec![0, 3],
        vec![1, 2],
        vec![2, 5],
        vec![3, 6],
        vec![6, 7],
        vec![5, 8],
        vec![7, 8],
    ];
    let points: Vec<Point> = (0..9).map(|k| [(k % 3) as f64, (k / 3) as f64, 0.0]).collect();
    CoherentLayout::from_global(&owner, &neighbour, &faces, &points, &[physical("walls", 4, 8)]).unwrap()
}

/// A fresh store holding `layout` under [`CASE`].
pub fn store_with(layout: &CoherentLayout) -> MemoryStore {
    let store = MemoryStore::default();
    layout.write(&mut ctx(&store), CASE).unwrap();
    store
}

/// Put a field header and its coherent blocks into the fields location.
pub fn put_field(store: &MemoryStore, name: &str, header: &str, blocks: &[(&str, &[f64])]) {
    let mut c = ctx(store);
    let s = c.access(BlockKind::Fields, CASE).unwrap();
    for (block, values) in blocks {
        s.put_scalars(block, values.len(), 0, values).unwrap();
    }
    s.put_text(name, header).unwrap();
}

pub fn get_scalars(store: &MemoryStore, path: &str, block: &str) -> Vec<f64> {
    let mut c = ctx(store);
    c.access(BlockKind::Fields, path).unwrap().get_scalars(block, None).unwrap()
}

pub fn get_text(store: &MemoryStore, path: &str, name: &str) -> String {
    let mut c = ctx(store);
    c.access(BlockKind::Fields, path).unwrap().get_text(name).unwrap()
}

pub fn has_block(store: &MemoryStore, path: &str, block: &str) -> bool {
    let mut c = ctx(store);
    c.access(BlockKind::Fields, path).unwrap().has_block(block)
}
