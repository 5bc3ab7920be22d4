mod util;

use coherent_mesh::algs::communicator::{Communicator, NoComm};
use coherent_mesh::mesh::{CoherentMesh, MeshState, PatchKind, PolyPatch};
use coherent_mesh::Point;
use util::*;

fn patch_summary(mesh: &CoherentMesh) -> Vec<(String, usize, usize)> {
    mesh.boundary_patches()
        .iter()
        .map(|p| (p.name.clone(), p.start, p.size))
        .collect()
}

/// Sorted coordinates of every face of `patch`.
fn patch_coords(mesh: &CoherentMesh, patch: &PolyPatch) -> Vec<Point> {
    let mut pts: Vec<Point> = mesh.poly_faces()[patch.range()]
        .iter()
        .flatten()
        .map(|&id| mesh.poly_points()[id as usize])
        .collect();
    pts.sort_by(|a, b| a.partial_cmp(b).unwrap());
    pts
}

#[test]
fn serial_read_restores_the_conventional_mesh() {
    let store = store_with(&strip_layout());
    let mesh = CoherentMesh::read(&mut ctx(&store), &NoComm, CASE).unwrap();

    assert_eq!(mesh.state(), MeshState::PermutationBuilt);
    assert_eq!(mesh.n_cells(), 4);
    assert_eq!(mesh.n_faces(), 5);
    assert_eq!(mesh.n_internal_faces(), 3);
    assert_eq!(mesh.n_points(), 10);
    assert_eq!(mesh.poly_owner(), &[0, 1, 2, 0, 3]);
    assert_eq!(mesh.poly_neighbours(), &[1, 2, 3]);
    assert_eq!(
        mesh.poly_faces(),
        &[vec![0, 1], vec![4, 5], vec![6, 7], vec![2, 3], vec![8, 9]]
    );
    assert_eq!(
        patch_summary(&mesh),
        vec![("left".to_string(), 3, 1), ("right".to_string(), 4, 1)]
    );
    assert!(mesh.proc_patches().is_empty());
    // left face is x = 0
    assert_eq!(patch_coords(&mesh, &mesh.boundary_patches()[0]), vec![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
}

#[test]
fn two_ranks_share_one_face() {
    let store = store_with(&strip_layout().with_partitions(vec![0, 2, 4]).unwrap());
    let meshes = run_ranks(2, |comm| CoherentMesh::read(&mut ctx(&store), &comm, CASE).unwrap());
    let (m0, m1) = (&meshes[0], &meshes[1]);

    for m in &meshes {
        assert_eq!(m.state(), MeshState::PermutationBuilt);
        assert_eq!(m.n_cells(), 2);
        assert_eq!(m.n_faces(), 3);
        assert_eq!(m.n_internal_faces(), 1);
        assert_eq!(m.poly_neighbours(), &[1]);
        assert_eq!(m.n_points(), 6);
    }
    assert_eq!(m0.poly_owner(), &[0, 0, 1]);
    assert_eq!(m1.poly_owner(), &[0, 1, 0]);
    assert_eq!(
        patch_summary(m0),
        vec![
            ("left".to_string(), 1, 1),
            ("right".to_string(), 2, 0),
            ("procBoundary0to1".to_string(), 2, 1),
        ]
    );
    assert_eq!(
        patch_summary(m1),
        vec![
            ("left".to_string(), 1, 0),
            ("right".to_string(), 1, 1),
            ("procBoundary1to0".to_string(), 2, 1),
        ]
    );
    assert_eq!(m0.boundary_patches()[2].kind, PatchKind::Processor { my_rank: 0, partner: 1 });

    // the shared face sits at x = 2 on both sides
    let shared = vec![[2.0, 0.0, 0.0], [2.0, 1.0, 0.0]];
    assert_eq!(patch_coords(m0, &m0.boundary_patches()[2]), shared);
    assert_eq!(patch_coords(m1, &m1.boundary_patches()[2]), shared);

    assert_eq!(m0.owned_proc_patches().len(), 1);
    assert!(m1.owned_proc_patches().is_empty());
    assert_eq!(m0.boundary_ids_from_internal_faces(), &[-1, 2]);
    assert_eq!(m0.internal_face_ids_from_boundaries(), &[vec![1]]);
    assert_eq!(m1.point_slice().num_imported(), 2);
}

#[test]
fn even_split_matches_explicit_partitions() {
    let explicit = store_with(&strip_layout().with_partitions(vec![0, 2, 4]).unwrap());
    let naive = store_with(&strip_layout());
    let a = run_ranks(2, |comm| CoherentMesh::read(&mut ctx(&explicit), &comm, CASE).unwrap());
    let b = run_ranks(2, |comm| CoherentMesh::read(&mut ctx(&naive), &comm, CASE).unwrap());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.poly_owner(), y.poly_owner());
        assert_eq!(x.poly_faces(), y.poly_faces());
        assert_eq!(x.poly_points(), y.poly_points());
        assert_eq!(x.boundary_patches(), y.boundary_patches());
    }
}

#[test]
fn corner_points_are_fetched_from_their_owner() {
    let store = store_with(&quad_layout().with_partitions(vec![0, 1, 2, 3, 4]).unwrap());
    let meshes = run_ranks(4, |comm| CoherentMesh::read(&mut ctx(&store), &comm, CASE).unwrap());

    let owned: usize = meshes
        .iter()
        .flat_map(|m| m.owned_proc_patches())
        .map(|p| p.size())
        .sum();
    assert_eq!(owned, 4);

    let m3 = &meshes[3];
    assert_eq!(m3.n_cells(), 1);
    assert_eq!(m3.n_internal_faces(), 0);
    assert_eq!(
        patch_summary(m3),
        vec![
            ("walls".to_string(), 0, 2),
            ("procBoundary3to1".to_string(), 2, 1),
            ("procBoundary3to2".to_string(), 3, 1),
        ]
    );
    // native (2,2), then (2,1) and (1,2) from the faces, then the centre
    // point that only rank 0 holds
    assert_eq!(
        m3.poly_points(),
        &[[2.0, 2.0, 0.0], [2.0, 1.0, 0.0], [1.0, 2.0, 0.0], [1.0, 1.0, 0.0]]
    );
    assert_eq!(m3.poly_faces(), &[vec![1, 0], vec![2, 0], vec![3, 1], vec![3, 2]]);

    // both sides of every processor patch see the same geometry
    for m in &meshes {
        for p in m.boundary_patches().iter().filter(|p| p.is_processor()) {
            let PatchKind::Processor { partner, .. } = p.kind else { unreachable!() };
            let other = &meshes[partner];
            let mirror = other
                .boundary_patches()
                .iter()
                .find(|q| q.kind == PatchKind::Processor { my_rank: partner, partner: m.my_rank() })
                .unwrap();
            assert_eq!(patch_coords(m, p), patch_coords(other, mirror));
        }
    }
}

#[test]
fn serial_comm_reports_one_rank() {
    let store = store_with(&quad_layout());
    let mesh = CoherentMesh::read(&mut ctx(&store), &NoComm, CASE).unwrap();
    assert_eq!(mesh.n_procs(), NoComm.size());
    assert_eq!(mesh.n_cells(), 4);
    assert_eq!(mesh.n_internal_faces(), 4);
    assert_eq!(mesh.patch_names(), &["walls".to_string()]);
    assert_eq!(mesh.cell_offsets().total(), 4);
}
