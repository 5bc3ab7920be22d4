mod util;

use coherent_mesh::algs::communicator::{Communicator, NoComm};
use coherent_mesh::io::{Dictionary, FieldKind, FieldValue, IFCstream, OFCstream};
use coherent_mesh::mesh::CoherentMesh;
use coherent_mesh::mesh_error::CoherentMeshError;
use util::*;

const T_HEADER: &str = r#"
FoamFile
{
    version     2.0;
    format      binary;
    class       volScalarField;
    object      T;
}
dimensions      [0 0 0 1 0 0 0];
internalField   nonuniform List<scalar> 4 T/internalField;
boundaryField
{
    left
    {
        type            fixedValue;
        value           nonuniform List<scalar> 1 T/boundaryField/left/value;
    }
    right
    {
        type            zeroGradient;
    }
}
"#;

const P_HEADER: &str = "
internalField   uniform 1.5;
boundaryField
{
    left  { type fixedValue; value uniform 1.5; }
    right { type zeroGradient; }
}
";

const BAD_PATCH_HEADER: &str = "
internalField   uniform 0;
boundaryField
{
    left  { type fixedValue; value nonuniform List<bogus> 1 T/boundaryField/left/value; }
    right { type zeroGradient; }
}
";

const PHI_HEADER: &str = "
internalField   nonuniform List<scalar> 3 phi/internalField;
boundaryField
{
    left  { type calculated; value uniform 0; }
    right { type calculated; value uniform 0; }
}
";

fn values_at(dict: &Dictionary, path: &[&str], key: &str) -> Vec<f64> {
    let mut d = dict;
    for p in path {
        d = d.sub_dict(p).unwrap();
    }
    d.field(key).unwrap().values().to_vec()
}

fn parsed(text: &str, path: &[&str], key: &str) -> FieldValue {
    let dict = Dictionary::parse("f", text).unwrap();
    let mut d = &dict;
    for p in path {
        d = d.sub_dict(p).unwrap();
    }
    FieldValue::parse(key, d.primitive(key).unwrap()).unwrap()
}

fn two_rank_strip() -> coherent_mesh::io::MemoryStore {
    store_with(&strip_layout().with_partitions(vec![0, 2, 4]).unwrap())
}

#[test]
fn volume_field_reads_only_the_local_window() {
    let store = two_rank_strip();
    put_field(
        &store,
        "T",
        T_HEADER,
        &[
            ("T/internalField", &[10.0, 11.0, 12.0, 13.0][..]),
            ("T/boundaryField/left/value", &[5.0][..]),
        ],
    );
    let dicts = run_ranks(2, |comm| {
        let mut c = ctx(&store);
        let mesh = CoherentMesh::read(&mut c, &comm, CASE).unwrap();
        let mut ifc = IFCstream::open(&mut c, &comm, &mesh, CASE, "T").unwrap();
        ifc.read_to_dict(&mut c, &comm, FieldKind::Volume).unwrap();
        ifc.into_dict()
    });

    assert_eq!(values_at(&dicts[0], &[], "internalField"), vec![10.0, 11.0]);
    assert_eq!(values_at(&dicts[1], &[], "internalField"), vec![12.0, 13.0]);
    assert_eq!(dicts[0].field("internalField").unwrap().n_global(), 4);
    assert_eq!(values_at(&dicts[0], &["boundaryField", "left"], "value"), vec![5.0]);
    assert!(values_at(&dicts[1], &["boundaryField", "left"], "value").is_empty());
    // processor faces carry the owner cell's value
    assert_eq!(values_at(&dicts[0], &["boundaryField", "procBoundary0to1"], "value"), vec![11.0]);
    assert_eq!(values_at(&dicts[1], &["boundaryField", "procBoundary1to0"], "value"), vec![12.0]);
    assert_eq!(
        dicts[1]
            .sub_dict("boundaryField")
            .unwrap()
            .sub_dict("procBoundary1to0")
            .unwrap()
            .word("type")
            .unwrap(),
        "processor"
    );
}

#[test]
fn uniform_field_is_broadcast_without_block_reads() {
    let store = two_rank_strip();
    put_field(&store, "p", P_HEADER, &[]);
    let out = run_ranks(2, |comm| {
        let mut c = ctx(&store);
        let mesh = CoherentMesh::read(&mut c, &comm, CASE).unwrap();
        comm.barrier();
        let before = store.reads();
        comm.barrier();
        let mut ifc = IFCstream::open(&mut c, &comm, &mesh, CASE, "p").unwrap();
        ifc.read_to_dict(&mut c, &comm, FieldKind::Volume).unwrap();
        comm.barrier();
        (before, store.reads(), ifc.into_dict())
    });

    let uniform = |dict: &Dictionary, patch: &str| {
        let pd = dict.sub_dict("boundaryField").unwrap().sub_dict(patch).unwrap();
        FieldValue::parse("value", pd.primitive("value").unwrap()).unwrap()
    };
    for ((before, after, dict), proc) in out.iter().zip(["procBoundary0to1", "procBoundary1to0"]) {
        assert_eq!(before, after);
        assert_eq!(
            FieldValue::parse("internalField", dict.primitive("internalField").unwrap()).unwrap(),
            FieldValue::Uniform(vec![1.5])
        );
        assert_eq!(uniform(dict, "left"), FieldValue::Uniform(vec![1.5]));
        assert_eq!(uniform(dict, proc), FieldValue::Uniform(vec![1.5]));
    }
}

#[test]
fn malformed_patch_value_fails_on_every_rank() {
    let store = two_rank_strip();
    put_field(&store, "T", BAD_PATCH_HEADER, &[]);
    let errors = run_ranks(2, |comm| {
        let mut c = ctx(&store);
        let mesh = CoherentMesh::read(&mut c, &comm, CASE).unwrap();
        let mut ifc = IFCstream::open(&mut c, &comm, &mesh, CASE, "T").unwrap();
        ifc.read_to_dict(&mut c, &comm, FieldKind::Volume).unwrap_err()
    });
    for e in errors {
        let CoherentMeshError::UnexpectedToken { context, found, .. } = e else {
            panic!("expected an unexpected-token error, got {e}");
        };
        assert!(context.ends_with("left/value"), "{context}");
        assert!(found.contains("List<bogus>"), "{found}");
    }
}

#[test]
fn missing_header_fails_on_every_rank() {
    let store = two_rank_strip();
    let results = run_ranks(2, |comm| {
        let mut c = ctx(&store);
        let mesh = CoherentMesh::read(&mut c, &comm, CASE).unwrap();
        IFCstream::open(&mut c, &comm, &mesh, CASE, "nope").is_err()
    });
    assert_eq!(results, vec![true, true]);
}

#[test]
fn surface_field_flips_sign_across_the_cut_and_writes_back() {
    let store = two_rank_strip();
    put_field(&store, "phi", PHI_HEADER, &[("phi/internalField", &[1.0, 2.0, 3.0][..])]);
    let dicts = run_ranks(2, |comm| {
        let mut c = ctx(&store);
        let mesh = CoherentMesh::read(&mut c, &comm, CASE).unwrap();
        let mut ifc = IFCstream::open(&mut c, &comm, &mesh, CASE, "phi").unwrap();
        ifc.read_to_dict(&mut c, &comm, FieldKind::Surface).unwrap();
        let dict = ifc.into_dict();
        OFCstream::with_dict(&mut c, &comm, &mesh, "out", FieldKind::Surface, dict.clone())
            .finish()
            .unwrap();
        dict
    });

    assert_eq!(values_at(&dicts[0], &[], "internalField"), vec![1.0]);
    assert_eq!(values_at(&dicts[1], &[], "internalField"), vec![3.0]);
    assert_eq!(values_at(&dicts[0], &["boundaryField", "procBoundary0to1"], "value"), vec![2.0]);
    assert_eq!(values_at(&dicts[1], &["boundaryField", "procBoundary1to0"], "value"), vec![-2.0]);

    assert_eq!(get_scalars(&store, "out", "phi/internalField"), vec![1.0, 2.0, 3.0]);
    let header = get_text(&store, "out", "phi");
    assert!(!header.contains("procBoundary"));
    let FieldValue::Coherent { global_size, id, .. } = parsed(&header, &[], "internalField") else {
        panic!("expected a coherent internal field: {header}");
    };
    assert_eq!((global_size, id.as_str()), (3, "phi/internalField"));
}

#[test]
fn globally_uniform_values_are_written_inline() {
    let store = two_rank_strip();
    run_ranks(2, |comm| {
        let mut c = ctx(&store);
        let mesh = CoherentMesh::read(&mut c, &comm, CASE).unwrap();
        let n_cells = mesh.n_cells();
        let n_left = mesh.boundary_patches()[0].size;
        let mut ofc = OFCstream::new(&mut c, &comm, &mesh, CASE, "U", FieldKind::Volume);
        ofc.write_field(&[], "internalField", 3, [1.0, 0.0, 0.0].repeat(n_cells)).unwrap();
        // rank 1 has no `left` faces; an empty local part does not break uniformity
        ofc.write_field(&["boundaryField", "left"], "value", 3, [1.0, 0.0, 0.0].repeat(n_left))
            .unwrap();
        ofc.finish().unwrap();
    });

    let header = get_text(&store, CASE, "U");
    assert_eq!(parsed(&header, &[], "internalField"), FieldValue::Uniform(vec![1.0, 0.0, 0.0]));
    assert_eq!(
        parsed(&header, &["boundaryField", "left"], "value"),
        FieldValue::Uniform(vec![1.0, 0.0, 0.0])
    );
    assert!(!has_block(&store, CASE, "U/internalField"));
}

#[test]
fn differing_values_go_to_one_coherent_block() {
    let store = two_rank_strip();
    run_ranks(2, |comm| {
        let mut c = ctx(&store);
        let mesh = CoherentMesh::read(&mut c, &comm, CASE).unwrap();
        let base = 10.0 * comm.rank() as f64;
        let values = (0..mesh.n_cells()).map(|i| base + i as f64).collect();
        let mut ofc = OFCstream::new(&mut c, &comm, &mesh, CASE, "T", FieldKind::Volume);
        ofc.write_field(&[], "internalField", 1, values).unwrap();
        ofc.finish().unwrap();
    });

    assert_eq!(get_scalars(&store, CASE, "T/internalField"), vec![0.0, 1.0, 10.0, 11.0]);
    let header = get_text(&store, CASE, "T");
    assert_eq!(
        parsed(&header, &[], "internalField"),
        FieldValue::Coherent {
            compound: "List<scalar>".into(),
            n_components: 1,
            global_size: 4,
            id: "T/internalField".into(),
        }
    );
}

#[test]
fn dropping_an_unfinished_stream_still_writes() {
    let store = store_with(&strip_layout());
    let comm = NoComm;
    let mut c = ctx(&store);
    let mesh = CoherentMesh::read(&mut c, &comm, CASE).unwrap();
    {
        let mut ofc = OFCstream::new(&mut c, &comm, &mesh, CASE, "k", FieldKind::Volume);
        ofc.write_field(&[], "internalField", 1, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
    }
    assert_eq!(get_scalars(&store, CASE, "k/internalField"), vec![0.1, 0.2, 0.3, 0.4]);
    assert!(get_text(&store, CASE, "k").contains("nonuniform List<scalar> 4 k/internalField"));
}
