// Skeletal mesh round-trip tests
// Save/load a built mesh and verify every decoded vertex attribute

use std::io::Cursor;

use binrw::{BinReaderExt, BinWriterExt};
use half::f16;
use skelmesh_tools_lib::math::packed::PackedPosition;
use skelmesh_tools_lib::skin::version::SKIN_VERSION;
use skelmesh_tools_lib::skin::{
    build_lod_model, load_skeletal_mesh, save_skeletal_mesh, GpuSkinVertexFormat, MeshBuildOptions,
    SkeletalMesh, VertexBufferBuildOptions,
};
use skelmesh_tools_lib::validation::validate_skeletal_mesh;

#[path = "common/mod.rs"]
mod common;

fn half_uv_packed_mesh() -> SkeletalMesh {
    let skeleton = common::chain_skeleton(6);
    let mut import = common::grid_import(6, 5);
    for point in 0..30 {
        if point % 2 == 0 {
            import.influences.push(common::rigid_weight(point, point % 6));
        } else {
            import.influences.extend(common::split_weights(point, point % 6, (point + 2) % 6));
        }
    }

    let options = MeshBuildOptions {
        vertex_buffer: VertexBufferBuildOptions {
            use_full_precision_uvs: false,
            use_packed_position: true,
            num_tex_coords: 2,
            has_vertex_colors: true,
        },
        ..Default::default()
    };
    let lod = build_lod_model(&import, &skeleton, &options).expect("build failed");

    SkeletalMesh {
        ref_skeleton: skeleton,
        lod_models: vec![lod],
        has_vertex_colors: true,
    }
}

fn half_exact(v: f32) -> f32 {
    f16::from_f32(v).to_f32()
}

/// Half UVs, packed positions, 2 texcoords and colors survive a file round trip
#[test]
fn half_uv_packed_position_file_roundtrip() {
    common::init_logging();
    println!("\n🔍 Testing: half UV / packed position LOD round trip");

    let mesh = half_uv_packed_mesh();
    let lod = &mesh.lod_models[0];
    assert_eq!(lod.vertex_buffer.format(), GpuSkinVertexFormat::HalfUvPackedPosition);
    assert_eq!(lod.vertex_buffer.stride(), 16 + 4 + 2 * 4);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("grid.skin");
    save_skeletal_mesh(&mesh, &path).expect("save failed");
    let loaded = load_skeletal_mesh(&path).expect("load failed");
    assert_eq!(loaded, mesh, "loaded mesh should equal the saved one");

    let original = lod.get_vertices();
    let buffer = &loaded.lod_models[0].vertex_buffer;
    let colors = &loaded.lod_models[0].color_buffer;
    assert_eq!(buffer.num_vertices(), original.len());
    assert_eq!(colors.num_vertices(), original.len());

    let step = PackedPosition::quantization_step(buffer.mesh_extension());
    for (i, v) in original.iter().enumerate() {
        let p = buffer.vertex_position(i).unwrap();
        let o = v.position.0;
        assert!((p.x - o.x).abs() <= step.x * 1.001, "vertex {} x off by {}", i, (p.x - o.x).abs());
        assert!((p.y - o.y).abs() <= step.y * 1.001, "vertex {} y off by {}", i, (p.y - o.y).abs());
        assert!((p.z - o.z).abs() <= step.z * 1.001, "vertex {} z off by {}", i, (p.z - o.z).abs());

        for channel in 0..2 {
            let uv = buffer.vertex_uv(i, channel).unwrap();
            let expected = v.uvs[channel].0;
            assert_eq!(uv.x, half_exact(expected.x), "vertex {} uv{} u", i, channel);
            assert_eq!(uv.y, half_exact(expected.y), "vertex {} uv{} v", i, channel);
        }

        assert_eq!(colors.color(i).unwrap(), v.color, "vertex {} color", i);
        assert_eq!(buffer.vertex_influence(i).unwrap(), v.influence, "vertex {} influence", i);
    }

    let report = validate_skeletal_mesh(&loaded);
    assert!(report.is_valid, "{:?}", report.items);

    println!("✅ {} vertices decoded within tolerance", original.len());
}

/// Big endian output differs byte-wise but decodes to the same mesh
#[test]
fn big_endian_roundtrip() {
    let mesh = half_uv_packed_mesh();

    let mut le = Cursor::new(Vec::new());
    le.write_le(&mesh).unwrap();
    let mut be = Cursor::new(Vec::new());
    be.write_be(&mesh).unwrap();

    assert_eq!(le.get_ref().len(), be.get_ref().len());
    assert_ne!(le.get_ref(), be.get_ref());
    assert_eq!(&be.get_ref()[0..4], &SKIN_VERSION.to_be_bytes());

    be.set_position(0);
    let back: SkeletalMesh = be.read_be().unwrap();
    assert_eq!(back, mesh);
}

/// Full precision, unpacked buffers decode exactly
#[test]
fn full_precision_unpacked_is_exact() {
    let skeleton = common::chain_skeleton(2);
    let mut import = common::grid_import(3, 3);
    for point in 0..9 {
        import.influences.extend(common::split_weights(point, 0, 1));
    }
    let options = MeshBuildOptions {
        vertex_buffer: VertexBufferBuildOptions {
            use_full_precision_uvs: true,
            use_packed_position: false,
            num_tex_coords: 2,
            has_vertex_colors: false,
        },
        ..Default::default()
    };
    let lod = build_lod_model(&import, &skeleton, &options).unwrap();
    let mesh = SkeletalMesh {
        ref_skeleton: skeleton,
        lod_models: vec![lod],
        has_vertex_colors: false,
    };

    let mut cursor = Cursor::new(Vec::new());
    cursor.write_le(&mesh).unwrap();
    cursor.set_position(0);
    let back: SkeletalMesh = cursor.read_le().unwrap();

    let buffer = &back.lod_models[0].vertex_buffer;
    assert_eq!(buffer.format(), GpuSkinVertexFormat::FullUvUnpackedPosition);
    for (i, v) in mesh.lod_models[0].get_vertices().iter().enumerate() {
        assert_eq!(buffer.vertex_position(i).unwrap(), v.position.0);
        assert_eq!(buffer.vertex_uv(i, 1).unwrap(), v.uvs[1].0);
    }
    assert_eq!(back.lod_models[0].color_buffer.num_vertices(), 0);
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.skin");
    let err = load_skeletal_mesh(&path).unwrap_err();
    assert!(err.to_string().contains("missing.skin"));
}

#[test]
fn truncated_file_reports_progress() {
    let mesh = half_uv_packed_mesh();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.skin");
    save_skeletal_mesh(&mesh, &path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let err = load_skeletal_mesh(&path).unwrap_err().to_string();
    assert!(err.contains("Failed to parse skeletal mesh"), "{}", err);
    assert!(err.contains(&format!("File size: {} bytes", bytes.len() / 2)), "{}", err);
}

/// A corrupt element count fails the load with context instead of sizing a buffer from it
#[test]
fn corrupt_bone_count_reports_parse_error() {
    common::init_logging();
    let mesh = half_uv_packed_mesh();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.skin");
    save_skeletal_mesh(&mesh, &path).unwrap();

    // version, has-vertex-colors, then the bone count
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
    std::fs::write(&path, &bytes).unwrap();

    let err = load_skeletal_mesh(&path).unwrap_err().to_string();
    assert!(err.contains("Failed to parse skeletal mesh"), "{}", err);

    let mut cursor = Cursor::new(bytes);
    assert!(cursor.read_le::<SkeletalMesh>().is_err());
}
