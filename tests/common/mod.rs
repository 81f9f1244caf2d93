// Common test fixtures for skinning tests
#![allow(dead_code)]

use skelmesh_tools_lib::math::{LwVector2, LwVector3, VertexColor};
use skelmesh_tools_lib::skin::{MeshBone, MeshFace, MeshImportData, MeshWedge, RawBoneInfluence};

/// Route library `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Skeleton where bone i is parented to bone i - 1.
pub fn chain_skeleton(num_bones: usize) -> Vec<MeshBone> {
    (0..num_bones)
        .map(|i| {
            let parent = if i == 0 { None } else { Some(i as u32 - 1) };
            MeshBone::new(format!("bone_{:03}", i), parent)
        })
        .collect()
}

/// Grid of `cols` x `rows` points, one wedge per point, two triangles per
/// cell, every face on `material_index` 0. No influences.
pub fn grid_import(cols: usize, rows: usize) -> MeshImportData {
    let mut import = MeshImportData::default();

    for r in 0..rows {
        for c in 0..cols {
            let p = import.points.len() as u32;
            import.points.push(LwVector3::new(c as f32 * 10.0, r as f32 * 10.0, (c + r) as f32));
            let mut wedge = MeshWedge::new(p, LwVector2::new(c as f32 / cols as f32, r as f32 / rows as f32));
            wedge.uvs[1] = LwVector2::new(1.0 - c as f32 * 0.125, r as f32 * 0.25);
            wedge.color = VertexColor {
                r: (c * 20) as u8,
                g: (r * 20) as u8,
                b: 128,
                a: 255,
            };
            import.wedges.push(wedge);
        }
    }

    for r in 0..rows.saturating_sub(1) {
        for c in 0..cols.saturating_sub(1) {
            let a = (r * cols + c) as u32;
            let b = a + 1;
            let d = a + cols as u32;
            let e = d + 1;
            import.faces.push(MeshFace { wedges: [a, d, b], material_index: 0 });
            import.faces.push(MeshFace { wedges: [b, d, e], material_index: 0 });
        }
    }

    import
}

/// Full weight of one bone on one point.
pub fn rigid_weight(point: usize, bone: usize) -> RawBoneInfluence {
    RawBoneInfluence {
        point_index: point as u32,
        bone_index: bone as u32,
        weight: 1.0,
    }
}

/// Two bones sharing a point 60/40.
pub fn split_weights(point: usize, first: usize, second: usize) -> [RawBoneInfluence; 2] {
    [
        RawBoneInfluence {
            point_index: point as u32,
            bone_index: first as u32,
            weight: 0.6,
        },
        RawBoneInfluence {
            point_index: point as u32,
            bone_index: second as u32,
            weight: 0.4,
        },
    ]
}
