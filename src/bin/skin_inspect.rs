use std::path::PathBuf;

use serde::Serialize;
use skelmesh_tools_lib::skin::{load_skeletal_mesh, SkeletalMesh, StaticLodModel};
use skelmesh_tools_lib::validation::validate_skeletal_mesh;

#[derive(Serialize)]
struct ChunkSummary {
    base_vertex_index: u32,
    num_rigid_vertices: u32,
    num_soft_vertices: u32,
    num_bones: usize,
    max_bone_influences: u32,
}

#[derive(Serialize)]
struct LodSummary {
    num_vertices: u32,
    num_triangles: u64,
    num_sections: usize,
    num_chunks: usize,
    index_size: u8,
    vertex_format: String,
    num_tex_coords: u32,
    stride: usize,
    has_colors: bool,
    num_influence_sets: usize,
    required_bones: usize,
    chunks: Vec<ChunkSummary>,
}

#[derive(Serialize)]
struct MeshSummary {
    file: String,
    num_bones: usize,
    has_vertex_colors: bool,
    lods: Vec<LodSummary>,
}

fn summarize_lod(lod: &StaticLodModel) -> LodSummary {
    LodSummary {
        num_vertices: lod.num_vertices,
        num_triangles: lod.total_faces(),
        num_sections: lod.sections.len(),
        num_chunks: lod.chunks.len(),
        index_size: lod.multi_size_index_container.data_type_size(),
        vertex_format: format!("{:?}", lod.vertex_buffer.format()),
        num_tex_coords: lod.vertex_buffer.num_tex_coords(),
        stride: lod.vertex_buffer.stride(),
        has_colors: lod.color_buffer.num_vertices() > 0,
        num_influence_sets: lod.vertex_influences.len(),
        required_bones: lod.required_bones.len(),
        chunks: lod
            .chunks
            .iter()
            .map(|c| ChunkSummary {
                base_vertex_index: c.base_vertex_index,
                num_rigid_vertices: c.num_rigid_vertices,
                num_soft_vertices: c.num_soft_vertices,
                num_bones: c.bone_map.len(),
                max_bone_influences: c.max_bone_influences,
            })
            .collect(),
    }
}

fn summarize(path: &PathBuf, mesh: &SkeletalMesh) -> MeshSummary {
    MeshSummary {
        file: path.display().to_string(),
        num_bones: mesh.ref_skeleton.len(),
        has_vertex_colors: mesh.has_vertex_colors,
        lods: mesh.lod_models.iter().map(summarize_lod).collect(),
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage:");
        eprintln!("  skin_inspect <mesh_file> [--validate]");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  skin_inspect ./hero.skin");
        eprintln!("  skin_inspect ./hero.skin --validate");
        std::process::exit(1);
    }

    let path = PathBuf::from(&args[1]);
    let validate = args[2..].iter().any(|a| a == "--validate");

    let mesh = match load_skeletal_mesh(&path) {
        Ok(mesh) => mesh,
        Err(e) => {
            eprintln!("Load failed: {:?}", e);
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&summarize(&path, &mesh)) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Summary failed: {}", e);
            std::process::exit(1);
        }
    }

    if validate {
        let report = validate_skeletal_mesh(&mesh);
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Report failed: {}", e);
                std::process::exit(1);
            }
        }
        if !report.is_valid {
            std::process::exit(2);
        }
    }
}
