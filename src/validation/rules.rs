use super::limits::*;
use super::report::*;
use crate::skin::chunk::{SkelMeshChunk, SkelMeshSection};
use crate::skin::index::MultiSizeIndexContainer;
use crate::skin::influences::VertexInfluenceSet;
use crate::skin::lod_model::StaticLodModel;
use crate::skin::mesh::{MeshBone, SkeletalMesh};
use crate::skin::vertex::BoneInfluence;
use crate::skin::vertex_buffer::SkinVertexBuffer;

/// Validate each chunk's bone map against the GPU skinning limit.
pub fn validate_chunk_bone_budget(chunks: &[SkelMeshChunk]) -> Vec<ValidationItem> {
    chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.bone_map.len() > MAX_GPUSKIN_BONES)
        .map(|(i, c)| {
            ValidationItem::error(
                "CHUNK_BONE_BUDGET_EXCEEDED",
                ValidationCategory::Chunk,
                format!(
                    "Chunk {} references {} bones, GPU skinning limit is {}.",
                    i,
                    c.bone_map.len(),
                    MAX_GPUSKIN_BONES
                ),
            )
        })
        .collect()
}

/// Chunks must tile the vertex buffer in order, rigid vertices first, with
/// vertex counts matching their vertex lists.
pub fn validate_chunk_vertex_order(chunks: &[SkelMeshChunk]) -> Vec<ValidationItem> {
    let mut items = vec![];
    let mut expected_base = 0u32;

    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.base_vertex_index != expected_base {
            items.push(ValidationItem::error(
                "CHUNK_VERTEX_ORDER",
                ValidationCategory::Chunk,
                format!(
                    "Chunk {} starts at vertex {}, expected {} (chunks are not contiguous).",
                    i, chunk.base_vertex_index, expected_base
                ),
            ));
        }
        if chunk.rigid_vertices.len() != chunk.num_rigid_vertices as usize
            || chunk.soft_vertices.len() != chunk.num_soft_vertices as usize
        {
            items.push(ValidationItem::error(
                "CHUNK_VERTEX_ORDER",
                ValidationCategory::Chunk,
                format!(
                    "Chunk {} declares {} rigid + {} soft vertices but holds {} + {}.",
                    i,
                    chunk.num_rigid_vertices,
                    chunk.num_soft_vertices,
                    chunk.rigid_vertices.len(),
                    chunk.soft_vertices.len()
                ),
            ));
        }
        match chunk.end_vertex_index() {
            Some(end) => expected_base = end,
            None => {
                items.push(ValidationItem::error(
                    "CHUNK_VERTEX_ORDER",
                    ValidationCategory::Chunk,
                    format!(
                        "Chunk {} at vertex {} with {} rigid + {} soft vertices overflows the vertex index range.",
                        i, chunk.base_vertex_index, chunk.num_rigid_vertices, chunk.num_soft_vertices
                    ),
                ));
                expected_base = u32::MAX;
            }
        }
    }

    items
}

/// Every section must index its own chunk's vertex range inside the container.
pub fn validate_section_ranges(
    sections: &[SkelMeshSection],
    chunks: &[SkelMeshChunk],
    indices: &MultiSizeIndexContainer,
) -> Vec<ValidationItem> {
    let mut items = vec![];
    let num_indices = indices.num_indices();
    let buffer = indices.get_index_buffer();

    for (i, section) in sections.iter().enumerate() {
        let Some(chunk) = chunks.get(section.chunk_index as usize) else {
            items.push(ValidationItem::error(
                "SECTION_INDEX_RANGE",
                ValidationCategory::Section,
                format!(
                    "Section {} references chunk {}, only {} chunks exist.",
                    i,
                    section.chunk_index,
                    chunks.len()
                ),
            ));
            continue;
        };

        let start = section.base_index as u64;
        let end = start + section.num_indices();
        if end > num_indices as u64 {
            items.push(ValidationItem::error(
                "SECTION_INDEX_RANGE",
                ValidationCategory::Section,
                format!(
                    "Section {} covers indices {}..{}, container holds {}.",
                    i, start, end, num_indices
                ),
            ));
            continue;
        }

        let first = chunk.base_vertex_index as u64;
        let last = first + chunk.num_rigid_vertices as u64 + chunk.num_soft_vertices as u64;
        let owned = &buffer[start as usize..end as usize];
        if let Some(&stray) = owned.iter().find(|&&v| (v as u64) < first || v as u64 >= last) {
            items.push(ValidationItem::error(
                "SECTION_INDEX_RANGE",
                ValidationCategory::Section,
                format!(
                    "Section {} indexes vertex {} outside chunk {} ({}..{}).",
                    i, stray, section.chunk_index, first, last
                ),
            ));
        }
    }

    items
}

/// Required bones must be strictly increasing and cover every chunk bone.
pub fn validate_required_bones(required_bones: &[u8], chunks: &[SkelMeshChunk]) -> Vec<ValidationItem> {
    let mut items = vec![];

    if required_bones.windows(2).any(|w| w[0] >= w[1]) {
        items.push(ValidationItem::error(
            "REQUIRED_BONES_UNSORTED",
            ValidationCategory::Skeleton,
            "Required bones are not strictly increasing.".to_string(),
        ));
    }

    let missing: Vec<u16> = chunks
        .iter()
        .flat_map(|c| c.bone_map.iter().copied())
        .filter(|&b| (b as usize) <= MAX_REQUIRED_BONE_INDEX && !required_bones.contains(&(b as u8)))
        .collect();
    if let Some(&bone) = missing.first() {
        items.push(ValidationItem::error(
            "REQUIRED_BONES_MISSING",
            ValidationCategory::Skeleton,
            format!("Chunk bone {} is missing from the required bones ({} missing).", bone, missing.len()),
        ));
    }

    items
}

/// The GPU buffer's stride and size must agree with its format and the LOD.
pub fn validate_vertex_stride(buffer: &SkinVertexBuffer, expected_vertices: u32) -> Option<ValidationItem> {
    let expected_stride = buffer.format().stride(buffer.num_tex_coords());
    if buffer.stride() != expected_stride {
        return Some(ValidationItem::error(
            "VERTEX_STRIDE_MISMATCH",
            ValidationCategory::VertexBuffer,
            format!(
                "Vertex stride is {} bytes, {:?} with {} texcoords needs {}.",
                buffer.stride(),
                buffer.format(),
                buffer.num_tex_coords(),
                expected_stride
            ),
        ));
    }

    let expected_size = expected_stride * expected_vertices as usize;
    if buffer.vertex_data_size() != expected_size {
        return Some(ValidationItem::error(
            "VERTEX_STRIDE_MISMATCH",
            ValidationCategory::VertexBuffer,
            format!(
                "Vertex data is {} bytes, {} vertices at stride {} need {}.",
                buffer.vertex_data_size(),
                expected_vertices,
                expected_stride,
                expected_size
            ),
        ));
    }

    None
}

fn weight_sum_item(owner: &str, bad: usize, first: usize, total: u32) -> ValidationItem {
    ValidationItem {
        auto_fixable: true,
        ..ValidationItem::warning(
            "INFLUENCE_WEIGHT_SUM",
            ValidationCategory::Influences,
            format!(
                "{} has {} vertices whose weights do not sum to {} (first: vertex {}, sum {}).",
                owner, bad, INFLUENCE_WEIGHT_TOTAL, first, total
            ),
        )
    }
}

fn check_weight_sums<'a>(
    owner: &str,
    influences: impl Iterator<Item = &'a BoneInfluence>,
) -> Option<ValidationItem> {
    let bad: Vec<(usize, u32)> = influences
        .enumerate()
        .map(|(i, inf)| (i, inf.total_weight()))
        .filter(|&(_, total)| total != INFLUENCE_WEIGHT_TOTAL)
        .collect();
    bad.first()
        .map(|&(first, total)| weight_sum_item(owner, bad.len(), first, total))
}

/// Soft vertex weights and alternate influences must each sum to 255.
pub fn validate_influence_weights(chunks: &[SkelMeshChunk], sets: &[VertexInfluenceSet]) -> Vec<ValidationItem> {
    let mut items = vec![];

    for (i, chunk) in chunks.iter().enumerate() {
        let influences = chunk.soft_vertices.iter().map(|v| &v.influence);
        items.extend(check_weight_sums(&format!("Chunk {}", i), influences));

        let local_bones = chunk.bone_map.len();
        let stray = chunk.soft_vertices.iter().any(|v| {
            (0..MAX_INFLUENCES).any(|s| v.influence.weights[s] > 0 && v.influence.bones[s] as usize >= local_bones)
        }) || chunk.rigid_vertices.iter().any(|v| v.bone as usize >= local_bones);
        if stray {
            items.push(ValidationItem::error(
                "INFLUENCE_BONE_OUT_OF_RANGE",
                ValidationCategory::Influences,
                format!("Chunk {} has vertices weighted to bones past its {}-entry bone map.", i, local_bones),
            ));
        }
    }

    for (i, set) in sets.iter().enumerate() {
        items.extend(check_weight_sums(&format!("Influence set {}", i), set.influences.iter()));
    }

    items
}

/// Parents must precede their children, and chunk bones must exist.
pub fn validate_skeleton(skeleton: &[MeshBone], chunks: &[SkelMeshChunk]) -> Vec<ValidationItem> {
    let mut items = vec![];

    for (i, bone) in skeleton.iter().enumerate() {
        if let Some(parent) = bone.parent() {
            if parent >= i {
                items.push(ValidationItem::error(
                    "SKELETON_PARENT_ORDER",
                    ValidationCategory::Skeleton,
                    format!("Bone {} '{}' has parent {} which does not precede it.", i, bone.name, parent),
                ));
            }
        }
    }

    if let Some(&bone) = chunks
        .iter()
        .flat_map(|c| c.bone_map.iter())
        .find(|&&b| b as usize >= skeleton.len())
    {
        items.push(ValidationItem::error(
            "BONE_INDEX_OUT_OF_RANGE",
            ValidationCategory::Skeleton,
            format!("Chunk bone {} is past the {}-bone skeleton.", bone, skeleton.len()),
        ));
    }

    items
}

/// Run every LOD rule, including the chunk and section rules for full swap
/// influence sets.
pub fn validate_lod_model(lod: &StaticLodModel) -> ValidationReport {
    let mut report = ValidationReport::new();

    report.extend(validate_chunk_bone_budget(&lod.chunks));
    report.extend(validate_chunk_vertex_order(&lod.chunks));
    report.extend(validate_section_ranges(
        &lod.sections,
        &lod.chunks,
        &lod.multi_size_index_container,
    ));
    report.extend(validate_required_bones(&lod.required_bones, &lod.chunks));
    report.extend(validate_vertex_stride(&lod.vertex_buffer, lod.num_vertices));
    report.extend(validate_influence_weights(&lod.chunks, &lod.vertex_influences));

    for set in lod.vertex_influences.iter().filter(|s| s.is_full_swap()) {
        report.extend(validate_chunk_bone_budget(&set.chunks));
        report.extend(validate_section_ranges(
            &set.sections,
            &set.chunks,
            &lod.multi_size_index_container,
        ));
        report.extend(validate_required_bones(&set.required_bones, &set.chunks));
    }

    report
}

/// Validate the skeleton and every LOD, prefixing LOD findings with the LOD index.
pub fn validate_skeletal_mesh(mesh: &SkeletalMesh) -> ValidationReport {
    let mut report = ValidationReport::new();

    for (lod_index, lod) in mesh.lod_models.iter().enumerate() {
        report.extend(validate_skeleton(&mesh.ref_skeleton, &lod.chunks).into_iter().map(|mut item| {
            item.message = format!("LOD {}: {}", lod_index, item.message);
            item
        }));

        let mut lod_report = validate_lod_model(lod);
        for item in &mut lod_report.items {
            item.message = format!("LOD {}: {}", lod_index, item.message);
        }
        report.merge(lod_report);
    }

    if mesh.lod_models.is_empty() {
        report.extend(validate_skeleton(&mesh.ref_skeleton, &[]));
    }

    report
}
