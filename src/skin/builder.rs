//! Partitions imported triangles into bone-limited chunks and builds a LOD.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::chunk::{SkelMeshChunk, SkelMeshSection, TriangleSortOption};
use super::index::MultiSizeIndexContainer;
use super::influences::{BoneIndexPair, InfluenceUsage, VertexInfluenceSet};
use super::lod_model::StaticLodModel;
use super::mesh::{calculate_required_bones, MeshBone};
use super::vertex::{BoneInfluence, SoftSkinVertex};
use super::vertex_buffer::{SkinningCapabilities, VertexBufferBuildOptions};
use crate::error::{Result, SkinError};
use crate::math::{LwVector2, LwVector3, PackedNormal, VertexColor};
use crate::validation::limits::{INFLUENCE_WEIGHT_TOTAL, MAX_GPUSKIN_BONES, MAX_INFLUENCES, MAX_TEXCOORDS};

/// Mesh build settings, loadable from JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshBuildOptions {
    pub vertex_buffer: VertexBufferBuildOptions,
    pub capabilities: SkinningCapabilities,
    /// Chunk bone budget; values above `MAX_GPUSKIN_BONES` are ignored.
    pub max_bones_per_chunk: usize,
}

impl Default for MeshBuildOptions {
    fn default() -> Self {
        Self {
            vertex_buffer: VertexBufferBuildOptions::default(),
            capabilities: SkinningCapabilities::default(),
            max_bones_per_chunk: MAX_GPUSKIN_BONES,
        }
    }
}

impl MeshBuildOptions {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn bone_budget(&self) -> usize {
        self.max_bones_per_chunk.clamp(1, MAX_GPUSKIN_BONES)
    }
}

/// One face corner: a point plus the attributes that can differ per corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshWedge {
    pub point_index: u32,
    pub tangent_x: LwVector3,
    pub tangent_y: LwVector3,
    pub tangent_z: LwVector3,
    pub uvs: [LwVector2; MAX_TEXCOORDS],
    pub color: VertexColor,
}

impl MeshWedge {
    pub fn new(point_index: u32, uv: LwVector2) -> Self {
        let mut uvs = [LwVector2::default(); MAX_TEXCOORDS];
        uvs[0] = uv;
        Self {
            point_index,
            tangent_x: LwVector3::new(1.0, 0.0, 0.0),
            tangent_y: LwVector3::new(0.0, 1.0, 0.0),
            tangent_z: LwVector3::new(0.0, 0.0, 1.0),
            uvs,
            color: VertexColor::WHITE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshFace {
    pub wedges: [u32; 3],
    pub material_index: u16,
}

/// Unquantized weight of one skeleton bone on one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBoneInfluence {
    pub point_index: u32,
    pub bone_index: u32,
    pub weight: f32,
}

/// Imported geometry for one LOD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshImportData {
    pub points: Vec<LwVector3>,
    pub wedges: Vec<MeshWedge>,
    pub faces: Vec<MeshFace>,
    pub influences: Vec<RawBoneInfluence>,
}

/// Skeleton bone and 8-bit weight pairs, strongest first, summing to 255.
type PointInfluence = Vec<(u16, u8)>;

/// Keeps the strongest `MAX_INFLUENCES` weights of every point, renormalized
/// and quantized. Quantization leftovers go to the strongest bone. Points
/// without influences follow the root bone.
fn quantize_point_influences(
    raw: &[RawBoneInfluence],
    num_points: usize,
    skeleton: &[MeshBone],
) -> Result<Vec<Option<PointInfluence>>> {
    let mut per_point: Vec<Vec<(u16, f32)>> = vec![vec![]; num_points];
    for influence in raw {
        let bone = influence.bone_index as usize;
        if bone >= skeleton.len() || bone > u16::MAX as usize {
            return Err(SkinError::UnknownBone(format!("bone index {}", influence.bone_index)));
        }
        let point = influence.point_index as usize;
        let slot = per_point.get_mut(point).ok_or(SkinError::VertexOutOfRange {
            index: point,
            count: num_points,
        })?;
        if influence.weight > 0.0 {
            match slot.iter_mut().find(|(b, _)| *b as usize == bone) {
                Some(existing) => existing.1 += influence.weight,
                None => slot.push((bone as u16, influence.weight)),
            }
        }
    }

    Ok(per_point
        .into_iter()
        .map(|mut weights| {
            if weights.is_empty() {
                return None;
            }
            weights.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            weights.truncate(MAX_INFLUENCES);
            let total: f32 = weights.iter().map(|w| w.1).sum();

            let mut quantized: PointInfluence = weights
                .iter()
                .map(|&(bone, w)| (bone, (w / total * INFLUENCE_WEIGHT_TOTAL as f32) as u8))
                .collect();
            let sum: u32 = quantized.iter().map(|&(_, w)| w as u32).sum();
            quantized[0].1 += (INFLUENCE_WEIGHT_TOTAL - sum) as u8;
            quantized.retain(|&(_, w)| w > 0);
            Some(quantized)
        })
        .collect())
}

fn point_influence_or_root(influences: &[Option<PointInfluence>], point: usize) -> PointInfluence {
    influences
        .get(point)
        .cloned()
        .flatten()
        .unwrap_or_else(|| vec![(0, INFLUENCE_WEIGHT_TOTAL as u8)])
}

/// Resolves skeleton bones to chunk-local slots, growing the bone map.
fn local_influence(chunk: &mut SkelMeshChunk, influence: &PointInfluence) -> BoneInfluence {
    let mut result = BoneInfluence::default();
    for (slot, &(bone, weight)) in influence.iter().enumerate().take(MAX_INFLUENCES) {
        result.bones[slot] = chunk.add_unique_bone(bone);
        result.weights[slot] = weight;
    }
    result
}

/// Inverse of `local_influence`: weighted slots resolved through the bone map.
fn skeleton_influence(chunk: &SkelMeshChunk, influence: &BoneInfluence) -> PointInfluence {
    (0..MAX_INFLUENCES)
        .filter(|&slot| influence.weights[slot] > 0)
        .map(|slot| {
            let bone = chunk.bone_map.get(influence.bones[slot] as usize).copied().unwrap_or(0);
            (bone, influence.weights[slot])
        })
        .collect()
}

fn check_chunk_budget(chunk_index: usize, chunk: &SkelMeshChunk, limit: usize) -> Result<()> {
    if chunk.bone_map.len() > limit {
        return Err(SkinError::ChunkBoneBudgetExceeded {
            chunk: chunk_index,
            bones: chunk.bone_map.len(),
            limit,
        });
    }
    Ok(())
}

fn skin_vertex(import: &MeshImportData, wedge: &MeshWedge, influence: BoneInfluence) -> SoftSkinVertex {
    SoftSkinVertex {
        position: import
            .points
            .get(wedge.point_index as usize)
            .copied()
            .unwrap_or_default(),
        tangent_x: PackedNormal::from_vector(wedge.tangent_x.0),
        tangent_y: PackedNormal::from_vector(wedge.tangent_y.0),
        tangent_z: PackedNormal::from_vector(wedge.tangent_z.0),
        uvs: wedge.uvs,
        color: wedge.color,
        influence,
    }
}

struct ChunkPlan {
    material_index: u16,
    bones: Vec<u16>,
    faces: Vec<usize>,
}

/// Assigns each face to the first chunk of its material whose bones plus the
/// face's new bones stay within budget.
fn plan_chunks(
    import: &MeshImportData,
    influences: &[Option<PointInfluence>],
    budget: usize,
) -> Result<Vec<ChunkPlan>> {
    let mut plans: Vec<ChunkPlan> = vec![];
    for (face_index, face) in import.faces.iter().enumerate() {
        let mut points = [0u32; 3];
        for (corner, &w) in face.wedges.iter().enumerate() {
            let wedge = import.wedges.get(w as usize).ok_or(SkinError::VertexOutOfRange {
                index: w as usize,
                count: import.wedges.len(),
            })?;
            points[corner] = wedge.point_index;
        }

        if points[0] == points[1] || points[1] == points[2] || points[0] == points[2] {
            log::debug!("dropping degenerate face {}", face_index);
            continue;
        }

        let mut face_bones: Vec<u16> = vec![];
        for &p in &points {
            for (bone, _) in point_influence_or_root(influences, p as usize) {
                if !face_bones.contains(&bone) {
                    face_bones.push(bone);
                }
            }
        }
        if face_bones.len() > budget {
            return Err(SkinError::ChunkBoneBudgetExceeded {
                chunk: plans.len(),
                bones: face_bones.len(),
                limit: budget,
            });
        }

        let fits = |plan: &ChunkPlan| {
            plan.material_index == face.material_index
                && plan.bones.len() + face_bones.iter().filter(|b| !plan.bones.contains(b)).count() <= budget
        };
        let index = match plans.iter().position(fits) {
            Some(index) => index,
            None => {
                plans.push(ChunkPlan {
                    material_index: face.material_index,
                    bones: vec![],
                    faces: vec![],
                });
                plans.len() - 1
            }
        };
        let plan = &mut plans[index];
        for bone in face_bones {
            if !plan.bones.contains(&bone) {
                plan.bones.push(bone);
            }
        }
        plan.faces.push(face_index);
    }

    // sections end up ordered by (material, chunk)
    plans.sort_by_key(|p| p.material_index);
    Ok(plans)
}

/// Builds a complete LOD: chunks, sections, index container, vertex and
/// color buffers, active and required bones.
pub fn build_lod_model(
    import: &MeshImportData,
    skeleton: &[MeshBone],
    options: &MeshBuildOptions,
) -> Result<StaticLodModel> {
    let budget = options.bone_budget();
    let influences = quantize_point_influences(&import.influences, import.points.len(), skeleton)?;
    let plans = plan_chunks(import, &influences, budget)?;

    let mut lod = StaticLodModel::default();
    let mut indices: Vec<u32> = vec![];
    let mut base_vertex_index = 0u32;

    for (chunk_index, plan) in plans.iter().enumerate() {
        let mut chunk = SkelMeshChunk {
            base_vertex_index,
            ..Default::default()
        };

        // unique wedges in first-use order
        let mut wedge_order: Vec<u32> = vec![];
        let mut seen: HashSet<u32> = HashSet::new();
        for &face_index in &plan.faces {
            for &w in &import.faces[face_index].wedges {
                if seen.insert(w) {
                    wedge_order.push(w);
                }
            }
        }

        let mut rigid_wedges = vec![];
        let mut soft_wedges = vec![];
        for &w in &wedge_order {
            let wedge = &import.wedges[w as usize];
            let influence = local_influence(
                &mut chunk,
                &point_influence_or_root(&influences, wedge.point_index as usize),
            );
            let vertex = skin_vertex(import, wedge, influence);
            if influence.is_rigid() {
                chunk.rigid_vertices.push(vertex.to_rigid());
                rigid_wedges.push(w);
            } else {
                chunk.soft_vertices.push(vertex);
                soft_wedges.push(w);
            }
        }
        check_chunk_budget(chunk_index, &chunk, budget)?;

        chunk.num_rigid_vertices = chunk.rigid_vertices.len() as u32;
        chunk.num_soft_vertices = chunk.soft_vertices.len() as u32;
        chunk.calc_max_bone_influences();

        let mut wedge_to_vertex: HashMap<u32, u32> = HashMap::new();
        for (i, &w) in rigid_wedges.iter().chain(soft_wedges.iter()).enumerate() {
            wedge_to_vertex.insert(w, base_vertex_index + i as u32);
            lod.raw_point_indices.push(import.wedges[w as usize].point_index);
        }

        let base_index = indices.len() as u32;
        for &face_index in &plan.faces {
            for w in &import.faces[face_index].wedges {
                indices.push(wedge_to_vertex[w]);
            }
        }

        log::debug!(
            "chunk {}: material {}, {} bones, {} rigid + {} soft vertices, {} faces, max {} influences",
            chunk_index,
            plan.material_index,
            chunk.bone_map.len(),
            chunk.num_rigid_vertices,
            chunk.num_soft_vertices,
            plan.faces.len(),
            chunk.max_bone_influences
        );

        lod.sections.push(SkelMeshSection {
            material_index: plan.material_index,
            chunk_index: chunk_index as u16,
            base_index,
            num_triangles: plan.faces.len() as u32,
            triangle_sorting: TriangleSortOption::None,
        });
        base_vertex_index += chunk.num_vertices();
        lod.chunks.push(chunk);
    }

    lod.multi_size_index_container = MultiSizeIndexContainer::with_indices(&indices, base_vertex_index as usize)?;
    lod.build_vertex_buffers(&options.vertex_buffer, options.capabilities)?;
    lod.calculate_active_bone_indices();
    calculate_required_bones(&mut lod, skeleton);

    log::info!(
        "built LOD: {} vertices, {} faces, {} chunks, {}-byte indices",
        lod.num_vertices,
        lod.total_faces(),
        lod.chunks.len(),
        lod.multi_size_index_container.data_type_size()
    );
    Ok(lod)
}

/// Builds an alternate influence set for `lod` from per-point weights and
/// appends it, returning its index.
///
/// Partial swap sets keep the LOD's chunks: alternate bones are added to the
/// owning chunk's bone map and only points named in `alt_influences` change.
/// Full swap sets get their own chunks over the same vertex ranges, all
/// vertices soft, and copies of the LOD's sections. Points missing from
/// `alt_influences` keep their base weights there.
pub fn build_alternate_influences(
    lod: &mut StaticLodModel,
    alt_influences: &[RawBoneInfluence],
    skeleton: &[MeshBone],
    usage: InfluenceUsage,
    mapping: BTreeMap<BoneIndexPair, Vec<u32>>,
    options: &MeshBuildOptions,
) -> Result<usize> {
    let budget = options.bone_budget();
    let num_points = lod.raw_point_indices.iter().map(|&p| p as usize + 1).max().unwrap_or(0);
    let alt = quantize_point_influences(alt_influences, num_points, skeleton)?;
    let vertices = lod.get_vertices();

    let mut set = VertexInfluenceSet {
        usage,
        vertex_influence_mapping: mapping,
        ..Default::default()
    };

    match usage {
        InfluenceUsage::PartialSwap => {
            for (vertex_index, vertex) in vertices.iter().enumerate() {
                let point = lod.raw_point_indices.get(vertex_index).copied().unwrap_or(0) as usize;
                let influence = match alt.get(point).cloned().flatten() {
                    Some(point_influence) => {
                        let (chunk_index, _, _) = lod
                            .chunk_and_skin_type(vertex_index as u32)
                            .ok_or(SkinError::VertexOutOfRange {
                                index: vertex_index,
                                count: vertices.len(),
                            })?;
                        let chunk = &mut lod.chunks[chunk_index];
                        let influence = local_influence(chunk, &point_influence);
                        check_chunk_budget(chunk_index, chunk, budget)?;
                        influence
                    }
                    None => vertex.influence,
                };
                set.influences.push(influence);
            }
            lod.calculate_active_bone_indices();
        }
        InfluenceUsage::FullSwap => {
            for (chunk_index, base_chunk) in lod.chunks.iter().enumerate() {
                let mut chunk = SkelMeshChunk {
                    base_vertex_index: base_chunk.base_vertex_index,
                    ..Default::default()
                };
                let start = base_chunk.base_vertex_index as usize;
                for vertex_index in start..start + base_chunk.num_vertices() as usize {
                    let point = lod.raw_point_indices.get(vertex_index).copied().unwrap_or(0) as usize;
                    let mut vertex = *vertices.get(vertex_index).ok_or(SkinError::VertexOutOfRange {
                        index: vertex_index,
                        count: vertices.len(),
                    })?;
                    // points without alternate weights keep their base weights
                    let point_influence = alt
                        .get(point)
                        .cloned()
                        .flatten()
                        .unwrap_or_else(|| skeleton_influence(base_chunk, &vertex.influence));
                    let influence = local_influence(&mut chunk, &point_influence);
                    vertex.influence = influence;
                    chunk.soft_vertices.push(vertex);
                    set.influences.push(influence);
                }
                check_chunk_budget(chunk_index, &chunk, budget)?;
                chunk.num_soft_vertices = chunk.soft_vertices.len() as u32;
                chunk.calc_max_bone_influences();
                set.chunks.push(chunk);
            }
            set.sections = lod.sections.clone();
        }
    }

    lod.vertex_influences.push(set);
    lod.update_triangle_sorting_for_alt_vertex_influences();
    calculate_required_bones(lod, skeleton);
    Ok(lod.vertex_influences.len() - 1)
}
