use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Seek, Write};

use binrw::{BinRead, BinResult, BinWrite, Endian};
use cgmath::{InnerSpace, Vector3};

use super::chunk::{SkelMeshChunk, SkelMeshSection, TriangleSortOption};
use super::color_buffer::SkinColorBuffer;
use super::index::MultiSizeIndexContainer;
use super::influences::VertexInfluenceSet;
use super::version::{
    is_supported_version, unsupported_version_error, SKIN_VERSION_ADJACENCY, SKIN_VERSION_DWORD_INDICES,
    SKIN_VERSION_MULTI_TEXCOORDS, SKIN_VERSION_VERTEX_COLORS, SKIN_VERSION_VERTEX_INFLUENCES,
};
use super::vertex::SoftSkinVertex;
use super::vertex_buffer::{SkinVertexBuffer, SkinningCapabilities, VertexBufferBuildOptions};
use super::{read_vec, read_versioned_vec, write_vec};
use crate::error::{Result, SkinError};
use crate::math::LwBox;

/// Render data for one level of detail.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticLodModel {
    pub sections: Vec<SkelMeshSection>,
    pub chunks: Vec<SkelMeshChunk>,
    pub multi_size_index_container: MultiSizeIndexContainer,
    pub adjacency_index_container: MultiSizeIndexContainer,
    /// Every skeleton bone a chunk bone map references, sorted.
    pub active_bone_indices: Vec<u16>,
    /// Strictly increasing; chunk bones plus their ancestors.
    pub required_bones: Vec<u8>,
    pub num_vertices: u32,
    pub num_tex_coords: u32,
    /// Import point each output vertex came from.
    pub raw_point_indices: Vec<u32>,
    pub vertex_buffer: SkinVertexBuffer,
    pub color_buffer: SkinColorBuffer,
    pub vertex_influences: Vec<VertexInfluenceSet>,
}

impl Default for StaticLodModel {
    fn default() -> Self {
        Self {
            sections: vec![],
            chunks: vec![],
            multi_size_index_container: MultiSizeIndexContainer::new(),
            adjacency_index_container: MultiSizeIndexContainer::new(),
            active_bone_indices: vec![],
            required_bones: vec![],
            num_vertices: 0,
            num_tex_coords: 1,
            raw_point_indices: vec![],
            vertex_buffer: SkinVertexBuffer::default(),
            color_buffer: SkinColorBuffer::new(),
            vertex_influences: vec![],
        }
    }
}

impl StaticLodModel {
    pub fn total_faces(&self) -> u64 {
        self.sections.iter().map(|s| s.num_triangles as u64).sum()
    }

    /// Chunk holding a LOD vertex, the vertex's index inside that chunk's
    /// rigid or soft list, and whether it is soft.
    pub fn chunk_and_skin_type(&self, vertex_index: u32) -> Option<(usize, usize, bool)> {
        for (chunk_index, chunk) in self.chunks.iter().enumerate() {
            let rigid_start = chunk.rigid_vertex_buffer_index();
            let soft_start = chunk.soft_vertex_buffer_index();
            if vertex_index >= rigid_start && vertex_index < soft_start {
                return Some((chunk_index, (vertex_index - rigid_start) as usize, false));
            }
            if vertex_index >= soft_start && vertex_index < soft_start.saturating_add(chunk.num_soft_vertices) {
                return Some((chunk_index, (vertex_index - soft_start) as usize, true));
            }
        }
        None
    }

    /// Every chunk vertex in buffer order, rigid ones promoted to soft.
    pub fn get_vertices(&self) -> Vec<SoftSkinVertex> {
        let mut vertices = Vec::new();
        for chunk in &self.chunks {
            vertices.extend(chunk.rigid_vertices.iter().map(|v| v.to_soft()));
            vertices.extend(chunk.soft_vertices.iter().copied());
        }
        vertices
    }

    /// Rebuilds the GPU vertex buffer and, when requested, the color buffer
    /// from the chunk vertices.
    pub fn build_vertex_buffers(
        &mut self,
        options: &VertexBufferBuildOptions,
        capabilities: SkinningCapabilities,
    ) -> Result<()> {
        let vertices = self.get_vertices();

        let mut vertex_buffer = SkinVertexBuffer::new(capabilities);
        vertex_buffer.set_use_full_precision_uvs(options.use_full_precision_uvs);
        vertex_buffer.set_use_packed_position(options.use_packed_position);
        vertex_buffer.set_num_tex_coords(options.num_tex_coords)?;
        vertex_buffer.init(&vertices)?;

        self.vertex_buffer = vertex_buffer;
        self.num_tex_coords = options.num_tex_coords;
        self.num_vertices = vertices.len() as u32;
        if options.has_vertex_colors {
            self.color_buffer.init(&vertices);
        } else {
            self.color_buffer.clean_up();
        }
        Ok(())
    }

    /// Sorted union of every chunk bone map.
    pub fn calculate_active_bone_indices(&mut self) {
        let bones: BTreeSet<u16> = self
            .chunks
            .iter()
            .flat_map(|c| c.bone_map.iter().copied())
            .collect();
        self.active_bone_indices = bones.into_iter().collect();
    }

    fn vertex_positions(&self) -> Vec<Vector3<f32>> {
        self.get_vertices().iter().map(|v| v.position.0).collect()
    }

    fn shift_base_indices(&mut self, after: u32, delta: i64) {
        let shift = |section: &mut SkelMeshSection| {
            if section.base_index > after {
                section.base_index = (section.base_index as i64 + delta) as u32;
            }
        };
        self.sections.iter_mut().for_each(shift);
        for set in &mut self.vertex_influences {
            set.sections.iter_mut().for_each(shift);
        }
    }

    /// Reorders a section's triangles in the index buffer. Entering
    /// `CustomLeftRight` appends a second copy of the section's indices and
    /// leaving it removes that copy; later sections move accordingly.
    pub fn sort_triangles(&mut self, section_index: usize, option: TriangleSortOption) -> Result<()> {
        let section = *self
            .sections
            .get(section_index)
            .ok_or_else(|| SkinError::SectionOutOfRange {
                section: section_index,
                reason: format!("LOD has {} sections", self.sections.len()),
            })?;

        let mut indices = self.multi_size_index_container.get_index_buffer();
        let end = section.base_index as u64 + section.num_indices();
        if end > indices.len() as u64 {
            return Err(SkinError::SectionOutOfRange {
                section: section_index,
                reason: format!(
                    "indices {}..{} past index buffer of {}",
                    section.base_index,
                    end,
                    indices.len()
                ),
            });
        }
        let base = section.base_index as usize;
        let len = section.num_triangles as usize * 3;

        let was_left_right = section.triangle_sorting == TriangleSortOption::CustomLeftRight;
        let is_left_right = option == TriangleSortOption::CustomLeftRight;
        if was_left_right && !is_left_right {
            indices.drain(base + len..base + 2 * len);
            self.shift_base_indices(section.base_index, -(len as i64));
        }

        let positions = self.vertex_positions();
        let triangles = &mut indices[base..base + len];
        match option {
            TriangleSortOption::CenterRadialDistance => sort_center_radial_distance(triangles, &positions),
            TriangleSortOption::Random => sort_random(triangles, 0x9E37_79B9 ^ section.base_index),
            TriangleSortOption::MergeContiguous => sort_merge_contiguous(triangles),
            TriangleSortOption::None | TriangleSortOption::Custom | TriangleSortOption::CustomLeftRight => {}
        }

        if is_left_right && !was_left_right {
            let copy = indices[base..base + len].to_vec();
            indices.splice(base + len..base + len, copy);
            self.shift_base_indices(section.base_index, len as i64);
        }

        self.multi_size_index_container.copy_index_buffer(&indices)?;
        self.sections[section_index].triangle_sorting = option;
        self.update_triangle_sorting_for_alt_vertex_influences();
        Ok(())
    }

    /// Gives every alternate section the sort mode of the LOD section with
    /// the same material and records that pairing.
    pub fn update_triangle_sorting_for_alt_vertex_influences(&mut self) {
        let sections = &self.sections;
        for set in &mut self.vertex_influences {
            set.custom_left_right_section_map = set
                .sections
                .iter()
                .map(|alt| sections.iter().position(|s| s.material_index == alt.material_index))
                .collect();
            for (alt, mapped) in set.sections.iter_mut().zip(&set.custom_left_right_section_map) {
                if let Some(main) = mapped {
                    alt.triangle_sorting = sections[*main].triangle_sorting;
                }
            }
        }
    }

    /// Post-load fixups: left/right sorted sections without room for their
    /// second index copy fall back to unsorted.
    fn finish_load(&mut self) {
        let num_indices = self.multi_size_index_container.num_indices();
        reset_invalid_left_right(&mut self.sections, num_indices, "section");
        self.update_triangle_sorting_for_alt_vertex_influences();
        for set in &mut self.vertex_influences {
            reset_invalid_left_right(&mut set.sections, num_indices, "alternate section");
        }
    }
}

fn reset_invalid_left_right(sections: &mut [SkelMeshSection], num_indices: usize, what: &str) {
    for (i, section) in sections.iter_mut().enumerate() {
        if section.triangle_sorting == TriangleSortOption::CustomLeftRight
            && section.base_index as u64 + section.num_indices() > num_indices as u64
        {
            log::warn!(
                "{} {} has CustomLeftRight sorting but the index buffer lacks its second copy; resetting to None",
                what,
                i
            );
            section.triangle_sorting = TriangleSortOption::None;
        }
    }
}

fn triangle_centroid(tri: &[u32], positions: &[Vector3<f32>]) -> Vector3<f32> {
    let zero = Vector3::new(0.0, 0.0, 0.0);
    let sum = tri
        .iter()
        .fold(zero, |acc, &i| acc + positions.get(i as usize).copied().unwrap_or(zero));
    sum / 3.0
}

fn reorder_triangles(triangles: &mut [u32], order: &[usize]) {
    let source = triangles.to_vec();
    for (dst, &src) in order.iter().enumerate() {
        triangles[dst * 3..dst * 3 + 3].copy_from_slice(&source[src * 3..src * 3 + 3]);
    }
}

/// Nearest to the bounding box center first.
fn sort_center_radial_distance(triangles: &mut [u32], positions: &[Vector3<f32>]) {
    let used = triangles.iter().filter_map(|&i| positions.get(i as usize).copied());
    let center = match LwBox::from_points(used) {
        Some(bounds) => bounds.c,
        None => return,
    };

    let distances: Vec<f32> = triangles
        .chunks_exact(3)
        .map(|tri| (triangle_centroid(tri, positions) - center).magnitude())
        .collect();
    let mut order: Vec<usize> = (0..distances.len()).collect();
    order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]));
    reorder_triangles(triangles, &order);
}

/// Fisher-Yates with a xorshift generator, so a given seed always yields the
/// same order.
fn sort_random(triangles: &mut [u32], seed: u32) {
    let mut state = seed.max(1);
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };
    let count = triangles.len() / 3;
    let mut order: Vec<usize> = (0..count).collect();
    for i in (1..count).rev() {
        let j = next() as usize % (i + 1);
        order.swap(i, j);
    }
    reorder_triangles(triangles, &order);
}

fn find_root(parents: &mut [usize], mut i: usize) -> usize {
    while parents[i] != i {
        parents[i] = parents[parents[i]];
        i = parents[i];
    }
    i
}

/// Groups triangles connected through shared vertices. Groups keep the order
/// in which they first appear, triangles keep their order within a group.
fn sort_merge_contiguous(triangles: &mut [u32]) {
    let count = triangles.len() / 3;
    let mut parents: Vec<usize> = (0..count).collect();
    let mut owner: HashMap<u32, usize> = HashMap::new();
    for (t, tri) in triangles.chunks_exact(3).enumerate() {
        for &v in tri {
            match owner.get(&v) {
                Some(&other) => {
                    let (a, b) = (find_root(&mut parents, t), find_root(&mut parents, other));
                    if a != b {
                        parents[a.max(b)] = a.min(b);
                    }
                }
                None => {
                    owner.insert(v, t);
                }
            }
        }
    }

    let mut group_rank: HashMap<usize, usize> = HashMap::new();
    let mut ranks = Vec::with_capacity(count);
    for t in 0..count {
        let root = find_root(&mut parents, t);
        let next_rank = group_rank.len();
        ranks.push(*group_rank.entry(root).or_insert(next_rank));
    }
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|&t| ranks[t]);
    reorder_triangles(triangles, &order);
}

impl BinRead for StaticLodModel {
    /// Format version and whether the owning mesh stores vertex colors.
    type Args<'a> = (u32, bool);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let (version, has_vertex_colors) = args;
        let pos = reader.stream_position()?;
        if !is_supported_version(version) {
            return Err(unsupported_version_error(pos, "LOD model", version));
        }

        let sections = read_versioned_vec(reader, endian, version)?;
        let multi_size_index_container = MultiSizeIndexContainer::read_options(reader, endian, (version,))?;
        let active_bone_indices = read_vec(reader, endian)?;
        let chunks = read_versioned_vec(reader, endian, version)?;
        let num_vertices = u32::read_options(reader, endian, ())?;
        let required_bones = read_vec(reader, endian)?;

        let raw_point_indices = if version >= SKIN_VERSION_DWORD_INDICES {
            read_vec::<_, i32>(reader, endian)?.into_iter().map(|i| i as u32).collect()
        } else {
            read_vec::<_, u16>(reader, endian)?.into_iter().map(u32::from).collect()
        };

        let num_tex_coords = if version >= SKIN_VERSION_MULTI_TEXCOORDS {
            u32::read_options(reader, endian, ())?
        } else {
            1
        };

        let vertex_buffer = SkinVertexBuffer::read_options(reader, endian, (version,))?;

        let color_buffer = if version >= SKIN_VERSION_VERTEX_COLORS && has_vertex_colors {
            SkinColorBuffer::read_options(reader, endian, ())?
        } else {
            SkinColorBuffer::new()
        };

        let vertex_influences = if version >= SKIN_VERSION_VERTEX_INFLUENCES {
            read_versioned_vec(reader, endian, version)?
        } else {
            vec![]
        };

        let adjacency_index_container = if version >= SKIN_VERSION_ADJACENCY {
            MultiSizeIndexContainer::read_options(reader, endian, (version,))?
        } else {
            MultiSizeIndexContainer::new()
        };

        let mut lod = StaticLodModel {
            sections,
            chunks,
            multi_size_index_container,
            adjacency_index_container,
            active_bone_indices,
            required_bones,
            num_vertices,
            num_tex_coords,
            raw_point_indices,
            vertex_buffer,
            color_buffer,
            vertex_influences,
        };
        lod.finish_load();
        Ok(lod)
    }
}

impl BinWrite for StaticLodModel {
    /// Whether the owning mesh stores vertex colors.
    type Args<'a> = (bool,);

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<()> {
        write_vec(&self.sections, writer, endian)?;
        self.multi_size_index_container.write_options(writer, endian, ())?;
        write_vec(&self.active_bone_indices, writer, endian)?;
        write_vec(&self.chunks, writer, endian)?;
        self.num_vertices.write_options(writer, endian, ())?;
        write_vec(&self.required_bones, writer, endian)?;

        (self.raw_point_indices.len() as u32).write_options(writer, endian, ())?;
        for &index in &self.raw_point_indices {
            (index as i32).write_options(writer, endian, ())?;
        }

        self.num_tex_coords.write_options(writer, endian, ())?;
        self.vertex_buffer.write_options(writer, endian, ())?;
        if args.0 {
            self.color_buffer.write_options(writer, endian, ())?;
        }
        write_vec(&self.vertex_influences, writer, endian)?;
        self.adjacency_index_container.write_options(writer, endian, ())
    }
}
