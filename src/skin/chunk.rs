use std::collections::BTreeSet;
use std::io::{Read, Seek, Write};

use binrw::{binrw, BinRead, BinResult, BinWrite, Endian};
use serde::{Deserialize, Serialize};

use super::version::{SKIN_VERSION_DWORD_INDICES, SKIN_VERSION_TRIANGLE_SORTING};
use super::vertex::{RigidSkinVertex, SoftSkinVertex};
use crate::validation::limits::{MAX_GPUSKIN_BONES, MAX_INFLUENCES};

/// Triangle ordering applied to a section's index range.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[binrw]
#[br(repr = u8)]
#[bw(repr = u8)]
pub enum TriangleSortOption {
    #[default]
    None = 0,
    CenterRadialDistance = 1,
    Random = 2,
    MergeContiguous = 3,
    Custom = 4,
    /// Two copies of the section's indices, one per view side.
    CustomLeftRight = 5,
}

/// Contiguous run of triangle indices sharing one material and one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SkelMeshSection {
    pub material_index: u16,
    pub chunk_index: u16,
    pub base_index: u32,
    pub num_triangles: u32,
    pub triangle_sorting: TriangleSortOption,
}

impl SkelMeshSection {
    /// Number of indices the section owns, including the second copy for
    /// left/right sorting. Widened so file-supplied triangle counts cannot
    /// overflow.
    pub fn num_indices(&self) -> u64 {
        let n = self.num_triangles as u64 * 3;
        if self.triangle_sorting == TriangleSortOption::CustomLeftRight {
            n * 2
        } else {
            n
        }
    }
}

impl BinRead for SkelMeshSection {
    type Args<'a> = (u32,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let version = args.0;
        let material_index = u16::read_options(reader, endian, ())?;
        let chunk_index = u16::read_options(reader, endian, ())?;
        let base_index = u32::read_options(reader, endian, ())?;
        let num_triangles = if version >= SKIN_VERSION_DWORD_INDICES {
            u32::read_options(reader, endian, ())?
        } else {
            u16::read_options(reader, endian, ())? as u32
        };
        let triangle_sorting = if version >= SKIN_VERSION_TRIANGLE_SORTING {
            TriangleSortOption::read_options(reader, endian, ())?
        } else {
            TriangleSortOption::None
        };

        Ok(SkelMeshSection {
            material_index,
            chunk_index,
            base_index,
            num_triangles,
            triangle_sorting,
        })
    }
}

impl BinWrite for SkelMeshSection {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.material_index.write_options(writer, endian, ())?;
        self.chunk_index.write_options(writer, endian, ())?;
        self.base_index.write_options(writer, endian, ())?;
        self.num_triangles.write_options(writer, endian, ())?;
        self.triangle_sorting.write_options(writer, endian, ())
    }
}

/// Vertex partition referencing at most `MAX_GPUSKIN_BONES` skeleton bones.
///
/// Vertices are laid out in the LOD vertex buffer as all rigid vertices
/// followed by all soft vertices, starting at `base_vertex_index`.
#[derive(Debug, Clone, PartialEq)]
pub struct SkelMeshChunk {
    pub base_vertex_index: u32,
    pub rigid_vertices: Vec<RigidSkinVertex>,
    pub soft_vertices: Vec<SoftSkinVertex>,
    /// Chunk-local bone index -> skeleton bone index.
    pub bone_map: Vec<u16>,
    pub num_rigid_vertices: u32,
    pub num_soft_vertices: u32,
    pub max_bone_influences: u32,
}

impl Default for SkelMeshChunk {
    fn default() -> Self {
        Self {
            base_vertex_index: 0,
            rigid_vertices: vec![],
            soft_vertices: vec![],
            bone_map: vec![],
            num_rigid_vertices: 0,
            num_soft_vertices: 0,
            max_bone_influences: MAX_INFLUENCES as u32,
        }
    }
}

impl SkelMeshChunk {
    pub fn rigid_vertex_buffer_index(&self) -> u32 {
        self.base_vertex_index
    }

    pub fn soft_vertex_buffer_index(&self) -> u32 {
        self.base_vertex_index.saturating_add(self.num_rigid_vertices)
    }

    pub fn num_vertices(&self) -> u32 {
        self.num_rigid_vertices.saturating_add(self.num_soft_vertices)
    }

    /// One past the chunk's last vertex, `None` when the declared counts run
    /// past the 32-bit vertex index space.
    pub fn end_vertex_index(&self) -> Option<u32> {
        self.base_vertex_index
            .checked_add(self.num_rigid_vertices)?
            .checked_add(self.num_soft_vertices)
    }

    /// Local bone map slot for a skeleton bone, appending it if new.
    pub fn add_unique_bone(&mut self, skeleton_bone: u16) -> u8 {
        match self.bone_map.iter().position(|&b| b == skeleton_bone) {
            Some(idx) => idx as u8,
            None => {
                self.bone_map.push(skeleton_bone);
                (self.bone_map.len() - 1) as u8
            }
        }
    }

    /// Skeleton bones actually referenced by vertex influences, resolved
    /// through the bone map.
    pub fn referenced_bones(&self) -> BTreeSet<u16> {
        let mut bones = BTreeSet::new();
        let mut add = |local: u8| {
            if let Some(&b) = self.bone_map.get(local as usize) {
                bones.insert(b);
            }
        };
        for v in &self.rigid_vertices {
            add(v.bone);
        }
        for v in &self.soft_vertices {
            for slot in 0..MAX_INFLUENCES {
                if v.influence.weights[slot] > 0 {
                    add(v.influence.bones[slot]);
                }
            }
        }
        bones
    }

    pub fn within_bone_budget(&self) -> bool {
        self.bone_map.len() <= MAX_GPUSKIN_BONES
    }

    /// Moves every soft vertex's weighted slots to the front and records the
    /// largest slot count any vertex uses. Never less than 1.
    pub fn calc_max_bone_influences(&mut self) -> u32 {
        let mut max_influences = 1usize;
        for vertex in self.soft_vertices.iter_mut() {
            let inf = &mut vertex.influence;
            let mut used = 0usize;
            for slot in 0..MAX_INFLUENCES {
                if inf.weights[slot] > 0 {
                    inf.weights.swap(used, slot);
                    inf.bones.swap(used, slot);
                    used += 1;
                }
            }
            max_influences = max_influences.max(used);
        }

        self.max_bone_influences = max_influences as u32;
        self.max_bone_influences
    }
}

impl BinRead for SkelMeshChunk {
    type Args<'a> = (u32,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let version = args.0;
        let base_vertex_index = u32::read_options(reader, endian, ())?;

        let rigid_num = u32::read_options(reader, endian, ())?;
        let mut rigid_vertices = Vec::new();
        for _ in 0..rigid_num {
            rigid_vertices.push(RigidSkinVertex::read_options(reader, endian, (version,))?);
        }

        let soft_num = u32::read_options(reader, endian, ())?;
        let mut soft_vertices = Vec::new();
        for _ in 0..soft_num {
            soft_vertices.push(SoftSkinVertex::read_options(reader, endian, (version,))?);
        }

        let bone_num = u32::read_options(reader, endian, ())?;
        let mut bone_map = Vec::new();
        for _ in 0..bone_num {
            bone_map.push(u16::read_options(reader, endian, ())?);
        }

        let num_rigid_vertices = u32::read_options(reader, endian, ())?;
        let num_soft_vertices = u32::read_options(reader, endian, ())?;
        let max_bone_influences = u32::read_options(reader, endian, ())?;

        Ok(SkelMeshChunk {
            base_vertex_index,
            rigid_vertices,
            soft_vertices,
            bone_map,
            num_rigid_vertices,
            num_soft_vertices,
            max_bone_influences,
        })
    }
}

impl BinWrite for SkelMeshChunk {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.base_vertex_index.write_options(writer, endian, ())?;

        (self.rigid_vertices.len() as u32).write_options(writer, endian, ())?;
        for v in self.rigid_vertices.iter() {
            v.write_options(writer, endian, ())?;
        }

        (self.soft_vertices.len() as u32).write_options(writer, endian, ())?;
        for v in self.soft_vertices.iter() {
            v.write_options(writer, endian, ())?;
        }

        (self.bone_map.len() as u32).write_options(writer, endian, ())?;
        for bone in self.bone_map.iter() {
            bone.write_options(writer, endian, ())?;
        }

        self.num_rigid_vertices.write_options(writer, endian, ())?;
        self.num_soft_vertices.write_options(writer, endian, ())?;
        self.max_bone_influences.write_options(writer, endian, ())
    }
}
