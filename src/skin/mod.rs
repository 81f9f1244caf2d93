pub mod builder;
pub mod chunk;
pub mod color_buffer;
pub mod index;
pub mod influences;
pub mod instance;
pub mod lod_model;
pub mod mesh;
pub mod version;
pub mod vertex;
pub mod vertex_buffer;

use std::io::{Read, Seek, Write};

use binrw::{BinRead, BinResult, BinWrite, Endian};

pub use builder::{build_alternate_influences, build_lod_model, MeshBuildOptions, MeshFace, MeshImportData, MeshWedge, RawBoneInfluence};
pub use chunk::{SkelMeshChunk, SkelMeshSection, TriangleSortOption};
pub use color_buffer::SkinColorBuffer;
pub use index::{required_index_width, IndexBufferData, MultiSizeIndexContainer};
pub use influences::{BoneIndexPair, BonePair, InfluenceUsage, VertexInfluenceSet};
pub use instance::{InstanceLodInfo, SkinnedMeshInstance};
pub use lod_model::StaticLodModel;
pub use mesh::{load_skeletal_mesh, save_skeletal_mesh, MeshBone, SkeletalMesh, INVALID_BONE_INDEX};
pub use vertex::{BoneInfluence, RigidSkinVertex, SoftSkinVertex};
pub use vertex_buffer::{GpuSkinVertexFormat, SkinVertexBuffer, SkinningCapabilities, VertexBufferBuildOptions};

/// u32 count followed by that many plain records.
pub(crate) fn read_vec<R, T>(reader: &mut R, endian: Endian) -> BinResult<Vec<T>>
where
    R: Read + Seek,
    T: for<'a> BinRead<Args<'a> = ()>,
{
    let count = u32::read_options(reader, endian, ())?;
    let mut items = Vec::new();
    for _ in 0..count {
        items.push(T::read_options(reader, endian, ())?);
    }
    Ok(items)
}

/// u32 count followed by that many records of a version-gated layout.
pub(crate) fn read_versioned_vec<R, T>(reader: &mut R, endian: Endian, version: u32) -> BinResult<Vec<T>>
where
    R: Read + Seek,
    T: for<'a> BinRead<Args<'a> = (u32,)>,
{
    let count = u32::read_options(reader, endian, ())?;
    let mut items = Vec::new();
    for _ in 0..count {
        items.push(T::read_options(reader, endian, (version,))?);
    }
    Ok(items)
}

pub(crate) fn write_vec<W, T>(items: &[T], writer: &mut W, endian: Endian) -> BinResult<()>
where
    W: Write + Seek,
    T: for<'a> BinWrite<Args<'a> = ()>,
{
    (items.len() as u32).write_options(writer, endian, ())?;
    for item in items {
        item.write_options(writer, endian, ())?;
    }
    Ok(())
}
