use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use binrw::{BinRead, BinResult, BinWrite, Endian};

use super::chunk::SkelMeshChunk;
use super::lod_model::StaticLodModel;
use super::version::{is_supported_version, unsupported_version_error, SKIN_VERSION};
use super::{read_vec, write_vec};
use crate::error::{Result, SkinError};
use crate::math::{LwQuaternion, LwVector3};
use crate::validation::limits::MAX_REQUIRED_BONE_INDEX;

/// Parent index of the root bone.
pub const INVALID_BONE_INDEX: u32 = u32::MAX;

/// Reference pose bone.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshBone {
    pub name: String,
    pub parent_index: u32,
    pub position: LwVector3,
    pub orientation: LwQuaternion,
}

impl MeshBone {
    pub fn new(name: impl Into<String>, parent: Option<u32>) -> Self {
        Self {
            name: name.into(),
            parent_index: parent.unwrap_or(INVALID_BONE_INDEX),
            position: LwVector3::default(),
            orientation: LwQuaternion::identity(),
        }
    }

    pub fn parent(&self) -> Option<usize> {
        if self.parent_index == INVALID_BONE_INDEX {
            None
        } else {
            Some(self.parent_index as usize)
        }
    }
}

impl BinRead for MeshBone {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let name_bytes: Vec<u8> = read_vec(reader, endian)?;
        let name = String::from_utf8(name_bytes).map_err(|e| binrw::Error::AssertFail {
            pos,
            message: format!("Bone name is not UTF-8: {}", e),
        })?;
        let parent_index = u32::read_options(reader, endian, ())?;
        let position = LwVector3::read_options(reader, endian, ())?;
        let orientation = LwQuaternion::read_options(reader, endian, ())?;

        Ok(MeshBone {
            name,
            parent_index,
            position,
            orientation,
        })
    }
}

impl BinWrite for MeshBone {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        write_vec(self.name.as_bytes(), writer, endian)?;
        self.parent_index.write_options(writer, endian, ())?;
        self.position.write_options(writer, endian, ())?;
        self.orientation.write_options(writer, endian, ())
    }
}

/// Chunk bones plus every ancestor, sorted. Bones past the byte range of
/// required bone lists are dropped with a warning.
fn required_bone_closure(chunks: &[SkelMeshChunk], skeleton: &[MeshBone]) -> Vec<u8> {
    let mut required = BTreeSet::new();
    for bone in chunks.iter().flat_map(|c| c.bone_map.iter().copied()) {
        let mut current = Some(bone as usize);
        while let Some(index) = current {
            if index >= skeleton.len() || !required.insert(index) {
                break;
            }
            current = skeleton[index].parent();
        }
    }

    required
        .into_iter()
        .filter(|&bone| {
            if bone > MAX_REQUIRED_BONE_INDEX {
                log::warn!("required bone {} does not fit a byte index, skipping", bone);
                false
            } else {
                true
            }
        })
        .map(|bone| bone as u8)
        .collect()
}

/// Fills the LOD's required bones, and those of each full swap influence set
/// from its own chunks.
pub fn calculate_required_bones(lod: &mut StaticLodModel, skeleton: &[MeshBone]) {
    lod.required_bones = required_bone_closure(&lod.chunks, skeleton);
    for set in lod.vertex_influences.iter_mut().filter(|s| s.is_full_swap()) {
        set.required_bones = required_bone_closure(&set.chunks, skeleton);
    }
}

/// Reference skeleton plus its LODs, highest detail first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkeletalMesh {
    pub ref_skeleton: Vec<MeshBone>,
    pub lod_models: Vec<StaticLodModel>,
    pub has_vertex_colors: bool,
}

impl SkeletalMesh {
    pub fn find_bone_index(&self, name: &str) -> Option<usize> {
        self.ref_skeleton.iter().position(|b| b.name == name)
    }

    pub fn lod_model(&self, lod: usize) -> Result<&StaticLodModel> {
        self.lod_models.get(lod).ok_or(SkinError::LodOutOfRange {
            lod,
            count: self.lod_models.len(),
        })
    }

    pub fn lod_model_mut(&mut self, lod: usize) -> Result<&mut StaticLodModel> {
        let count = self.lod_models.len();
        self.lod_models
            .get_mut(lod)
            .ok_or(SkinError::LodOutOfRange { lod, count })
    }

    pub fn calculate_required_bones(&mut self) {
        for lod in &mut self.lod_models {
            calculate_required_bones(lod, &self.ref_skeleton);
        }
    }
}

impl BinRead for SkeletalMesh {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let version = u32::read_options(reader, endian, ())?;
        if !is_supported_version(version) {
            return Err(unsupported_version_error(pos, "Skeletal mesh", version));
        }
        let has_vertex_colors = u32::read_options(reader, endian, ())? != 0;
        let ref_skeleton = read_vec(reader, endian)?;

        let lod_count = u32::read_options(reader, endian, ())?;
        let mut lod_models = Vec::new();
        for _ in 0..lod_count {
            lod_models.push(StaticLodModel::read_options(reader, endian, (version, has_vertex_colors))?);
        }

        Ok(SkeletalMesh {
            ref_skeleton,
            lod_models,
            has_vertex_colors,
        })
    }
}

impl BinWrite for SkeletalMesh {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        SKIN_VERSION.write_options(writer, endian, ())?;
        (self.has_vertex_colors as u32).write_options(writer, endian, ())?;
        write_vec(&self.ref_skeleton, writer, endian)?;
        (self.lod_models.len() as u32).write_options(writer, endian, ())?;
        for lod in &self.lod_models {
            lod.write_options(writer, endian, (self.has_vertex_colors,))?;
        }
        Ok(())
    }
}

pub fn load_skeletal_mesh(path: &Path) -> anyhow::Result<SkeletalMesh> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open skeletal mesh '{}': {}", path.display(), e))?;
    let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mut reader = BufReader::new(file);

    SkeletalMesh::read_options(&mut reader, Endian::Little, ()).map_err(|e| {
        let bytes_read = reader.stream_position().unwrap_or(0);
        anyhow::anyhow!(
            "Failed to parse skeletal mesh '{}': {}\n\
             File size: {} bytes, bytes read before error: {} bytes",
            path.display(),
            e,
            file_size,
            bytes_read
        )
    })
}

pub fn save_skeletal_mesh(mesh: &SkeletalMesh, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    let file = File::create(path).with_context(|| format!("Failed to create '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    mesh.write_options(&mut writer, Endian::Little, ())
        .with_context(|| format!("Failed to write skeletal mesh '{}'", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use binrw::{BinReaderExt, BinWriterExt};

    use super::*;
    use crate::skin::influences::{InfluenceUsage, VertexInfluenceSet};

    fn skeleton() -> Vec<MeshBone> {
        // 0 root, 1 spine, 2 arm_l (spine), 3 arm_r (spine), 4 hand_l (arm_l)
        vec![
            MeshBone::new("root", None),
            MeshBone::new("spine", Some(0)),
            MeshBone::new("arm_l", Some(1)),
            MeshBone::new("arm_r", Some(1)),
            MeshBone::new("hand_l", Some(2)),
        ]
    }

    fn chunk_with_bones(bones: &[u16]) -> SkelMeshChunk {
        SkelMeshChunk {
            bone_map: bones.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn required_bones_include_ancestors() {
        let mut lod = StaticLodModel {
            chunks: vec![chunk_with_bones(&[4])],
            ..Default::default()
        };
        calculate_required_bones(&mut lod, &skeleton());
        assert_eq!(lod.required_bones, vec![0, 1, 2, 4]);
    }

    #[test]
    fn full_swap_required_bones_use_own_chunks() {
        let mut lod = StaticLodModel {
            chunks: vec![chunk_with_bones(&[4])],
            ..Default::default()
        };
        lod.vertex_influences.push(VertexInfluenceSet {
            usage: InfluenceUsage::FullSwap,
            chunks: vec![chunk_with_bones(&[3])],
            ..Default::default()
        });
        lod.vertex_influences.push(VertexInfluenceSet::default());
        calculate_required_bones(&mut lod, &skeleton());

        assert_eq!(lod.required_bones, vec![0, 1, 2, 4]);
        assert_eq!(lod.vertex_influences[0].required_bones, vec![0, 1, 3]);
        assert!(lod.vertex_influences[1].required_bones.is_empty());
    }

    #[test]
    fn bone_lookup_and_lod_range() {
        let mesh = SkeletalMesh {
            ref_skeleton: skeleton(),
            ..Default::default()
        };
        assert_eq!(mesh.find_bone_index("arm_r"), Some(3));
        assert_eq!(mesh.find_bone_index("tail"), None);
        assert!(matches!(
            mesh.lod_model(0),
            Err(SkinError::LodOutOfRange { lod: 0, count: 0 })
        ));
    }

    #[test]
    fn mesh_required_bones_per_lod() {
        let mut mesh = SkeletalMesh {
            ref_skeleton: skeleton(),
            lod_models: vec![StaticLodModel::default()],
            has_vertex_colors: false,
        };
        mesh.lod_model_mut(0).unwrap().chunks.push(chunk_with_bones(&[3]));
        mesh.calculate_required_bones();
        assert_eq!(mesh.lod_model(0).unwrap().required_bones, vec![0, 1, 3]);
        assert!(mesh.lod_model_mut(1).is_err());
    }

    #[test]
    fn bone_record_roundtrip() {
        let mut bone = MeshBone::new("hand_l", Some(2));
        bone.position = LwVector3::new(1.0, 2.0, 3.0);
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&bone).unwrap();
        assert_eq!(&cursor.get_ref()[0..4], &6u32.to_le_bytes());
        cursor.set_position(0);
        let back: MeshBone = cursor.read_le().unwrap();
        assert_eq!(back, bone);
    }

    #[test]
    fn future_version_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(SKIN_VERSION + 1).to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let res: BinResult<SkeletalMesh> = Cursor::new(bytes).read_le();
        assert!(matches!(res, Err(binrw::Error::AssertFail { pos: 0, .. })));
    }
}
