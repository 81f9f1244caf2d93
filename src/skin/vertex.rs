use std::io::{Read, Seek, Write};

use binrw::{binrw, BinRead, BinResult, BinWrite, Endian};
use cgmath::Vector3;

use super::version::SKIN_VERSION_MULTI_TEXCOORDS;
use crate::math::{LwVector2, LwVector3, PackedNormal, VertexColor};
use crate::validation::limits::{INFLUENCE_WEIGHT_TOTAL, MAX_INFLUENCES, MAX_TEXCOORDS};

/// Packs 4 influence bytes into one dword. Byte 0 lands in the low bits, so a
/// little endian stream keeps the bytes in slot order and a big endian stream
/// stores them reversed.
#[inline]
pub fn pack_influence_bytes(bytes: [u8; MAX_INFLUENCES]) -> u32 {
    u32::from_le_bytes(bytes)
}

#[inline]
pub fn unpack_influence_bytes(packed: u32) -> [u8; MAX_INFLUENCES] {
    packed.to_le_bytes()
}

/// Four bone/weight slots. Bone values index the owning chunk's bone map,
/// weights are 8-bit fractions of 255.
///
/// Stored as weights then bones, each array as one packed dword.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BoneInfluence {
    #[br(map = |raw: u32| unpack_influence_bytes(raw))]
    #[bw(map = |w: &[u8; MAX_INFLUENCES]| pack_influence_bytes(*w))]
    pub weights: [u8; MAX_INFLUENCES],
    #[br(map = |raw: u32| unpack_influence_bytes(raw))]
    #[bw(map = |b: &[u8; MAX_INFLUENCES]| pack_influence_bytes(*b))]
    pub bones: [u8; MAX_INFLUENCES],
}

impl BoneInfluence {
    pub fn new(bones: [u8; MAX_INFLUENCES], weights: [u8; MAX_INFLUENCES]) -> Self {
        Self { weights, bones }
    }

    /// Full weight on a single bone.
    pub fn rigid(bone: u8) -> Self {
        Self {
            weights: [INFLUENCE_WEIGHT_TOTAL as u8, 0, 0, 0],
            bones: [bone, 0, 0, 0],
        }
    }

    pub fn total_weight(&self) -> u32 {
        self.weights.iter().map(|&w| w as u32).sum()
    }

    /// Number of slots with a non-zero weight.
    pub fn num_influences(&self) -> usize {
        self.weights.iter().filter(|&&w| w > 0).count()
    }

    /// Exactly one slot carries weight, in any position.
    pub fn is_rigid(&self) -> bool {
        self.num_influences() == 1
    }

    /// Bone of the only weighted slot; slot 0 for influences that are not
    /// rigid.
    pub fn rigid_bone(&self) -> u8 {
        match self.weights.iter().position(|&w| w > 0) {
            Some(slot) if self.is_rigid() => self.bones[slot],
            _ => self.bones[0],
        }
    }
}

/// Vertex bound to exactly one bone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidSkinVertex {
    pub position: LwVector3,
    pub tangent_x: PackedNormal,
    pub tangent_y: PackedNormal,
    pub tangent_z: PackedNormal,
    pub uvs: [LwVector2; MAX_TEXCOORDS],
    pub color: VertexColor,
    pub bone: u8,
}

/// Vertex blended between up to four bones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftSkinVertex {
    pub position: LwVector3,
    pub tangent_x: PackedNormal,
    pub tangent_y: PackedNormal,
    pub tangent_z: PackedNormal,
    pub uvs: [LwVector2; MAX_TEXCOORDS],
    pub color: VertexColor,
    pub influence: BoneInfluence,
}

impl Default for RigidSkinVertex {
    fn default() -> Self {
        Self {
            position: LwVector3::default(),
            tangent_x: PackedNormal::from_vector(Vector3::new(1.0, 0.0, 0.0)),
            tangent_y: PackedNormal::from_vector(Vector3::new(0.0, 1.0, 0.0)),
            tangent_z: PackedNormal::from_vector(Vector3::new(0.0, 0.0, 1.0)),
            uvs: [LwVector2::default(); MAX_TEXCOORDS],
            color: VertexColor::WHITE,
            bone: 0,
        }
    }
}

impl Default for SoftSkinVertex {
    fn default() -> Self {
        RigidSkinVertex::default().to_soft()
    }
}

impl RigidSkinVertex {
    /// Soft vertex with all weight on slot 0.
    pub fn to_soft(&self) -> SoftSkinVertex {
        SoftSkinVertex {
            position: self.position,
            tangent_x: self.tangent_x,
            tangent_y: self.tangent_y,
            tangent_z: self.tangent_z,
            uvs: self.uvs,
            color: self.color,
            influence: BoneInfluence::rigid(self.bone),
        }
    }
}

impl SoftSkinVertex {
    /// Drops every slot but the first.
    pub fn to_rigid(&self) -> RigidSkinVertex {
        RigidSkinVertex {
            position: self.position,
            tangent_x: self.tangent_x,
            tangent_y: self.tangent_y,
            tangent_z: self.tangent_z,
            uvs: self.uvs,
            color: self.color,
            bone: self.influence.rigid_bone(),
        }
    }
}

/// Fields shared by both vertex kinds, in stream order up to the influences.
fn read_common<R: Read + Seek>(
    reader: &mut R,
    endian: Endian,
    version: u32,
) -> BinResult<(LwVector3, [PackedNormal; 3], [LwVector2; MAX_TEXCOORDS], VertexColor)> {
    let position = LwVector3::read_options(reader, endian, ())?;
    let tangent_x = PackedNormal::read_options(reader, endian, ())?;
    let tangent_y = PackedNormal::read_options(reader, endian, ())?;
    let tangent_z = PackedNormal::read_options(reader, endian, ())?;

    let mut uvs = [LwVector2::default(); MAX_TEXCOORDS];
    let mut color = VertexColor::WHITE;
    if version >= SKIN_VERSION_MULTI_TEXCOORDS {
        for uv in uvs.iter_mut() {
            *uv = LwVector2::read_options(reader, endian, ())?;
        }
        color = VertexColor::read_options(reader, endian, ())?;
    } else {
        uvs[0] = LwVector2::read_options(reader, endian, ())?;
    }

    Ok((position, [tangent_x, tangent_y, tangent_z], uvs, color))
}

fn write_common<W: Write + Seek>(
    writer: &mut W,
    endian: Endian,
    position: &LwVector3,
    tangents: [&PackedNormal; 3],
    uvs: &[LwVector2; MAX_TEXCOORDS],
    color: &VertexColor,
) -> BinResult<()> {
    position.write_options(writer, endian, ())?;
    for tangent in tangents {
        tangent.write_options(writer, endian, ())?;
    }
    for uv in uvs.iter() {
        uv.write_options(writer, endian, ())?;
    }
    color.write_options(writer, endian, ())?;
    Ok(())
}

impl BinRead for RigidSkinVertex {
    type Args<'a> = (u32,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let (position, [tangent_x, tangent_y, tangent_z], uvs, color) =
            read_common(reader, endian, args.0)?;
        let bone = u8::read_options(reader, endian, ())?;

        Ok(RigidSkinVertex {
            position,
            tangent_x,
            tangent_y,
            tangent_z,
            uvs,
            color,
            bone,
        })
    }
}

impl BinWrite for RigidSkinVertex {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        write_common(
            writer,
            endian,
            &self.position,
            [&self.tangent_x, &self.tangent_y, &self.tangent_z],
            &self.uvs,
            &self.color,
        )?;
        self.bone.write_options(writer, endian, ())
    }
}

impl BinRead for SoftSkinVertex {
    type Args<'a> = (u32,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let (position, [tangent_x, tangent_y, tangent_z], uvs, color) =
            read_common(reader, endian, args.0)?;
        let bones = unpack_influence_bytes(u32::read_options(reader, endian, ())?);
        let weights = unpack_influence_bytes(u32::read_options(reader, endian, ())?);

        Ok(SoftSkinVertex {
            position,
            tangent_x,
            tangent_y,
            tangent_z,
            uvs,
            color,
            influence: BoneInfluence::new(bones, weights),
        })
    }
}

impl BinWrite for SoftSkinVertex {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        write_common(
            writer,
            endian,
            &self.position,
            [&self.tangent_x, &self.tangent_y, &self.tangent_z],
            &self.uvs,
            &self.color,
        )?;
        pack_influence_bytes(self.influence.bones).write_options(writer, endian, ())?;
        pack_influence_bytes(self.influence.weights).write_options(writer, endian, ())
    }
}
