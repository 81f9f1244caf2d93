//! Alternate bone weights a mesh instance can swap in at runtime.

use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};

use binrw::{binrw, BinRead, BinResult, BinWrite, Endian};
use serde::{Deserialize, Serialize};

use super::chunk::{SkelMeshChunk, SkelMeshSection};
use super::version::{
    SKIN_VERSION_INFLUENCE_CHUNKS, SKIN_VERSION_INFLUENCE_DWORD_MAPPING, SKIN_VERSION_INFLUENCE_INDEX_SIZE,
    SKIN_VERSION_INFLUENCE_REQUIRED_BONES, SKIN_VERSION_INFLUENCE_USAGE,
};
use super::vertex::BoneInfluence;
use super::{read_vec, read_versioned_vec, write_vec};

/// How an influence set is applied to its LOD.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[binrw]
#[br(repr = u8)]
#[bw(repr = u8)]
pub enum InfluenceUsage {
    /// Only the mapped vertices take the alternate weights.
    #[default]
    PartialSwap = 0,
    /// Sections, chunks and weights are all replaced.
    FullSwap = 1,
}

/// Two bones named by the animation layer as the active pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BonePair {
    pub names: [String; 2],
}

impl BonePair {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            names: [first.into(), second.into()],
        }
    }

    /// Same two bones, in either order.
    pub fn is_match(&self, other: &BonePair) -> bool {
        (self.names[0] == other.names[0] && self.names[1] == other.names[1])
            || (self.names[0] == other.names[1] && self.names[1] == other.names[0])
    }
}

/// Skeleton indices of a bone pair, used as the mapping key.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BoneIndexPair(pub [i32; 2]);

impl BoneIndexPair {
    pub fn new(first: i32, second: i32) -> Self {
        Self([first, second])
    }

    pub fn reversed(self) -> Self {
        Self([self.0[1], self.0[0]])
    }
}

/// Alternate weighting for one LOD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexInfluenceSet {
    /// One influence per LOD vertex.
    pub influences: Vec<BoneInfluence>,
    /// Vertices whose weights are swapped while a bone pair is active.
    pub vertex_influence_mapping: BTreeMap<BoneIndexPair, Vec<u32>>,
    /// Full swap render data; index ranges refer to the LOD's index container.
    pub sections: Vec<SkelMeshSection>,
    pub chunks: Vec<SkelMeshChunk>,
    pub required_bones: Vec<u8>,
    pub usage: InfluenceUsage,
    /// Alternate section -> LOD section it takes its sort mode from.
    /// Rebuilt after load, never stored.
    pub custom_left_right_section_map: Vec<Option<usize>>,
}

impl VertexInfluenceSet {
    pub fn num_influences(&self) -> usize {
        self.influences.len()
    }

    pub fn is_full_swap(&self) -> bool {
        self.usage == InfluenceUsage::FullSwap
    }

    /// Vertices mapped to the pair, in whichever order it was stored.
    pub fn mapped_vertices(&self, pair: BoneIndexPair) -> Option<&[u32]> {
        self.vertex_influence_mapping
            .get(&pair)
            .or_else(|| self.vertex_influence_mapping.get(&pair.reversed()))
            .map(Vec::as_slice)
    }
}

fn read_mapping<R: Read + Seek, T, F>(
    reader: &mut R,
    endian: Endian,
    widen: F,
) -> BinResult<BTreeMap<BoneIndexPair, Vec<u32>>>
where
    T: for<'a> BinRead<Args<'a> = ()>,
    F: Fn(T) -> u32,
{
    let count = u32::read_options(reader, endian, ())?;
    let mut mapping = BTreeMap::new();
    for _ in 0..count {
        let key = BoneIndexPair::read_options(reader, endian, ())?;
        let len = u32::read_options(reader, endian, ())?;
        let mut values = Vec::new();
        for _ in 0..len {
            values.push(widen(T::read_options(reader, endian, ())?));
        }
        mapping.insert(key, values);
    }
    Ok(mapping)
}

impl BinRead for VertexInfluenceSet {
    type Args<'a> = (u32,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let version = args.0;

        let influences = read_vec(reader, endian)?;

        let vertex_influence_mapping = if version >= SKIN_VERSION_INFLUENCE_DWORD_MAPPING {
            read_mapping(reader, endian, |v: u32| v)?
        } else {
            if version >= SKIN_VERSION_INFLUENCE_INDEX_SIZE {
                // written by older tools, never used
                let _index_size = u8::read_options(reader, endian, ())?;
            }
            read_mapping(reader, endian, |v: u16| v as u32)?
        };

        let (sections, chunks) = if version >= SKIN_VERSION_INFLUENCE_CHUNKS {
            (
                read_versioned_vec(reader, endian, version)?,
                read_versioned_vec(reader, endian, version)?,
            )
        } else {
            (vec![], vec![])
        };

        let required_bones = if version >= SKIN_VERSION_INFLUENCE_REQUIRED_BONES {
            read_vec(reader, endian)?
        } else {
            vec![]
        };

        let usage = if version >= SKIN_VERSION_INFLUENCE_USAGE {
            InfluenceUsage::read_options(reader, endian, ())?
        } else {
            InfluenceUsage::PartialSwap
        };

        Ok(VertexInfluenceSet {
            influences,
            vertex_influence_mapping,
            sections,
            chunks,
            required_bones,
            usage,
            custom_left_right_section_map: vec![],
        })
    }
}

impl BinWrite for VertexInfluenceSet {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        write_vec(&self.influences, writer, endian)?;

        (self.vertex_influence_mapping.len() as u32).write_options(writer, endian, ())?;
        for (key, values) in &self.vertex_influence_mapping {
            key.write_options(writer, endian, ())?;
            (values.len() as u32).write_options(writer, endian, ())?;
            for value in values {
                value.write_options(writer, endian, ())?;
            }
        }

        write_vec(&self.sections, writer, endian)?;
        write_vec(&self.chunks, writer, endian)?;
        write_vec(&self.required_bones, writer, endian)?;

        self.usage.write_options(writer, endian, ())
    }
}
