//! Format versions of the skinned mesh data. Each constant gates the fields
//! added at that revision; readers skip and default anything newer than the
//! version tag they are handed.

/// Oldest readable layout: 16-bit triangle counts, 16-bit index and raw point
/// index arrays, vertex buffers stored as plain soft vertex arrays.
pub const SKIN_VERSION_BASE: u32 = 0x1000;
/// Texcoord count stored; skin vertices carry every UV channel and a color.
pub const SKIN_VERSION_MULTI_TEXCOORDS: u32 = 0x1001;
/// GPU vertex buffer with a UV precision flag and bulk element data.
pub const SKIN_VERSION_HALF_UVS: u32 = 0x1002;
/// Packed position flag plus mesh extension/origin.
pub const SKIN_VERSION_PACKED_POSITION: u32 = 0x1003;
/// Multi-size index container, 32-bit triangle counts and raw point indices.
pub const SKIN_VERSION_DWORD_INDICES: u32 = 0x1004;
/// Per-section triangle sort mode.
pub const SKIN_VERSION_TRIANGLE_SORTING: u32 = 0x1005;
/// Vertex color buffer.
pub const SKIN_VERSION_VERTEX_COLORS: u32 = 0x1006;
/// Alternate influence sets with a 16-bit vertex mapping.
pub const SKIN_VERSION_VERTEX_INFLUENCES: u32 = 0x1007;
/// Unused index size byte ahead of the 16-bit mapping.
pub const SKIN_VERSION_INFLUENCE_INDEX_SIZE: u32 = 0x1008;
/// Sections and chunks inside influence sets.
pub const SKIN_VERSION_INFLUENCE_CHUNKS: u32 = 0x1009;
/// Required bones inside influence sets.
pub const SKIN_VERSION_INFLUENCE_REQUIRED_BONES: u32 = 0x100A;
/// Influence set usage byte.
pub const SKIN_VERSION_INFLUENCE_USAGE: u32 = 0x100B;
/// 32-bit influence mapping values.
pub const SKIN_VERSION_INFLUENCE_DWORD_MAPPING: u32 = 0x100C;
/// Adjacency index container.
pub const SKIN_VERSION_ADJACENCY: u32 = 0x100D;

pub const SKIN_VERSION: u32 = SKIN_VERSION_ADJACENCY;

pub fn is_supported_version(version: u32) -> bool {
    (SKIN_VERSION_BASE..=SKIN_VERSION).contains(&version)
}

pub(crate) fn unsupported_version_error(pos: u64, what: &str, version: u32) -> binrw::Error {
    binrw::Error::AssertFail {
        pos,
        message: format!("{} decoding not implemented for version {:#x}", what, version),
    }
}
