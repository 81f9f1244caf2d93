use std::io;

use thiserror::Error;

use crate::skin::vertex_buffer::GpuSkinVertexFormat;

/// Skinning data error types
#[derive(Debug, Error)]
pub enum SkinError {
    /// Vertex index past the end of a buffer
    #[error("vertex index {index} out of range ({count} vertices)")]
    VertexOutOfRange { index: usize, count: usize },

    /// UV channel past the buffer's texcoord count
    #[error("texcoord channel {channel} out of range ({count} channels)")]
    TexCoordOutOfRange { channel: usize, count: usize },

    /// Vertex data does not match the buffer's configured layout
    #[error("vertex format mismatch: buffer is {expected:?}, got {actual:?}")]
    FormatMismatch {
        expected: GpuSkinVertexFormat,
        actual: GpuSkinVertexFormat,
    },

    #[error("texcoord count {0} is outside 1..=4")]
    InvalidTexCoordCount(u32),

    #[error("unsupported index width {0}, expected 2 or 4 bytes")]
    InvalidIndexWidth(u8),

    /// Copying an index into storage too narrow to hold it
    #[error("index {value} at position {position} does not fit in a {width}-byte index buffer")]
    IndexWidthOverflow {
        position: usize,
        value: u32,
        width: u8,
    },

    #[error("index position {index} out of range ({count} indices)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("chunk {chunk} references {bones} bones, limit is {limit}")]
    ChunkBoneBudgetExceeded {
        chunk: usize,
        bones: usize,
        limit: usize,
    },

    #[error("LOD {lod} out of range ({count} LODs)")]
    LodOutOfRange { lod: usize, count: usize },

    #[error("influence set {index} out of range ({count} sets)")]
    InfluenceSetOutOfRange { index: usize, count: usize },

    #[error("section {section} out of range: {reason}")]
    SectionOutOfRange { section: usize, reason: String },

    #[error("bone '{0}' not found in reference skeleton")]
    UnknownBone(String),

    #[error("unsupported format version {0:#x}")]
    UnsupportedVersion(u32),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Binary(#[from] binrw::Error),
}

/// Result type for skinning data operations
pub type Result<T> = std::result::Result<T, SkinError>;
