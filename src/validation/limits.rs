/// Engine-enforced limits for skinned mesh data.

/// Maximum number of bone influences per vertex.
pub const MAX_INFLUENCES: usize = 4;

/// Maximum number of UV channels per vertex.
pub const MAX_TEXCOORDS: usize = 4;

/// Maximum number of distinct skeleton bones a single chunk may reference.
/// Bounded by the bone matrix array the GPU skinning shader uploads per draw.
pub const MAX_GPUSKIN_BONES: usize = 75;

/// Required bone lists store bone indices as bytes.
pub const MAX_REQUIRED_BONE_INDEX: usize = u8::MAX as usize;

/// Largest vertex count that still fits a 16-bit index buffer.
pub const MAX_16BIT_INDEXED_VERTICES: usize = 0xFFFF;

/// Sum every soft vertex's 8-bit weights should add up to.
pub const INFLUENCE_WEIGHT_TOTAL: u32 = 255;

/// Packed-position error (in mesh units) above which a warning is logged.
pub const PACKED_POSITION_WARN_ERROR: f32 = 10.0;
