//! GPU skin vertex storage.
//!
//! One LOD's render attributes live in a single byte buffer whose element
//! layout is picked once per `init` from two flags:
//!
//! ```text
//! [4 bytes]  tangent X (packed normal)
//! [4 bytes]  tangent Z (packed normal, W = basis determinant sign)
//! [4 bytes]  influence bones
//! [4 bytes]  influence weights
//! [12 | 4]   position: 3 x f32, or packed X:11 Y:11 Z:10 relative to origin/extension
//! [n x 4 | n x 8]  UVs: 2 x f16 or 2 x f32 per channel
//! ```
//!
//! Element bytes are kept in host order for upload; streams are written field
//! by field in the requested endian.

use std::io::{Read, Seek, Write};

use binrw::{BinRead, BinResult, BinWrite, Endian};
use bytemuck::{Pod, Zeroable};
use cgmath::{ElementWise, InnerSpace, Vector2, Vector3};
use half::f16;
use serde::{Deserialize, Serialize};

use super::version::{SKIN_VERSION_HALF_UVS, SKIN_VERSION_MULTI_TEXCOORDS, SKIN_VERSION_PACKED_POSITION};
use super::vertex::{pack_influence_bytes, unpack_influence_bytes, BoneInfluence, SoftSkinVertex};
use crate::error::{Result, SkinError};
use crate::math::{basis_determinant_sign, scale_offset, LwBox, LwVector2, LwVector3, PackedNormal, PackedPosition};
use crate::validation::limits::{MAX_TEXCOORDS, PACKED_POSITION_WARN_ERROR};

/// What the target renderer can do with skinned vertex data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinningCapabilities {
    /// Packed positions can be decoded by the vertex factory.
    pub supports_packed_position: bool,
    /// Vertices are skinned on the CPU, which reads full positions.
    pub cpu_skinning: bool,
}

impl Default for SkinningCapabilities {
    fn default() -> Self {
        Self {
            supports_packed_position: true,
            cpu_skinning: false,
        }
    }
}

impl SkinningCapabilities {
    pub fn allows_packed_position(&self) -> bool {
        self.supports_packed_position && !self.cpu_skinning
    }
}

/// Settings for building a LOD's vertex and color buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexBufferBuildOptions {
    pub use_full_precision_uvs: bool,
    pub use_packed_position: bool,
    pub num_tex_coords: u32,
    pub has_vertex_colors: bool,
}

impl Default for VertexBufferBuildOptions {
    fn default() -> Self {
        Self {
            use_full_precision_uvs: false,
            use_packed_position: true,
            num_tex_coords: 1,
            has_vertex_colors: false,
        }
    }
}

/// The four element layouts, one per precision flag combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpuSkinVertexFormat {
    HalfUvUnpackedPosition = 0,
    FullUvUnpackedPosition = 1,
    HalfUvPackedPosition = 2,
    FullUvPackedPosition = 3,
}

impl GpuSkinVertexFormat {
    pub fn from_flags(use_full_precision_uvs: bool, use_packed_position: bool) -> Self {
        match (use_full_precision_uvs, use_packed_position) {
            (false, false) => GpuSkinVertexFormat::HalfUvUnpackedPosition,
            (true, false) => GpuSkinVertexFormat::FullUvUnpackedPosition,
            (false, true) => GpuSkinVertexFormat::HalfUvPackedPosition,
            (true, true) => GpuSkinVertexFormat::FullUvPackedPosition,
        }
    }

    pub fn uses_full_precision_uvs(self) -> bool {
        matches!(
            self,
            GpuSkinVertexFormat::FullUvUnpackedPosition | GpuSkinVertexFormat::FullUvPackedPosition
        )
    }

    pub fn uses_packed_position(self) -> bool {
        matches!(
            self,
            GpuSkinVertexFormat::HalfUvPackedPosition | GpuSkinVertexFormat::FullUvPackedPosition
        )
    }

    fn codec(self) -> &'static FormatCodec {
        &FORMAT_CODECS[self as usize]
    }

    /// Bytes per element for the given texcoord count.
    pub fn stride(self, num_tex_coords: u32) -> usize {
        let codec = self.codec();
        BASE_SIZE + codec.position_size + codec.uv_size * num_tex_coords as usize
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuSkinVertexBase {
    tangent_x: u32,
    tangent_z: u32,
    influence_bones: [u8; 4],
    influence_weights: [u8; 4],
}

const BASE_SIZE: usize = std::mem::size_of::<GpuSkinVertexBase>();

/// Per-format encode/decode entry points.
struct FormatCodec {
    position_size: usize,
    uv_size: usize,
    /// Size of one scalar inside a UV, for stream byte order.
    uv_component_size: usize,
    write_position: fn(&mut [u8], Vector3<f32>),
    read_position: fn(&[u8]) -> Vector3<f32>,
    write_uv: fn(&mut [u8], Vector2<f32>),
    read_uv: fn(&[u8]) -> Vector2<f32>,
}

fn write_float_position(dst: &mut [u8], p: Vector3<f32>) {
    dst.copy_from_slice(bytemuck::bytes_of(&[p.x, p.y, p.z]));
}

fn read_float_position(src: &[u8]) -> Vector3<f32> {
    let [x, y, z]: [f32; 3] = bytemuck::pod_read_unaligned(src);
    Vector3::new(x, y, z)
}

fn write_packed_position(dst: &mut [u8], p: Vector3<f32>) {
    dst.copy_from_slice(bytemuck::bytes_of(&PackedPosition::from_vector(p)));
}

fn read_packed_position(src: &[u8]) -> Vector3<f32> {
    bytemuck::pod_read_unaligned::<PackedPosition>(src).to_vector()
}

fn write_half_uv(dst: &mut [u8], uv: Vector2<f32>) {
    dst.copy_from_slice(bytemuck::bytes_of(&[f16::from_f32(uv.x), f16::from_f32(uv.y)]));
}

fn read_half_uv(src: &[u8]) -> Vector2<f32> {
    let [u, v]: [f16; 2] = bytemuck::pod_read_unaligned(src);
    Vector2::new(u.to_f32(), v.to_f32())
}

fn write_full_uv(dst: &mut [u8], uv: Vector2<f32>) {
    dst.copy_from_slice(bytemuck::bytes_of(&[uv.x, uv.y]));
}

fn read_full_uv(src: &[u8]) -> Vector2<f32> {
    let [u, v]: [f32; 2] = bytemuck::pod_read_unaligned(src);
    Vector2::new(u, v)
}

const FLOAT_POSITION_SIZE: usize = 12;
const PACKED_POSITION_SIZE: usize = 4;
const HALF_UV_SIZE: usize = 4;
const FULL_UV_SIZE: usize = 8;

// Indexed by `GpuSkinVertexFormat as usize`.
static FORMAT_CODECS: [FormatCodec; 4] = [
    FormatCodec {
        position_size: FLOAT_POSITION_SIZE,
        uv_size: HALF_UV_SIZE,
        uv_component_size: 2,
        write_position: write_float_position,
        read_position: read_float_position,
        write_uv: write_half_uv,
        read_uv: read_half_uv,
    },
    FormatCodec {
        position_size: FLOAT_POSITION_SIZE,
        uv_size: FULL_UV_SIZE,
        uv_component_size: 4,
        write_position: write_float_position,
        read_position: read_float_position,
        write_uv: write_full_uv,
        read_uv: read_full_uv,
    },
    FormatCodec {
        position_size: PACKED_POSITION_SIZE,
        uv_size: HALF_UV_SIZE,
        uv_component_size: 2,
        write_position: write_packed_position,
        read_position: read_packed_position,
        write_uv: write_half_uv,
        read_uv: read_half_uv,
    },
    FormatCodec {
        position_size: PACKED_POSITION_SIZE,
        uv_size: FULL_UV_SIZE,
        uv_component_size: 4,
        write_position: write_packed_position,
        read_position: read_packed_position,
        write_uv: write_full_uv,
        read_uv: read_full_uv,
    },
];

/// Element layout fixed at `init` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VertexLayout {
    format: GpuSkinVertexFormat,
    num_tex_coords: u32,
    stride: usize,
}

impl VertexLayout {
    fn new(format: GpuSkinVertexFormat, num_tex_coords: u32) -> Self {
        Self {
            format,
            num_tex_coords,
            stride: format.stride(num_tex_coords),
        }
    }

    fn codec(&self) -> &'static FormatCodec {
        self.format.codec()
    }

    fn position_offset(&self) -> usize {
        BASE_SIZE
    }

    fn uv_offset(&self, channel: usize) -> usize {
        BASE_SIZE + self.codec().position_size + channel * self.codec().uv_size
    }
}

fn check_tex_coord_count(num_tex_coords: u32) -> Result<()> {
    if num_tex_coords == 0 || num_tex_coords as usize > MAX_TEXCOORDS {
        return Err(SkinError::InvalidTexCoordCount(num_tex_coords));
    }
    Ok(())
}

/// Origin and per-axis extension mapping a bounding box onto [-1, 1].
fn packing_transform(positions: impl IntoIterator<Item = Vector3<f32>>) -> (Vector3<f32>, Vector3<f32>) {
    match LwBox::from_points(positions) {
        Some(bounds) => {
            let extension = Vector3::new(
                (bounds.r.x + 1.0).floor(),
                (bounds.r.y + 1.0).floor(),
                (bounds.r.z + 1.0).floor(),
            );
            (bounds.c, extension)
        }
        None => (Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0)),
    }
}

/// Skinned vertex attribute store for one LOD.
#[derive(Debug, Clone, PartialEq)]
pub struct SkinVertexBuffer {
    capabilities: SkinningCapabilities,
    use_full_precision_uvs: bool,
    use_packed_position: bool,
    num_tex_coords: u32,
    mesh_origin: Vector3<f32>,
    mesh_extension: Vector3<f32>,
    processed_packed_positions: bool,
    layout: VertexLayout,
    num_vertices: usize,
    data: Vec<u8>,
}

impl Default for SkinVertexBuffer {
    fn default() -> Self {
        Self::new(SkinningCapabilities::default())
    }
}

impl SkinVertexBuffer {
    pub fn new(capabilities: SkinningCapabilities) -> Self {
        let use_packed_position = true;
        let format =
            GpuSkinVertexFormat::from_flags(false, use_packed_position && capabilities.allows_packed_position());
        Self {
            capabilities,
            use_full_precision_uvs: false,
            use_packed_position,
            num_tex_coords: 1,
            mesh_origin: Vector3::new(0.0, 0.0, 0.0),
            mesh_extension: Vector3::new(1.0, 1.0, 1.0),
            processed_packed_positions: false,
            layout: VertexLayout::new(format, 1),
            num_vertices: 0,
            data: vec![],
        }
    }

    pub fn capabilities(&self) -> SkinningCapabilities {
        self.capabilities
    }

    /// Takes effect on the next `init`.
    pub fn set_capabilities(&mut self, capabilities: SkinningCapabilities) {
        self.capabilities = capabilities;
    }

    /// Takes effect on the next `init`; existing data keeps its layout.
    pub fn set_use_full_precision_uvs(&mut self, use_full_precision_uvs: bool) {
        self.use_full_precision_uvs = use_full_precision_uvs;
    }

    /// Takes effect on the next `init`; existing data keeps its layout.
    pub fn set_use_packed_position(&mut self, use_packed_position: bool) {
        self.use_packed_position = use_packed_position;
    }

    /// Takes effect on the next `init`.
    pub fn set_num_tex_coords(&mut self, num_tex_coords: u32) -> Result<()> {
        check_tex_coord_count(num_tex_coords)?;
        self.num_tex_coords = num_tex_coords;
        Ok(())
    }

    pub fn use_full_precision_uvs(&self) -> bool {
        self.use_full_precision_uvs
    }

    pub fn use_packed_position(&self) -> bool {
        self.use_packed_position
    }

    /// Packing requested and available on this target.
    pub fn effective_packed_position(&self) -> bool {
        self.use_packed_position && self.capabilities.allows_packed_position()
    }

    /// Layout the next `init` would produce.
    pub fn configured_format(&self) -> GpuSkinVertexFormat {
        GpuSkinVertexFormat::from_flags(self.use_full_precision_uvs, self.effective_packed_position())
    }

    /// Layout of the stored data.
    pub fn format(&self) -> GpuSkinVertexFormat {
        self.layout.format
    }

    /// Flags were changed since the data was laid out.
    pub fn has_pending_format_change(&self) -> bool {
        self.configured_format() != self.layout.format || self.num_tex_coords != self.layout.num_tex_coords
    }

    pub fn num_tex_coords(&self) -> u32 {
        self.layout.num_tex_coords
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn stride(&self) -> usize {
        self.layout.stride
    }

    pub fn vertex_data_size(&self) -> usize {
        self.data.len()
    }

    /// Raw element bytes in host order.
    pub fn vertex_data(&self) -> &[u8] {
        &self.data
    }

    pub fn mesh_origin(&self) -> Vector3<f32> {
        self.mesh_origin
    }

    pub fn mesh_extension(&self) -> Vector3<f32> {
        self.mesh_extension
    }

    /// Lays out storage for the configured format and copies every vertex in,
    /// quantizing positions when packing is in effect.
    pub fn init(&mut self, vertices: &[SoftSkinVertex]) -> Result<()> {
        check_tex_coord_count(self.num_tex_coords)?;

        let packed = self.effective_packed_position();
        if packed {
            let (origin, extension) = packing_transform(vertices.iter().map(|v| v.position.0));
            self.mesh_origin = origin;
            self.mesh_extension = extension;
        } else {
            self.mesh_origin = Vector3::new(0.0, 0.0, 0.0);
            self.mesh_extension = Vector3::new(1.0, 1.0, 1.0);
        }

        self.layout = VertexLayout::new(
            GpuSkinVertexFormat::from_flags(self.use_full_precision_uvs, packed),
            self.num_tex_coords,
        );
        self.num_vertices = vertices.len();
        self.data = vec![0u8; vertices.len() * self.layout.stride];
        for (i, vertex) in vertices.iter().enumerate() {
            self.encode_vertex(i, vertex);
        }
        self.processed_packed_positions = packed;
        Ok(())
    }

    /// Replaces the element bytes wholesale. The data must already be laid out
    /// in the configured format.
    pub fn assign_vertex_data(
        &mut self,
        format: GpuSkinVertexFormat,
        num_tex_coords: u32,
        data: Vec<u8>,
    ) -> Result<()> {
        let expected = self.configured_format();
        if format != expected {
            return Err(SkinError::FormatMismatch {
                expected,
                actual: format,
            });
        }
        check_tex_coord_count(num_tex_coords)?;

        let layout = VertexLayout::new(format, num_tex_coords);
        if data.len() % layout.stride != 0 {
            return Err(SkinError::FormatMismatch {
                expected,
                actual: format,
            });
        }
        self.num_tex_coords = num_tex_coords;
        self.num_vertices = data.len() / layout.stride;
        self.layout = layout;
        self.data = data;
        self.processed_packed_positions = format.uses_packed_position();
        Ok(())
    }

    /// Releases the vertex data.
    pub fn clean_up(&mut self) {
        self.data = vec![];
        self.num_vertices = 0;
    }

    fn element(&self, index: usize) -> Result<&[u8]> {
        if index >= self.num_vertices {
            return Err(SkinError::VertexOutOfRange {
                index,
                count: self.num_vertices,
            });
        }
        let start = index * self.layout.stride;
        Ok(&self.data[start..start + self.layout.stride])
    }

    fn base(&self, index: usize) -> Result<GpuSkinVertexBase> {
        Ok(bytemuck::pod_read_unaligned(&self.element(index)?[..BASE_SIZE]))
    }

    fn encode_vertex(&mut self, index: usize, vertex: &SoftSkinVertex) {
        let layout = self.layout;
        let codec = layout.codec();
        let x = vertex.tangent_x.normalized_vector();
        let y = vertex.tangent_y.normalized_vector();
        let z = vertex.tangent_z.normalized_vector();
        let base = GpuSkinVertexBase {
            tangent_x: vertex.tangent_x.0,
            tangent_z: vertex.tangent_z.with_w_sign(basis_determinant_sign(x, y, z)).0,
            influence_bones: vertex.influence.bones,
            influence_weights: vertex.influence.weights,
        };

        let position = if layout.format.uses_packed_position() {
            (vertex.position.0 - self.mesh_origin).div_element_wise(self.mesh_extension)
        } else {
            vertex.position.0
        };

        let start = index * layout.stride;
        let element = &mut self.data[start..start + layout.stride];
        element[..BASE_SIZE].copy_from_slice(bytemuck::bytes_of(&base));
        let pos_offset = layout.position_offset();
        (codec.write_position)(&mut element[pos_offset..pos_offset + codec.position_size], position);
        for channel in 0..layout.num_tex_coords as usize {
            let offset = layout.uv_offset(channel);
            (codec.write_uv)(&mut element[offset..offset + codec.uv_size], vertex.uvs[channel].0);
        }
    }

    /// Position in stored space: normalized when packed.
    fn stored_position(&self, index: usize) -> Result<Vector3<f32>> {
        let element = self.element(index)?;
        let codec = self.layout.codec();
        let offset = self.layout.position_offset();
        Ok((codec.read_position)(&element[offset..offset + codec.position_size]))
    }

    /// Mesh-space position.
    pub fn vertex_position(&self, index: usize) -> Result<Vector3<f32>> {
        let stored = self.stored_position(index)?;
        if self.layout.format.uses_packed_position() {
            Ok(scale_offset(stored, self.mesh_extension, self.mesh_origin))
        } else {
            Ok(stored)
        }
    }

    pub fn vertex_uv(&self, index: usize, channel: usize) -> Result<Vector2<f32>> {
        let element = self.element(index)?;
        if channel >= self.layout.num_tex_coords as usize {
            return Err(SkinError::TexCoordOutOfRange {
                channel,
                count: self.layout.num_tex_coords as usize,
            });
        }
        let codec = self.layout.codec();
        let offset = self.layout.uv_offset(channel);
        Ok((codec.read_uv)(&element[offset..offset + codec.uv_size]))
    }

    pub fn vertex_tangent_x(&self, index: usize) -> Result<Vector3<f32>> {
        Ok(PackedNormal(self.base(index)?.tangent_x).to_vector())
    }

    pub fn vertex_tangent_z(&self, index: usize) -> Result<Vector3<f32>> {
        Ok(PackedNormal(self.base(index)?.tangent_z).to_vector())
    }

    /// Binormal rebuilt from tangent X/Z and the stored determinant sign.
    pub fn vertex_tangent_y(&self, index: usize) -> Result<Vector3<f32>> {
        let base = self.base(index)?;
        let x = PackedNormal(base.tangent_x).to_vector();
        let z = PackedNormal(base.tangent_z);
        Ok(z.to_vector().cross(x) * z.w_sign())
    }

    pub fn vertex_influence(&self, index: usize) -> Result<BoneInfluence> {
        let base = self.base(index)?;
        Ok(BoneInfluence::new(base.influence_bones, base.influence_weights))
    }

    /// Decodes every element back into soft vertices. Colors are not part of
    /// this buffer and come back white.
    pub fn get_vertices(&self) -> Result<Vec<SoftSkinVertex>> {
        (0..self.num_vertices).map(|i| self.decode_vertex(i)).collect()
    }

    fn decode_vertex(&self, index: usize) -> Result<SoftSkinVertex> {
        let base = self.base(index)?;
        let tangent_x = PackedNormal(base.tangent_x);
        let tangent_z = PackedNormal(base.tangent_z);
        let mut vertex = SoftSkinVertex {
            position: LwVector3(self.vertex_position(index)?),
            tangent_x,
            tangent_y: PackedNormal::from_vector(self.vertex_tangent_y(index)?),
            tangent_z,
            influence: BoneInfluence::new(base.influence_bones, base.influence_weights),
            ..Default::default()
        };
        for channel in 0..self.layout.num_tex_coords as usize {
            vertex.uvs[channel] = LwVector2(self.vertex_uv(index, channel)?);
        }
        Ok(vertex)
    }

    /// Re-lays the data with 32-bit UVs. Half floats widen exactly, positions
    /// are copied untouched.
    pub fn convert_to_full_precision_uvs(&mut self) {
        if self.layout.format.uses_full_precision_uvs() {
            return;
        }

        let old = self.layout;
        let new = VertexLayout::new(
            GpuSkinVertexFormat::from_flags(true, old.format.uses_packed_position()),
            old.num_tex_coords,
        );
        let (old_codec, new_codec) = (old.codec(), new.codec());
        let head = BASE_SIZE + old_codec.position_size;

        let mut data = vec![0u8; self.num_vertices * new.stride];
        for i in 0..self.num_vertices {
            let src = &self.data[i * old.stride..(i + 1) * old.stride];
            let dst = &mut data[i * new.stride..(i + 1) * new.stride];
            dst[..head].copy_from_slice(&src[..head]);
            for channel in 0..old.num_tex_coords as usize {
                let (so, doff) = (old.uv_offset(channel), new.uv_offset(channel));
                let uv = (old_codec.read_uv)(&src[so..so + old_codec.uv_size]);
                (new_codec.write_uv)(&mut dst[doff..doff + new_codec.uv_size], uv);
            }
        }

        self.data = data;
        self.layout = new;
        self.use_full_precision_uvs = true;
    }

    /// Re-lays the data with packed positions relative to a freshly computed
    /// origin/extension. Runs once; targets without packing support fall back
    /// to unpacked positions with an identity transform.
    pub fn convert_to_packed_position(&mut self) -> Result<()> {
        if !self.capabilities.allows_packed_position() {
            if self.layout.format.uses_packed_position() {
                log::warn!("target cannot read packed positions; keeping existing layout");
            } else {
                self.use_packed_position = false;
                self.mesh_origin = Vector3::new(0.0, 0.0, 0.0);
                self.mesh_extension = Vector3::new(1.0, 1.0, 1.0);
            }
            return Ok(());
        }
        if self.processed_packed_positions || self.layout.format.uses_packed_position() {
            return Ok(());
        }

        let positions = (0..self.num_vertices)
            .map(|i| self.vertex_position(i))
            .collect::<Result<Vec<_>>>()?;
        let (origin, extension) = packing_transform(positions.iter().copied());

        let old = self.layout;
        let new = VertexLayout::new(
            GpuSkinVertexFormat::from_flags(old.format.uses_full_precision_uvs(), true),
            old.num_tex_coords,
        );
        let new_codec = new.codec();
        let old_uvs = old.uv_offset(0);
        let new_uvs = new.uv_offset(0);

        let mut max_error = 0.0f32;
        let mut data = vec![0u8; self.num_vertices * new.stride];
        for (i, &position) in positions.iter().enumerate() {
            let src = &self.data[i * old.stride..(i + 1) * old.stride];
            let dst = &mut data[i * new.stride..(i + 1) * new.stride];
            dst[..BASE_SIZE].copy_from_slice(&src[..BASE_SIZE]);
            let normalized = (position - origin).div_element_wise(extension);
            (new_codec.write_position)(&mut dst[BASE_SIZE..BASE_SIZE + new_codec.position_size], normalized);
            dst[new_uvs..].copy_from_slice(&src[old_uvs..]);

            let decoded = scale_offset(
                (new_codec.read_position)(&dst[BASE_SIZE..BASE_SIZE + new_codec.position_size]),
                extension,
                origin,
            );
            max_error = max_error.max((decoded - position).magnitude());
        }

        if max_error > PACKED_POSITION_WARN_ERROR {
            log::warn!(
                "packed position error {:.3} exceeds {:.1} (extension {:?})",
                max_error,
                PACKED_POSITION_WARN_ERROR,
                extension
            );
        }

        self.mesh_origin = origin;
        self.mesh_extension = extension;
        self.data = data;
        self.layout = new;
        self.use_packed_position = true;
        self.processed_packed_positions = true;
        Ok(())
    }

    fn write_element<W: Write + Seek>(&self, index: usize, writer: &mut W, endian: Endian) -> BinResult<()> {
        let stride = self.layout.stride;
        let element = &self.data[index * stride..(index + 1) * stride];
        let base: GpuSkinVertexBase = bytemuck::pod_read_unaligned(&element[..BASE_SIZE]);
        base.tangent_x.write_options(writer, endian, ())?;
        base.tangent_z.write_options(writer, endian, ())?;
        pack_influence_bytes(base.influence_bones).write_options(writer, endian, ())?;
        pack_influence_bytes(base.influence_weights).write_options(writer, endian, ())?;

        let uv_start = self.layout.uv_offset(0);
        for word in element[BASE_SIZE..uv_start].chunks_exact(4) {
            bytemuck::pod_read_unaligned::<u32>(word).write_options(writer, endian, ())?;
        }
        if self.layout.codec().uv_component_size == 2 {
            for half in element[uv_start..].chunks_exact(2) {
                bytemuck::pod_read_unaligned::<u16>(half).write_options(writer, endian, ())?;
            }
        } else {
            for word in element[uv_start..].chunks_exact(4) {
                bytemuck::pod_read_unaligned::<u32>(word).write_options(writer, endian, ())?;
            }
        }
        Ok(())
    }

    fn read_element<R: Read + Seek>(
        layout: &VertexLayout,
        reader: &mut R,
        endian: Endian,
        dst: &mut [u8],
    ) -> BinResult<()> {
        let base = GpuSkinVertexBase {
            tangent_x: u32::read_options(reader, endian, ())?,
            tangent_z: u32::read_options(reader, endian, ())?,
            influence_bones: unpack_influence_bytes(u32::read_options(reader, endian, ())?),
            influence_weights: unpack_influence_bytes(u32::read_options(reader, endian, ())?),
        };
        dst[..BASE_SIZE].copy_from_slice(bytemuck::bytes_of(&base));

        let uv_start = layout.uv_offset(0);
        for word in dst[BASE_SIZE..uv_start].chunks_exact_mut(4) {
            word.copy_from_slice(bytemuck::bytes_of(&u32::read_options(reader, endian, ())?));
        }
        if layout.codec().uv_component_size == 2 {
            for half in dst[uv_start..].chunks_exact_mut(2) {
                half.copy_from_slice(bytemuck::bytes_of(&u16::read_options(reader, endian, ())?));
            }
        } else {
            for word in dst[uv_start..].chunks_exact_mut(4) {
                word.copy_from_slice(bytemuck::bytes_of(&u32::read_options(reader, endian, ())?));
            }
        }
        Ok(())
    }
}

impl BinRead for SkinVertexBuffer {
    type Args<'a> = (u32,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let version = args.0;
        let pos = reader.stream_position()?;
        let to_binrw = |e: SkinError| binrw::Error::AssertFail {
            pos,
            message: e.to_string(),
        };

        let num_tex_coords = if version >= SKIN_VERSION_MULTI_TEXCOORDS {
            u32::read_options(reader, endian, ())?
        } else {
            1
        };

        let mut buffer = SkinVertexBuffer::default();
        buffer.set_num_tex_coords(num_tex_coords).map_err(to_binrw)?;

        if version < SKIN_VERSION_HALF_UVS {
            // legacy data kept plain vertices with float UVs
            let count = u32::read_options(reader, endian, ())?;
            let mut vertices = Vec::new();
            for _ in 0..count {
                vertices.push(SoftSkinVertex::read_options(reader, endian, (version,))?);
            }
            buffer.set_use_full_precision_uvs(true);
            buffer.set_use_packed_position(false);
            buffer.init(&vertices).map_err(to_binrw)?;
            return Ok(buffer);
        }

        let use_full_precision_uvs = u32::read_options(reader, endian, ())? != 0;
        let mut use_packed_position = false;
        let mut mesh_extension = Vector3::new(1.0, 1.0, 1.0);
        let mut mesh_origin = Vector3::new(0.0, 0.0, 0.0);
        if version >= SKIN_VERSION_PACKED_POSITION {
            use_packed_position = u32::read_options(reader, endian, ())? != 0;
            mesh_extension = LwVector3::read_options(reader, endian, ())?.0;
            mesh_origin = LwVector3::read_options(reader, endian, ())?.0;
        }

        let layout = VertexLayout::new(
            GpuSkinVertexFormat::from_flags(use_full_precision_uvs, use_packed_position),
            num_tex_coords,
        );
        let element_pos = reader.stream_position()?;
        let element_size = u32::read_options(reader, endian, ())? as usize;
        if element_size != layout.stride {
            return Err(binrw::Error::AssertFail {
                pos: element_pos,
                message: format!(
                    "Vertex element size {} does not match {:?} stride {}",
                    element_size, layout.format, layout.stride
                ),
            });
        }
        // grow as elements arrive, a corrupt count must not size the buffer
        let count = u32::read_options(reader, endian, ())? as usize;
        let mut data = Vec::new();
        let mut element = vec![0u8; layout.stride];
        for _ in 0..count {
            SkinVertexBuffer::read_element(&layout, reader, endian, &mut element)?;
            data.extend_from_slice(&element);
        }

        buffer.use_full_precision_uvs = use_full_precision_uvs;
        buffer.use_packed_position = use_packed_position;
        buffer.mesh_extension = mesh_extension;
        buffer.mesh_origin = mesh_origin;
        buffer.processed_packed_positions = use_packed_position;
        buffer.layout = layout;
        buffer.num_vertices = count;
        buffer.data = data;
        Ok(buffer)
    }
}

impl BinWrite for SkinVertexBuffer {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.layout.num_tex_coords.write_options(writer, endian, ())?;
        (self.layout.format.uses_full_precision_uvs() as u32).write_options(writer, endian, ())?;
        (self.layout.format.uses_packed_position() as u32).write_options(writer, endian, ())?;
        LwVector3(self.mesh_extension).write_options(writer, endian, ())?;
        LwVector3(self.mesh_origin).write_options(writer, endian, ())?;

        (self.layout.stride as u32).write_options(writer, endian, ())?;
        (self.num_vertices as u32).write_options(writer, endian, ())?;
        for i in 0..self.num_vertices {
            self.write_element(i, writer, endian)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use binrw::{BinReaderExt, BinWriterExt};

    use super::*;
    use crate::math::VertexColor;
    use crate::skin::version::{SKIN_VERSION, SKIN_VERSION_BASE};

    fn make_vertices(count: usize) -> Vec<SoftSkinVertex> {
        (0..count)
            .map(|i| {
                let f = i as f32;
                let mut v = SoftSkinVertex::default();
                v.position = LwVector3::new(f * 1.5 - 20.0, f * 0.25, -f * 3.0 + 7.0);
                v.uvs[0] = LwVector2::new(f / 16.0, 1.0 - f / 32.0);
                v.uvs[1] = LwVector2::new(0.125 * f, 0.5);
                v.influence = BoneInfluence::new([0, 1, 0, 0], [200, 55, 0, 0]);
                v
            })
            .collect()
    }

    #[test]
    fn stride_table() {
        use GpuSkinVertexFormat::*;
        assert_eq!(HalfUvUnpackedPosition.stride(1), 32);
        assert_eq!(FullUvUnpackedPosition.stride(1), 36);
        assert_eq!(HalfUvPackedPosition.stride(2), 28);
        assert_eq!(FullUvPackedPosition.stride(4), 52);
        for n in 1..=4 {
            assert_eq!(HalfUvUnpackedPosition.stride(n), 28 + 4 * n as usize);
            assert_eq!(FullUvUnpackedPosition.stride(n), 28 + 8 * n as usize);
            assert_eq!(HalfUvPackedPosition.stride(n), 20 + 4 * n as usize);
            assert_eq!(FullUvPackedPosition.stride(n), 20 + 8 * n as usize);
        }
    }

    #[test]
    fn defaults_half_uvs_packed() {
        let vb = SkinVertexBuffer::default();
        assert!(!vb.use_full_precision_uvs());
        assert!(vb.use_packed_position());
        assert_eq!(vb.num_tex_coords(), 1);
        assert_eq!(vb.mesh_origin(), Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(vb.mesh_extension(), Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(vb.format(), GpuSkinVertexFormat::HalfUvPackedPosition);
    }

    #[test]
    fn cpu_skinning_disables_packing() {
        let caps = SkinningCapabilities {
            supports_packed_position: true,
            cpu_skinning: true,
        };
        let mut vb = SkinVertexBuffer::new(caps);
        vb.init(&make_vertices(4)).unwrap();
        assert_eq!(vb.format(), GpuSkinVertexFormat::HalfUvUnpackedPosition);
        assert_eq!(vb.mesh_extension(), Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn unpacked_positions_exact() {
        let verts = make_vertices(10);
        let mut vb = SkinVertexBuffer::new(SkinningCapabilities::default());
        vb.set_use_packed_position(false);
        vb.set_use_full_precision_uvs(true);
        vb.set_num_tex_coords(2).unwrap();
        vb.init(&verts).unwrap();

        assert_eq!(vb.vertex_data_size(), vb.num_vertices() * vb.stride());
        for (i, v) in verts.iter().enumerate() {
            assert_eq!(vb.vertex_position(i).unwrap(), v.position.0);
            assert_eq!(vb.vertex_uv(i, 1).unwrap(), v.uvs[1].0);
            assert_eq!(vb.vertex_influence(i).unwrap(), v.influence);
        }
    }

    #[test]
    fn packed_positions_within_step() {
        let verts = make_vertices(32);
        let mut vb = SkinVertexBuffer::default();
        vb.init(&verts).unwrap();
        assert_eq!(vb.format(), GpuSkinVertexFormat::HalfUvPackedPosition);

        let step = PackedPosition::quantization_step(vb.mesh_extension());
        for (i, v) in verts.iter().enumerate() {
            let p = vb.vertex_position(i).unwrap();
            assert!((p.x - v.position.0.x).abs() <= step.x * 1.001);
            assert!((p.y - v.position.0.y).abs() <= step.y * 1.001);
            assert!((p.z - v.position.0.z).abs() <= step.z * 1.001);
        }
    }

    #[test]
    fn out_of_range_access() {
        let mut vb = SkinVertexBuffer::default();
        vb.init(&make_vertices(3)).unwrap();
        assert!(matches!(
            vb.vertex_position(3),
            Err(SkinError::VertexOutOfRange { index: 3, count: 3 })
        ));
        assert!(matches!(
            vb.vertex_uv(0, 1),
            Err(SkinError::TexCoordOutOfRange { channel: 1, count: 1 })
        ));
    }

    #[test]
    fn assign_rejects_format_mismatch() {
        let mut vb = SkinVertexBuffer::default();
        let err = vb
            .assign_vertex_data(GpuSkinVertexFormat::FullUvUnpackedPosition, 1, vec![0; 36])
            .unwrap_err();
        assert!(matches!(err, SkinError::FormatMismatch { .. }));

        vb.assign_vertex_data(GpuSkinVertexFormat::HalfUvPackedPosition, 1, vec![0; 48])
            .unwrap();
        assert_eq!(vb.num_vertices(), 2);
    }

    #[test]
    fn setter_only_applies_on_next_init() {
        let mut vb = SkinVertexBuffer::default();
        vb.init(&make_vertices(2)).unwrap();
        vb.set_use_full_precision_uvs(true);
        assert!(vb.has_pending_format_change());
        assert_eq!(vb.format(), GpuSkinVertexFormat::HalfUvPackedPosition);
        vb.init(&make_vertices(2)).unwrap();
        assert!(!vb.has_pending_format_change());
        assert_eq!(vb.format(), GpuSkinVertexFormat::FullUvPackedPosition);
    }

    #[test]
    fn cpu_skinning_capability_disables_packing_on_next_init() {
        let mut vb = SkinVertexBuffer::default();
        vb.init(&make_vertices(2)).unwrap();
        vb.set_capabilities(SkinningCapabilities {
            supports_packed_position: true,
            cpu_skinning: true,
        });
        assert!(vb.has_pending_format_change());
        assert_eq!(vb.configured_format(), GpuSkinVertexFormat::HalfUvUnpackedPosition);
        vb.init(&make_vertices(2)).unwrap();
        assert_eq!(vb.format(), GpuSkinVertexFormat::HalfUvUnpackedPosition);
        assert!(vb.use_packed_position(), "request is kept for targets that allow it");
    }

    #[test]
    fn full_precision_conversion_widens_exactly() {
        let verts = make_vertices(8);
        let mut vb = SkinVertexBuffer::default();
        vb.set_num_tex_coords(2).unwrap();
        vb.init(&verts).unwrap();

        let before: Vec<_> = (0..8)
            .map(|i| (vb.vertex_position(i).unwrap(), vb.vertex_uv(i, 0).unwrap(), vb.vertex_uv(i, 1).unwrap()))
            .collect();
        vb.convert_to_full_precision_uvs();
        assert_eq!(vb.format(), GpuSkinVertexFormat::FullUvPackedPosition);
        assert_eq!(vb.stride(), 20 + 16);
        assert_eq!(vb.vertex_data_size(), 8 * vb.stride());
        for (i, (p, uv0, uv1)) in before.into_iter().enumerate() {
            assert_eq!(vb.vertex_position(i).unwrap(), p);
            assert_eq!(vb.vertex_uv(i, 0).unwrap(), uv0);
            assert_eq!(vb.vertex_uv(i, 1).unwrap(), uv1);
        }
    }

    #[test]
    fn packed_conversion_bounds_error() {
        let verts = make_vertices(16);
        let mut vb = SkinVertexBuffer::default();
        vb.set_use_packed_position(false);
        vb.init(&verts).unwrap();
        assert_eq!(vb.format(), GpuSkinVertexFormat::HalfUvUnpackedPosition);

        vb.convert_to_packed_position().unwrap();
        assert_eq!(vb.format(), GpuSkinVertexFormat::HalfUvPackedPosition);
        let step = PackedPosition::quantization_step(vb.mesh_extension());
        for (i, v) in verts.iter().enumerate() {
            let d = vb.vertex_position(i).unwrap() - v.position.0;
            assert!(d.x.abs() <= step.x * 1.001 && d.y.abs() <= step.y * 1.001 && d.z.abs() <= step.z * 1.001);
            assert_eq!(vb.vertex_influence(i).unwrap(), v.influence);
        }
    }

    #[test]
    fn packed_conversion_without_support_resets_transform() {
        let caps = SkinningCapabilities {
            supports_packed_position: false,
            cpu_skinning: false,
        };
        let mut vb = SkinVertexBuffer::new(caps);
        vb.init(&make_vertices(3)).unwrap();
        vb.convert_to_packed_position().unwrap();
        assert!(!vb.use_packed_position());
        assert_eq!(vb.format(), GpuSkinVertexFormat::HalfUvUnpackedPosition);
        assert_eq!(vb.mesh_origin(), Vector3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn tangent_basis_sign_survives() {
        let mut v = SoftSkinVertex::default();
        v.tangent_y = PackedNormal::from_vector(Vector3::new(0.0, -1.0, 0.0));
        let mut vb = SkinVertexBuffer::default();
        vb.init(&[v]).unwrap();
        let y = vb.vertex_tangent_y(0).unwrap();
        assert!(y.y < -0.9, "binormal should be flipped, got {:?}", y);
        assert!(vb.vertex_tangent_z(0).unwrap().z > 0.9);
        assert!(vb.vertex_tangent_x(0).unwrap().x > 0.9);
    }

    #[test]
    fn buffer_roundtrip_both_endians() {
        let verts = make_vertices(6);
        let mut vb = SkinVertexBuffer::default();
        vb.set_num_tex_coords(2).unwrap();
        vb.init(&verts).unwrap();

        let mut le = Cursor::new(Vec::new());
        le.write_le(&vb).unwrap();
        le.set_position(0);
        let back: SkinVertexBuffer = le.read_le_args((SKIN_VERSION,)).unwrap();
        assert_eq!(back.vertex_data(), vb.vertex_data());
        assert_eq!(back.mesh_origin(), vb.mesh_origin());

        let mut be = Cursor::new(Vec::new());
        be.write_be(&vb).unwrap();
        assert_ne!(be.get_ref(), le.get_ref());
        be.set_position(0);
        let back: SkinVertexBuffer = be.read_be_args((SKIN_VERSION,)).unwrap();
        assert_eq!(back.vertex_data(), vb.vertex_data());
        assert_eq!(back.format(), vb.format());
    }

    #[test]
    fn stride_mismatch_rejected() {
        let mut vb = SkinVertexBuffer::default();
        vb.init(&make_vertices(1)).unwrap();
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&vb).unwrap();
        let mut bytes = cursor.into_inner();
        // element size sits after tex coords, two flags and two vectors
        let off = 4 + 4 + 4 + 12 + 12;
        bytes[off..off + 4].copy_from_slice(&99u32.to_le_bytes());
        let res: BinResult<SkinVertexBuffer> = Cursor::new(bytes).read_le_args((SKIN_VERSION,));
        assert!(res.is_err());
    }

    #[test]
    fn corrupt_vertex_count_fails_on_short_read() {
        let mut vb = SkinVertexBuffer::default();
        vb.init(&make_vertices(2)).unwrap();
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&vb).unwrap();
        let mut bytes = cursor.into_inner();
        // vertex count follows the element size
        let off = 4 + 4 + 4 + 12 + 12 + 4;
        bytes[off..off + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let res: BinResult<SkinVertexBuffer> = Cursor::new(bytes).read_le_args((SKIN_VERSION,));
        assert!(matches!(res, Err(binrw::Error::Io(_))));
    }

    #[test]
    fn legacy_buffer_loads_vertex_array() {
        let mut v = SoftSkinVertex::default();
        v.position = LwVector3::new(4.0, 5.0, 6.0);
        v.uvs[0] = LwVector2::new(0.3, 0.7);

        let mut bytes = Cursor::new(Vec::new());
        bytes.write_le(&1u32).unwrap();
        bytes.write_le(&v.position).unwrap();
        for n in [v.tangent_x, v.tangent_y, v.tangent_z] {
            bytes.write_le(&n).unwrap();
        }
        bytes.write_le(&v.uvs[0]).unwrap();
        bytes.write_le(&pack_influence_bytes(v.influence.bones)).unwrap();
        bytes.write_le(&pack_influence_bytes(v.influence.weights)).unwrap();
        bytes.set_position(0);

        let vb: SkinVertexBuffer = bytes.read_le_args((SKIN_VERSION_BASE,)).unwrap();
        assert_eq!(vb.format(), GpuSkinVertexFormat::FullUvUnpackedPosition);
        assert_eq!(vb.vertex_position(0).unwrap(), v.position.0);
        assert_eq!(vb.vertex_uv(0, 0).unwrap(), v.uvs[0].0);
        assert_eq!(vb.get_vertices().unwrap()[0].color, VertexColor::WHITE);
    }
}
