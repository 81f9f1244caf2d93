//! Quantized vertex attribute encodings.
//!
//! - `PackedNormal`: four unsigned bytes mapping [0, 255] onto [-1, 1]
//! - `PackedPosition`: one dword holding signed X:11 Y:11 Z:10 bitfields for a
//!   position already normalized into [-1, 1] by the mesh origin/extension

use binrw::binrw;
use cgmath::{InnerSpace, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// Unit vector packed into 4 bytes, x in the lowest byte.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PackedNormal(pub u32);

impl PackedNormal {
    pub const ZERO: PackedNormal = PackedNormal(0x8080_8080);

    #[inline]
    fn pack_component(v: f32) -> u8 {
        (v * 127.5 + 127.5).clamp(0.0, 255.0) as u8
    }

    #[inline]
    fn unpack_component(b: u8) -> f32 {
        b as f32 / 127.5 - 1.0
    }

    pub fn from_vector(v: Vector3<f32>) -> Self {
        Self::from_vector4(Vector4::new(v.x, v.y, v.z, 1.0))
    }

    pub fn from_vector4(v: Vector4<f32>) -> Self {
        Self(u32::from_le_bytes([
            Self::pack_component(v.x),
            Self::pack_component(v.y),
            Self::pack_component(v.z),
            Self::pack_component(v.w),
        ]))
    }

    pub fn to_vector(self) -> Vector3<f32> {
        self.to_vector4().truncate()
    }

    pub fn to_vector4(self) -> Vector4<f32> {
        let [x, y, z, w] = self.0.to_le_bytes();
        Vector4::new(
            Self::unpack_component(x),
            Self::unpack_component(y),
            Self::unpack_component(z),
            Self::unpack_component(w),
        )
    }

    /// W component as a sign, used for the tangent basis determinant.
    pub fn w_sign(self) -> f32 {
        if self.to_vector4().w < 0.0 {
            -1.0
        } else {
            1.0
        }
    }

    /// Same xyz with W replaced by the given sign.
    pub fn with_w_sign(self, sign: f32) -> Self {
        let mut bytes = self.0.to_le_bytes();
        bytes[3] = if sign < 0.0 { 0 } else { 255 };
        Self(u32::from_le_bytes(bytes))
    }

    pub fn normalized_vector(self) -> Vector3<f32> {
        let v = self.to_vector();
        if v.magnitude2() > 0.0 {
            v.normalize()
        } else {
            v
        }
    }
}

pub const PACKED_POSITION_X_BITS: u32 = 11;
pub const PACKED_POSITION_Y_BITS: u32 = 11;
pub const PACKED_POSITION_Z_BITS: u32 = 10;

const X_SCALE: f32 = ((1 << (PACKED_POSITION_X_BITS - 1)) - 1) as f32; // 1023
const Y_SCALE: f32 = ((1 << (PACKED_POSITION_Y_BITS - 1)) - 1) as f32; // 1023
const Z_SCALE: f32 = ((1 << (PACKED_POSITION_Z_BITS - 1)) - 1) as f32; // 511

/// Position in [-1, 1]^3 quantized to 32 bits.
#[binrw]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bytemuck::Pod,
    bytemuck::Zeroable,
)]
#[repr(transparent)]
pub struct PackedPosition(pub u32);

impl PackedPosition {
    #[inline]
    fn quantize(v: f32, scale: f32) -> i32 {
        ((v * scale) as i32).clamp(-(scale as i32), scale as i32)
    }

    #[inline]
    fn sign_extend(raw: u32, shift: u32, bits: u32) -> i32 {
        ((raw << (32 - shift - bits)) as i32) >> (32 - bits)
    }

    pub fn from_vector(v: Vector3<f32>) -> Self {
        let x = Self::quantize(v.x, X_SCALE) as u32 & 0x7ff;
        let y = Self::quantize(v.y, Y_SCALE) as u32 & 0x7ff;
        let z = Self::quantize(v.z, Z_SCALE) as u32 & 0x3ff;
        Self(x | (y << PACKED_POSITION_X_BITS) | (z << (PACKED_POSITION_X_BITS + PACKED_POSITION_Y_BITS)))
    }

    pub fn to_vector(self) -> Vector3<f32> {
        let x = Self::sign_extend(self.0, 0, PACKED_POSITION_X_BITS);
        let y = Self::sign_extend(self.0, PACKED_POSITION_X_BITS, PACKED_POSITION_Y_BITS);
        let z = Self::sign_extend(
            self.0,
            PACKED_POSITION_X_BITS + PACKED_POSITION_Y_BITS,
            PACKED_POSITION_Z_BITS,
        );
        Vector3::new(x as f32 / X_SCALE, y as f32 / Y_SCALE, z as f32 / Z_SCALE)
    }

    /// Largest per-axis error introduced by packing, in mesh units.
    pub fn quantization_step(extension: Vector3<f32>) -> Vector3<f32> {
        Vector3::new(extension.x / X_SCALE, extension.y / Y_SCALE, extension.z / Z_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_normal_axes() {
        let n = PackedNormal::from_vector(Vector3::new(1.0, -1.0, 0.0));
        let [x, y, z, w] = n.0.to_le_bytes();
        assert_eq!((x, y, z, w), (255, 0, 127, 255));

        let v = n.to_vector();
        assert!((v.x - 1.0).abs() < 1e-6);
        assert!((v.y + 1.0).abs() < 1e-6);
        assert!(v.z.abs() < 0.01);
    }

    #[test]
    fn packed_normal_w_sign() {
        let n = PackedNormal::from_vector(Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(n.w_sign(), 1.0);
        assert_eq!(n.with_w_sign(-1.0).w_sign(), -1.0);
        assert_eq!(n.with_w_sign(-1.0).to_vector(), n.to_vector());
    }

    #[test]
    fn packed_position_extremes() {
        let p = PackedPosition::from_vector(Vector3::new(1.0, -1.0, 1.0));
        assert_eq!(p.to_vector(), Vector3::new(1.0, -1.0, 1.0));

        // out of range values clamp
        let clamped = PackedPosition::from_vector(Vector3::new(3.0, -7.0, 2.0));
        assert_eq!(clamped.to_vector(), Vector3::new(1.0, -1.0, 1.0));
    }

    #[test]
    fn packed_position_error_within_one_step() {
        let step = PackedPosition::quantization_step(Vector3::new(1.0, 1.0, 1.0));
        for i in -50..=50 {
            let f = i as f32 / 50.0 * 0.987;
            let v = Vector3::new(f, -f * 0.5, f * 0.75);
            let back = PackedPosition::from_vector(v).to_vector();
            assert!((back.x - v.x).abs() <= step.x);
            assert!((back.y - v.y).abs() <= step.y);
            assert!((back.z - v.z).abs() <= step.z);
        }
    }

    #[test]
    fn packed_position_negative_sign_extension() {
        let p = PackedPosition::from_vector(Vector3::new(-0.5, 0.25, -0.25));
        let v = p.to_vector();
        assert!(v.x < 0.0 && v.y > 0.0 && v.z < 0.0);
    }
}
