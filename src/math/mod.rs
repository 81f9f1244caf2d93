use binrw::binrw;
use cgmath::{ElementWise, InnerSpace, Quaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod packed;

pub use packed::{PackedNormal, PackedPosition};

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LwVector3(
    #[br(map = |raw: [f32; 3]| Vector3::new(raw[0], raw[1], raw[2]))]
    #[bw(map = |v: &Vector3<f32>| [v.x, v.y, v.z])]
    pub Vector3<f32>,
);

impl LwVector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        LwVector3(Vector3::new(x, y, z))
    }
}

impl Default for LwVector3 {
    fn default() -> Self {
        Self(Vector3::new(0.0, 0.0, 0.0))
    }
}

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LwVector2(
    #[br(map = |raw: [f32; 2]| Vector2::new(raw[0], raw[1]))]
    #[bw(map = |v: &Vector2<f32>| [v.x, v.y])]
    pub Vector2<f32>,
);

impl LwVector2 {
    pub fn new(x: f32, y: f32) -> Self {
        LwVector2(Vector2::new(x, y))
    }
}

impl Default for LwVector2 {
    fn default() -> Self {
        Self(Vector2::new(0.0, 0.0))
    }
}

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LwQuaternion(
    #[br(map = |raw: [f32; 4]| Quaternion::new(raw[3], raw[0], raw[1], raw[2])) ]
    #[bw(map = |q: &Quaternion<f32>| [q.v.x, q.v.y, q.v.z, q.s])]
    pub Quaternion<f32>,
);

impl LwQuaternion {
    pub fn identity() -> Self {
        LwQuaternion(Quaternion::new(1.0, 0.0, 0.0, 0.0))
    }
}

impl Default for LwQuaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// 8-bit RGBA vertex color.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl VertexColor {
    pub const WHITE: VertexColor = VertexColor::new(255, 255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for VertexColor {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Axis-aligned box stored as center + half extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LwBox {
    pub c: Vector3<f32>,
    pub r: Vector3<f32>,
}

impl LwBox {
    /// Bounding box of a point set, `None` when empty.
    pub fn from_points<I>(points: I) -> Option<LwBox>
    where
        I: IntoIterator<Item = Vector3<f32>>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mut min, mut max) = (first, first);
        for p in iter {
            min = Vector3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
            max = Vector3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
        }

        Some(LwBox {
            c: (min + max) * 0.5,
            r: (max - min) * 0.5,
        })
    }
}

/// Component-wise multiply-add: `a * scale + offset`.
pub fn scale_offset(a: Vector3<f32>, scale: Vector3<f32>, offset: Vector3<f32>) -> Vector3<f32> {
    a.mul_element_wise(scale) + offset
}

/// Sign of the determinant of the tangent basis with rows x, y, z.
pub fn basis_determinant_sign(x: Vector3<f32>, y: Vector3<f32>, z: Vector3<f32>) -> f32 {
    if x.dot(y.cross(z)) < 0.0 {
        -1.0
    } else {
        1.0
    }
}
