//! Skinning data for skeletal meshes: per-LOD chunked vertices, GPU vertex
//! and index buffers, alternate influence sets and their versioned binary
//! format.

pub mod error;
pub mod math;
pub mod skin;
pub mod validation;

pub use error::{Result, SkinError};
pub use skin::{load_skeletal_mesh, save_skeletal_mesh, SkeletalMesh, StaticLodModel};
