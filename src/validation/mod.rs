pub mod autofix;
pub mod limits;
pub mod report;
pub mod rules;

pub use autofix::{fix_influence_weights, fix_lod_influence_weights};
pub use report::{ValidationCategory, ValidationItem, ValidationReport, ValidationSeverity};
pub use rules::{validate_lod_model, validate_skeletal_mesh};
