use serde::{Deserialize, Serialize};

/// Severity level for a validation item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSeverity {
    Error,
    Warning,
    Info,
}

/// Part of the skinning data a finding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCategory {
    Chunk,
    Section,
    VertexBuffer,
    Influences,
    Skeleton,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationItem {
    /// Unique code for this rule (e.g. "CHUNK_BONE_BUDGET_EXCEEDED").
    pub code: String,
    pub message: String,
    pub severity: ValidationSeverity,
    pub category: ValidationCategory,
    /// Whether `autofix` can repair this issue.
    pub auto_fixable: bool,
}

impl ValidationItem {
    pub fn error(code: &str, category: ValidationCategory, message: String) -> Self {
        Self {
            code: code.to_string(),
            message,
            severity: ValidationSeverity::Error,
            category,
            auto_fixable: false,
        }
    }

    pub fn warning(code: &str, category: ValidationCategory, message: String) -> Self {
        Self {
            severity: ValidationSeverity::Warning,
            ..Self::error(code, category, message)
        }
    }
}

/// Complete validation report for a mesh or one of its LODs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub items: Vec<ValidationItem>,
    /// No errors were found.
    pub is_valid: bool,
    pub error_count: u32,
    pub warning_count: u32,
    pub info_count: u32,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            items: vec![],
            is_valid: true,
            error_count: 0,
            warning_count: 0,
            info_count: 0,
        }
    }

    /// Add a validation item and update counts.
    pub fn add(&mut self, item: ValidationItem) {
        match item.severity {
            ValidationSeverity::Error => {
                self.error_count += 1;
                self.is_valid = false;
            }
            ValidationSeverity::Warning => {
                self.warning_count += 1;
            }
            ValidationSeverity::Info => {
                self.info_count += 1;
            }
        }
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = ValidationItem>) {
        for item in items {
            self.add(item);
        }
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.extend(other.items);
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.items.iter().any(|i| i.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_severity() {
        let mut report = ValidationReport::new();
        report.add(ValidationItem::warning("A", ValidationCategory::Chunk, "a".into()));
        assert!(report.is_valid);
        report.add(ValidationItem::error("B", ValidationCategory::Section, "b".into()));
        assert!(!report.is_valid);
        assert_eq!((report.error_count, report.warning_count), (1, 1));
        assert!(report.has_code("B"));
    }

    #[test]
    fn merge_keeps_counts() {
        let mut a = ValidationReport::new();
        a.add(ValidationItem::warning("A", ValidationCategory::Influences, "a".into()));
        let mut b = ValidationReport::new();
        b.add(ValidationItem::error("B", ValidationCategory::VertexBuffer, "b".into()));
        a.merge(b);
        assert_eq!(a.items.len(), 2);
        assert_eq!(a.error_count, 1);
        assert!(!a.is_valid);
    }

    #[test]
    fn serializes_snake_case() {
        let item = ValidationItem::error("X", ValidationCategory::VertexBuffer, "m".into());
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["severity"], "error");
        assert_eq!(json["category"], "vertex_buffer");
    }
}
