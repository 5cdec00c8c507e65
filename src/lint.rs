//! Consistency checks over a plate collection.

use crate::reference::ReferenceTable;
use crate::types::{Field, Plate, WELL_COUNT, WellId};
use serde::Serialize;
use std::fmt;

/// Severity of a lint issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LintSeverity {
    Error,
    Warning,
}

impl fmt::Display for LintSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LintSeverity::Error => write!(f, "error"),
            LintSeverity::Warning => write!(f, "warning"),
        }
    }
}

/// A single issue found in the collection.
#[derive(Debug, Clone, Serialize)]
pub struct LintIssue {
    pub plate: Option<u32>,
    pub well: Option<WellId>,
    pub severity: LintSeverity,
    pub message: String,
}

impl fmt::Display for LintIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = match (self.plate, self.well) {
            (Some(p), Some(w)) => format!("plate {} {}", p, w),
            (Some(p), None) => format!("plate {}", p),
            _ => "reference".to_string(),
        };
        write!(f, "{}: {}: {}", self.severity, location, self.message)
    }
}

/// Result of linting a collection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LintReport {
    pub issues: Vec<LintIssue>,
}

impl LintReport {
    pub fn errors(&self) -> Vec<&LintIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == LintSeverity::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&LintIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == LintSeverity::Warning)
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == LintSeverity::Error)
    }
}

/// Check plates for data the canonical export cannot carry, plates that
/// would vanish on re-import, and, when a reference table is given, strains
/// it does not know.
pub fn lint_plates(plates: &[Plate], reference: Option<&ReferenceTable>) -> LintReport {
    let mut issues = Vec::new();

    for plate in plates {
        if !plate.is_complete() {
            issues.push(LintIssue {
                plate: Some(plate.id),
                well: None,
                severity: LintSeverity::Error,
                message: format!(
                    "Plate has {} wells, expected {}",
                    plate.metadata.len(),
                    WELL_COUNT
                ),
            });
        }

        if plate.is_empty() {
            issues.push(LintIssue {
                plate: Some(plate.id),
                well: None,
                severity: LintSeverity::Warning,
                message: "Plate has no data and will be dropped on re-import".to_string(),
            });
            continue;
        }

        for (well, meta) in &plate.metadata {
            for field in Field::ALL {
                let value = meta.get(field);
                let problem = if value.contains([',', '\n', '\r']) {
                    Some("contains a delimiter or line break")
                } else if value.starts_with('"') {
                    // re-import reads a leading quote as CSV quoting
                    Some("starts with a quote character")
                } else {
                    None
                };
                if let Some(problem) = problem {
                    issues.push(LintIssue {
                        plate: Some(plate.id),
                        well: Some(*well),
                        severity: LintSeverity::Warning,
                        message: format!(
                            "{} {} and will not survive export",
                            field, problem
                        ),
                    });
                }
            }

            let unknown = reference.is_some_and(|table| {
                !meta.base_strain.is_empty() && table.find(&meta.base_strain).is_none()
            });
            if unknown {
                issues.push(LintIssue {
                    plate: Some(plate.id),
                    well: Some(*well),
                    severity: LintSeverity::Warning,
                    message: format!("Strain '{}' not found in reference table", meta.base_strain),
                });
            }
        }
    }

    if let Some(table) = reference {
        for name in table.duplicate_strains() {
            issues.push(LintIssue {
                plate: None,
                well: None,
                severity: LintSeverity::Warning,
                message: format!("Strain '{}' appears more than once; the first row is used", name),
            });
        }
    }

    LintReport { issues }
}
