//! Structured Feedback Module
//!
//! Machine-readable output for tooling:
//! - JSON diagnostic reports with fix suggestions
//! - Runtime obligations and release points per unit
//! - Analysis statistics

use serde::{Deserialize, Serialize};

use crate::frontend::alias::BoundsObligation;
use crate::frontend::bindings::DropPoint;
use crate::frontend::semantic::Analysis;
use crate::utils::{Error, ErrorKind};

// ==================== Structured Error Report ====================

/// A structured diagnostic report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error code (e.g., "E0001")
    pub code: String,

    pub kind: ErrorKind,

    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    pub location: Option<Location>,

    /// Suggested fixes, highest confidence first
    pub suggestions: Vec<Suggestion>,

    /// Candidate sources of an ambiguous call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,

    pub related: Vec<RelatedInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
}

/// Byte offsets into the source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    /// Description of the fix
    pub message: String,

    /// The replacement text
    pub replacement: Option<String>,

    /// Confidence in this suggestion (0.0 - 1.0)
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedInfo {
    pub message: String,
    pub location: Option<Location>,
}

// ==================== Analysis Feedback ====================

/// Complete analysis feedback for one input file
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisFeedback {
    pub success: bool,
    pub source_file: String,
    pub diagnostics: Vec<ErrorReport>,
    /// Bounds checks the code generator must insert
    pub obligations: Vec<UnitObligations>,
    /// Release points the code generator must insert
    pub drops: Vec<UnitDrops>,
    pub stats: AnalysisStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitObligations {
    pub unit: String,
    pub obligations: Vec<BoundsObligation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitDrops {
    pub unit: String,
    pub drops: Vec<DropPoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub type_count: usize,
    pub trait_count: usize,
    pub unit_count: usize,
    pub analysis_time_ms: u64,
}

// ==================== Error Conversion ====================

impl ErrorReport {
    /// Create a report from an analysis diagnostic
    pub fn from_error(error: &Error, file_name: &str) -> Self {
        let (code, suggestions) = generate_error_info(error);

        let location = error.span().map(|s| Location {
            file: file_name.to_string(),
            start: s.start,
            end: s.end,
        });

        let related = match error {
            Error::UseOfMovedValue { var, moved_at, .. } => vec![RelatedInfo {
                message: format!("`{}` was moved here", var),
                location: Some(Location {
                    file: file_name.to_string(),
                    start: moved_at.start,
                    end: moved_at.end,
                }),
            }],
            _ => vec![],
        };

        let mut report = Self {
            code,
            kind: error.kind(),
            severity: Severity::Error,
            message: error.to_string(),
            location,
            suggestions,
            candidates: error.candidates().to_vec(),
            related,
        };
        report.sort_suggestions();
        report
    }

    /// Sort suggestions by confidence (highest first)
    pub fn sort_suggestions(&mut self) {
        self.suggestions.sort_by(|a, b| {
            b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}

fn suggest(message: String, replacement: Option<String>, confidence: f64) -> Suggestion {
    Suggestion { message, replacement, confidence }
}

/// Diagnostic code and fix suggestions
fn generate_error_info(error: &Error) -> (String, Vec<Suggestion>) {
    match error {
        // ========== Ownership ==========
        Error::UseOfMovedValue { var, .. } => (
            "E0001".to_string(),
            vec![
                suggest(
                    format!("Pass `copy {}` where ownership was transferred", var),
                    Some(format!("copy {}", var)),
                    0.8,
                ),
                suggest(
                    "Take the value as a readonly parameter (`&T`) so it is viewed, not moved".to_string(),
                    None,
                    0.6,
                ),
            ],
        ),

        // ========== Mutability ==========
        Error::ConstMutationViolation { var, .. } => (
            "E0002".to_string(),
            vec![
                suggest(format!("Declare `{}` with `let`", var), Some(format!("let {}", var)), 0.8),
                suggest(format!("Pass `copy {}` to mutate a fresh value", var), Some(format!("copy {}", var)), 0.5),
            ],
        ),

        Error::CapabilityMismatch { .. } => (
            "E0003".to_string(),
            vec![
                suggest("Pass a `copy` to hand over an owned value".to_string(), None, 0.7),
                suggest("Widen the enclosing parameter's capability".to_string(), None, 0.4),
            ],
        ),

        // ========== Resolution ==========
        Error::AmbiguousMethodResolution { method, candidates, .. } => {
            let suggestions = candidates
                .iter()
                .filter_map(|c| c.split_once(' ').map(|(_, source)| source))
                .map(|source| {
                    suggest(
                        format!("Call `{}` through `{}` explicitly", method, source),
                        Some(format!("{}.{}(receiver, ...)", source, method)),
                        0.9,
                    )
                })
                .collect();
            ("E0004".to_string(), suggestions)
        }

        Error::UnknownMethod { method, ty, .. } => (
            "E0005".to_string(),
            vec![suggest(
                format!("Compose a trait that provides `{}` into `{}`, or declare an extension", method, ty),
                None,
                0.5,
            )],
        ),

        Error::UnknownTypeReference { name, .. } => (
            "E0006".to_string(),
            vec![suggest(format!("Declare `{}` or fix the spelling", name), None, 0.6)],
        ),

        Error::DuplicateTypeDeclaration { name, .. } => (
            "E0007".to_string(),
            vec![suggest(format!("Rename one of the `{}` declarations", name), None, 0.7)],
        ),

        Error::TraitCompositionCycle { path, .. } => (
            "E0008".to_string(),
            vec![suggest(
                format!("Remove one composition edge from {}", path.join(" -> ")),
                None,
                0.7,
            )],
        ),

        Error::MissingRequiredMethod { ty, method, .. } => (
            "E0009".to_string(),
            vec![suggest(format!("Implement `{}` on `{}`", method, ty), None, 0.9)],
        ),

        Error::UndefinedName { name, .. } => (
            "E0010".to_string(),
            vec![suggest(
                format!("Define '{}' before using it", name),
                Some(format!("let {} = /* value */;", name)),
                0.8,
            )],
        ),

        Error::DuplicateDefinition { name, .. } => (
            "E0011".to_string(),
            vec![suggest(format!("Rename or remove the second `{}`", name), None, 0.7)],
        ),

        // ========== Types ==========
        Error::TypeMismatch { expected, .. } => (
            "E0012".to_string(),
            vec![suggest(format!("Use a value of type {}", expected), None, 0.5)],
        ),

        Error::ArgCountMismatch { expected, got, .. } => {
            let suggestion = if got < expected {
                suggest(format!("Add {} more argument(s)", expected - got), None, 0.9)
            } else {
                suggest(format!("Remove {} extra argument(s)", got - expected), None, 0.9)
            };
            ("E0013".to_string(), vec![suggestion])
        }

        Error::UnknownField { ty, field, .. } => (
            "E0014".to_string(),
            vec![suggest(format!("Add a `{}` field to `{}`", field, ty), None, 0.5)],
        ),

        Error::AliasBoundViolation { alias, bound, .. } => (
            "E0015".to_string(),
            vec![suggest(format!("Keep values of `{}` within {}", alias, bound), None, 0.8)],
        ),

        Error::AnalysisFailed { .. } => ("E0016".to_string(), vec![]),
    }
}

impl AnalysisFeedback {
    pub fn from_analysis(analysis: &Analysis, source_file: &str, analysis_time_ms: u64) -> Self {
        let registry = &analysis.registry;
        Self {
            success: analysis.is_ok(),
            source_file: source_file.to_string(),
            diagnostics: analysis.diagnostics.iter().map(|e| ErrorReport::from_error(e, source_file)).collect(),
            obligations: analysis
                .units
                .iter()
                .filter(|u| !u.obligations.is_empty())
                .map(|u| UnitObligations { unit: u.unit.clone(), obligations: u.obligations.clone() })
                .collect(),
            drops: analysis
                .units
                .iter()
                .filter(|u| !u.drops.is_empty())
                .map(|u| UnitDrops { unit: u.unit.clone(), drops: u.drops.clone() })
                .collect(),
            stats: AnalysisStats {
                type_count: registry.type_count(),
                trait_count: registry.trait_count(),
                unit_count: analysis.units.len(),
                analysis_time_ms,
            },
        }
    }

    /// Output as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::build::*;
    use crate::frontend::ast::Capability;
    use crate::frontend::semantic::{analyze, AnalysisOptions};
    use crate::utils::Span;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ambiguity_suggests_namespaced_calls() {
        let err = Error::AmbiguousMethodResolution {
            method: "drive".into(),
            ty: "Vehicle".into(),
            candidates: vec!["trait AutoPilot".into(), "trait Drive".into()],
            span: Span::new(3, 8, 0),
        };
        let report = ErrorReport::from_error(&err, "garage.json");
        assert_eq!(report.code, "E0004");
        let fixes: Vec<_> = report.suggestions.iter().filter_map(|s| s.replacement.clone()).collect();
        assert_eq!(fixes, vec!["AutoPilot.drive(receiver, ...)", "Drive.drive(receiver, ...)"]);
        assert_eq!(report.location, Some(Location { file: "garage.json".into(), start: 3, end: 8 }));
    }

    #[test]
    fn test_moved_value_points_at_move_site() {
        let err = Error::UseOfMovedValue { var: "a".into(), moved_at: Span::new(1, 2, 0), span: Span::new(9, 10, 0) };
        let report = ErrorReport::from_error(&err, "main.json");
        assert_eq!(report.suggestions[0].replacement.as_deref(), Some("copy a"));
        assert_eq!(report.related[0].location.as_ref().map(|l| l.start), Some(1));
    }

    #[test]
    fn test_feedback_serializes_units() {
        let program = program(vec![
            vehicle(&[], vec![]),
            alias("NameField", ty("string"), Some((Some(0.0), Some(25.0), false))),
            function(func(
                "main",
                vec![param("input", Capability::Owned, ty("string"))],
                None,
                vec![
                    const_("car", new_vehicle("Ford", "F150")),
                    bind_typed(crate::frontend::ast::BindingMode::Let, "n", ty("NameField"), var("input")),
                ],
            )),
        ]);
        let analysis = analyze(&program, &AnalysisOptions::default());
        let feedback = AnalysisFeedback::from_analysis(&analysis, "main.json", 0);
        assert!(feedback.success);
        assert_eq!(feedback.stats.type_count, 1);
        assert_eq!(feedback.obligations[0].obligations[0].alias, "NameField");

        let json: serde_json::Value = serde_json::from_str(&feedback.to_json()).unwrap();
        assert_eq!(json["drops"][0]["unit"], "main");
        assert_eq!(json["drops"][0]["drops"][0]["binding"], "n");
    }
}
