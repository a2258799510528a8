//! Error handling for ttlang

use crate::utils::Span;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Analysis diagnostic
///
/// Every variant except `AnalysisFailed` is a per-site diagnostic. None of them
/// abort the pass; they are accumulated and reported together.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ==================== Ownership Errors ====================

    #[error("Use of moved value: `{var}` (moved at {moved_at})")]
    UseOfMovedValue {
        var: String,
        moved_at: Span,
        span: Span,
    },

    // ==================== Mutability Errors ====================

    #[error("Cannot mutate `{var}`: {reason}")]
    ConstMutationViolation {
        var: String,
        reason: String,
        span: Span,
    },

    #[error("Capability mismatch: {reason}")]
    CapabilityMismatch { reason: String, span: Span },

    // ==================== Resolution Errors ====================

    #[error("Ambiguous method `{method}` on `{ty}`: candidates {}", .candidates.join(", "))]
    AmbiguousMethodResolution {
        method: String,
        ty: String,
        candidates: Vec<String>,
        span: Span,
    },

    #[error("Unknown method `{method}` on `{ty}`")]
    UnknownMethod {
        method: String,
        ty: String,
        span: Span,
    },

    #[error("Unknown type: {name}")]
    UnknownTypeReference { name: String, span: Span },

    #[error("Duplicate type declaration: {name}")]
    DuplicateTypeDeclaration { name: String, span: Span },

    #[error("Trait composition cycle: {}", .path.join(" -> "))]
    TraitCompositionCycle { path: Vec<String>, span: Span },

    #[error("Type `{ty}` composes `{trait_name}` but does not implement required method `{method}`")]
    MissingRequiredMethod {
        ty: String,
        trait_name: String,
        method: String,
        span: Span,
    },

    #[error("Undefined name: {name}")]
    UndefinedName { name: String, span: Span },

    #[error("Duplicate definition: {name}")]
    DuplicateDefinition { name: String, span: Span },

    // ==================== Type Errors ====================

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: String,
        got: String,
        span: Span,
    },

    #[error("Argument count mismatch: expected {expected}, got {got}")]
    ArgCountMismatch {
        expected: usize,
        got: usize,
        span: Span,
    },

    #[error("Unknown field `{field}` on `{ty}`")]
    UnknownField {
        ty: String,
        field: String,
        span: Span,
    },

    #[error("Value {value} violates bound {bound} of `{alias}`")]
    AliasBoundViolation {
        alias: String,
        value: String,
        bound: String,
        span: Span,
    },

    // ==================== Pipeline ====================

    #[error("Analysis reported {count} diagnostic(s); refusing to hand off for code generation")]
    AnalysisFailed { count: usize },
}

/// Serializable diagnostic tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UseOfMovedValue,
    ConstMutationViolation,
    CapabilityMismatch,
    AmbiguousMethodResolution,
    UnknownMethod,
    UnknownTypeReference,
    DuplicateTypeDeclaration,
    TraitCompositionCycle,
    MissingRequiredMethod,
    UndefinedName,
    DuplicateDefinition,
    TypeMismatch,
    ArgCountMismatch,
    UnknownField,
    AliasBoundViolation,
    AnalysisFailed,
}

impl Error {
    /// Get the span associated with this error
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::UseOfMovedValue { span, .. } => Some(*span),
            Self::ConstMutationViolation { span, .. } => Some(*span),
            Self::CapabilityMismatch { span, .. } => Some(*span),
            Self::AmbiguousMethodResolution { span, .. } => Some(*span),
            Self::UnknownMethod { span, .. } => Some(*span),
            Self::UnknownTypeReference { span, .. } => Some(*span),
            Self::DuplicateTypeDeclaration { span, .. } => Some(*span),
            Self::TraitCompositionCycle { span, .. } => Some(*span),
            Self::MissingRequiredMethod { span, .. } => Some(*span),
            Self::UndefinedName { span, .. } => Some(*span),
            Self::DuplicateDefinition { span, .. } => Some(*span),
            Self::TypeMismatch { span, .. } => Some(*span),
            Self::ArgCountMismatch { span, .. } => Some(*span),
            Self::UnknownField { span, .. } => Some(*span),
            Self::AliasBoundViolation { span, .. } => Some(*span),
            Self::AnalysisFailed { .. } => None,
        }
    }

    /// Get the diagnostic kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UseOfMovedValue { .. } => ErrorKind::UseOfMovedValue,
            Self::ConstMutationViolation { .. } => ErrorKind::ConstMutationViolation,
            Self::CapabilityMismatch { .. } => ErrorKind::CapabilityMismatch,
            Self::AmbiguousMethodResolution { .. } => ErrorKind::AmbiguousMethodResolution,
            Self::UnknownMethod { .. } => ErrorKind::UnknownMethod,
            Self::UnknownTypeReference { .. } => ErrorKind::UnknownTypeReference,
            Self::DuplicateTypeDeclaration { .. } => ErrorKind::DuplicateTypeDeclaration,
            Self::TraitCompositionCycle { .. } => ErrorKind::TraitCompositionCycle,
            Self::MissingRequiredMethod { .. } => ErrorKind::MissingRequiredMethod,
            Self::UndefinedName { .. } => ErrorKind::UndefinedName,
            Self::DuplicateDefinition { .. } => ErrorKind::DuplicateDefinition,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::ArgCountMismatch { .. } => ErrorKind::ArgCountMismatch,
            Self::UnknownField { .. } => ErrorKind::UnknownField,
            Self::AliasBoundViolation { .. } => ErrorKind::AliasBoundViolation,
            Self::AnalysisFailed { .. } => ErrorKind::AnalysisFailed,
        }
    }

    /// Candidate sources for an ambiguous call, empty for every other kind
    pub fn candidates(&self) -> &[String] {
        match self {
            Self::AmbiguousMethodResolution { candidates, .. } => candidates,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguity_message_lists_candidates() {
        let err = Error::AmbiguousMethodResolution {
            method: "drive".to_string(),
            ty: "Vehicle".to_string(),
            candidates: vec!["AutoPilot".to_string(), "Drive".to_string()],
            span: Span::new(3, 9, 0),
        };
        assert_eq!(err.kind(), ErrorKind::AmbiguousMethodResolution);
        assert_eq!(err.span(), Some(Span::new(3, 9, 0)));
        assert_eq!(err.candidates().len(), 2);
        assert!(err.to_string().contains("AutoPilot, Drive"));
    }

    #[test]
    fn test_analysis_failed_has_no_span() {
        let err = Error::AnalysisFailed { count: 2 };
        assert_eq!(err.span(), None);
        assert!(err.candidates().is_empty());
    }
}
