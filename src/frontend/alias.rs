//! Alias/Range resolver
//!
//! Alias types carry an optional bound: a value range for numeric bases and a
//! length range for string bases. Values known at analysis time are checked
//! here; anything else becomes a [`BoundsObligation`] for the code generator.

use std::fmt;

use serde::Serialize;

use crate::frontend::ast::{Literal, RangeBound};
use crate::types::{Ty, TypeRegistry};
use crate::utils::{Error, Result, Span};

/// Literal value known at analysis time
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl ConstValue {
    pub fn from_literal(lit: &Literal) -> Self {
        match lit {
            Literal::Int { value, .. } => ConstValue::Int(*value),
            Literal::Float { value, .. } => ConstValue::Float(*value),
            Literal::String { value, .. } => ConstValue::Str(value.clone()),
            Literal::Bool { value, .. } => ConstValue::Bool(*value),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ConstValue::Int(v) => Some(*v as f64),
            ConstValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{}", v),
            ConstValue::Float(v) => write!(f, "{}", v),
            ConstValue::Str(s) if s.chars().count() > 24 => {
                let head: String = s.chars().take(21).collect();
                write!(f, "\"{}...\" (length {})", head, s.chars().count())
            }
            ConstValue::Str(s) => write!(f, "\"{}\" (length {})", s, s.chars().count()),
            ConstValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Bound predicate of an alias
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    /// `start <= v < end`, or `<= end` when inclusive
    Value {
        start: Option<f64>,
        end: Option<f64>,
        inclusive: bool,
    },
    /// Character count in `min..=max`
    Length { min: usize, max: Option<usize> },
}

impl Bound {
    /// Interpret a range against the alias base; `None` if the base cannot be bounded
    pub fn from_range(range: &RangeBound, base: &Ty) -> Option<Bound> {
        match base {
            Ty::Scalar(s) if s.is_numeric() => Some(Bound::Value {
                start: range.start,
                end: range.end,
                inclusive: range.inclusive,
            }),
            Ty::String => {
                let min = range.start.map_or(0, |s| s.max(0.0) as usize);
                let max = range.end.map(|e| {
                    let e = e.max(0.0) as usize;
                    if range.inclusive { e.saturating_add(1) } else { e }
                });
                Some(Bound::Length { min, max })
            }
            _ => None,
        }
    }

    /// `Some(true/false)` when the value can be judged, `None` if it has the wrong kind
    pub fn admits(&self, value: &ConstValue) -> Option<bool> {
        match self {
            Bound::Value { start, end, inclusive } => {
                let v = value.as_f64()?;
                let above = start.map_or(true, |s| v >= s);
                let below = match end {
                    Some(e) if *inclusive => v <= *e,
                    Some(e) => v < *e,
                    None => true,
                };
                Some(above && below)
            }
            Bound::Length { min, max } => match value {
                ConstValue::Str(s) => {
                    let len = s.chars().count();
                    Some(len >= *min && max.map_or(true, |m| len <= m))
                }
                _ => None,
            },
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let num = |v: &Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        match self {
            Bound::Value { start, end, inclusive } => {
                write!(f, "{}{}{}", num(start), if *inclusive { "..=" } else { ".." }, num(end))
            }
            Bound::Length { min, max: Some(max) } => write!(f, "length {}..={}", min, max),
            Bound::Length { min, max: None } => write!(f, "length {}..", min),
        }
    }
}

/// Runtime bounds check the code generator must insert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundsObligation {
    pub alias: String,
    pub bound: String,
    pub span: Span,
}

/// Check a value flowing into `alias` and every alias it is layered on.
///
/// `value` is the literal when one is known. Unknown values against a bounded
/// alias produce obligations instead of errors.
pub fn check_alias_value(
    registry: &TypeRegistry,
    alias: &str,
    value: Option<&ConstValue>,
    span: Span,
) -> Result<Vec<BoundsObligation>> {
    let mut obligations = Vec::new();
    let mut current = alias.to_string();
    let mut seen = Vec::new();

    while let Some(def) = registry.lookup_alias(&current) {
        if seen.contains(&current) {
            break;
        }
        seen.push(current.clone());

        if let Some(bound) = &def.bound {
            match value.map(|v| (v, bound.admits(v))) {
                Some((v, Some(false))) => {
                    return Err(Error::AliasBoundViolation {
                        alias: def.name.clone(),
                        value: v.to_string(),
                        bound: bound.to_string(),
                        span,
                    });
                }
                Some((_, Some(true))) | Some((_, None)) => {}
                None => obligations.push(BoundsObligation {
                    alias: def.name.clone(),
                    bound: bound.to_string(),
                    span,
                }),
            }
        }

        match &def.base {
            Ty::Alias(next) => current = next.clone(),
            _ => break,
        }
    }
    Ok(obligations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::build::*;
    use crate::types::RegistryBuilder;
    use pretty_assertions::assert_eq;

    fn name_field_registry() -> TypeRegistry {
        let program = program(vec![
            alias("NameField", ty("string"), Some((Some(0.0), Some(25.0), false))),
            alias("Percent", ty("u8"), Some((Some(0.0), Some(100.0), true))),
            alias("Grade", ty("Percent"), Some((Some(50.0), None, false))),
            alias("DatabaseID", ty("u64"), None),
        ]);
        let frozen = RegistryBuilder::from_program(&program).freeze();
        assert!(frozen.errors.is_empty(), "{:?}", frozen.errors);
        frozen.registry
    }

    #[test]
    fn test_string_length_bound() {
        let registry = name_field_registry();
        let long = ConstValue::Str("x".repeat(30));
        let short = ConstValue::Str("John Smith".to_string());

        let err = check_alias_value(&registry, "NameField", Some(&long), Span::dummy()).unwrap_err();
        assert!(matches!(err, Error::AliasBoundViolation { ref alias, .. } if alias == "NameField"));
        assert_eq!(check_alias_value(&registry, "NameField", Some(&short), Span::dummy()), Ok(vec![]));
    }

    #[test]
    fn test_inclusive_value_bound() {
        let registry = name_field_registry();
        assert!(check_alias_value(&registry, "Percent", Some(&ConstValue::Int(100)), Span::dummy()).is_ok());
        assert!(check_alias_value(&registry, "Percent", Some(&ConstValue::Int(101)), Span::dummy()).is_err());
    }

    #[test]
    fn test_layered_alias_checks_every_bound() {
        let registry = name_field_registry();
        assert!(check_alias_value(&registry, "Grade", Some(&ConstValue::Int(40)), Span::dummy()).is_err());
        assert!(check_alias_value(&registry, "Grade", Some(&ConstValue::Int(140)), Span::dummy()).is_err());
        assert!(check_alias_value(&registry, "Grade", Some(&ConstValue::Int(75)), Span::dummy()).is_ok());
    }

    #[test]
    fn test_unknown_value_becomes_obligation() {
        let registry = name_field_registry();
        let obligations = check_alias_value(&registry, "Grade", None, Span::new(4, 9, 0)).unwrap();
        let aliases: Vec<&str> = obligations.iter().map(|o| o.alias.as_str()).collect();
        assert_eq!(aliases, vec!["Grade", "Percent"]);
        assert_eq!(obligations[1].bound, "0..=100");

        assert_eq!(check_alias_value(&registry, "DatabaseID", None, Span::dummy()), Ok(vec![]));
    }

    #[test]
    fn test_bound_display() {
        let bound = Bound::from_range(
            &RangeBound { start: Some(0.0), end: Some(25.0), inclusive: false, span: Span::dummy() },
            &Ty::String,
        );
        assert_eq!(bound.map(|b| b.to_string()), Some("length 0..=25".to_string()));
    }

    #[test]
    fn test_huge_inclusive_length_saturates() {
        let bound = Bound::from_range(
            &RangeBound { start: None, end: Some(1e30), inclusive: true, span: Span::dummy() },
            &Ty::String,
        );
        assert_eq!(bound, Some(Bound::Length { min: 0, max: Some(usize::MAX) }));
    }
}
