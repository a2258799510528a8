//! Type System for ttlang

use std::collections::HashMap;
use std::fmt;

use crate::frontend::ast::Capability;

/// Scalar types: always duplicated on assignment, never moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Untyped number (`const x = 5`)
    Num,
    I8, I16, I32, I64,
    U8, U16, U32, U64,
    F32, F64,
    Bool,
    Char,
}

impl ScalarType {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "num" => Self::Num,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "u8" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "bool" => Self::Bool,
            "char" => Self::Char,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Num => "num",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Bool => "bool",
            Self::Char => "char",
        }
    }

    /// Check if this is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 |
            Self::U8 | Self::U16 | Self::U32 | Self::U64
        )
    }

    /// Check if this is a floating-point type
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub fn is_numeric(&self) -> bool {
        *self == Self::Num || self.is_integer() || self.is_float()
    }
}

/// Resolved type
#[derive(Debug, Clone, PartialEq)]
pub enum Ty {
    Scalar(ScalarType),
    String,
    /// Declared struct-, tuple- or array-shape type
    Named(String),
    /// Declared alias; its base lives in the registry
    Alias(String),
    Array(Box<Ty>),
    Tuple(Vec<Ty>),
    /// `{4, "Honda"}` before it meets a declared type
    Anonymous(Vec<Ty>),
    Function {
        params: Vec<(Capability, Ty)>,
        ret: Option<Box<Ty>>,
    },
    /// Universal placeholder (`T`)
    Placeholder(String),
    /// No meaningful value
    Void,
    /// Placeholder for an expression that failed to check
    Error,
}

/// Placeholder substitutions collected while matching a pattern
pub type Substitution = HashMap<String, Ty>;

impl Ty {
    pub const NUM: Self = Self::Scalar(ScalarType::Num);
    pub const BOOL: Self = Self::Scalar(ScalarType::Bool);

    pub fn is_error(&self) -> bool {
        matches!(self, Ty::Error)
    }

    /// True if the type mentions a placeholder anywhere
    pub fn has_placeholder(&self) -> bool {
        match self {
            Ty::Placeholder(_) => true,
            Ty::Array(elem) => elem.has_placeholder(),
            Ty::Tuple(elems) | Ty::Anonymous(elems) => elems.iter().any(Ty::has_placeholder),
            Ty::Function { params, ret } => {
                params.iter().any(|(_, t)| t.has_placeholder())
                    || ret.as_ref().map_or(false, |r| r.has_placeholder())
            }
            _ => false,
        }
    }

    /// Structurally match `self` (a pattern possibly containing placeholders)
    /// against a concrete type, recording what each placeholder stands for.
    pub fn unify(&self, concrete: &Ty, subst: &mut Substitution) -> bool {
        match (self, concrete) {
            (_, Ty::Error) => true,
            (Ty::Placeholder(name), _) => match subst.get(name) {
                Some(bound) if !bound.is_error() => bound == concrete || concrete.has_placeholder(),
                _ => {
                    subst.insert(name.clone(), concrete.clone());
                    true
                }
            },
            (Ty::Array(p), Ty::Array(c)) => p.unify(c, subst),
            (Ty::Tuple(ps), Ty::Tuple(cs)) => {
                ps.len() == cs.len() && ps.iter().zip(cs).all(|(p, c)| p.unify(c, subst))
            }
            (Ty::Function { params: pp, ret: pr }, Ty::Function { params: cp, ret: cr }) => {
                pp.len() == cp.len()
                    && pp.iter().zip(cp).all(|((_, p), (_, c))| p.unify(c, subst))
                    && match (pr, cr) {
                        (Some(p), Some(c)) => p.unify(c, subst),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (p, c) => p == c,
        }
    }

    /// Replace bound placeholders
    pub fn substitute(&self, subst: &Substitution) -> Ty {
        match self {
            Ty::Placeholder(name) => subst.get(name).cloned().unwrap_or_else(|| self.clone()),
            Ty::Array(elem) => Ty::Array(Box::new(elem.substitute(subst))),
            Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|t| t.substitute(subst)).collect()),
            Ty::Anonymous(elems) => Ty::Anonymous(elems.iter().map(|t| t.substitute(subst)).collect()),
            Ty::Function { params, ret } => Ty::Function {
                params: params.iter().map(|(c, t)| (*c, t.substitute(subst))).collect(),
                ret: ret.as_ref().map(|r| Box::new(r.substitute(subst))),
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Scalar(s) => write!(f, "{}", s.name()),
            Ty::String => write!(f, "string"),
            Ty::Named(name) | Ty::Alias(name) | Ty::Placeholder(name) => write!(f, "{}", name),
            Ty::Array(elem) => write!(f, "[{}]", elem),
            Ty::Tuple(elems) => {
                let parts: Vec<String> = elems.iter().map(|t| t.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            Ty::Anonymous(elems) => {
                let parts: Vec<String> = elems.iter().map(|t| t.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Ty::Function { params, ret } => {
                let parts: Vec<String> = params
                    .iter()
                    .map(|(cap, t)| format!("{}{}", cap.sigil(), t))
                    .collect();
                match ret {
                    Some(r) => write!(f, "({}) {}", parts.join(", "), r),
                    None => write!(f, "({}) void", parts.join(", ")),
                }
            }
            Ty::Void => write!(f, "void"),
            Ty::Error => write!(f, "{{error}}"),
        }
    }
}
