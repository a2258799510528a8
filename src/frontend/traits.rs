//! Trait Resolver
//!
//! Turns call expressions into a single method of the frozen registry, or a
//! diagnostic. Unqualified calls go through the merged method set and must be
//! unique; namespaced calls (`Drive.drive(x)`) bypass ambiguity but not the
//! capability contract, which the caller still validates.

use log::debug;

use crate::frontend::ast::{Capability, Ident};
use crate::types::{
    MethodId, MethodSig, NamespaceKind, ParamSig, Resolution, Substitution, Ty, TypeRegistry,
};
use crate::utils::{Error, Result, Span};

/// A namespaced call target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathTarget {
    pub id: MethodId,
    pub kind: NamespaceKind,
}

/// A signature with placeholders bound from the receiver
#[derive(Debug, Clone)]
pub struct Instantiated {
    pub self_param: Option<(Capability, Ty)>,
    pub params: Vec<ParamSig>,
    pub ret: Option<Ty>,
}

pub struct TraitResolver<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> TraitResolver<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self { registry }
    }

    fn ambiguity(&self, method: &Ident, ty: String, ids: &[MethodId], span: Span) -> Error {
        Error::AmbiguousMethodResolution {
            method: method.name.clone(),
            ty,
            candidates: self.registry.describe_candidates(ids),
            span,
        }
    }

    /// `receiver.method(...)`
    pub fn resolve_method_call(&self, receiver: &Ty, method: &Ident, span: Span) -> Result<MethodId> {
        match self.registry.resolve_method(receiver, &method.name) {
            Resolution::Unique(id) => {
                if self.registry.method(id).self_param.is_none() {
                    // static methods are only reachable through the type name
                    return Err(Error::UnknownMethod {
                        method: method.name.clone(),
                        ty: receiver.to_string(),
                        span,
                    });
                }
                debug!("{}.{} -> {}", receiver, method.name, self.registry.method(id).qualified_name());
                Ok(id)
            }
            Resolution::Ambiguous(ids) => Err(self.ambiguity(method, receiver.to_string(), &ids, span)),
            Resolution::NotFound => Err(Error::UnknownMethod {
                method: method.name.clone(),
                ty: receiver.to_string(),
                span,
            }),
        }
    }

    /// `Path.method(...)` where `Path` is a trait, an extension namespace or a type
    pub fn resolve_path_call(&self, path: &Ident, method: &Ident, span: Span) -> Result<PathTarget> {
        let Some(kind) = self.registry.namespace_kind(&path.name) else {
            return Err(Error::UnknownTypeReference { name: path.name.clone(), span: path.span });
        };
        let resolution = match kind {
            NamespaceKind::Trait => self.registry.resolve_trait_method(&path.name, &method.name),
            NamespaceKind::Extension => self.registry.resolve_extension_method(&path.name, &method.name),
            NamespaceKind::Type => self.registry.resolve_type_method(&path.name, &method.name),
        };
        match resolution {
            Resolution::Unique(id) => Ok(PathTarget { id, kind }),
            Resolution::Ambiguous(ids) => Err(self.ambiguity(method, path.name.clone(), &ids, span)),
            Resolution::NotFound => Err(Error::UnknownMethod {
                method: method.name.clone(),
                ty: path.name.clone(),
                span,
            }),
        }
    }

    /// The explicit receiver of a namespaced call must belong to that namespace
    pub fn check_namespaced_receiver(&self, path: &Ident, target: PathTarget, receiver: &Ty, span: Span) -> Result<()> {
        if receiver.is_error() {
            return Ok(());
        }
        let ok = match target.kind {
            NamespaceKind::Trait => self.registry.composes(receiver, &path.name),
            NamespaceKind::Extension => match self.registry.extension_target(target.id) {
                Some(pattern) => {
                    pattern.unify(receiver, &mut Substitution::new())
                        || pattern.unify(&self.registry.base_of(receiver), &mut Substitution::new())
                }
                None => false,
            },
            NamespaceKind::Type => match receiver {
                Ty::Named(name) => *name == path.name,
                Ty::Anonymous(_) | Ty::Placeholder(_) => true,
                _ => false,
            },
        };
        if ok {
            Ok(())
        } else {
            let expected = match target.kind {
                NamespaceKind::Trait => format!("a type composing `{}`", path.name),
                NamespaceKind::Extension => format!("a receiver for extension `{}`", path.name),
                NamespaceKind::Type => path.name.clone(),
            };
            Err(Error::TypeMismatch { expected, got: receiver.to_string(), span })
        }
    }

    /// Free function by name
    pub fn resolve_function(&self, name: &Ident) -> Result<MethodId> {
        self.registry.function(&name.name).ok_or_else(|| Error::UndefinedName {
            name: name.name.clone(),
            span: name.span,
        })
    }

    /// Bind placeholders (`T`, `Self`) in a signature from the receiver type
    pub fn instantiate(&self, id: MethodId, receiver: Option<&Ty>) -> Instantiated {
        let sig: &MethodSig = self.registry.method(id);
        let mut subst = Substitution::new();
        if let Some(receiver) = receiver {
            if let Some(pattern) = self.registry.extension_target(id) {
                if !pattern.unify(receiver, &mut subst) {
                    pattern.unify(&self.registry.base_of(receiver), &mut subst);
                }
            }
            if let Some((_, self_ty)) = &sig.self_param {
                self_ty.unify(receiver, &mut subst);
            }
        }
        Instantiated {
            self_param: sig.self_param.as_ref().map(|(cap, ty)| (*cap, ty.substitute(&subst))),
            params: sig
                .params
                .iter()
                .map(|p| ParamSig { name: p.name.clone(), capability: p.capability, ty: p.ty.substitute(&subst) })
                .collect(),
            ret: sig.ret.as_ref().map(|r| r.substitute(&subst)),
        }
    }
}
