//! Mutability Checker
//!
//! Enforces const/let semantics and the owned/readonly/mutable capability
//! contract at call and assignment sites. Also computes, per method body,
//! which parameters the body mutates; the registry stores that summary so
//! call sites can tell a plain ownership transfer from an intended mutation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::frontend::ast::*;
use crate::frontend::bindings::{Access, Binding, Origin};
use crate::types::{MethodSig, NamespaceKind, Resolution, Ty, TypeRegistry};
use crate::utils::{Error, Result, Span};

/// May a `const` binding be moved into an owned parameter?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConstTransferPolicy {
    /// Allowed unless the callee mutates that parameter
    #[default]
    AllowUnlessMutated,
    /// Never
    Forbid,
}

/// Can a value held with `access` be passed where `cap` is required?
pub fn satisfies(access: Access, cap: Capability) -> bool {
    match (access, cap) {
        (Access::Owner, _) => true,
        (Access::MutableView, Capability::Readonly | Capability::Mutable) => true,
        (Access::ReadonlyView, Capability::Readonly) => true,
        _ => false,
    }
}

/// The callee a value is being handed to
#[derive(Debug, Clone, Copy)]
pub struct CalleeRef<'a> {
    pub name: &'a str,
    /// The callee's body mutates this parameter
    pub mutates: bool,
}

pub struct MutabilityChecker<'u> {
    policy: ConstTransferPolicy,
    unit: &'u str,
}

impl<'u> MutabilityChecker<'u> {
    pub fn new(policy: ConstTransferPolicy, unit: &'u str) -> Self {
        Self { policy, unit }
    }

    /// In-place mutation, rebinding or any other write through `binding`
    pub fn check_mutation(&self, binding: &Binding, action: &str, span: Span) -> Result<()> {
        if binding.mode == BindingMode::Let {
            return Ok(());
        }
        let reason = match binding.origin {
            Origin::SelfParam => format!("{} inside `{}`, which takes readonly self", action, self.unit),
            Origin::Param => format!("{}: parameter is readonly", action),
            Origin::LoopVar => format!("{}: loop variable is const", action),
            Origin::Local => format!("{}: binding is const", action),
        };
        Err(Error::ConstMutationViolation { var: binding.name.clone(), reason, span })
    }

    /// A complex value leaving `binding`, by assignment or into an owned parameter
    pub fn check_transfer(&self, binding: &Binding, callee: Option<CalleeRef<'_>>, span: Span) -> Result<()> {
        if !satisfies(binding.access, Capability::Owned) {
            let view = if binding.access == Access::ReadonlyView { "readonly" } else { "mutable" };
            let target = match callee {
                Some(c) => format!("an owned parameter of `{}`", c.name),
                None => "a new owner".to_string(),
            };
            return Err(Error::CapabilityMismatch {
                reason: format!("`{}` is a {} view and cannot be moved into {}; use `copy`", binding.name, view, target),
                span,
            });
        }
        let Some(callee) = callee else {
            return Ok(());
        };
        if binding.mode != BindingMode::Const {
            return Ok(());
        }
        match self.policy {
            ConstTransferPolicy::Forbid => Err(Error::ConstMutationViolation {
                var: binding.name.clone(),
                reason: format!("const value cannot be handed to the owned parameter of `{}`", callee.name),
                span,
            }),
            ConstTransferPolicy::AllowUnlessMutated if callee.mutates => Err(Error::ConstMutationViolation {
                var: binding.name.clone(),
                reason: format!("`{}` mutates its owned parameter", callee.name),
                span,
            }),
            ConstTransferPolicy::AllowUnlessMutated => Ok(()),
        }
    }

    /// A call-scoped view of `binding` passed where `cap` is required
    pub fn check_view(&self, binding: &Binding, cap: Capability, callee: &str, span: Span) -> Result<()> {
        match cap {
            Capability::Owned | Capability::Readonly => Ok(()),
            Capability::Mutable => {
                if !satisfies(binding.access, cap) && binding.origin != Origin::SelfParam {
                    return Err(Error::CapabilityMismatch {
                        reason: format!(
                            "`{}` is a readonly view and cannot satisfy the mutable parameter of `{}`",
                            binding.name, callee
                        ),
                        span,
                    });
                }
                self.check_mutation(binding, &format!("`{}` requires mutable access", callee), span)
            }
        }
    }
}

// ==================== Mutation summaries ====================

#[derive(Debug, Clone, Copy)]
enum Slot {
    SelfParam,
    Param(usize),
}

struct SummaryWalker<'r> {
    registry: &'r TypeRegistry,
    tracked: HashMap<String, (Slot, Ty)>,
    self_mut: bool,
    params: Vec<bool>,
}

/// Which of `sig`'s receiver and parameters `body` writes to.
///
/// Syntactic: field/element assignment rooted at the parameter, receiver of a
/// mutable-self method, argument to a mutable parameter. Shadowing ends tracking.
pub fn mutation_summary(registry: &TypeRegistry, sig: &MethodSig, body: &Block) -> (bool, Vec<bool>) {
    let mut tracked = HashMap::new();
    if let Some((_, ty)) = &sig.self_param {
        tracked.insert("self".to_string(), (Slot::SelfParam, ty.clone()));
    }
    for (i, p) in sig.params.iter().enumerate() {
        tracked.insert(p.name.clone(), (Slot::Param(i), p.ty.clone()));
    }
    let mut walker = SummaryWalker { registry, tracked, self_mut: false, params: vec![false; sig.params.len()] };
    walker.block(body);
    (walker.self_mut, walker.params)
}

impl SummaryWalker<'_> {
    fn mark(&mut self, place: &Expr) {
        let Some(root) = place.place_root() else {
            return;
        };
        match self.tracked.get(&root.name) {
            Some((Slot::SelfParam, _)) => self.self_mut = true,
            Some((Slot::Param(i), _)) => self.params[*i] = true,
            None => {}
        }
    }

    fn place_type(&self, expr: &Expr) -> Option<Ty> {
        match expr {
            Expr::Ident(ident) => self.tracked.get(&ident.name).map(|(_, ty)| ty.clone()),
            Expr::Field { expr, field, .. } => self.registry.field_type(&self.place_type(expr)?, &field.name),
            Expr::Index { expr, .. } => match self.registry.base_of(&self.place_type(expr)?) {
                Ty::Array(elem) => Some(*elem),
                _ => None,
            },
            _ => None,
        }
    }

    fn block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Binding { name, value, .. } => {
                self.expr(value);
                self.tracked.remove(&name.name);
            }
            Stmt::Assign { target, value, .. } => {
                self.expr(value);
                self.expr(target);
                self.mark(target);
            }
            Stmt::Expr(e) => self.expr(e),
            Stmt::Return { value, .. } => {
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            Stmt::Block(b) => self.block(b),
            Stmt::If { cond, then_block, else_block, .. } => {
                self.expr(cond);
                self.block(then_block);
                if let Some(b) = else_block {
                    self.block(b);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.expr(cond);
                self.block(body);
            }
            Stmt::For { var, iter, body, .. } => {
                self.expr(iter);
                self.tracked.remove(&var.name);
                self.block(body);
            }
        }
    }

    fn args(&mut self, args: &[Expr], params: &[Capability]) {
        for (arg, cap) in args.iter().zip(params) {
            if *cap == Capability::Mutable {
                self.mark(arg);
            }
        }
        for arg in args {
            self.expr(arg);
        }
    }

    fn signature(&self, resolution: Resolution) -> Option<&MethodSig> {
        match resolution {
            Resolution::Unique(id) => Some(self.registry.method(id)),
            _ => None,
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::MethodCall { receiver, method, args, .. } => {
                let sig = self
                    .place_type(receiver)
                    .and_then(|ty| self.signature(self.registry.resolve_method(&ty, &method.name)))
                    .map(|sig| (sig.self_capability(), sig.params.iter().map(|p| p.capability).collect::<Vec<_>>()));
                if let Some((self_cap, params)) = sig {
                    if self_cap == Some(Capability::Mutable) {
                        self.mark(receiver);
                    }
                    self.args(args, &params);
                } else {
                    self.args(args, &[]);
                }
                self.expr(receiver);
            }
            Expr::PathCall { path, method, args, .. } => {
                let resolution = match self.registry.namespace_kind(&path.name) {
                    Some(NamespaceKind::Trait) => self.registry.resolve_trait_method(&path.name, &method.name),
                    Some(NamespaceKind::Extension) => self.registry.resolve_extension_method(&path.name, &method.name),
                    Some(NamespaceKind::Type) => self.registry.resolve_type_method(&path.name, &method.name),
                    None => Resolution::NotFound,
                };
                let caps: Vec<Capability> = match self.signature(resolution) {
                    Some(sig) => sig
                        .self_capability()
                        .into_iter()
                        .chain(sig.params.iter().map(|p| p.capability))
                        .collect(),
                    None => Vec::new(),
                };
                self.args(args, &caps);
            }
            Expr::Call { func, args, .. } => {
                let caps: Vec<Capability> = match self.registry.function(&func.name) {
                    Some(id) => self.registry.method(id).params.iter().map(|p| p.capability).collect(),
                    None => Vec::new(),
                };
                self.args(args, &caps);
            }
            Expr::Lambda { params, body, .. } => {
                let shadowed: Vec<(String, (Slot, Ty))> = params
                    .iter()
                    .filter_map(|p| self.tracked.remove_entry(&p.name.name))
                    .collect();
                self.block(body);
                self.tracked.extend(shadowed);
            }
            Expr::Copy { expr, .. } | Expr::Unary { expr, .. } => self.expr(expr),
            Expr::Field { expr, .. } => self.expr(expr),
            Expr::Index { expr, index, .. } => {
                self.expr(expr);
                self.expr(index);
            }
            Expr::Slice { expr, start, end, .. } => {
                self.expr(expr);
                for bound in [start, end].into_iter().flatten() {
                    self.expr(bound);
                }
            }
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::StructLit { fields, .. } => match fields {
                StructFields::Positional(values) => values.iter().for_each(|v| self.expr(v)),
                StructFields::Named(inits) => inits.iter().filter_map(|i| i.value.as_ref()).for_each(|v| self.expr(v)),
            },
            Expr::Array { elements, .. } | Expr::Tuple { elements, .. } => elements.iter().for_each(|e| self.expr(e)),
            Expr::Literal(_) | Expr::Ident(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::build::*;
    use crate::frontend::bindings::OwnershipState;
    use crate::types::{RegistryBuilder, Resolution};
    use pretty_assertions::assert_eq;

    fn binding(name: &str, mode: BindingMode, access: Access, origin: Origin) -> Binding {
        Binding::new(&ident(name), Ty::Named("Vehicle".into()), mode, true)
            .with_access(access)
            .with_origin(origin)
    }

    #[test]
    fn test_capability_lattice() {
        assert!(satisfies(Access::Owner, Capability::Owned));
        assert!(satisfies(Access::Owner, Capability::Mutable));
        assert!(satisfies(Access::MutableView, Capability::Readonly));
        assert!(!satisfies(Access::MutableView, Capability::Owned));
        assert!(satisfies(Access::ReadonlyView, Capability::Readonly));
        assert!(!satisfies(Access::ReadonlyView, Capability::Mutable));
    }

    #[test]
    fn test_const_mutation_and_views() {
        let checker = MutabilityChecker::new(ConstTransferPolicy::default(), "Vehicle.paint");
        let ford = binding("ford", BindingMode::Const, Access::Owner, Origin::Local);
        let honda = binding("honda", BindingMode::Let, Access::Owner, Origin::Local);
        let viewer = binding("v", BindingMode::Const, Access::ReadonlyView, Origin::Param);
        let this = binding("self", BindingMode::Const, Access::ReadonlyView, Origin::SelfParam);

        assert!(matches!(
            checker.check_view(&ford, Capability::Mutable, "Drive.drive", Span::dummy()),
            Err(Error::ConstMutationViolation { .. })
        ));
        assert!(checker.check_view(&honda, Capability::Mutable, "Drive.drive", Span::dummy()).is_ok());
        assert!(matches!(
            checker.check_view(&viewer, Capability::Mutable, "Drive.drive", Span::dummy()),
            Err(Error::CapabilityMismatch { .. })
        ));
        let err = checker.check_mutation(&this, "assigning to `self.wheels`", Span::dummy()).unwrap_err();
        assert!(err.to_string().contains("Vehicle.paint"));
    }

    #[test]
    fn test_const_transfer_policy() {
        let ford = binding("ford", BindingMode::Const, Access::Owner, Origin::Local);
        let reader = CalleeRef { name: "park", mutates: false };
        let writer = CalleeRef { name: "repaint", mutates: true };

        let lenient = MutabilityChecker::new(ConstTransferPolicy::AllowUnlessMutated, "main");
        assert!(lenient.check_transfer(&ford, Some(reader), Span::dummy()).is_ok());
        assert!(lenient.check_transfer(&ford, Some(writer), Span::dummy()).is_err());
        assert!(lenient.check_transfer(&ford, None, Span::dummy()).is_ok());

        let strict = MutabilityChecker::new(ConstTransferPolicy::Forbid, "main");
        assert!(strict.check_transfer(&ford, Some(reader), Span::dummy()).is_err());

        let view = binding("v", BindingMode::Let, Access::MutableView, Origin::Param);
        assert!(matches!(
            lenient.check_transfer(&view, Some(reader), Span::dummy()),
            Err(Error::CapabilityMismatch { .. })
        ));
        assert_eq!(view.state, OwnershipState::Owned);
    }

    #[test]
    fn test_mutation_summary() {
        let paint = method(
            "paint",
            Capability::Mutable,
            None,
            vec![param("color", Capability::Owned, ty("string"))],
            None,
            Some(vec![assign(field(var("self"), "make"), var("color"))]),
        );
        let repaint = func(
            "repaint",
            vec![param("car", Capability::Owned, ty("Vehicle")), param("other", Capability::Owned, ty("Vehicle"))],
            None,
            vec![
                expr(method_call(var("car"), "paint", vec![string("red")])),
                let_("other", new_vehicle("Kia", "Rio")),
                assign(field(var("other"), "make"), string("Kia")),
            ],
        );
        let program = program(vec![vehicle(&[], vec![paint]), function(repaint)]);
        let frozen = RegistryBuilder::from_program(&program).freeze();
        assert!(frozen.errors.is_empty(), "{:?}", frozen.errors);
        let registry = &frozen.registry;

        let paint_id = match registry.resolve_method(&Ty::Named("Vehicle".into()), "paint") {
            Resolution::Unique(id) => id,
            other => panic!("{:?}", other),
        };
        assert!(registry.method(paint_id).mutates_self);
        assert_eq!(registry.method(paint_id).mutated_params, vec![false]);

        let repaint_id = registry.function("repaint").unwrap();
        assert_eq!(registry.method(repaint_id).mutated_params, vec![true, false]);
    }
}
