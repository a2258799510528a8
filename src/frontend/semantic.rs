//! Semantic Analysis for ttlang
//!
//! Performs:
//! - Phase 1: Type Registry construction and freeze
//! - Phase 2: per-body binding, ownership, mutability and call checking
//!
//! Phase 2 units share nothing but the frozen registry, so they run in
//! parallel. Diagnostics never abort a unit; a failed expression gets the
//! error type and checking carries on.

use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;

use crate::frontend::alias::{check_alias_value, BoundsObligation, ConstValue};
use crate::frontend::ast::*;
use crate::frontend::bindings::{Access, Binding, BindingId, BindingTable, DropPoint, Origin, Snapshot};
use crate::frontend::mutability::{CalleeRef, ConstTransferPolicy, MutabilityChecker};
use crate::frontend::traits::TraitResolver;
use crate::types::{
    BodyUnit, DefaultsUnit, Frozen, MethodId, ParamSig, RegistryBuilder, ScalarType, Ty, TypeKind, TypeRegistry,
};
use crate::utils::{Error, Result, Span};

// ==================== Options & Results ====================

/// Analysis configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub const_transfer: ConstTransferPolicy,
    /// Run Phase 2 units on the rayon pool
    pub parallel: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            const_transfer: ConstTransferPolicy::AllowUnlessMutated,
            parallel: true,
        }
    }
}

/// What one body hands to the code generator
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnitReport {
    pub unit: String,
    pub obligations: Vec<BoundsObligation>,
    pub drops: Vec<DropPoint>,
}

/// Result of [`analyze`]
#[derive(Debug)]
pub struct Analysis {
    pub registry: Arc<TypeRegistry>,
    /// Sorted by source position
    pub diagnostics: Vec<Error>,
    pub units: Vec<UnitReport>,
}

impl Analysis {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// The frozen registry, but only for a clean analysis
    pub fn registry_for_codegen(&self) -> Result<Arc<TypeRegistry>> {
        if self.diagnostics.is_empty() {
            Ok(Arc::clone(&self.registry))
        } else {
            Err(Error::AnalysisFailed { count: self.diagnostics.len() })
        }
    }
}

/// Analyze a program: freeze the registry, then check every body against it
pub fn analyze(program: &Program, options: &AnalysisOptions) -> Analysis {
    let Frozen { registry, bodies, defaults, errors } = RegistryBuilder::from_program(program).freeze();
    let registry = Arc::new(registry);
    info!(
        "phase 2: {} bodies, {} types with field defaults ({})",
        bodies.len(),
        defaults.len(),
        if options.parallel { "parallel" } else { "sequential" }
    );

    let policy = options.const_transfer;
    let check = |unit: &BodyUnit| {
        let name = registry.method(unit.method).qualified_name();
        FunctionAnalyzer::new(&registry, policy, name).run(unit.method, unit.body)
    };
    let check_defaults = |unit: &DefaultsUnit| {
        let name = format!("{} field defaults", unit.type_name);
        FunctionAnalyzer::new(&registry, policy, name).run_defaults(&unit.fields)
    };
    let results: Vec<(UnitReport, Vec<Error>)> = if options.parallel {
        let mut results: Vec<_> = defaults.par_iter().map(check_defaults).collect();
        results.par_extend(bodies.par_iter().map(check));
        results
    } else {
        defaults.iter().map(check_defaults).chain(bodies.iter().map(check)).collect()
    };

    let mut diagnostics = errors;
    let mut units = Vec::with_capacity(results.len());
    for (report, unit_errors) in results {
        diagnostics.extend(unit_errors);
        units.push(report);
    }
    diagnostics.sort_by_key(|e| e.span());
    info!("analysis finished with {} diagnostic(s)", diagnostics.len());

    Analysis { registry, diagnostics, units }
}

// ==================== Function Analyzer ====================

/// Resolved call target with placeholders already bound
struct Callee {
    name: String,
    params: Vec<ParamSig>,
    mutated: Vec<bool>,
    ret: Option<Ty>,
}

/// Phase 2 checker for a single body
struct FunctionAnalyzer<'r> {
    registry: &'r TypeRegistry,
    resolver: TraitResolver<'r>,
    policy: ConstTransferPolicy,
    name: String,
    bindings: BindingTable,
    /// Expected return type per enclosing body; `None` is void
    returns: Vec<Option<Ty>>,
    errors: Vec<Error>,
    obligations: Vec<BoundsObligation>,
    drops: Vec<DropPoint>,
}

impl<'r> FunctionAnalyzer<'r> {
    fn new(registry: &'r TypeRegistry, policy: ConstTransferPolicy, name: String) -> Self {
        Self {
            registry,
            resolver: TraitResolver::new(registry),
            policy,
            name,
            bindings: BindingTable::new(),
            returns: Vec::new(),
            errors: Vec::new(),
            obligations: Vec::new(),
            drops: Vec::new(),
        }
    }

    fn run(mut self, unit: MethodId, body: &Block) -> (UnitReport, Vec<Error>) {
        let registry = self.registry;
        let sig = registry.method(unit);
        debug!("checking {}", self.name);

        self.bindings.enter_scope();
        if let Some((cap, ty)) = &sig.self_param {
            let ident = Ident { name: "self".to_string(), span: sig.span };
            self.declare_param(&ident, *cap, ty.clone(), Origin::SelfParam);
        }
        for p in &sig.params {
            let ident = Ident { name: p.name.clone(), span: sig.span };
            self.declare_param(&ident, p.capability, p.ty.clone(), Origin::Param);
        }

        self.returns.push(sig.ret.clone());
        self.check_stmts(&body.stmts);
        self.returns.pop();
        let drops = self.bindings.exit_scope(body.span.end_point());
        self.drops.extend(drops);
        self.finish()
    }

    /// Each default is checked against its field type in a scope of its own
    fn run_defaults(mut self, fields: &[(Ty, &Expr)]) -> (UnitReport, Vec<Error>) {
        debug!("checking {}", self.name);
        for (ty, default) in fields {
            self.bindings.enter_scope();
            self.transfer_into(default, ty, default.span());
            let drops = self.bindings.exit_scope(default.span().end_point());
            self.drops.extend(drops);
        }
        self.finish()
    }

    fn finish(self) -> (UnitReport, Vec<Error>) {
        debug!(
            "{}: {} diagnostic(s), {} drop point(s), {} obligation(s)",
            self.name,
            self.errors.len(),
            self.drops.len(),
            self.obligations.len()
        );
        let report = UnitReport { unit: self.name, obligations: self.obligations, drops: self.drops };
        (report, self.errors)
    }

    fn report(&mut self, err: Error) {
        self.errors.push(err);
    }

    /// Keep walking after a local failure
    fn recover(&mut self, result: Result<Ty>) -> Ty {
        result.unwrap_or_else(|err| {
            self.errors.push(err);
            Ty::Error
        })
    }

    fn checker(&self) -> MutabilityChecker<'_> {
        MutabilityChecker::new(self.policy, &self.name)
    }

    fn resolve_type(&mut self, ty: &TypeExpr) -> Ty {
        let result = self.registry.resolve_type_expr(ty);
        self.recover(result)
    }

    fn lookup(&self, ident: &Ident) -> Result<BindingId> {
        self.bindings.lookup(&ident.name).ok_or_else(|| Error::UndefinedName {
            name: ident.name.clone(),
            span: ident.span,
        })
    }

    fn declare_param(&mut self, name: &Ident, cap: Capability, ty: Ty, origin: Origin) {
        let (mode, access) = Access::for_capability(cap);
        let complex = self.registry.is_complex(&ty);
        let binding = Binding::new(name, ty, mode, complex).with_access(access).with_origin(origin);
        if let Err(err) = self.bindings.declare(binding) {
            self.report(err);
        }
    }

    // ==================== Statements ====================

    fn check_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            if let Err(err) = self.check_stmt(stmt) {
                self.report(err);
            }
        }
    }

    fn check_scoped_block(&mut self, block: &Block) {
        self.bindings.enter_scope();
        self.check_stmts(&block.stmts);
        let drops = self.bindings.exit_scope(block.span.end_point());
        self.drops.extend(drops);
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Binding { mode, name, ty, value, span } => {
                let declared = ty.as_ref().map(|t| self.resolve_type(t));
                let mut final_ty = match &declared {
                    Some(d) => self.transfer_into(value, d, *span),
                    None => self.consume(value),
                };
                if final_ty == Ty::Void {
                    self.report(Error::TypeMismatch {
                        expected: "a value".to_string(),
                        got: "void".to_string(),
                        span: value.span(),
                    });
                    final_ty = Ty::Error;
                }
                let constant = match mode {
                    BindingMode::Const => self.const_value(value),
                    BindingMode::Let => None,
                };
                let complex = self.registry.is_complex(&final_ty);
                let binding = Binding::new(name, final_ty, *mode, complex).with_constant(constant);
                self.bindings.declare(binding)?;
                Ok(())
            }

            Stmt::Assign { target, value, span } => match target {
                Expr::Ident(ident) => {
                    let id = self.lookup(ident)?;
                    let binding = self.bindings.get(id);
                    let target_ty = binding.ty.clone();
                    let action = format!("cannot rebind `{}`", ident.name);
                    if let Err(err) = self.checker().check_mutation(binding, &action, *span) {
                        self.report(err);
                    }
                    self.transfer_into(value, &target_ty, *span);
                    let binding = self.bindings.get(id);
                    if binding.is_moved() && binding.access == Access::Owner {
                        self.bindings.reinitialize(id);
                    }
                    Ok(())
                }
                Expr::Field { .. } | Expr::Index { .. } => {
                    let place_ty = self.check_expr(target);
                    if let Some(root) = target.place_root() {
                        if let Some(id) = self.bindings.lookup(&root.name) {
                            let action = format!("cannot assign through `{}`", root.name);
                            if let Err(err) = self.checker().check_mutation(self.bindings.get(id), &action, *span) {
                                self.report(err);
                            }
                        }
                    }
                    self.transfer_into(value, &place_ty, *span);
                    Ok(())
                }
                other => {
                    self.check_expr(value);
                    Err(Error::TypeMismatch {
                        expected: "an assignable place".to_string(),
                        got: "expression".to_string(),
                        span: other.span(),
                    })
                }
            },

            Stmt::Expr(expr) => {
                self.check_expr(expr);
                Ok(())
            }

            Stmt::Return { value, span } => {
                let expected = self.returns.last().cloned().flatten();
                match (value, expected) {
                    (Some(v), Some(exp)) => {
                        self.transfer_into(v, &exp, *span);
                        Ok(())
                    }
                    (Some(v), None) => {
                        let got = self.consume(v);
                        if got == Ty::Void || got.is_error() {
                            Ok(())
                        } else {
                            Err(Error::TypeMismatch { expected: "void".to_string(), got: got.to_string(), span: v.span() })
                        }
                    }
                    (None, Some(exp)) if !exp.has_placeholder() && !exp.is_error() => Err(Error::TypeMismatch {
                        expected: exp.to_string(),
                        got: "void".to_string(),
                        span: *span,
                    }),
                    (None, _) => Ok(()),
                }
            }

            Stmt::Block(block) => {
                self.check_scoped_block(block);
                Ok(())
            }

            Stmt::If { cond, then_block, else_block, .. } => {
                self.check_condition(cond);
                let before = self.bindings.snapshot();
                self.check_scoped_block(then_block);
                let after_then = self.bindings.snapshot();
                self.bindings.restore(&before);
                if let Some(block) = else_block {
                    self.check_scoped_block(block);
                }
                let after_else = self.bindings.snapshot();
                self.bindings.merge(&after_then, &after_else);
                Ok(())
            }

            Stmt::While { cond, body, .. } => {
                self.check_condition(cond);
                let before = self.bindings.snapshot();
                self.check_scoped_block(body);
                self.report_loop_moves(&before);
                Ok(())
            }

            Stmt::For { mode, var, iter, body, span } => {
                let iter_ty = self.check_expr(iter);
                let elem = match self.registry.base_of(&iter_ty) {
                    Ty::Array(elem) => *elem,
                    Ty::String => Ty::Scalar(ScalarType::Char),
                    Ty::Error | Ty::Placeholder(_) => Ty::Error,
                    other => {
                        self.report(Error::TypeMismatch {
                            expected: "an array or string".to_string(),
                            got: other.to_string(),
                            span: iter.span(),
                        });
                        Ty::Error
                    }
                };
                let complex = self.registry.is_complex(&elem);
                let access = match (complex, mode) {
                    (false, _) => Access::Owner,
                    (true, BindingMode::Let) => Access::MutableView,
                    (true, BindingMode::Const) => Access::ReadonlyView,
                };
                if access == Access::MutableView {
                    if let Some(root) = iter.place_root() {
                        if let Some(id) = self.bindings.lookup(&root.name) {
                            let action = format!("cannot iterate mutably over `{}`", root.name);
                            if let Err(err) = self.checker().check_mutation(self.bindings.get(id), &action, *span) {
                                self.report(err);
                            }
                        }
                    }
                }

                let before = self.bindings.snapshot();
                self.bindings.enter_scope();
                let binding = Binding::new(var, elem, *mode, complex).with_access(access).with_origin(Origin::LoopVar);
                if let Err(err) = self.bindings.declare(binding) {
                    self.report(err);
                }
                self.check_stmts(&body.stmts);
                let drops = self.bindings.exit_scope(body.span.end_point());
                self.drops.extend(drops);
                self.report_loop_moves(&before);
                Ok(())
            }
        }
    }

    fn check_condition(&mut self, cond: &Expr) {
        let ty = self.check_expr(cond);
        if !self.compatible(&Ty::BOOL, &ty) {
            self.report(Error::TypeMismatch { expected: "bool".to_string(), got: ty.to_string(), span: cond.span() });
        }
    }

    /// A value moved inside a loop body is gone on the next iteration
    fn report_loop_moves(&mut self, before: &Snapshot) {
        for (id, at) in self.bindings.moved_since(before) {
            let var = self.bindings.get(id).name.clone();
            self.report(Error::UseOfMovedValue { var, moved_at: at, span: at });
        }
    }

    // ==================== Ownership transfer ====================

    /// Evaluate `expr` as a value that leaves its place
    fn consume(&mut self, expr: &Expr) -> Ty {
        let ty = self.check_expr(expr);
        self.transfer_out(expr, &ty, None);
        ty
    }

    /// Evaluate `value` into an owned location of type `expected`
    fn transfer_into(&mut self, value: &Expr, expected: &Ty, span: Span) -> Ty {
        let got = self.check_value(value, Some(expected));
        self.transfer_out(value, &got, None);
        self.expect_ty(expected, &got, value, span)
    }

    /// Ownership of a complex value leaves the binding `expr` names
    fn transfer_out(&mut self, expr: &Expr, ty: &Ty, callee: Option<CalleeRef<'_>>) {
        if !self.registry.is_complex(ty) {
            return;
        }
        match expr {
            Expr::Ident(ident) => {
                let Some(id) = self.bindings.lookup(&ident.name) else {
                    return;
                };
                match self.checker().check_transfer(self.bindings.get(id), callee, ident.span) {
                    Ok(()) => self.bindings.transfer(id, ident.span),
                    Err(err) => self.report(err),
                }
            }
            Expr::Field { .. } | Expr::Index { .. } => {
                let root = expr.place_root().map(|r| r.name.clone()).unwrap_or_default();
                self.report(Error::CapabilityMismatch {
                    reason: format!("cannot move a `{}` out of `{}`; use `copy`", ty, root),
                    span: expr.span(),
                });
            }
            _ => {}
        }
    }

    /// Side effects of handing `arg` to a parameter of capability `cap`
    fn apply_capability(&mut self, arg: &Expr, ty: &Ty, cap: Capability, callee: CalleeRef<'_>) {
        match cap {
            Capability::Owned => self.transfer_out(arg, ty, Some(callee)),
            Capability::Readonly => {}
            Capability::Mutable => {
                let Some(root) = arg.place_root() else {
                    return;
                };
                let Some(id) = self.bindings.lookup(&root.name) else {
                    return;
                };
                if let Err(err) = self.checker().check_view(self.bindings.get(id), cap, callee.name, arg.span()) {
                    self.report(err);
                }
            }
        }
    }

    /// Check `got` against `expected`, refine anonymous bindings, check alias bounds
    fn expect_ty(&mut self, expected: &Ty, got: &Ty, expr: &Expr, span: Span) -> Ty {
        if !self.compatible(expected, got) {
            let span = if expr.span().is_empty() { span } else { expr.span() };
            self.report(Error::TypeMismatch { expected: expected.to_string(), got: got.to_string(), span });
            return expected.clone();
        }
        if let (Ty::Named(_), Ty::Anonymous(_), Expr::Ident(ident)) = (expected, got, expr) {
            if let Some(id) = self.bindings.lookup(&ident.name) {
                self.bindings.get_mut(id).ty = expected.clone();
            }
        }
        if let Ty::Alias(alias) = expected {
            if got != expected {
                let value = self.const_value(expr);
                match check_alias_value(self.registry, alias, value.as_ref(), expr.span()) {
                    Ok(obligations) => self.obligations.extend(obligations),
                    Err(err) => self.report(err),
                }
            }
        }
        if expected.has_placeholder() || expected.is_error() {
            got.clone()
        } else {
            expected.clone()
        }
    }

    /// Literal value of `expr`, if known
    fn const_value(&self, expr: &Expr) -> Option<ConstValue> {
        match expr {
            Expr::Literal(lit) => Some(ConstValue::from_literal(lit)),
            Expr::Copy { expr, .. } => self.const_value(expr),
            Expr::Unary { op: UnOp::Neg, expr, .. } => match self.const_value(expr)? {
                // -i64::MIN has no value; the check falls to runtime
                ConstValue::Int(v) => v.checked_neg().map(ConstValue::Int),
                ConstValue::Float(v) => Some(ConstValue::Float(-v)),
                _ => None,
            },
            Expr::Ident(ident) => {
                let id = self.bindings.lookup(&ident.name)?;
                self.bindings.get(id).constant.clone()
            }
            _ => None,
        }
    }

    // ==================== Expressions ====================

    /// Expression with a known destination type
    fn check_value(&mut self, expr: &Expr, expected: Option<&Ty>) -> Ty {
        match (expr, expected) {
            (Expr::StructLit { name: None, fields, span }, Some(Ty::Named(type_name))) => {
                let result = self.check_struct_lit(None, fields, Some(type_name.as_str()), *span);
                self.recover(result)
            }
            (Expr::Lambda { params, body, .. }, expected) => self.check_lambda(params, body, expected),
            (Expr::Array { elements, .. }, Some(Ty::Array(elem))) => {
                for element in elements {
                    self.transfer_into(element, elem, element.span());
                }
                Ty::Array(elem.clone())
            }
            _ => self.check_expr(expr),
        }
    }

    fn check_expr(&mut self, expr: &Expr) -> Ty {
        match expr {
            Expr::Literal(lit) => self.literal_type(lit),

            Expr::Ident(ident) => {
                let result = self.check_ident(ident);
                self.recover(result)
            }

            // reads the source, yields a fresh owned value
            Expr::Copy { expr, .. } => self.check_expr(expr),

            Expr::StructLit { name, fields, span } => {
                let result = self.check_struct_lit(name.as_ref(), fields, None, *span);
                self.recover(result)
            }

            Expr::Array { elements, .. } => self.check_array(elements),

            Expr::Tuple { elements, .. } => Ty::Tuple(elements.iter().map(|e| self.consume(e)).collect()),

            Expr::Field { expr, field, .. } => {
                let base = self.check_expr(expr);
                if base.is_error() {
                    return Ty::Error;
                }
                let result = self.registry.field_type(&base, &field.name).ok_or_else(|| Error::UnknownField {
                    ty: base.to_string(),
                    field: field.name.clone(),
                    span: field.span,
                });
                self.recover(result)
            }

            Expr::Index { expr, index, .. } => {
                let base = self.check_expr(expr);
                self.check_index(index);
                match self.registry.base_of(&base) {
                    Ty::Array(elem) => *elem,
                    Ty::String => Ty::Scalar(ScalarType::Char),
                    Ty::Error | Ty::Placeholder(_) => Ty::Error,
                    other => self.recover(Err(Error::TypeMismatch {
                        expected: "an array or string".to_string(),
                        got: other.to_string(),
                        span: expr.span(),
                    })),
                }
            }

            Expr::Slice { expr, start, end, .. } => {
                let base = self.check_expr(expr);
                for bound in [start, end].into_iter().flatten() {
                    self.check_index(bound);
                }
                match self.registry.base_of(&base) {
                    sliceable @ (Ty::Array(_) | Ty::String) => sliceable,
                    Ty::Error | Ty::Placeholder(_) => Ty::Error,
                    other => self.recover(Err(Error::TypeMismatch {
                        expected: "an array or string".to_string(),
                        got: other.to_string(),
                        span: expr.span(),
                    })),
                }
            }

            Expr::MethodCall { receiver, method, args, span } => {
                let result = self.check_method_call(receiver, method, args, *span);
                self.recover(result)
            }

            Expr::PathCall { path, method, args, span } => {
                let result = self.check_path_call(path, method, args, *span);
                self.recover(result)
            }

            Expr::Call { func, args, span } => {
                let result = self.check_call(func, args, *span);
                self.recover(result)
            }

            Expr::Lambda { params, body, .. } => self.check_lambda(params, body, None),

            Expr::Binary { left, op, right, span } => {
                let left_ty = self.check_expr(left);
                let right_ty = self.check_expr(right);
                let result = self.check_binary_op(&left_ty, *op, &right_ty, *span);
                self.recover(result)
            }

            Expr::Unary { op, expr, span } => {
                let ty = self.check_expr(expr);
                let result = self.check_unary_op(*op, &ty, *span);
                self.recover(result)
            }
        }
    }

    fn literal_type(&self, lit: &Literal) -> Ty {
        match lit {
            Literal::Int { .. } | Literal::Float { .. } => Ty::NUM,
            Literal::String { .. } => Ty::String,
            Literal::Bool { .. } => Ty::BOOL,
        }
    }

    fn check_ident(&mut self, ident: &Ident) -> Result<Ty> {
        if let Some(id) = self.bindings.lookup(&ident.name) {
            if let Err(err) = self.bindings.check_usable(id, ident.span) {
                self.report(err);
            }
            return Ok(self.bindings.get(id).ty.clone());
        }
        let registry = self.registry;
        match registry.function(&ident.name) {
            Some(id) => {
                let sig = registry.method(id);
                Ok(Ty::Function {
                    params: sig.params.iter().map(|p| (p.capability, p.ty.clone())).collect(),
                    ret: sig.ret.clone().map(Box::new),
                })
            }
            None => Err(Error::UndefinedName { name: ident.name.clone(), span: ident.span }),
        }
    }

    fn check_index(&mut self, index: &Expr) {
        let ty = self.check_expr(index);
        if !self.is_numeric(&ty) {
            self.report(Error::TypeMismatch { expected: "num".to_string(), got: ty.to_string(), span: index.span() });
        }
    }

    fn check_array(&mut self, elements: &[Expr]) -> Ty {
        let mut elem: Option<Ty> = None;
        for element in elements {
            let ty = self.consume(element);
            match &elem {
                None if !ty.is_error() => elem = Some(ty),
                Some(first) if !self.compatible(first, &ty) => {
                    let expected = first.to_string();
                    self.report(Error::TypeMismatch { expected, got: ty.to_string(), span: element.span() });
                }
                _ => {}
            }
        }
        Ty::Array(Box::new(elem.unwrap_or(Ty::Error)))
    }

    /// `Vehicle{...}`, or `{...}` checked against `expected`, or an anonymous literal
    fn check_struct_lit(
        &mut self,
        name: Option<&Ident>,
        fields: &StructFields,
        expected: Option<&str>,
        span: Span,
    ) -> Result<Ty> {
        let type_name = match (name, expected) {
            (Some(ident), _) => ident.name.clone(),
            (None, Some(expected)) => expected.to_string(),
            (None, None) => return Ok(self.anonymous_struct(fields)),
        };
        let registry = self.registry;
        let def = registry.lookup(&type_name).ok_or_else(|| Error::UnknownTypeReference {
            name: type_name.clone(),
            span: name.map_or(span, |n| n.span),
        })?;
        if !matches!(def.kind, TypeKind::Struct | TypeKind::Tuple) {
            return Err(Error::TypeMismatch {
                expected: "a struct or tuple type".to_string(),
                got: type_name,
                span,
            });
        }

        match fields {
            StructFields::Positional(values) => {
                let fits = values.len() <= def.fields.len()
                    && def.fields[values.len()..].iter().all(|f| f.has_default);
                if !fits {
                    self.report(Error::ArgCountMismatch { expected: def.fields.len(), got: values.len(), span });
                }
                for (i, value) in values.iter().enumerate() {
                    match def.fields.get(i) {
                        Some(field) => {
                            self.transfer_into(value, &field.ty, value.span());
                        }
                        None => {
                            self.consume(value);
                        }
                    }
                }
            }
            StructFields::Named(inits) => {
                let mut seen: Vec<&str> = Vec::new();
                for init in inits {
                    let shorthand;
                    let value = match &init.value {
                        Some(v) => v,
                        None => {
                            shorthand = Expr::Ident(init.name.clone());
                            &shorthand
                        }
                    };
                    let Some(field) = def.fields.iter().find(|f| f.name == init.name.name) else {
                        self.report(Error::UnknownField {
                            ty: type_name.clone(),
                            field: init.name.name.clone(),
                            span: init.name.span,
                        });
                        self.consume(value);
                        continue;
                    };
                    if seen.contains(&field.name.as_str()) {
                        self.report(Error::DuplicateDefinition {
                            name: format!("{}.{}", type_name, field.name),
                            span: init.name.span,
                        });
                    }
                    seen.push(field.name.as_str());
                    self.transfer_into(value, &field.ty, init.name.span);
                }
                for field in def.fields.iter().filter(|f| !f.has_default && !seen.contains(&f.name.as_str())) {
                    self.report(Error::TypeMismatch {
                        expected: format!("a value for field `{}`", field.name),
                        got: "nothing".to_string(),
                        span,
                    });
                }
            }
        }
        Ok(Ty::Named(type_name))
    }

    /// `{4, "Honda", "Civic"}`: typed structurally until it meets a declared type
    fn anonymous_struct(&mut self, fields: &StructFields) -> Ty {
        match fields {
            StructFields::Positional(values) => Ty::Anonymous(values.iter().map(|v| self.consume(v)).collect()),
            StructFields::Named(inits) => Ty::Anonymous(
                inits
                    .iter()
                    .map(|init| match &init.value {
                        Some(v) => self.consume(v),
                        None => self.consume(&Expr::Ident(init.name.clone())),
                    })
                    .collect(),
            ),
        }
    }

    // ==================== Calls ====================

    fn callee(&self, id: MethodId, receiver: Option<&Ty>) -> Callee {
        let sig = self.registry.method(id);
        let inst = self.resolver.instantiate(id, receiver);
        Callee {
            name: sig.qualified_name(),
            params: inst.params,
            mutated: sig.mutated_params.clone(),
            ret: inst.ret,
        }
    }

    fn check_args(&mut self, callee: &Callee, args: &[Expr], span: Span) {
        if args.len() != callee.params.len() {
            self.report(Error::ArgCountMismatch { expected: callee.params.len(), got: args.len(), span });
        }
        for (i, arg) in args.iter().enumerate() {
            match callee.params.get(i) {
                Some(param) => {
                    let mutates = callee.mutated.get(i).copied().unwrap_or(false);
                    let target = CalleeRef { name: &callee.name, mutates };
                    let got = self.check_value(arg, Some(&param.ty));
                    self.apply_capability(arg, &got, param.capability, target);
                    self.expect_ty(&param.ty, &got, arg, arg.span());
                }
                None => {
                    self.check_expr(arg);
                }
            }
        }
    }

    /// Arguments of a call that could not be resolved are still checked
    fn check_args_loosely(&mut self, args: &[Expr]) {
        for arg in args {
            self.check_expr(arg);
        }
    }

    fn check_method_call(&mut self, receiver: &Expr, method: &Ident, args: &[Expr], span: Span) -> Result<Ty> {
        let recv_ty = self.check_expr(receiver);
        // an alias whose chain was rejected at freeze has already been reported
        if self.registry.base_of(&recv_ty).is_error() {
            self.check_args_loosely(args);
            return Ok(Ty::Error);
        }
        let id = match self.resolver.resolve_method_call(&recv_ty, method, span) {
            Ok(id) => id,
            Err(err) => {
                self.check_args_loosely(args);
                return Err(err);
            }
        };
        let registry = self.registry;
        let sig = registry.method(id);
        let callee = self.callee(id, Some(&recv_ty));
        if let Some((cap, _)) = &sig.self_param {
            let target = CalleeRef { name: &callee.name, mutates: sig.mutates_self };
            self.apply_capability(receiver, &recv_ty, *cap, target);
        }
        self.check_args(&callee, args, span);
        Ok(callee.ret.unwrap_or(Ty::Void))
    }

    /// `Trait.method(recv, ...)`, `Namespace.method(recv, ...)` or `Type.method(...)`
    fn check_path_call(&mut self, path: &Ident, method: &Ident, args: &[Expr], span: Span) -> Result<Ty> {
        let target = match self.resolver.resolve_path_call(path, method, span) {
            Ok(target) => target,
            Err(err) => {
                self.check_args_loosely(args);
                return Err(err);
            }
        };
        let registry = self.registry;
        let sig = registry.method(target.id);
        let Some((cap, _)) = &sig.self_param else {
            let callee = self.callee(target.id, None);
            self.check_args(&callee, args, span);
            return Ok(callee.ret.unwrap_or(Ty::Void));
        };

        let Some((receiver, rest)) = args.split_first() else {
            return Err(Error::ArgCountMismatch { expected: sig.params.len() + 1, got: 0, span });
        };
        let recv_ty = self.check_expr(receiver);
        if let Err(err) = self.resolver.check_namespaced_receiver(path, target, &recv_ty, receiver.span()) {
            self.report(err);
        }
        let callee = self.callee(target.id, Some(&recv_ty));
        let self_target = CalleeRef { name: &callee.name, mutates: sig.mutates_self };
        self.apply_capability(receiver, &recv_ty, *cap, self_target);
        self.check_args(&callee, rest, span);
        Ok(callee.ret.unwrap_or(Ty::Void))
    }

    /// `f(args)`: a free function, or a binding of function type
    fn check_call(&mut self, func: &Ident, args: &[Expr], span: Span) -> Result<Ty> {
        let callee = if let Some(id) = self.bindings.lookup(&func.name) {
            if let Err(err) = self.bindings.check_usable(id, func.span) {
                self.report(err);
            }
            match self.registry.base_of(&self.bindings.get(id).ty) {
                Ty::Function { params, ret } => Callee {
                    name: func.name.clone(),
                    params: params
                        .into_iter()
                        .enumerate()
                        .map(|(i, (capability, ty))| ParamSig { name: i.to_string(), capability, ty })
                        .collect(),
                    mutated: Vec::new(),
                    ret: ret.map(|r| *r),
                },
                Ty::Error | Ty::Placeholder(_) => {
                    self.check_args_loosely(args);
                    return Ok(Ty::Error);
                }
                other => {
                    self.check_args_loosely(args);
                    return Err(Error::TypeMismatch { expected: "a function".to_string(), got: other.to_string(), span: func.span });
                }
            }
        } else {
            match self.resolver.resolve_function(func) {
                Ok(id) => self.callee(id, None),
                Err(err) => {
                    self.check_args_loosely(args);
                    return Err(err);
                }
            }
        };
        self.check_args(&callee, args, span);
        Ok(callee.ret.unwrap_or(Ty::Void))
    }

    /// Lambdas take parameter capabilities and types from the expected function type
    fn check_lambda(&mut self, params: &[Param], body: &Block, expected: Option<&Ty>) -> Ty {
        let expected_fn = match expected {
            Some(Ty::Function { params: ps, ret }) if ps.len() == params.len() => Some((ps.clone(), ret.clone())),
            _ => None,
        };

        self.bindings.enter_scope();
        let mut param_tys = Vec::with_capacity(params.len());
        for (i, p) in params.iter().enumerate() {
            let (cap, ty) = match (&p.ty, &expected_fn) {
                (Some(t), _) => (p.capability, self.resolve_type(t)),
                (None, Some((ps, _))) => ps[i].clone(),
                (None, None) => (p.capability, Ty::Placeholder("_".to_string())),
            };
            self.declare_param(&p.name, cap, ty.clone(), Origin::Param);
            param_tys.push((cap, ty));
        }

        let ret = match &expected_fn {
            Some((_, ret)) => ret.as_ref().map(|r| (**r).clone()),
            None => Some(Ty::Placeholder("_".to_string())),
        };
        self.returns.push(ret.clone());
        self.check_stmts(&body.stmts);
        self.returns.pop();
        let drops = self.bindings.exit_scope(body.span.end_point());
        self.drops.extend(drops);

        Ty::Function { params: param_tys, ret: ret.map(Box::new) }
    }

    // ==================== Types ====================

    fn is_numeric(&self, ty: &Ty) -> bool {
        match self.registry.base_of(ty) {
            Ty::Scalar(s) => s.is_numeric(),
            Ty::Error | Ty::Placeholder(_) => true,
            _ => false,
        }
    }

    /// Check binary operation
    fn check_binary_op(&self, left: &Ty, op: BinOp, right: &Ty, span: Span) -> Result<Ty> {
        let (lb, rb) = (self.registry.base_of(left), self.registry.base_of(right));
        let lenient = |t: &Ty| matches!(t, Ty::Error | Ty::Placeholder(_));
        let mismatch = |expected: &str| Error::TypeMismatch {
            expected: expected.to_string(),
            got: format!("{} and {}", left, right),
            span,
        };

        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                if lenient(&lb) || lenient(&rb) {
                    return Ok(if lenient(&lb) { right.clone() } else { left.clone() });
                }
                if op == BinOp::Add && lb == Ty::String && rb == Ty::String {
                    return Ok(Ty::String);
                }
                if self.is_numeric(&lb) && self.is_numeric(&rb) && self.compatible(&lb, &rb) {
                    Ok(if lb == Ty::NUM { rb } else { lb })
                } else {
                    Err(mismatch("numeric operands"))
                }
            }
            BinOp::Eq | BinOp::Ne => {
                if self.compatible(left, right) || self.compatible(right, left) {
                    Ok(Ty::BOOL)
                } else {
                    Err(mismatch("operands of one type"))
                }
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordered = (self.is_numeric(&lb) && self.is_numeric(&rb))
                    || (lb == Ty::String && rb == Ty::String)
                    || lenient(&lb)
                    || lenient(&rb);
                if ordered {
                    Ok(Ty::BOOL)
                } else {
                    Err(mismatch("comparable operands"))
                }
            }
            BinOp::And | BinOp::Or => {
                if self.compatible(&Ty::BOOL, &lb) && self.compatible(&Ty::BOOL, &rb) {
                    Ok(Ty::BOOL)
                } else {
                    Err(mismatch("bool operands"))
                }
            }
        }
    }

    /// Check unary operation
    fn check_unary_op(&self, op: UnOp, ty: &Ty, span: Span) -> Result<Ty> {
        match op {
            UnOp::Neg if self.is_numeric(ty) => Ok(ty.clone()),
            UnOp::Not if self.compatible(&Ty::BOOL, ty) => Ok(Ty::BOOL),
            UnOp::Neg => Err(Error::TypeMismatch { expected: "num".to_string(), got: ty.to_string(), span }),
            UnOp::Not => Err(Error::TypeMismatch { expected: "bool".to_string(), got: ty.to_string(), span }),
        }
    }

    /// Check if a value of type `got` may flow where `expected` is required
    fn compatible(&self, expected: &Ty, got: &Ty) -> bool {
        match (expected, got) {
            (Ty::Error, _) | (_, Ty::Error) | (Ty::Placeholder(_), _) | (_, Ty::Placeholder(_)) => true,
            (a, b) if a == b => true,
            // distinct aliases never mix, an alias and its base always do
            (Ty::Alias(_), Ty::Alias(_)) => false,
            (Ty::Alias(_), _) => self.compatible(&self.registry.base_of(expected), got),
            (_, Ty::Alias(_)) => self.compatible(expected, &self.registry.base_of(got)),
            (Ty::Scalar(a), Ty::Scalar(b)) => {
                a.is_numeric() && b.is_numeric() && (*a == ScalarType::Num || *b == ScalarType::Num)
            }
            (Ty::Array(a), Ty::Array(b)) => self.compatible(a, b),
            (Ty::Tuple(a), Ty::Tuple(b)) | (Ty::Tuple(a), Ty::Anonymous(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.compatible(x, y))
            }
            (Ty::Named(name), Ty::Anonymous(elems)) => match self.registry.lookup(name) {
                Some(def) => {
                    def.fields.len() == elems.len()
                        && def.fields.iter().zip(elems).all(|(f, e)| self.compatible(&f.ty, e))
                }
                None => false,
            },
            (Ty::Function { params: pa, ret: ra }, Ty::Function { params: pb, ret: rb }) => {
                pa.len() == pb.len()
                    && pa.iter().zip(pb).all(|((_, x), (_, y))| self.compatible(x, y))
                    && match (ra, rb) {
                        (Some(a), Some(b)) => self.compatible(a, b),
                        (None, _) => true,
                        (Some(_), None) => false,
                    }
            }
            _ => false,
        }
    }
}
