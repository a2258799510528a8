//! Type Registry
//!
//! Phase 1 of the analysis. Declarations are collected by a [`RegistryBuilder`]
//! in any order, then [`RegistryBuilder::freeze`] resolves forward references,
//! flattens trait composition and merges method sets into an immutable
//! [`TypeRegistry`] that Phase 2 shares read-only.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use log::{debug, trace};

use crate::frontend::alias::Bound;
use crate::frontend::ast::*;
use crate::frontend::mutability::mutation_summary;
use crate::types::type_system::{ScalarType, Substitution, Ty};
use crate::utils::{Error, Span};

/// Index into the registry's method table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub usize);

/// Type kind, fixed at declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Scalar,
    Struct,
    Tuple,
    Array,
    String,
    Function,
    Alias,
}

/// Where a method comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodSource {
    /// Declared in a type body
    Type(String),
    Trait(String),
    /// Extension namespace
    Extension(String),
    /// Free function
    Function,
}

impl MethodSource {
    pub fn name(&self) -> &str {
        match self {
            MethodSource::Type(n) | MethodSource::Trait(n) | MethodSource::Extension(n) => n,
            MethodSource::Function => "",
        }
    }
}

impl fmt::Display for MethodSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodSource::Type(n) => write!(f, "type {}", n),
            MethodSource::Trait(n) => write!(f, "trait {}", n),
            MethodSource::Extension(n) => write!(f, "extension {}", n),
            MethodSource::Function => write!(f, "function"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSig {
    pub name: String,
    pub capability: Capability,
    pub ty: Ty,
}

/// Resolved method or function signature
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub name: String,
    pub source: MethodSource,
    /// `None` for static methods and free functions
    pub self_param: Option<(Capability, Ty)>,
    pub params: Vec<ParamSig>,
    pub ret: Option<Ty>,
    pub has_body: bool,
    pub is_override: bool,
    /// Filled in at freeze from the body
    pub mutates_self: bool,
    pub mutated_params: Vec<bool>,
    pub span: Span,
}

impl MethodSig {
    pub fn self_capability(&self) -> Option<Capability> {
        self.self_param.as_ref().map(|(cap, _)| *cap)
    }

    /// `Drive.drive`, or just `main` for free functions
    pub fn qualified_name(&self) -> String {
        match &self.source {
            MethodSource::Function => self.name.clone(),
            source => format!("{}.{}", source.name(), self.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: Ty,
    pub has_default: bool,
    pub span: Span,
}

/// Declared complex type
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<FieldDef>,
    /// Traits as written
    pub composes: Vec<String>,
    /// Transitive trait set
    pub traits: BTreeSet<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TraitDef {
    pub name: String,
    pub composes: Vec<String>,
    /// Transitive closure of composed traits, excluding this one
    pub closure: BTreeSet<String>,
    pub methods: Vec<MethodId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ExtensionDef {
    pub namespace: String,
    /// Concrete target, or a pattern containing a placeholder
    pub target: Ty,
    pub method: MethodId,
}

#[derive(Debug, Clone)]
pub struct AliasDef {
    pub name: String,
    pub base: Ty,
    pub bound: Option<Bound>,
    pub span: Span,
}

/// Merged per-type method slot
#[derive(Debug, Clone, PartialEq)]
pub enum MethodEntry {
    Unique(MethodId),
    Ambiguous(Vec<MethodId>),
}

/// Outcome of a method lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Unique(MethodId),
    Ambiguous(Vec<MethodId>),
    NotFound,
}

impl From<&MethodEntry> for Resolution {
    fn from(entry: &MethodEntry) -> Self {
        match entry {
            MethodEntry::Unique(id) => Resolution::Unique(*id),
            MethodEntry::Ambiguous(ids) => Resolution::Ambiguous(ids.clone()),
        }
    }
}

/// What a `Path` in `Path.method(...)` names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    Trait,
    Extension,
    Type,
}

/// A method or function body queued for Phase 2
#[derive(Debug, Clone, Copy)]
pub struct BodyUnit<'a> {
    pub method: MethodId,
    pub body: &'a Block,
}

/// Field default values of one type, queued for Phase 2 with their resolved field types
#[derive(Debug, Clone)]
pub struct DefaultsUnit<'a> {
    pub type_name: String,
    pub fields: Vec<(Ty, &'a Expr)>,
}

/// Result of freezing a builder
pub struct Frozen<'a> {
    pub registry: TypeRegistry,
    pub bodies: Vec<BodyUnit<'a>>,
    pub defaults: Vec<DefaultsUnit<'a>>,
    pub errors: Vec<Error>,
}

// ==================== Frozen registry ====================

/// Immutable declaration store consulted by every Phase 2 task
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
    traits: HashMap<String, TraitDef>,
    aliases: HashMap<String, AliasDef>,
    extensions: Vec<ExtensionDef>,
    functions: HashMap<String, MethodId>,
    methods: Vec<MethodSig>,
    /// type -> method name -> methods declared in the type body
    direct: HashMap<String, HashMap<String, Vec<MethodId>>>,
    /// type -> method name -> merged direct + trait slot
    merged: HashMap<String, HashMap<String, MethodEntry>>,
}

impl TypeRegistry {
    pub fn lookup(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn lookup_alias(&self, name: &str) -> Option<&AliasDef> {
        self.aliases.get(name)
    }

    pub fn function(&self, name: &str) -> Option<MethodId> {
        self.functions.get(name).copied()
    }

    pub fn method(&self, id: MethodId) -> &MethodSig {
        &self.methods[id.0]
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn trait_count(&self) -> usize {
        self.traits.len()
    }

    /// Resolve a written type against the declared names
    pub fn resolve_type_expr(&self, expr: &TypeExpr) -> Result<Ty, Error> {
        match expr {
            TypeExpr::Named(ident) => {
                let name = ident.name.as_str();
                if let Some(scalar) = ScalarType::from_name(name) {
                    return Ok(Ty::Scalar(scalar));
                }
                match name {
                    "string" => Ok(Ty::String),
                    "void" => Ok(Ty::Void),
                    _ if self.types.contains_key(name) => Ok(Ty::Named(name.to_string())),
                    _ if self.aliases.contains_key(name) => Ok(Ty::Alias(name.to_string())),
                    _ => Err(Error::UnknownTypeReference {
                        name: name.to_string(),
                        span: ident.span,
                    }),
                }
            }
            TypeExpr::Array { elem, .. } => Ok(Ty::Array(Box::new(self.resolve_type_expr(elem)?))),
            TypeExpr::Tuple { elems, .. } => Ok(Ty::Tuple(
                elems.iter().map(|t| self.resolve_type_expr(t)).collect::<Result<Vec<_>, _>>()?,
            )),
            TypeExpr::Function { params, ret, .. } => {
                let params = params
                    .iter()
                    .map(|p| Ok((p.capability, self.resolve_type_expr(&p.ty)?)))
                    .collect::<Result<Vec<_>, Error>>()?;
                let ret = match ret {
                    Some(r) => match self.resolve_type_expr(r)? {
                        Ty::Void => None,
                        t => Some(Box::new(t)),
                    },
                    None => None,
                };
                Ok(Ty::Function { params, ret })
            }
            TypeExpr::Placeholder(ident) => Ok(Ty::Placeholder(ident.name.clone())),
        }
    }

    /// Kind of a resolved type
    pub fn kind_of(&self, ty: &Ty) -> Option<TypeKind> {
        match ty {
            Ty::Scalar(_) => Some(TypeKind::Scalar),
            Ty::String => Some(TypeKind::String),
            Ty::Named(name) => self.types.get(name).map(|t| t.kind),
            Ty::Alias(_) => Some(TypeKind::Alias),
            Ty::Array(_) => Some(TypeKind::Array),
            Ty::Tuple(_) => Some(TypeKind::Tuple),
            Ty::Anonymous(_) => Some(TypeKind::Struct),
            Ty::Function { .. } => Some(TypeKind::Function),
            Ty::Placeholder(_) | Ty::Void | Ty::Error => None,
        }
    }

    /// Complex values move on assignment; scalars are duplicated
    pub fn is_complex(&self, ty: &Ty) -> bool {
        !matches!(self.base_of(ty), Ty::Scalar(_) | Ty::Void | Ty::Error)
    }

    /// Strip aliases down to the underlying base type
    pub fn base_of(&self, ty: &Ty) -> Ty {
        let mut current = ty;
        // An alias chain longer than the alias table is a cycle.
        for _ in 0..=self.aliases.len() {
            match current {
                Ty::Alias(name) => match self.aliases.get(name) {
                    Some(alias) => current = &alias.base,
                    None => return Ty::Error,
                },
                other => return other.clone(),
            }
        }
        Ty::Error
    }

    /// Type of `ty.field`
    pub fn field_type(&self, ty: &Ty, field: &str) -> Option<Ty> {
        match ty {
            Ty::Named(name) => {
                let def = self.types.get(name)?;
                def.fields.iter().find(|f| f.name == field).map(|f| f.ty.clone())
            }
            Ty::Tuple(elems) | Ty::Anonymous(elems) => {
                field.parse::<usize>().ok().and_then(|i| elems.get(i).cloned())
            }
            Ty::Alias(_) => self.field_type(&self.base_of(ty), field),
            Ty::Error | Ty::Placeholder(_) => Some(Ty::Error),
            _ => None,
        }
    }

    /// True if `ty` composes `trait_name`, directly or through another trait
    pub fn composes(&self, ty: &Ty, trait_name: &str) -> bool {
        match ty {
            Ty::Named(name) => self
                .types
                .get(name)
                .map_or(false, |t| t.traits.contains(trait_name)),
            Ty::Placeholder(_) | Ty::Error => true,
            _ => false,
        }
    }

    pub fn namespace_kind(&self, name: &str) -> Option<NamespaceKind> {
        if self.traits.contains_key(name) {
            Some(NamespaceKind::Trait)
        } else if self.extensions.iter().any(|e| e.namespace == name) {
            Some(NamespaceKind::Extension)
        } else if self.types.contains_key(name) {
            Some(NamespaceKind::Type)
        } else {
            None
        }
    }

    /// Resolve an unqualified method on a receiver type.
    ///
    /// Tiers: the merged direct/trait slot, then extensions whose target equals
    /// the receiver, then placeholder extensions that unify with it.
    pub fn resolve_method(&self, receiver: &Ty, name: &str) -> Resolution {
        match receiver {
            Ty::Named(type_name) => {
                if let Some(entry) = self.merged.get(type_name).and_then(|m| m.get(name)) {
                    trace!("resolved {}.{} in merged set", type_name, name);
                    return entry.into();
                }
            }
            Ty::Alias(_) => {
                // Each layer's own extensions first, then the base the chain ends in.
                let mut layer = receiver.clone();
                for _ in 0..=self.aliases.len() {
                    let Ty::Alias(alias) = &layer else {
                        break;
                    };
                    let own = self.extension_tier(name, |target| *target == layer);
                    if own != Resolution::NotFound {
                        return own;
                    }
                    let next = match self.aliases.get(alias) {
                        Some(def) => def.base.clone(),
                        None => return Resolution::NotFound,
                    };
                    layer = next;
                }
                return match layer {
                    Ty::Alias(_) | Ty::Error => Resolution::NotFound,
                    base => self.resolve_method(&base, name),
                };
            }
            _ => {}
        }

        let exact = self.extension_tier(name, |target| !target.has_placeholder() && target == receiver);
        if exact != Resolution::NotFound {
            return exact;
        }
        self.extension_tier(name, |target| {
            target.has_placeholder() && target.unify(receiver, &mut Substitution::new())
        })
    }

    fn extension_tier(&self, name: &str, matches: impl Fn(&Ty) -> bool) -> Resolution {
        let mut hits: Vec<MethodId> = self
            .extensions
            .iter()
            .filter(|e| self.methods[e.method.0].name == name && matches(&e.target))
            .map(|e| e.method)
            .collect();
        self.sort_by_source(&mut hits);
        tier_result(hits)
    }

    /// `Trait.method`: the trait's own declaration, else one from the traits it composes
    pub fn resolve_trait_method(&self, trait_name: &str, name: &str) -> Resolution {
        let Some(def) = self.traits.get(trait_name) else {
            return Resolution::NotFound;
        };
        if let Some(id) = def.methods.iter().find(|id| self.methods[id.0].name == name) {
            return Resolution::Unique(*id);
        }
        let inherited: Vec<MethodId> = def
            .closure
            .iter()
            .filter_map(|t| self.traits.get(t))
            .flat_map(|t| t.methods.iter().copied())
            .filter(|id| self.methods[id.0].name == name)
            .collect();
        tier_result(inherited)
    }

    /// `Namespace.method` for an extension namespace
    pub fn resolve_extension_method(&self, namespace: &str, name: &str) -> Resolution {
        let hits: Vec<MethodId> = self
            .extensions
            .iter()
            .filter(|e| e.namespace == namespace && self.methods[e.method.0].name == name)
            .map(|e| e.method)
            .collect();
        tier_result(hits)
    }

    /// Target pattern of an extension method
    pub fn extension_target(&self, id: MethodId) -> Option<&Ty> {
        self.extensions.iter().find(|e| e.method == id).map(|e| &e.target)
    }

    /// `Type.method`: static methods and direct declarations first, then the merged set
    pub fn resolve_type_method(&self, type_name: &str, name: &str) -> Resolution {
        if let Some(ids) = self.direct.get(type_name).and_then(|m| m.get(name)) {
            if let [id] = ids.as_slice() {
                if self.methods[id.0].self_param.is_none() {
                    return Resolution::Unique(*id);
                }
            }
        }
        self.resolve_method(&Ty::Named(type_name.to_string()), name)
    }

    /// Human-readable candidate list for diagnostics
    pub fn describe_candidates(&self, ids: &[MethodId]) -> Vec<String> {
        ids.iter().map(|id| self.methods[id.0].source.to_string()).collect()
    }

    fn sort_by_source(&self, ids: &mut [MethodId]) {
        ids.sort_by(|a, b| {
            let sa = &self.methods[a.0].source;
            let sb = &self.methods[b.0].source;
            sa.name().cmp(sb.name()).then(a.cmp(b))
        });
    }
}

fn tier_result(ids: Vec<MethodId>) -> Resolution {
    match ids.len() {
        0 => Resolution::NotFound,
        1 => Resolution::Unique(ids[0]),
        _ => Resolution::Ambiguous(ids),
    }
}

// ==================== Builder ====================

/// Mutable, declaration-phase view of the registry
#[derive(Default)]
pub struct RegistryBuilder<'a> {
    types: Vec<&'a TypeDecl>,
    traits: Vec<&'a TraitDecl>,
    aliases: Vec<&'a AliasDecl>,
    extensions: Vec<&'a ExtensionDecl>,
    functions: Vec<&'a Function>,
    /// Every type, trait and alias name with its declaration site
    names: HashMap<String, Span>,
    compositions: BTreeMap<String, Vec<Ident>>,
    errors: Vec<Error>,
}

impl<'a> RegistryBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare every item of a program
    pub fn from_program(program: &'a Program) -> Self {
        let mut builder = Self::new();
        for item in &program.items {
            match item {
                Item::Type(decl) => builder.declare(decl),
                Item::Trait(decl) => builder.declare_trait(decl),
                Item::Extension(decl) => builder.declare_extension(decl),
                Item::Alias(decl) => builder.declare_alias(decl),
                Item::Function(func) => builder.declare_function(func),
            }
        }
        builder
    }

    fn claim_name(&mut self, ident: &Ident) -> bool {
        let reserved = ScalarType::from_name(&ident.name).is_some()
            || matches!(ident.name.as_str(), "string" | "void");
        if reserved || self.names.contains_key(&ident.name) {
            self.errors.push(Error::DuplicateTypeDeclaration {
                name: ident.name.clone(),
                span: ident.span,
            });
            return false;
        }
        self.names.insert(ident.name.clone(), ident.span);
        true
    }

    pub fn declare(&mut self, decl: &'a TypeDecl) {
        if !self.claim_name(&decl.name) {
            return;
        }
        if decl.capability != Capability::Owned {
            self.errors.push(Error::CapabilityMismatch {
                reason: format!(
                    "type `{}` cannot be declared over a {} base; capabilities belong to parameters",
                    decl.name.name, decl.capability
                ),
                span: decl.span,
            });
        }
        self.types.push(decl);
        self.compose(&decl.name.name, &decl.composes);
    }

    pub fn declare_trait(&mut self, decl: &'a TraitDecl) {
        if self.claim_name(&decl.name) {
            self.traits.push(decl);
        }
    }

    pub fn declare_alias(&mut self, decl: &'a AliasDecl) {
        if self.claim_name(&decl.name) {
            self.aliases.push(decl);
        }
    }

    pub fn declare_extension(&mut self, decl: &'a ExtensionDecl) {
        self.extensions.push(decl);
    }

    pub fn declare_function(&mut self, func: &'a Function) {
        self.functions.push(func);
    }

    /// Add traits to a type's composition list. The type may be declared later.
    pub fn compose(&mut self, type_name: &str, traits: &[Ident]) {
        self.compositions
            .entry(type_name.to_string())
            .or_default()
            .extend(traits.iter().cloned());
    }

    /// Resolve everything and hand out the immutable registry
    pub fn freeze(self) -> Frozen<'a> {
        let RegistryBuilder {
            types,
            traits,
            aliases,
            extensions,
            functions,
            names: _,
            compositions,
            mut errors,
        } = self;

        let mut registry = TypeRegistry::default();
        let mut bodies = Vec::new();
        let mut defaults = Vec::new();

        // Names first so every signature may refer forward.
        for decl in &types {
            let kind = match decl.shape {
                Shape::Struct => TypeKind::Struct,
                Shape::Tuple => TypeKind::Tuple,
                Shape::Array => TypeKind::Array,
            };
            registry.types.insert(decl.name.name.clone(), TypeDef {
                name: decl.name.name.clone(),
                kind,
                fields: Vec::new(),
                composes: Vec::new(),
                traits: BTreeSet::new(),
                span: decl.span,
            });
        }
        for decl in &traits {
            registry.traits.insert(decl.name.name.clone(), TraitDef {
                name: decl.name.name.clone(),
                composes: decl.composes.iter().map(|i| i.name.clone()).collect(),
                closure: BTreeSet::new(),
                methods: Vec::new(),
                span: decl.span,
            });
        }
        for decl in &aliases {
            registry.aliases.insert(decl.name.name.clone(), AliasDef {
                name: decl.name.name.clone(),
                base: Ty::Error,
                bound: None,
                span: decl.span,
            });
        }

        let mut resolver = SigResolver { registry: &mut registry, errors: &mut errors };

        for decl in &aliases {
            let base = resolver.resolve(&decl.base);
            let base_ok = matches!(base, Ty::Scalar(_) | Ty::String | Ty::Alias(_) | Ty::Error);
            if !base_ok {
                resolver.errors.push(Error::TypeMismatch {
                    expected: "scalar or string alias base".to_string(),
                    got: base.to_string(),
                    span: decl.base.span(),
                });
            }
            if let Some(def) = resolver.registry.aliases.get_mut(&decl.name.name) {
                def.base = base;
            }
        }
        // A chain that returns to an alias it already passed never reaches a base.
        for decl in &aliases {
            let mut path = vec![decl.name.name.clone()];
            let mut current = resolver.registry.aliases.get(&decl.name.name).map(|a| a.base.clone());
            while let Some(Ty::Alias(next)) = current {
                if let Some(start) = path.iter().position(|n| *n == next) {
                    let mut cycle = path.split_off(start);
                    for name in &cycle {
                        if let Some(def) = resolver.registry.aliases.get_mut(name) {
                            def.base = Ty::Error;
                        }
                    }
                    cycle.push(next);
                    resolver.errors.push(Error::TypeMismatch {
                        expected: "an alias chain ending in a scalar or string".to_string(),
                        got: format!("alias cycle {}", cycle.join(" -> ")),
                        span: decl.base.span(),
                    });
                    break;
                }
                current = resolver.registry.aliases.get(&next).map(|a| a.base.clone());
                path.push(next);
            }
        }
        // Bounds need every base in place, aliases may be layered in any order.
        for decl in &aliases {
            let Some(range) = &decl.bound else {
                continue;
            };
            let flat = resolver.registry.base_of(&Ty::Alias(decl.name.name.clone()));
            let bound = Bound::from_range(range, &flat);
            if bound.is_none() && !flat.is_error() {
                resolver.errors.push(Error::TypeMismatch {
                    expected: "numeric or string base for a bounded alias".to_string(),
                    got: flat.to_string(),
                    span: range.span,
                });
            }
            if let Some(def) = resolver.registry.aliases.get_mut(&decl.name.name) {
                def.bound = bound;
            }
        }

        for &decl in &types {
            let mut fields: Vec<FieldDef> = Vec::new();
            let mut defaulted = Vec::new();
            for field in &decl.fields {
                if fields.iter().any(|f| f.name == field.name.name) {
                    resolver.errors.push(Error::DuplicateDefinition {
                        name: format!("{}.{}", decl.name.name, field.name.name),
                        span: field.span,
                    });
                    continue;
                }
                let ty = resolver.resolve(&field.ty);
                if let Some(default) = &field.default {
                    defaulted.push((ty.clone(), default));
                }
                fields.push(FieldDef {
                    name: field.name.name.clone(),
                    ty,
                    has_default: field.default.is_some(),
                    span: field.span,
                });
            }
            if !defaulted.is_empty() {
                defaults.push(DefaultsUnit { type_name: decl.name.name.clone(), fields: defaulted });
            }
            if let Some(def) = resolver.registry.types.get_mut(&decl.name.name) {
                def.fields = fields;
            }

            let self_ty = Ty::Named(decl.name.name.clone());
            let mut direct: HashMap<String, Vec<MethodId>> = HashMap::new();
            for method in &decl.methods {
                let source = MethodSource::Type(decl.name.name.clone());
                let id = resolver.method(method, source, Some(&self_ty));
                let slot = direct.entry(method.name.name.clone()).or_default();
                if !slot.is_empty() {
                    resolver.errors.push(Error::DuplicateDefinition {
                        name: format!("{}.{}", decl.name.name, method.name.name),
                        span: method.span,
                    });
                    continue;
                }
                slot.push(id);
                if let Some(body) = &method.body {
                    bodies.push(BodyUnit { method: id, body });
                }
            }
            resolver.registry.direct.insert(decl.name.name.clone(), direct);
        }

        for &decl in &traits {
            let mut ids = Vec::new();
            for method in &decl.methods {
                if ids.iter().any(|id: &MethodId| resolver.registry.methods[id.0].name == method.name.name) {
                    resolver.errors.push(Error::DuplicateDefinition {
                        name: format!("{}.{}", decl.name.name, method.name.name),
                        span: method.span,
                    });
                    continue;
                }
                let id = resolver.method(method, MethodSource::Trait(decl.name.name.clone()), None);
                ids.push(id);
                if let Some(body) = &method.body {
                    bodies.push(BodyUnit { method: id, body });
                }
            }
            if let Some(def) = resolver.registry.traits.get_mut(&decl.name.name) {
                def.methods = ids;
            }
        }

        for &decl in &extensions {
            let target = resolver.resolve(&decl.target);
            let duplicate = resolver.registry.extensions.iter().any(|e| {
                e.namespace == decl.name.name
                    && resolver.registry.methods[e.method.0].name == decl.method.name.name
            });
            if duplicate {
                resolver.errors.push(Error::DuplicateDefinition {
                    name: format!("{}.{}", decl.name.name, decl.method.name.name),
                    span: decl.method.span,
                });
                continue;
            }
            let source = MethodSource::Extension(decl.name.name.clone());
            let id = resolver.method(&decl.method, source, Some(&target));
            resolver.registry.extensions.push(ExtensionDef {
                namespace: decl.name.name.clone(),
                target,
                method: id,
            });
            if let Some(body) = &decl.method.body {
                bodies.push(BodyUnit { method: id, body });
            }
        }

        for &func in &functions {
            if resolver.registry.functions.contains_key(&func.name.name) {
                resolver.errors.push(Error::DuplicateDefinition {
                    name: func.name.name.clone(),
                    span: func.span,
                });
                continue;
            }
            let id = resolver.method(func, MethodSource::Function, None);
            resolver.registry.functions.insert(func.name.name.clone(), id);
            if let Some(body) = &func.body {
                bodies.push(BodyUnit { method: id, body });
            }
        }

        close_traits(&mut registry, &mut errors);
        compose_types(&mut registry, &compositions, &mut errors);

        let summaries: Vec<(MethodId, bool, Vec<bool>)> = bodies
            .iter()
            .map(|unit| {
                let (self_mut, params_mut) = mutation_summary(&registry, registry.method(unit.method), unit.body);
                (unit.method, self_mut, params_mut)
            })
            .collect();
        for (id, self_mut, params_mut) in summaries {
            let sig = &mut registry.methods[id.0];
            sig.mutates_self = self_mut;
            sig.mutated_params = params_mut;
        }

        debug!(
            "registry frozen: {} types, {} traits, {} aliases, {} extensions, {} methods, {} errors",
            registry.types.len(),
            registry.traits.len(),
            registry.aliases.len(),
            registry.extensions.len(),
            registry.methods.len(),
            errors.len()
        );

        Frozen { registry, bodies, defaults, errors }
    }
}

/// Resolves signatures while the registry is still being filled
struct SigResolver<'r> {
    registry: &'r mut TypeRegistry,
    errors: &'r mut Vec<Error>,
}

impl SigResolver<'_> {
    fn resolve(&mut self, expr: &TypeExpr) -> Ty {
        match self.registry.resolve_type_expr(expr) {
            Ok(ty) => ty,
            Err(err) => {
                self.errors.push(err);
                Ty::Error
            }
        }
    }

    fn method(&mut self, func: &Function, source: MethodSource, default_self: Option<&Ty>) -> MethodId {
        let self_param = func.self_param.as_ref().map(|sp| {
            let ty = match &sp.ty {
                Some(t) => self.resolve(t),
                None => default_self.cloned().unwrap_or_else(|| Ty::Placeholder("Self".to_string())),
            };
            (sp.capability, ty)
        });
        let mut params: Vec<ParamSig> = Vec::new();
        for p in &func.params {
            if params.iter().any(|q| q.name == p.name.name) {
                self.errors.push(Error::DuplicateDefinition {
                    name: p.name.name.clone(),
                    span: p.span,
                });
            }
            let ty = match &p.ty {
                Some(t) => self.resolve(t),
                None => {
                    self.errors.push(Error::UnknownTypeReference {
                        name: format!("<type of parameter `{}`>", p.name.name),
                        span: p.span,
                    });
                    Ty::Error
                }
            };
            params.push(ParamSig { name: p.name.name.clone(), capability: p.capability, ty });
        }
        let ret = match func.ret_type.as_ref().map(|t| self.resolve(t)) {
            Some(Ty::Void) | None => None,
            Some(t) => Some(t),
        };
        let id = MethodId(self.registry.methods.len());
        let arity = params.len();
        self.registry.methods.push(MethodSig {
            name: func.name.name.clone(),
            source,
            self_param,
            params,
            ret,
            has_body: func.body.is_some(),
            is_override: func.is_override,
            mutates_self: false,
            mutated_params: vec![false; arity],
            span: func.span,
        });
        id
    }
}

/// Compute each trait's transitive composition, rejecting cycles
fn close_traits(registry: &mut TypeRegistry, errors: &mut Vec<Error>) {
    let mut names: Vec<String> = registry.traits.keys().cloned().collect();
    names.sort();
    let mut reported: BTreeSet<String> = BTreeSet::new();

    for name in &names {
        let mut closure = BTreeSet::new();
        let mut path = vec![name.clone()];
        walk_trait(registry, name, &mut path, &mut closure, &mut reported, errors);
        closure.remove(name);
        if let Some(def) = registry.traits.get_mut(name) {
            def.closure = closure;
        }
    }
}

fn walk_trait(
    registry: &TypeRegistry,
    current: &str,
    path: &mut Vec<String>,
    closure: &mut BTreeSet<String>,
    reported: &mut BTreeSet<String>,
    errors: &mut Vec<Error>,
) {
    let Some(def) = registry.traits.get(current) else {
        return;
    };
    for next in &def.composes {
        if !registry.traits.contains_key(next) {
            if reported.insert(format!("{}->{}", current, next)) {
                errors.push(Error::UnknownTypeReference { name: next.clone(), span: def.span });
            }
            continue;
        }
        if let Some(pos) = path.iter().position(|p| p == next) {
            let mut cycle: Vec<String> = path[pos..].to_vec();
            cycle.push(next.clone());
            let mut key = cycle[..cycle.len() - 1].to_vec();
            key.sort();
            if reported.insert(key.join(",")) {
                errors.push(Error::TraitCompositionCycle { path: cycle, span: def.span });
            }
            continue;
        }
        if closure.insert(next.clone()) {
            path.push(next.clone());
            walk_trait(registry, next, path, closure, reported, errors);
            path.pop();
        }
    }
}

/// Flatten each type's trait set and merge its method slots
fn compose_types(
    registry: &mut TypeRegistry,
    compositions: &BTreeMap<String, Vec<Ident>>,
    errors: &mut Vec<Error>,
) {
    for (type_name, traits) in compositions {
        if !registry.types.contains_key(type_name) {
            let span = traits.first().map(|t| t.span).unwrap_or_default();
            errors.push(Error::UnknownTypeReference { name: type_name.clone(), span });
            continue;
        }
        let mut written = Vec::new();
        let mut closure = BTreeSet::new();
        for t in traits {
            match registry.traits.get(&t.name) {
                Some(def) => {
                    written.push(t.name.clone());
                    closure.insert(t.name.clone());
                    closure.extend(def.closure.iter().cloned());
                }
                None => errors.push(Error::UnknownTypeReference { name: t.name.clone(), span: t.span }),
            }
        }
        if let Some(def) = registry.types.get_mut(type_name) {
            def.composes = written;
            def.traits = closure;
        }
    }

    let mut type_names: Vec<String> = registry.types.keys().cloned().collect();
    type_names.sort();
    for type_name in type_names {
        let merged = merge_methods(registry, &type_name, errors);
        trace!("merged {} method slots for {}", merged.len(), type_name);
        registry.merged.insert(type_name, merged);
    }
}

fn merge_methods(
    registry: &TypeRegistry,
    type_name: &str,
    errors: &mut Vec<Error>,
) -> HashMap<String, MethodEntry> {
    let def = &registry.types[type_name];
    let empty = HashMap::new();
    let direct = registry.direct.get(type_name).unwrap_or(&empty);

    let mut from_traits: BTreeMap<&str, Vec<MethodId>> = BTreeMap::new();
    for trait_name in &def.traits {
        if let Some(t) = registry.traits.get(trait_name) {
            for id in &t.methods {
                from_traits.entry(registry.methods[id.0].name.as_str()).or_default().push(*id);
            }
        }
    }

    let mut names: BTreeSet<&str> = direct.keys().map(String::as_str).collect();
    names.extend(from_traits.keys().copied());

    let mut merged = HashMap::new();
    for name in names {
        let declared: &[MethodId] = direct.get(name).map(Vec::as_slice).unwrap_or(&[]);
        let inherited: &[MethodId] = from_traits.get(name).map(Vec::as_slice).unwrap_or(&[]);
        let (defaults, required): (Vec<MethodId>, Vec<MethodId>) = inherited
            .iter()
            .copied()
            .partition(|id| registry.methods[id.0].has_body);

        let entry = if let Some(id) = declared.iter().find(|id| registry.methods[id.0].is_override) {
            MethodEntry::Unique(*id)
        } else if let Some(&own) = declared.first() {
            let own_cap = registry.methods[own.0].self_capability();
            let mut clash: Vec<MethodId> = defaults
                .iter()
                .copied()
                .filter(|id| registry.methods[id.0].self_capability() == own_cap)
                .collect();
            if clash.is_empty() {
                MethodEntry::Unique(own)
            } else {
                clash.push(own);
                registry.sort_by_source(&mut clash);
                MethodEntry::Ambiguous(clash)
            }
        } else if defaults.len() == 1 {
            MethodEntry::Unique(defaults[0])
        } else if defaults.len() > 1 {
            let mut ids = defaults;
            registry.sort_by_source(&mut ids);
            MethodEntry::Ambiguous(ids)
        } else {
            let first = required[0];
            errors.push(Error::MissingRequiredMethod {
                ty: type_name.to_string(),
                trait_name: registry.methods[first.0].source.name().to_string(),
                method: name.to_string(),
                span: def.span,
            });
            MethodEntry::Unique(first)
        };
        merged.insert(name.to_string(), entry);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::build::*;
    use pretty_assertions::assert_eq;

    fn drive_trait(name: &str, cap: Capability, with_body: bool) -> Item {
        let body = if with_body { Some(vec![]) } else { None };
        trait_decl(
            name,
            &[],
            vec![method("drive", cap, Some(ty("Vehicle")), vec![param("direction", Capability::Owned, ty("string"))], None, body)],
        )
    }

    fn freeze(program: &Program) -> Frozen<'_> {
        RegistryBuilder::from_program(program).freeze()
    }

    fn sources(registry: &TypeRegistry, res: &Resolution) -> Vec<String> {
        match res {
            Resolution::Unique(id) => vec![registry.method(*id).source.to_string()],
            Resolution::Ambiguous(ids) => registry.describe_candidates(ids),
            Resolution::NotFound => vec![],
        }
    }

    #[test]
    fn test_single_default_trait_method_is_unique() {
        let program = program(vec![drive_trait("Drive", Capability::Owned, true), vehicle(&["Drive"], vec![])]);
        let frozen = freeze(&program);
        assert!(frozen.errors.is_empty(), "{:?}", frozen.errors);
        let res = frozen.registry.resolve_method(&Ty::Named("Vehicle".into()), "drive");
        assert_eq!(sources(&frozen.registry, &res), vec!["trait Drive".to_string()]);
    }

    #[test]
    fn test_conflicting_traits_are_ambiguous_in_either_order() {
        for order in [["Drive", "AutoPilot"], ["AutoPilot", "Drive"]] {
            let program = program(vec![
                vehicle(&order, vec![]),
                drive_trait("Drive", Capability::Owned, true),
                drive_trait("AutoPilot", Capability::Owned, true),
            ]);
            let frozen = freeze(&program);
            assert!(frozen.errors.is_empty());
            let res = frozen.registry.resolve_method(&Ty::Named("Vehicle".into()), "drive");
            assert_eq!(
                sources(&frozen.registry, &res),
                vec!["trait AutoPilot".to_string(), "trait Drive".to_string()]
            );
            assert!(matches!(frozen.registry.resolve_trait_method("Drive", "drive"), Resolution::Unique(_)));
        }
    }

    #[test]
    fn test_direct_method_conflicts_unless_override() {
        let own = method("drive", Capability::Owned, None, vec![param("direction", Capability::Owned, ty("string"))], None, Some(vec![]));
        let program_plain = program(vec![drive_trait("Drive", Capability::Owned, true), vehicle(&["Drive"], vec![own.clone()])]);
        let frozen = freeze(&program_plain);
        let res = frozen.registry.resolve_method(&Ty::Named("Vehicle".into()), "drive");
        assert!(matches!(res, Resolution::Ambiguous(ref ids) if ids.len() == 2));

        let mut overriding = own;
        overriding.is_override = true;
        let program_override = program(vec![drive_trait("Drive", Capability::Owned, true), vehicle(&["Drive"], vec![overriding])]);
        let frozen = freeze(&program_override);
        let res = frozen.registry.resolve_method(&Ty::Named("Vehicle".into()), "drive");
        assert_eq!(sources(&frozen.registry, &res), vec!["type Vehicle".to_string()]);
    }

    #[test]
    fn test_required_method_must_be_supplied() {
        let program_missing = program(vec![drive_trait("Drive", Capability::Owned, false), vehicle(&["Drive"], vec![])]);
        let frozen = freeze(&program_missing);
        assert!(matches!(frozen.errors.as_slice(), [Error::MissingRequiredMethod { method, .. }] if method == "drive"));

        let own = method("drive", Capability::Owned, None, vec![param("direction", Capability::Owned, ty("string"))], None, Some(vec![]));
        let program_supplied = program(vec![drive_trait("Drive", Capability::Owned, false), vehicle(&["Drive"], vec![own])]);
        let frozen = freeze(&program_supplied);
        assert!(frozen.errors.is_empty(), "{:?}", frozen.errors);
        let res = frozen.registry.resolve_method(&Ty::Named("Vehicle".into()), "drive");
        assert_eq!(sources(&frozen.registry, &res), vec!["type Vehicle".to_string()]);
    }

    #[test]
    fn test_duplicate_and_unknown_types() {
        let program = program(vec![
            vehicle(&[], vec![]),
            vehicle(&[], vec![]),
            type_decl("Garage", vec![field_decl("car", ty("Truck"))], &["Missing"], vec![]),
            type_decl("num", vec![], &[], vec![]),
        ]);
        let frozen = freeze(&program);
        let kinds: Vec<_> = frozen.errors.iter().map(|e| e.kind()).collect();
        use crate::utils::ErrorKind::*;
        assert_eq!(kinds.iter().filter(|k| **k == DuplicateTypeDeclaration).count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == UnknownTypeReference).count(), 2);
    }

    #[test]
    fn test_forward_reference_resolves() {
        let program = program(vec![
            type_decl("Garage", vec![field_decl("car", ty("Vehicle"))], &[], vec![]),
            vehicle(&[], vec![]),
        ]);
        let frozen = freeze(&program);
        assert!(frozen.errors.is_empty());
        assert_eq!(
            frozen.registry.field_type(&Ty::Named("Garage".into()), "car"),
            Some(Ty::Named("Vehicle".into()))
        );
    }

    #[test]
    fn test_trait_composition_cycle() {
        let program = program(vec![
            trait_decl("A", &["B"], vec![]),
            trait_decl("B", &["C"], vec![]),
            trait_decl("C", &["A"], vec![]),
        ]);
        let frozen = freeze(&program);
        let cycles: Vec<_> = frozen
            .errors
            .iter()
            .filter(|e| matches!(e, Error::TraitCompositionCycle { .. }))
            .collect();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn test_supertrait_methods_reach_composing_type() {
        let program = program(vec![
            trait_decl("Base", &[], vec![method("honk", Capability::Readonly, None, vec![], None, Some(vec![]))]),
            trait_decl("Drive", &["Base"], vec![]),
            vehicle(&["Drive"], vec![]),
        ]);
        let frozen = freeze(&program);
        let vehicle_ty = Ty::Named("Vehicle".into());
        assert!(frozen.registry.composes(&vehicle_ty, "Base"));
        assert!(matches!(frozen.registry.resolve_method(&vehicle_ty, "honk"), Resolution::Unique(_)));
        assert!(matches!(frozen.registry.resolve_trait_method("Drive", "honk"), Resolution::Unique(_)));
    }

    #[test]
    fn test_extension_tiers() {
        let to_string = method("toString", Capability::Readonly, Some(ty("num")), vec![], Some(ty("string")), Some(vec![]));
        let map = method("map", Capability::Readonly, Some(array_ty(placeholder("T"))), vec![], Some(array_ty(placeholder("T"))), Some(vec![]));
        let describe = method("describe", Capability::Readonly, Some(placeholder("T")), vec![], Some(ty("string")), Some(vec![]));
        let program = program(vec![
            extension("Num", ty("num"), to_string),
            extension("[T]", array_ty(placeholder("T")), map),
            extension("Any", placeholder("T"), describe),
        ]);
        let frozen = freeze(&program);
        assert!(frozen.errors.is_empty(), "{:?}", frozen.errors);
        let registry = &frozen.registry;
        assert!(matches!(registry.resolve_method(&Ty::NUM, "toString"), Resolution::Unique(_)));
        assert_eq!(registry.resolve_method(&Ty::String, "toString"), Resolution::NotFound);
        assert!(matches!(registry.resolve_method(&Ty::Array(Box::new(Ty::String)), "map"), Resolution::Unique(_)));
        assert_eq!(registry.resolve_method(&Ty::NUM, "map"), Resolution::NotFound);
        assert!(matches!(registry.resolve_method(&Ty::BOOL, "describe"), Resolution::Unique(_)));
        assert_eq!(registry.namespace_kind("Num"), Some(NamespaceKind::Extension));
    }

    #[test]
    fn test_extension_tie_is_ambiguous() {
        let to_string = || method("toString", Capability::Readonly, Some(ty("num")), vec![], Some(ty("string")), Some(vec![]));
        let program = program(vec![
            extension("NumB", ty("num"), to_string()),
            extension("NumA", ty("num"), to_string()),
        ]);
        let frozen = freeze(&program);
        assert!(frozen.errors.is_empty(), "{:?}", frozen.errors);
        let res = frozen.registry.resolve_method(&Ty::NUM, "toString");
        assert_eq!(
            sources(&frozen.registry, &res),
            vec!["extension NumA".to_string(), "extension NumB".to_string()]
        );
        assert!(matches!(frozen.registry.resolve_extension_method("NumA", "toString"), Resolution::Unique(_)));
    }

    #[test]
    fn test_direct_and_trait_methods_shadow_extensions() {
        let describe = |self_ty: Option<TypeExpr>| {
            method("describe", Capability::Readonly, self_ty, vec![], Some(ty("string")), Some(vec![]))
        };
        let label = |self_ty: Option<TypeExpr>| {
            method("label", Capability::Readonly, self_ty, vec![], Some(ty("string")), Some(vec![]))
        };
        let program = program(vec![
            extension("Describe", ty("Vehicle"), describe(Some(ty("Vehicle")))),
            extension("Label", ty("Vehicle"), label(Some(ty("Vehicle")))),
            extension("AnyLabel", placeholder("T"), label(Some(placeholder("T")))),
            trait_decl("Labels", &[], vec![label(None)]),
            vehicle(&["Labels"], vec![describe(None)]),
            extension("Exact", ty("num"), describe(Some(ty("num")))),
            extension("Anything", placeholder("T"), describe(Some(placeholder("T")))),
        ]);
        let frozen = freeze(&program);
        assert!(frozen.errors.is_empty(), "{:?}", frozen.errors);
        let registry = &frozen.registry;
        let vehicle_ty = Ty::Named("Vehicle".into());

        let res = registry.resolve_method(&vehicle_ty, "describe");
        assert_eq!(sources(registry, &res), vec!["type Vehicle".to_string()]);
        let res = registry.resolve_method(&vehicle_ty, "label");
        assert_eq!(sources(registry, &res), vec!["trait Labels".to_string()]);
        // exact target beats a placeholder target
        let res = registry.resolve_method(&Ty::NUM, "describe");
        assert_eq!(sources(registry, &res), vec!["extension Exact".to_string()]);
        let res = registry.resolve_method(&Ty::BOOL, "label");
        assert_eq!(sources(registry, &res), vec!["extension AnyLabel".to_string()]);
    }

    #[test]
    fn test_alias_cycle_reported_once() {
        let program = program(vec![
            alias("A", ty("B"), None),
            alias("B", ty("A"), None),
            alias("C", ty("A"), Some((Some(0.0), Some(5.0), false))),
            extension("Words", ty("string"), method("len", Capability::Readonly, Some(ty("string")), vec![], Some(ty("num")), Some(vec![]))),
        ]);
        let frozen = freeze(&program);
        let messages: Vec<String> = frozen.errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            messages,
            vec!["Type mismatch: expected an alias chain ending in a scalar or string, got alias cycle A -> B -> A".to_string()]
        );
        let registry = &frozen.registry;
        assert_eq!(registry.base_of(&Ty::Alias("C".into())), Ty::Error);
        assert_eq!(registry.resolve_method(&Ty::Alias("A".into()), "len"), Resolution::NotFound);
        assert_eq!(registry.resolve_method(&Ty::Alias("C".into()), "len"), Resolution::NotFound);
    }

    #[test]
    fn test_layered_alias_reaches_base_methods() {
        let len = method("len", Capability::Readonly, Some(ty("string")), vec![], Some(ty("num")), Some(vec![]));
        let shout = method("shout", Capability::Readonly, Some(ty("Name")), vec![], Some(ty("string")), Some(vec![]));
        let program = program(vec![
            alias("Short", ty("Name"), None),
            alias("Name", ty("string"), None),
            extension("Words", ty("string"), len),
            extension("Names", ty("Name"), shout),
        ]);
        let frozen = freeze(&program);
        assert!(frozen.errors.is_empty(), "{:?}", frozen.errors);
        let registry = &frozen.registry;
        let short = Ty::Alias("Short".into());
        assert_eq!(sources(registry, &registry.resolve_method(&short, "len")), vec!["extension Words".to_string()]);
        assert_eq!(sources(registry, &registry.resolve_method(&short, "shout")), vec!["extension Names".to_string()]);
    }

    #[test]
    fn test_alias_classification() {
        let program = program(vec![
            alias("DatabaseID", ty("u64"), None),
            alias("NameField", ty("string"), Some((Some(0.0), Some(25.0), false))),
        ]);
        let frozen = freeze(&program);
        assert!(frozen.errors.is_empty());
        let registry = &frozen.registry;
        assert!(!registry.is_complex(&Ty::Alias("DatabaseID".into())));
        assert!(registry.is_complex(&Ty::Alias("NameField".into())));
        assert!(registry.lookup_alias("NameField").and_then(|a| a.bound.as_ref()).is_some());
    }

    #[test]
    fn test_readonly_base_capability_rejected() {
        let mut decl = match vehicle(&[], vec![]) {
            Item::Type(d) => d,
            _ => unreachable!(),
        };
        decl.capability = Capability::Readonly;
        let program = program(vec![Item::Type(decl)]);
        let frozen = freeze(&program);
        assert!(matches!(frozen.errors.as_slice(), [Error::CapabilityMismatch { .. }]));
    }
}
