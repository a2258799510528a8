//! Abstract Syntax Tree definitions for ttlang
//!
//! The tree is produced by an external parser and handed over as JSON, so every
//! node derives `Deserialize`. Spans may be omitted and default to zero.

use serde::{Deserialize, Serialize};
use crate::utils::Span;

/// A complete program (compilation unit)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<Item>,
}

/// Top-level items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Item {
    /// `type Vehicle: {} + Drive = { ... }`
    Type(TypeDecl),
    /// `type Drive: () = drive(self: Vehicle, direction: string) { ... }`
    Trait(TraitDecl),
    /// `type Num: self + () = toString(self: num) string { ... }`
    Extension(ExtensionDecl),
    /// `type NameField: string = self[0..25];`
    Alias(AliasDecl),
    Function(Function),
}

/// Shape of a declared complex type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    /// `{}`
    Struct,
    /// `()` with positional fields
    Tuple,
    /// `[]`
    Array,
}

/// Parameter / self capability sigil
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Capability {
    /// bare `T`: the callee takes ownership
    #[default]
    Owned,
    /// `&T`
    Readonly,
    /// `*T`
    Mutable,
}

impl Capability {
    pub fn sigil(self) -> &'static str {
        match self {
            Capability::Owned => "",
            Capability::Readonly => "&",
            Capability::Mutable => "*",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Owned => write!(f, "owned"),
            Capability::Readonly => write!(f, "readonly"),
            Capability::Mutable => write!(f, "mutable"),
        }
    }
}

/// Binding mutability mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingMode {
    Const,
    Let,
}

impl std::fmt::Display for BindingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingMode::Const => write!(f, "const"),
            BindingMode::Let => write!(f, "let"),
        }
    }
}

/// Complex type declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: Ident,
    pub shape: Shape,
    /// Capability written on the base (`type writer: &Writer`); only `Owned` is legal
    #[serde(default)]
    pub capability: Capability,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    /// Composed traits (`+ Drive + AutoPilot`)
    #[serde(default)]
    pub composes: Vec<Ident>,
    #[serde(default)]
    pub methods: Vec<Function>,
    #[serde(default)]
    pub span: Span,
}

/// Struct field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: Ident,
    pub ty: TypeExpr,
    #[serde(default)]
    pub default: Option<Expr>,
    #[serde(default)]
    pub span: Span,
}

/// Trait declaration: required methods have no body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitDecl {
    pub name: Ident,
    #[serde(default)]
    pub composes: Vec<Ident>,
    pub methods: Vec<Function>,
    #[serde(default)]
    pub span: Span,
}

/// Extension declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionDecl {
    /// Namespace the method is reachable through (`Num.toString(5)`)
    pub name: Ident,
    /// Concrete type, or a pattern containing a placeholder (`[T]`, `T`)
    pub target: TypeExpr,
    pub method: Function,
    #[serde(default)]
    pub span: Span,
}

/// Alias declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasDecl {
    pub name: Ident,
    pub base: TypeExpr,
    #[serde(default)]
    pub bound: Option<RangeBound>,
    #[serde(default)]
    pub span: Span,
}

/// `self[start..end]` / `self[start..=end]`
///
/// A value range for numeric bases, a length range for string bases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBound {
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub inclusive: bool,
    #[serde(default)]
    pub span: Span,
}

/// Function, method or lambda signature with optional body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: Ident,
    #[serde(default)]
    pub self_param: Option<SelfParam>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub ret_type: Option<TypeExpr>,
    /// `None` marks a required trait method
    #[serde(default)]
    pub body: Option<Block>,
    #[serde(default)]
    pub is_override: bool,
    #[serde(default)]
    pub is_pub: bool,
    #[serde(default)]
    pub span: Span,
}

/// `self: *Vehicle`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfParam {
    #[serde(default)]
    pub capability: Capability,
    /// Omitted inside a type body, where `self` is the enclosing type
    #[serde(default)]
    pub ty: Option<TypeExpr>,
    #[serde(default)]
    pub span: Span,
}

/// Function parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: Ident,
    #[serde(default)]
    pub capability: Capability,
    /// Only lambda parameters may leave this out
    #[serde(default)]
    pub ty: Option<TypeExpr>,
    #[serde(default)]
    pub span: Span,
}

/// Code block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

/// Statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    /// const|let name [: type] = expr
    Binding {
        mode: BindingMode,
        name: Ident,
        #[serde(default)]
        ty: Option<TypeExpr>,
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    /// place = expr
    Assign {
        target: Expr,
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    /// Expression statement
    Expr(Expr),
    Return {
        #[serde(default)]
        value: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    Block(Block),
    If {
        cond: Expr,
        then_block: Block,
        #[serde(default)]
        else_block: Option<Block>,
        #[serde(default)]
        span: Span,
    },
    While {
        cond: Expr,
        body: Block,
        #[serde(default)]
        span: Span,
    },
    /// for (let|const var in iter) { ... }
    For {
        mode: BindingMode,
        var: Ident,
        iter: Expr,
        body: Block,
        #[serde(default)]
        span: Span,
    },
}

/// Expression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Ident(Ident),
    /// copy expr
    Copy {
        expr: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// `Vehicle{4, "Ford"}`, `Vehicle{wheels: 4}`, `{4, "Ford"}`
    StructLit {
        #[serde(default)]
        name: Option<Ident>,
        fields: StructFields,
        #[serde(default)]
        span: Span,
    },
    Array {
        elements: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    Tuple {
        elements: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// expr.field
    Field {
        expr: Box<Expr>,
        field: Ident,
        #[serde(default)]
        span: Span,
    },
    /// expr[index]
    Index {
        expr: Box<Expr>,
        index: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// expr[start..end]
    Slice {
        expr: Box<Expr>,
        #[serde(default)]
        start: Option<Box<Expr>>,
        #[serde(default)]
        end: Option<Box<Expr>>,
        #[serde(default)]
        span: Span,
    },
    /// receiver.method(args)
    MethodCall {
        receiver: Box<Expr>,
        method: Ident,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// Path.method(args): namespaced call, static method or UFCS call
    PathCall {
        path: Ident,
        method: Ident,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// func(args)
    Call {
        func: Ident,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// (x) { ... }
    Lambda {
        params: Vec<Param>,
        body: Block,
        #[serde(default)]
        span: Span,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(lit) => lit.span(),
            Expr::Ident(ident) => ident.span,
            Expr::Copy { span, .. }
            | Expr::StructLit { span, .. }
            | Expr::Array { span, .. }
            | Expr::Tuple { span, .. }
            | Expr::Field { span, .. }
            | Expr::Index { span, .. }
            | Expr::Slice { span, .. }
            | Expr::MethodCall { span, .. }
            | Expr::PathCall { span, .. }
            | Expr::Call { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. } => *span,
        }
    }

    /// The binding a place expression (`x`, `x.f`, `x[i].g`) is rooted at
    pub fn place_root(&self) -> Option<&Ident> {
        match self {
            Expr::Ident(ident) => Some(ident),
            Expr::Field { expr, .. } | Expr::Index { expr, .. } => expr.place_root(),
            _ => None,
        }
    }
}

/// Struct literal body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StructFields {
    Positional(Vec<Expr>),
    Named(Vec<FieldInit>),
}

/// `name: value`, or the shorthand `name` when `value` is absent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInit {
    pub name: Ident,
    #[serde(default)]
    pub value: Option<Expr>,
}

/// Literal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int {
        value: i64,
        #[serde(default)]
        span: Span,
    },
    Float {
        value: f64,
        #[serde(default)]
        span: Span,
    },
    String {
        value: String,
        #[serde(default)]
        span: Span,
    },
    Bool {
        value: bool,
        #[serde(default)]
        span: Span,
    },
}

impl Literal {
    pub fn span(&self) -> Span {
        match self {
            Literal::Int { span, .. }
            | Literal::Float { span, .. }
            | Literal::String { span, .. }
            | Literal::Bool { span, .. } => *span,
        }
    }
}

/// Identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    #[serde(default)]
    pub span: Span,
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    /// Negation (-)
    Neg,
    /// Logical not (!)
    Not,
}

/// Type representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    /// Named type (num, string, Vehicle)
    Named(Ident),
    /// `[T]`
    Array {
        elem: Box<TypeExpr>,
        #[serde(default)]
        span: Span,
    },
    /// `(A, B)`
    Tuple {
        elems: Vec<TypeExpr>,
        #[serde(default)]
        span: Span,
    },
    /// `(x: *T) R`
    Function {
        params: Vec<FnParamType>,
        #[serde(default)]
        ret: Option<Box<TypeExpr>>,
        #[serde(default)]
        span: Span,
    },
    /// Universal placeholder (`T` in `[T]`)
    Placeholder(Ident),
}

/// Parameter slot of a function type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnParamType {
    #[serde(default)]
    pub capability: Capability,
    pub ty: TypeExpr,
}

impl TypeExpr {
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Named(ident) | TypeExpr::Placeholder(ident) => ident.span,
            TypeExpr::Array { span, .. }
            | TypeExpr::Tuple { span, .. }
            | TypeExpr::Function { span, .. } => *span,
        }
    }
}

/// Terse constructors for building trees in tests
#[cfg(test)]
pub mod build {
    use super::*;

    pub fn ident(name: &str) -> Ident {
        Ident { name: name.to_string(), span: Span::dummy() }
    }

    pub fn ident_at(name: &str, start: usize) -> Ident {
        Ident { name: name.to_string(), span: Span::new(start, start + name.len(), 0) }
    }

    pub fn ty(name: &str) -> TypeExpr {
        TypeExpr::Named(ident(name))
    }

    pub fn array_ty(elem: TypeExpr) -> TypeExpr {
        TypeExpr::Array { elem: Box::new(elem), span: Span::dummy() }
    }

    pub fn placeholder(name: &str) -> TypeExpr {
        TypeExpr::Placeholder(ident(name))
    }

    pub fn fn_ty(params: Vec<(Capability, TypeExpr)>, ret: Option<TypeExpr>) -> TypeExpr {
        TypeExpr::Function {
            params: params.into_iter().map(|(capability, ty)| FnParamType { capability, ty }).collect(),
            ret: ret.map(Box::new),
            span: Span::dummy(),
        }
    }

    pub fn int(value: i64) -> Expr {
        Expr::Literal(Literal::Int { value, span: Span::dummy() })
    }

    pub fn string(value: &str) -> Expr {
        Expr::Literal(Literal::String { value: value.to_string(), span: Span::dummy() })
    }

    pub fn boolean(value: bool) -> Expr {
        Expr::Literal(Literal::Bool { value, span: Span::dummy() })
    }

    pub fn var(name: &str) -> Expr {
        Expr::Ident(ident(name))
    }

    pub fn var_at(name: &str, start: usize) -> Expr {
        Expr::Ident(ident_at(name, start))
    }

    pub fn copy(expr: Expr) -> Expr {
        Expr::Copy { expr: Box::new(expr), span: Span::dummy() }
    }

    pub fn field(expr: Expr, name: &str) -> Expr {
        Expr::Field { expr: Box::new(expr), field: ident(name), span: Span::dummy() }
    }

    pub fn index(expr: Expr, idx: Expr) -> Expr {
        Expr::Index { expr: Box::new(expr), index: Box::new(idx), span: Span::dummy() }
    }

    pub fn method_call(receiver: Expr, method: &str, args: Vec<Expr>) -> Expr {
        Expr::MethodCall { receiver: Box::new(receiver), method: ident(method), args, span: Span::dummy() }
    }

    pub fn path_call(path: &str, method: &str, args: Vec<Expr>) -> Expr {
        Expr::PathCall { path: ident(path), method: ident(method), args, span: Span::dummy() }
    }

    pub fn call(func: &str, args: Vec<Expr>) -> Expr {
        Expr::Call { func: ident(func), args, span: Span::dummy() }
    }

    pub fn lambda(params: Vec<Param>, stmts: Vec<Stmt>) -> Expr {
        Expr::Lambda { params, body: block(stmts), span: Span::dummy() }
    }

    pub fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
        Expr::Binary { left: Box::new(left), op, right: Box::new(right), span: Span::dummy() }
    }

    pub fn neg(expr: Expr) -> Expr {
        Expr::Unary { op: UnOp::Neg, expr: Box::new(expr), span: Span::dummy() }
    }

    pub fn struct_lit(name: &str, fields: Vec<Expr>) -> Expr {
        Expr::StructLit { name: Some(ident(name)), fields: StructFields::Positional(fields), span: Span::dummy() }
    }

    pub fn struct_named(name: &str, fields: Vec<(&str, Option<Expr>)>) -> Expr {
        let inits = fields
            .into_iter()
            .map(|(n, value)| FieldInit { name: ident(n), value })
            .collect();
        Expr::StructLit { name: Some(ident(name)), fields: StructFields::Named(inits), span: Span::dummy() }
    }

    pub fn anon(fields: Vec<Expr>) -> Expr {
        Expr::StructLit { name: None, fields: StructFields::Positional(fields), span: Span::dummy() }
    }

    pub fn array(elements: Vec<Expr>) -> Expr {
        Expr::Array { elements, span: Span::dummy() }
    }

    pub fn const_(name: &str, value: Expr) -> Stmt {
        Stmt::Binding { mode: BindingMode::Const, name: ident(name), ty: None, value, span: Span::dummy() }
    }

    pub fn let_(name: &str, value: Expr) -> Stmt {
        Stmt::Binding { mode: BindingMode::Let, name: ident(name), ty: None, value, span: Span::dummy() }
    }

    pub fn bind_typed(mode: BindingMode, name: &str, t: TypeExpr, value: Expr) -> Stmt {
        Stmt::Binding { mode, name: ident(name), ty: Some(t), value, span: Span::dummy() }
    }

    pub fn assign(target: Expr, value: Expr) -> Stmt {
        Stmt::Assign { target, value, span: Span::dummy() }
    }

    pub fn expr(e: Expr) -> Stmt {
        Stmt::Expr(e)
    }

    pub fn ret(value: Expr) -> Stmt {
        Stmt::Return { value: Some(value), span: Span::dummy() }
    }

    pub fn if_(cond: Expr, then_stmts: Vec<Stmt>, else_stmts: Option<Vec<Stmt>>) -> Stmt {
        Stmt::If { cond, then_block: block(then_stmts), else_block: else_stmts.map(block), span: Span::dummy() }
    }

    pub fn while_(cond: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::While { cond, body: block(body), span: Span::dummy() }
    }

    pub fn for_(mode: BindingMode, name: &str, iter: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::For { mode, var: ident(name), iter, body: block(body), span: Span::dummy() }
    }

    pub fn block(stmts: Vec<Stmt>) -> Block {
        Block { stmts, span: Span::dummy() }
    }

    pub fn param(name: &str, capability: Capability, t: TypeExpr) -> Param {
        Param { name: ident(name), capability, ty: Some(t), span: Span::dummy() }
    }

    pub fn lambda_param(name: &str) -> Param {
        Param { name: ident(name), capability: Capability::Owned, ty: None, span: Span::dummy() }
    }

    pub fn func(name: &str, params: Vec<Param>, ret_type: Option<TypeExpr>, body: Vec<Stmt>) -> Function {
        Function {
            name: ident(name),
            self_param: None,
            params,
            ret_type,
            body: Some(block(body)),
            is_override: false,
            is_pub: false,
            span: Span::dummy(),
        }
    }

    /// Method with a `self` parameter; `body: None` declares a required trait method
    pub fn method(
        name: &str,
        self_cap: Capability,
        self_ty: Option<TypeExpr>,
        params: Vec<Param>,
        ret_type: Option<TypeExpr>,
        body: Option<Vec<Stmt>>,
    ) -> Function {
        Function {
            name: ident(name),
            self_param: Some(SelfParam { capability: self_cap, ty: self_ty, span: Span::dummy() }),
            params,
            ret_type,
            body: body.map(block),
            is_override: false,
            is_pub: true,
            span: Span::dummy(),
        }
    }

    pub fn field_decl(name: &str, t: TypeExpr) -> FieldDecl {
        FieldDecl { name: ident(name), ty: t, default: None, span: Span::dummy() }
    }

    /// `name: t = value`
    pub fn field_default(name: &str, t: TypeExpr, value: Expr) -> FieldDecl {
        FieldDecl { name: ident(name), ty: t, default: Some(value), span: Span::dummy() }
    }

    pub fn type_decl(name: &str, fields: Vec<FieldDecl>, composes: &[&str], methods: Vec<Function>) -> Item {
        Item::Type(TypeDecl {
            name: ident(name),
            shape: Shape::Struct,
            capability: Capability::Owned,
            fields,
            composes: composes.iter().map(|c| ident(c)).collect(),
            methods,
            span: Span::dummy(),
        })
    }

    pub fn trait_decl(name: &str, composes: &[&str], methods: Vec<Function>) -> Item {
        Item::Trait(TraitDecl {
            name: ident(name),
            composes: composes.iter().map(|c| ident(c)).collect(),
            methods,
            span: Span::dummy(),
        })
    }

    pub fn extension(name: &str, target: TypeExpr, method: Function) -> Item {
        Item::Extension(ExtensionDecl { name: ident(name), target, method, span: Span::dummy() })
    }

    pub fn alias(name: &str, base: TypeExpr, bound: Option<(Option<f64>, Option<f64>, bool)>) -> Item {
        Item::Alias(AliasDecl {
            name: ident(name),
            base,
            bound: bound.map(|(start, end, inclusive)| RangeBound { start, end, inclusive, span: Span::dummy() }),
            span: Span::dummy(),
        })
    }

    pub fn function(f: Function) -> Item {
        Item::Function(f)
    }

    pub fn program(items: Vec<Item>) -> Program {
        Program { items }
    }

    /// `type Vehicle: {} + composes = { wheels: num, make: string, model: string }`
    pub fn vehicle(composes: &[&str], methods: Vec<Function>) -> Item {
        type_decl(
            "Vehicle",
            vec![field_decl("wheels", ty("num")), field_decl("make", ty("string")), field_decl("model", ty("string"))],
            composes,
            methods,
        )
    }

    /// `Vehicle{4, make, model}`
    pub fn new_vehicle(make: &str, model: &str) -> Expr {
        struct_lit("Vehicle", vec![int(4), string(make), string(model)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_binding_without_spans() {
        let json = r#"{
            "Binding": {
                "mode": "Const",
                "name": { "name": "ford" },
                "value": { "StructLit": {
                    "name": { "name": "Vehicle" },
                    "fields": { "Positional": [
                        { "Literal": { "Int": { "value": 4 } } },
                        { "Literal": { "String": { "value": "Ford" } } }
                    ] }
                } }
            }
        }"#;
        let stmt: Stmt = serde_json::from_str(json).unwrap();
        match stmt {
            Stmt::Binding { mode, name, value, .. } => {
                assert_eq!(mode, BindingMode::Const);
                assert_eq!(name.name, "ford");
                assert!(matches!(value, Expr::StructLit { fields: StructFields::Positional(ref f), .. } if f.len() == 2));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_place_root() {
        use build::*;
        let place = index(field(var("y"), "items"), int(0));
        assert_eq!(place.place_root().map(|i| i.name.as_str()), Some("y"));
        assert!(copy(var("y")).place_root().is_none());
    }
}
