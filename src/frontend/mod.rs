//! Frontend module - AST and the semantic passes

pub mod ast;
pub mod alias;
pub mod bindings;
pub mod mutability;
pub mod traits;
pub mod semantic;
