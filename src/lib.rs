//! ttlang analysis core
//!
//! Static ownership, mutability and trait-resolution checking over an AST
//! handed in by an external parser.

pub mod feedback;
pub mod frontend;
pub mod types;
pub mod utils;

pub use frontend::semantic::{analyze, Analysis, AnalysisOptions, UnitReport};
pub use frontend::mutability::ConstTransferPolicy;
pub use utils::{Error, ErrorKind, Result};
