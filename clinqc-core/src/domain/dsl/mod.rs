// clinqc-core/src/domain/dsl/mod.rs

pub mod ast;
pub mod parser;
pub mod semantic;
pub mod token;

// Re-exports
pub use ast::{BinaryOp, Expr, ToleranceKind, UnaryOp};
pub use parser::parse;
pub use token::SyntaxError;
