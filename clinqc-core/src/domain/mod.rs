// clinqc-core/src/domain/mod.rs

pub mod codegen;
pub mod dsl;
pub mod error;
pub mod qc;
pub mod rule;
pub mod schema;
pub mod value;

// Re-exports
pub use error::{DomainError, SemanticError};
pub use rule::{Rule, RuleContext, Severity};
pub use schema::{DatasetSchema, FieldType};
pub use value::Value;
