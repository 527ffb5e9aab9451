// clinqc-core/src/domain/codegen/mod.rs

pub mod batch;
pub mod realtime;
pub mod sql;

// Re-exports
pub use batch::{compile_batch, IndexHint, PlanShape, QueryPlan};
pub use realtime::{compile_realtime, FieldValues, ValidationResult, Validator};
pub use sql::render_sql;
