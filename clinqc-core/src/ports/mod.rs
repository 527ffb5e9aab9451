// clinqc-core/src/ports/mod.rs

pub mod schema;
pub mod store;

pub use schema::FieldResolver;
pub use store::{DataStore, PlanRow};
