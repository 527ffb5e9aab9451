// clinqc-core/src/infrastructure/adapters/mod.rs

pub mod duckdb;
pub mod memory;

pub use duckdb::DuckDbStore;
pub use memory::{MemoryRecord, MemoryStore};
