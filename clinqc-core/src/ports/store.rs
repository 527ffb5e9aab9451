// clinqc-core/src/ports/store.rs

// This file defines what the QC engine needs from a storage engine, without
// knowing how it's done. The concrete store (DuckDB file, in-memory tables,
// a remote warehouse...) is an external collaborator behind this trait.

use crate::domain::codegen::batch::QueryPlan;
use crate::domain::value::Value;
use crate::error::ClinqcError;
use async_trait::async_trait;

/// One row returned by an executed query plan: a record the rule flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRow {
    pub subject_id: String,
    pub visit: Option<String>,
    pub observed: Value,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Execute a compiled query plan and return every violating row.
    async fn execute_plan(&self, plan: &QueryPlan) -> Result<Vec<PlanRow>, ClinqcError>;

    /// Register a CSV file as the named table (setup for file-based stores).
    async fn register_source(&self, name: &str, path: &str) -> Result<(), ClinqcError>;

    fn engine_name(&self) -> &str;
}
