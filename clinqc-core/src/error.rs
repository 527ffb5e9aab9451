// clinqc-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClinqcError {
    // --- ERREURS DU DOMAINE (DSL, Semantic, Codegen, Workflow) ---
    #[error(transparent)]
    Domain(#[from] DomainError),

    // --- ERREURS D'INFRASTRUCTURE (IO, DB, Parsing) ---
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    // --- ERREURS GÉNÉRIQUES / APPLICATIVES ---
    #[error("Internal Error: {0}")]
    InternalError(String),

    #[error("A QC run is already in progress")]
    RunInProgress,
}

// Manual implementation to avoid duplicate enum variant but keep ergonomics
impl From<std::io::Error> for ClinqcError {
    fn from(err: std::io::Error) -> Self {
        ClinqcError::Infrastructure(InfrastructureError::Io(err))
    }
}
