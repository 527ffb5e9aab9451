// clinqc-core/src/domain/qc/mod.rs

pub mod run;
pub mod violation;

// Re-exports
pub use run::{QcRun, RuleOutcome, RunStatus, RunTrigger};
pub use violation::{ResolutionState, Violation};
