// clinqc-core/src/application/mod.rs

pub mod cache;
pub mod compiler;
pub mod engine;
pub mod realtime;

// --- RE-EXPORTS (FACADE PATTERN) ---
// Le CLI consomme `clinqc_core::application::{...}` sans connaître la
// structure interne des fichiers.

pub use cache::{CacheStats, CachedValidator, LoadReport, ValidatorCache};
pub use compiler::{compile, CompiledRule};
pub use engine::{CancelToken, QcEngine, ViolationFilter};
pub use realtime::{validate_field, validate_form, FieldOutcome, FormValidationResult};
