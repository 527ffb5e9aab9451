// clinqc-core/src/infrastructure/config/mod.rs

pub mod project;
pub mod rules;

pub use project::{load_project_config, ProjectConfig, SourceConfig, StoreConfig};
pub use rules::discover_rules;
