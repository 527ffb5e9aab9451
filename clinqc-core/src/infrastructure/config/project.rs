// clinqc-core/src/infrastructure/config/project.rs

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::domain::schema::DatasetSchema;
use crate::infrastructure::error::InfrastructureError;

/// Une source tabulaire à enregistrer dans le store avant un run batch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            path: default_db_path(),
            sources: Vec::new(),
        }
    }
}

fn default_engine() -> String {
    "duckdb".to_string()
}

fn default_db_path() -> String {
    ":memory:".to_string()
}

fn default_target_path() -> String {
    "target".to_string()
}

fn default_rules_paths() -> Vec<String> {
    vec!["rules".to_string()]
}

/// Configuration principale d'un projet de QC. Le schéma du dataset vit ici
/// (le cœur ne l'infère jamais) ; les règles vivent dans des fichiers
/// satellites découverts via `rules_paths`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default = "default_target_path")]
    pub target_path: String,
    #[serde(default = "default_rules_paths")]
    pub rules_paths: Vec<String>,
    pub dataset: DatasetSchema,
    #[serde(default)]
    pub store: StoreConfig,
}

impl ProjectConfig {
    /// Emplacement de l'état persisté du moteur QC (violations + runs).
    pub fn qc_state_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.target_path).join("qc_state.json")
    }
}

// --- LOADER ---

#[instrument(skip(project_dir))]
pub fn load_project_config(project_dir: &Path) -> Result<ProjectConfig, InfrastructureError> {
    // 1. Découverte du fichier principal
    let config_path = find_main_config(project_dir)?;
    info!(path = ?config_path, "Loading project config");

    // 2. Chargement YAML
    let content = fs::read_to_string(&config_path)?;
    let mut config: ProjectConfig = serde_yaml::from_str(&content).map_err(|e| {
        InfrastructureError::ConfigError(format!(
            "Failed to parse project config YAML at {:?}: {}",
            config_path, e
        ))
    })?;

    // 3. Override via Variables d'Environnement (Pattern 'Layering')
    // Permet de faire: CLINQC_TARGET_PATH=/tmp/build clinqc run
    apply_env_overrides(&mut config);

    Ok(config)
}

fn find_main_config(root: &Path) -> Result<PathBuf, InfrastructureError> {
    let candidates = ["clinqc.yaml", "clinqc.yml"];
    for filename in candidates {
        let p = root.join(filename);
        if p.exists() {
            return Ok(p);
        }
    }
    Err(InfrastructureError::ConfigNotFound(format!(
        "No configuration file found in {:?}. Checked: {:?}",
        root, candidates
    )))
}

fn apply_env_overrides(config: &mut ProjectConfig) {
    if let Ok(val) = std::env::var("CLINQC_TARGET_PATH") {
        info!(old = ?config.target_path, new = ?val, "Overriding target path via ENV");
        config.target_path = val;
    }
    if let Ok(val) = std::env::var("CLINQC_STORE_PATH") {
        info!(old = ?config.store.path, new = ?val, "Overriding store path via ENV");
        config.store.path = val;
    }
}
