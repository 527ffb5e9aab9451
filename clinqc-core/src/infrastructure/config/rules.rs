// clinqc-core/src/infrastructure/config/rules.rs
//
// Découverte des fichiers de règles. Les règles sont la propriété de
// l'application hôte ; ce module ne fait que les lire et les dédupliquer.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;
use walkdir::WalkDir;

use crate::domain::rule::Rule;
use crate::infrastructure::config::ProjectConfig;
use crate::infrastructure::error::InfrastructureError;

#[derive(Debug, Deserialize)]
struct RulesFile {
    rules: Vec<Rule>,
}

/// Scanne les `rules_paths` du projet et charge toutes les règles des
/// fichiers .yml/.yaml trouvés. Un id de règle dupliqué est une erreur de
/// configuration, pas un avertissement.
pub fn discover_rules(
    project_dir: &Path,
    config: &ProjectConfig,
) -> Result<Vec<Rule>, InfrastructureError> {
    let mut rules = Vec::new();

    for rules_path in &config.rules_paths {
        let dir = project_dir.join(rules_path);
        if !dir.exists() {
            continue;
        }
        println!("🕵️  Scanning rule files in: {:?}", dir);

        let walker = WalkDir::new(&dir).follow_links(true).sort_by_file_name();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if !is_yaml {
                continue;
            }

            let content = fs::read_to_string(path)?;
            let file: RulesFile = serde_yaml::from_str(&content).map_err(|e| {
                InfrastructureError::ConfigError(format!(
                    "Failed to parse rule file {:?}: {}",
                    path, e
                ))
            })?;
            rules.extend(file.rules);
        }
    }

    let mut seen = HashSet::new();
    for rule in &rules {
        if !seen.insert(rule.id.as_str()) {
            return Err(InfrastructureError::ConfigError(format!(
                "Duplicate rule id '{}' across rule files",
                rule.id
            )));
        }
    }

    info!("📝 {} rule(s) discovered", rules.len());
    Ok(rules)
}
